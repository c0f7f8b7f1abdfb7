//! Workspace rebuilds and published snapshots.
//!
//! A rebuild discovers every source file, reads them concurrently, parses
//! each one, builds a fresh [`SymbolTable`] and resolves all references.
//! The result is an immutable [`Snapshot`]. Readers always see one complete
//! snapshot: the current one is swapped under a lock only when a rebuild
//! finishes, and a rebuild that started earlier than the published one is
//! discarded.
//!
//! File access goes through [`SourceProvider`] so the same pipeline runs
//! over the file system ([`DiskSource`]) or in-memory text ([`MemorySource`]).

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::completion::{self, Candidate};
use crate::config::Config;
use crate::diagnostics::{sort_and_cap, Diagnostic, Severity};
use crate::fuzzy::{self, Suggestion};
use crate::parse::{normalize_path, parse_file, ParseResult};
use crate::resolve::{build_reference_index, sequence_at, ReferenceIndex};
use crate::table::SymbolTable;
use crate::watch::find_source_files;
use crate::{Definition, Location, Result};

/// Where a workspace gets its files from.
pub trait SourceProvider: Send + Sync + 'static {
    /// List the source files of the workspace rooted at `root`.
    fn discover(&self, root: &Path, config: &Config) -> io::Result<Vec<PathBuf>>;

    /// Read one file's text.
    fn read(&self, path: &Path) -> impl Future<Output = io::Result<String>> + Send;
}

/// Files on disk, discovered with gitignore support.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskSource;

impl SourceProvider for DiskSource {
    fn discover(&self, root: &Path, config: &Config) -> io::Result<Vec<PathBuf>> {
        find_source_files(root, config)
    }

    fn read(&self, path: &Path) -> impl Future<Output = io::Result<String>> + Send {
        let path = path.to_path_buf();
        async move { tokio::fs::read_to_string(path).await }
    }
}

/// Files held in memory, for tests and editor buffers.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: BTreeMap<PathBuf, String>,
    unreadable: BTreeSet<PathBuf>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, text: impl Into<String>) {
        self.files.insert(normalize_path(path.as_ref()), text.into());
    }

    /// Register a file that is discovered but fails to read.
    pub fn with_unreadable(mut self, path: impl AsRef<Path>) -> Self {
        self.unreadable.insert(normalize_path(path.as_ref()));
        self
    }
}

impl SourceProvider for MemorySource {
    fn discover(&self, root: &Path, config: &Config) -> io::Result<Vec<PathBuf>> {
        let root = normalize_path(root);
        let mut files: Vec<PathBuf> = self
            .files
            .keys()
            .chain(self.unreadable.iter())
            .filter(|p| p.starts_with(&root) && config.is_source_file(p))
            .cloned()
            .collect();
        files.sort();
        files.dedup();
        if let Some(max) = config.max_files {
            files.truncate(max);
        }
        Ok(files)
    }

    fn read(&self, path: &Path) -> impl Future<Output = io::Result<String>> + Send {
        let result = if self.unreadable.contains(path) {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "unreadable"))
        } else {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
        };
        std::future::ready(result)
    }
}

/// A file that was discovered but could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadFailure {
    pub file: PathBuf,
    pub message: String,
}

/// Counts describing a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub version: u64,
    pub files: usize,
    pub definitions: usize,
    pub references: usize,
    pub errors: usize,
    pub warnings: usize,
    pub unreadable: usize,
}

/// One complete, immutable view of the workspace.
#[derive(Debug, Default)]
pub struct Snapshot {
    version: u64,
    table: SymbolTable,
    references: ReferenceIndex,
    diagnostics: BTreeMap<PathBuf, Vec<Diagnostic>>,
    read_failures: Vec<ReadFailure>,
}

impl Snapshot {
    /// The snapshot published before the first rebuild.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from parsed files.
    ///
    /// Fails only when the import graph has a cycle.
    pub fn build(
        version: u64,
        parsed: Vec<ParseResult>,
        read_failures: Vec<ReadFailure>,
        max_diagnostics_per_file: usize,
    ) -> Result<Self> {
        let table = SymbolTable::build(&parsed)?;

        let mut diagnostics: BTreeMap<PathBuf, Vec<Diagnostic>> = BTreeMap::new();
        for file in &parsed {
            let mut diags = file.warnings.clone();
            for import in file.imports() {
                if !table.contains_file(&import.path) {
                    diags.push(Diagnostic::warning(
                        import.location.clone(),
                        format!("Imported file not found: {}", import.path.display()),
                    ));
                }
            }
            diagnostics.insert(file.file.clone(), diags);
        }

        let references = build_reference_index(
            &table,
            parsed.iter().map(|p| (p.file.as_path(), p.lines.as_slice())),
            |file, diagnostic| diagnostics.entry(file.to_path_buf()).or_default().push(diagnostic),
        );

        for diags in diagnostics.values_mut() {
            sort_and_cap(diags, max_diagnostics_per_file);
        }

        Ok(Self {
            version,
            table,
            references,
            diagnostics,
            read_failures,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn table(&self) -> &SymbolTable {
        &self.table
    }

    pub fn references(&self) -> &ReferenceIndex {
        &self.references
    }

    /// Diagnostics for every file in the snapshot (empty lists included).
    pub fn diagnostics(&self) -> &BTreeMap<PathBuf, Vec<Diagnostic>> {
        &self.diagnostics
    }

    pub fn diagnostics_for(&self, file: &Path) -> &[Diagnostic] {
        self.diagnostics.get(file).map(|d| d.as_slice()).unwrap_or(&[])
    }

    pub fn read_failures(&self) -> &[ReadFailure] {
        &self.read_failures
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .values()
            .flatten()
            .filter(|d| d.severity == severity)
            .count()
    }

    pub fn summary(&self) -> Summary {
        Summary {
            version: self.version,
            files: self.table.files().count(),
            definitions: self.table.len(),
            references: self.references.len(),
            errors: self.count(Severity::Error),
            warnings: self.count(Severity::Warning),
            unreadable: self.read_failures.len(),
        }
    }

    /// Declaration site for a full name.
    pub fn resolve_reference(&self, full_name: &str) -> Option<&Location> {
        let name = full_name.trim_start_matches(crate::resolve::SIGIL);
        self.table.get_definition_location(name)
    }

    /// Every `?` reference to a full name.
    pub fn find_references(&self, full_name: &str) -> &[Location] {
        self.references.find(full_name.trim_start_matches(crate::resolve::SIGIL))
    }

    pub fn children(&self, full_name: &str) -> Vec<&Definition> {
        self.table.children(full_name)
    }

    /// Definition named by the dotted word under a cursor.
    ///
    /// `character` is a 0-indexed character column within `line`.
    pub fn definition_at(&self, line: &str, character: usize) -> Option<&Definition> {
        let sequence = sequence_at(line, character)?;
        self.table.lookup(sequence.name())
    }

    pub fn suggest_completions(&self, typed: &str) -> Vec<Candidate> {
        completion::suggest_completions(&self.table, typed)
    }

    pub fn search_node(&self, input: &str) -> Option<&Definition> {
        completion::search_node(&self.table, input)
    }

    /// Defined full names close to an unresolved term.
    pub fn suggest_fixes(&self, term: &str) -> Vec<Suggestion> {
        fuzzy::similar_full_names(&self.table, term)
    }
}

/// A workspace root plus its most recently published snapshot.
pub struct Workspace<S: SourceProvider = DiskSource> {
    root: PathBuf,
    config: Config,
    source: Arc<S>,
    current: RwLock<Arc<Snapshot>>,
    sequence: AtomicU64,
}

impl Workspace<DiskSource> {
    /// Open a workspace on disk, loading `.parsaur.toml` from `root`.
    pub fn open(root: &Path) -> Self {
        let config = Config::load(root);
        Self::new(root, config, DiskSource)
    }
}

impl<S: SourceProvider> Workspace<S> {
    pub fn new(root: &Path, config: Config, source: S) -> Self {
        Self {
            root: normalize_path(root),
            config,
            source: Arc::new(source),
            current: RwLock::new(Arc::new(Snapshot::empty())),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The most recently published snapshot.
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.current.read().await)
    }

    /// Reserve the version number for a new rebuild.
    pub fn next_version(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Rebuild from the source provider and publish the result.
    ///
    /// Returns the snapshot that is current afterwards, which is a newer
    /// one if a later rebuild finished first. On error (discovery failure
    /// or an import cycle) the previous snapshot stays published.
    pub async fn rebuild(&self) -> Result<Arc<Snapshot>> {
        let version = self.next_version();
        let files = self.source.discover(&self.root, &self.config)?;
        debug!("Rebuild {} over {} files", version, files.len());

        let (parsed, failures) = self.load(files).await;
        let snapshot = Snapshot::build(version, parsed, failures, self.config.max_diagnostics_per_file)
            .inspect_err(|e| warn!("Rebuild {} failed: {}", version, e))?;

        Ok(self.publish(Arc::new(snapshot)).await)
    }

    /// Make `snapshot` current unless a newer one is already published.
    pub async fn publish(&self, snapshot: Arc<Snapshot>) -> Arc<Snapshot> {
        let mut current = self.current.write().await;
        if snapshot.version() > current.version() {
            info!(
                "Published snapshot {} ({} definitions)",
                snapshot.version(),
                snapshot.table().len()
            );
            *current = snapshot;
        } else {
            debug!(
                "Discarding snapshot {} (current is {})",
                snapshot.version(),
                current.version()
            );
        }
        Arc::clone(&*current)
    }

    async fn load(&self, files: Vec<PathBuf>) -> (Vec<ParseResult>, Vec<ReadFailure>) {
        let mut tasks = JoinSet::new();
        for path in files {
            let source = Arc::clone(&self.source);
            tasks.spawn(async move {
                let text = source.read(&path).await;
                (path, text)
            });
        }

        let mut parsed = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((path, Ok(text))) => parsed.push(parse_file(&path, &text)),
                Ok((path, Err(e))) => {
                    warn!("Failed to read {:?}: {}", path, e);
                    failures.push(ReadFailure {
                        file: path,
                        message: e.to_string(),
                    });
                }
                Err(e) => warn!("Read task failed: {}", e),
            }
        }

        parsed.sort_by(|a, b| a.file.cmp(&b.file));
        failures.sort_by(|a, b| a.file.cmp(&b.file));
        (parsed, failures)
    }
}
