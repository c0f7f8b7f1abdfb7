//! Source discovery and file watching.
//!
//! Discovery walks the workspace with the `ignore` crate so `.gitignore`
//! rules apply. The watcher wraps `notify-debouncer-full`: bursts of writes
//! are merged, renames are tracked by file id, and only events touching
//! definitions source files come through.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use notify::event::{DataChange, ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{
    new_debouncer, DebounceEventResult, DebouncedEvent, Debouncer, RecommendedCache,
};

use crate::config::Config;
use crate::parse::normalize_path;

/// A change to a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    /// (old path, new path)
    Renamed(PathBuf, PathBuf),
}

impl WatchEvent {
    /// The path the workspace should look at after this event.
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Created(p) | WatchEvent::Modified(p) | WatchEvent::Deleted(p) => p,
            WatchEvent::Renamed(_, new) => new,
        }
    }
}

/// Check if an event kind represents actual content changes worth processing.
/// Filters out noisy events like metadata-only changes and access events.
fn is_meaningful_event(kind: &EventKind) -> bool {
    match kind {
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        // "Any" data change is often spurious with no real modification
        EventKind::Modify(ModifyKind::Data(DataChange::Any)) => false,
        EventKind::Access(_) => false,
        EventKind::Other => false,
        _ => true,
    }
}

/// Debounced watcher over a workspace root.
///
/// # Example
/// ```ignore
/// let mut watcher = SourceWatcher::new(&root, &config)?;
/// watcher.start()?;
///
/// loop {
///     let events = watcher.wait_timeout(Duration::from_secs(1));
///     if !events.is_empty() {
///         workspace.rebuild().await?;
///     }
/// }
/// ```
pub struct SourceWatcher {
    debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    receiver: Receiver<DebounceEventResult>,
    root: PathBuf,
    extensions: Vec<String>,
}

impl SourceWatcher {
    /// Create a watcher using the debounce window and extensions from `config`.
    pub fn new(root: &Path, config: &Config) -> Result<Self, notify::Error> {
        Self::with_debounce(root, config, Duration::from_millis(config.debounce_ms))
    }

    pub fn with_debounce(
        root: &Path,
        config: &Config,
        debounce: Duration,
    ) -> Result<Self, notify::Error> {
        let (tx, rx) = std::sync::mpsc::channel();

        let debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            let _ = tx.send(result);
        })?;

        Ok(Self {
            debouncer,
            receiver: rx,
            root: root.to_path_buf(),
            extensions: config.extensions.clone(),
        })
    }

    /// Start watching the root directory recursively.
    pub fn start(&mut self) -> Result<(), notify::Error> {
        self.debouncer
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| notify::Error::generic(&e.to_string()))
    }

    pub fn stop(&mut self) -> Result<(), notify::Error> {
        self.debouncer
            .unwatch(&self.root)
            .map_err(|e| notify::Error::generic(&e.to_string()))
    }

    /// Drain every event that is ready without blocking.
    pub fn poll_events(&self) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        while let Ok(result) = self.receiver.try_recv() {
            self.collect(result, &mut events);
        }
        events
    }

    /// Block until at least one batch arrives or `timeout` passes.
    pub fn wait_timeout(&self, timeout: Duration) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => self.collect(result, &mut events),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return events,
        }
        events.extend(self.poll_events());
        events
    }

    fn collect(&self, result: DebounceEventResult, events: &mut Vec<WatchEvent>) {
        match result {
            Ok(batch) => events.extend(batch.into_iter().filter_map(|e| self.convert(e))),
            Err(errors) => {
                for error in errors {
                    tracing::warn!("Watch error: {:?}", error);
                }
            }
        }
    }

    fn convert(&self, event: DebouncedEvent) -> Option<WatchEvent> {
        convert_event(event.kind, &event.paths, &self.extensions)
    }
}

fn convert_event(kind: EventKind, paths: &[PathBuf], extensions: &[String]) -> Option<WatchEvent> {
    if !is_meaningful_event(&kind) {
        return None;
    }

    if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = kind {
        if let [old, new] = paths {
            if is_source_file(old, extensions) || is_source_file(new, extensions) {
                return Some(WatchEvent::Renamed(old.clone(), new.clone()));
            }
        }
        return None;
    }

    let path = paths.iter().find(|p| is_source_file(p, extensions))?.clone();
    match kind {
        EventKind::Create(_) => Some(WatchEvent::Created(path)),
        EventKind::Modify(_) | EventKind::Any => Some(WatchEvent::Modified(path)),
        EventKind::Remove(_) => Some(WatchEvent::Deleted(path)),
        _ => None,
    }
}

/// Whether `path` ends in one of `extensions` (case-insensitive).
pub fn is_source_file(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
}

/// Find every definitions source file under `root`.
///
/// Respects `.gitignore` (nested, global and `.git/info/exclude`) when the
/// config asks for it, skips excluded directories and stops after
/// `max_files`. Paths come back normalized and sorted.
pub fn find_source_files(root: &Path, config: &Config) -> std::io::Result<Vec<PathBuf>> {
    use ignore::overrides::OverrideBuilder;
    use ignore::WalkBuilder;

    if !root.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("workspace root is not a directory: {}", root.display()),
        ));
    }

    let mut override_builder = OverrideBuilder::new(root);
    for dir in config.excluded_dirs() {
        let pattern = format!("!{}/", dir);
        if let Err(e) = override_builder.add(&pattern) {
            tracing::warn!("Invalid exclude pattern '{}': {}", pattern, e);
        }
    }
    let overrides = override_builder
        .build()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let respect = config.respect_gitignore;
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(true)
        .git_ignore(respect)
        .git_global(respect)
        .git_exclude(respect)
        .require_git(false)
        .ignore(respect)
        .parents(respect)
        .overrides(overrides);

    let mut files = Vec::new();
    for entry in builder.build() {
        match entry {
            Ok(entry) => {
                let path = entry.path();
                if path.is_file() && config.is_source_file(path) {
                    files.push(normalize_path(path));
                }
            }
            Err(err) => tracing::warn!("Error walking directory: {}", err),
        }
    }

    files.sort();
    if let Some(max) = config.max_files {
        if files.len() > max {
            tracing::warn!("Found {} source files, indexing the first {}", files.len(), max);
            files.truncate(max);
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, MetadataKind, RemoveKind};
    use std::fs;

    fn mql() -> Vec<String> {
        vec!["mql".to_string()]
    }

    #[test]
    fn test_is_source_file() {
        assert!(is_source_file(Path::new("defs/shop.mql"), &mql()));
        assert!(is_source_file(Path::new("defs/Shop.MQL"), &mql()));
        assert!(!is_source_file(Path::new("defs/shop.rs"), &mql()));
        assert!(!is_source_file(Path::new("mql"), &mql()));
    }

    #[test]
    fn test_filters_noise() {
        let path = vec![PathBuf::from("a.mql")];
        for kind in [
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            EventKind::Modify(ModifyKind::Data(DataChange::Any)),
            EventKind::Access(AccessKind::Any),
            EventKind::Other,
        ] {
            assert_eq!(convert_event(kind, &path, &mql()), None);
        }
    }

    #[test]
    fn test_converts_content_events() {
        let path = vec![PathBuf::from("a.mql")];
        assert_eq!(
            convert_event(EventKind::Create(CreateKind::File), &path, &mql()),
            Some(WatchEvent::Created(PathBuf::from("a.mql")))
        );
        assert_eq!(
            convert_event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &path, &mql()),
            Some(WatchEvent::Modified(PathBuf::from("a.mql")))
        );
        assert_eq!(
            convert_event(EventKind::Remove(RemoveKind::File), &path, &mql()),
            Some(WatchEvent::Deleted(PathBuf::from("a.mql")))
        );
    }

    #[test]
    fn test_ignores_other_extensions() {
        let path = vec![PathBuf::from("notes.txt")];
        assert_eq!(convert_event(EventKind::Create(CreateKind::File), &path, &mql()), None);
    }

    #[test]
    fn test_rename_into_source_file() {
        let paths = vec![PathBuf::from("draft.txt"), PathBuf::from("shop.mql")];
        let event = convert_event(EventKind::Modify(ModifyKind::Name(RenameMode::Both)), &paths, &mql());
        assert_eq!(
            event,
            Some(WatchEvent::Renamed(PathBuf::from("draft.txt"), PathBuf::from("shop.mql")))
        );
        assert_eq!(event.unwrap().path(), Path::new("shop.mql"));
    }

    #[test]
    fn test_find_source_files_respects_exclusions() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("defs/nested")).unwrap();
        fs::create_dir_all(root.join("node_modules")).unwrap();
        fs::create_dir_all(root.join("generated")).unwrap();
        fs::write(root.join("defs/a.mql"), "CREATE TAG A;").unwrap();
        fs::write(root.join("defs/nested/b.mql"), "CREATE TAG B;").unwrap();
        fs::write(root.join("defs/readme.txt"), "text").unwrap();
        fs::write(root.join("node_modules/c.mql"), "CREATE TAG C;").unwrap();
        fs::write(root.join("generated/d.mql"), "CREATE TAG D;").unwrap();

        let config = Config {
            exclude_dirs: vec!["generated".to_string()],
            ..Config::default()
        };
        let files = find_source_files(root, &config).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.mql", "b.mql"]);
    }

    #[test]
    fn test_find_source_files_respects_gitignore() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join(".gitignore"), "scratch.mql\n").unwrap();
        fs::write(root.join("keep.mql"), "").unwrap();
        fs::write(root.join("scratch.mql"), "").unwrap();

        let files = find_source_files(root, &Config::default()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("keep.mql"));

        let config = Config {
            respect_gitignore: false,
            ..Config::default()
        };
        assert_eq!(find_source_files(root, &config).unwrap().len(), 2);
    }

    #[test]
    fn test_find_source_files_caps_count() {
        let dir = tempfile::TempDir::new().unwrap();
        for name in ["a", "b", "c"] {
            fs::write(dir.path().join(format!("{name}.mql")), "").unwrap();
        }
        let config = Config {
            max_files: Some(2),
            ..Config::default()
        };
        let files = find_source_files(dir.path(), &config).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.mql"));
    }

    #[test]
    fn test_find_source_files_missing_root() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(find_source_files(&dir.path().join("absent"), &Config::default()).is_err());
    }

    #[test]
    fn test_watcher_start_stop() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut watcher = SourceWatcher::new(dir.path(), &Config::default()).unwrap();
        assert!(watcher.start().is_ok());
        assert!(watcher.poll_events().is_empty());
        assert!(watcher.wait_timeout(Duration::from_millis(50)).is_empty());
        assert!(watcher.stop().is_ok());
    }

    #[test]
    fn test_watcher_detects_source_changes() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut watcher =
            SourceWatcher::with_debounce(dir.path(), &Config::default(), Duration::from_millis(100))
                .unwrap();
        watcher.start().unwrap();

        let test_file = dir.path().join("shop.mql");
        fs::write(&test_file, "CREATE TAG Shop;\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        std::thread::sleep(Duration::from_millis(400));
        let events = watcher.poll_events();

        // macOS reports /private/var for /var
        let expected = test_file.canonicalize().unwrap_or(test_file.clone());
        assert!(
            events.iter().any(|e| {
                let p = e.path();
                p.canonicalize().unwrap_or(p.to_path_buf()) == expected
            }),
            "Expected event for {:?}, got {:?}",
            test_file,
            events
        );
        assert!(events
            .iter()
            .all(|e| e.path().extension().is_some_and(|x| x == "mql")));
    }
}
