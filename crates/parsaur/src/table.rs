//! The workspace symbol table.
//!
//! A table is built in one pass from the per-file [`ParseResult`]s of a
//! rebuild and is never modified afterwards. Imports are spliced during the
//! build: every `IMPORT` inside a declaration's scope instantiates the
//! imported file's top-level declarations again underneath that declaration,
//! so a file imported from two places yields two independent sets of
//! definitions with different full names.
//!
//! Files that are imported from inside some scope are not instantiated at
//! top level. Import recursion is guarded by the stack of files currently
//! being instantiated; re-entering a file on that stack fails the build with
//! [`IndexError::CyclicImport`].

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::parse::ParseResult;
use crate::{qualify, Definition, DefinitionId, IndexError, Location, Result};

/// Identity of a definition: where it was declared and under which context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DefinitionKey {
    pub context: String,
    pub name: String,
    pub file: PathBuf,
}

impl DefinitionKey {
    pub fn new(context: impl Into<String>, name: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            context: context.into(),
            name: name.into(),
            file: file.into(),
        }
    }

    pub fn full_name(&self) -> String {
        qualify(&self.context, &self.name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    definitions: Vec<Definition>,
    keys: HashMap<DefinitionKey, DefinitionId>,
    /// Full name -> every instance with that name, in build order
    by_full_name: HashMap<String, Vec<DefinitionId>>,
    /// Every file in the build, including those that declare nothing
    files: BTreeSet<PathBuf>,
}

impl SymbolTable {
    /// Build a table from the parsed files of a workspace.
    ///
    /// Input order does not matter; files are processed in path order so
    /// the same workspace always produces the same table.
    pub fn build(files: &[ParseResult]) -> Result<Self> {
        let mut ordered: Vec<&ParseResult> = files.iter().collect();
        ordered.sort_by(|a, b| a.file.cmp(&b.file));

        let by_file: HashMap<&Path, &ParseResult> =
            ordered.iter().map(|f| (f.file.as_path(), *f)).collect();

        let spliced: HashSet<&Path> = ordered
            .iter()
            .flat_map(|f| f.imports())
            .map(|i| i.path.as_path())
            .filter(|p| by_file.contains_key(p))
            .collect();

        let mut builder = Builder {
            table: SymbolTable::default(),
            by_file,
            active: Vec::new(),
            instantiated: HashSet::new(),
        };
        builder.table.files = ordered.iter().map(|f| f.file.clone()).collect();

        for file in &ordered {
            if !spliced.contains(file.file.as_path()) {
                builder.instantiate_file(file, None, "")?;
            }
        }

        // Whatever is left is only reachable through an import cycle
        for file in &ordered {
            if !builder.instantiated.contains(file.file.as_path()) {
                builder.instantiate_file(file, None, "")?;
            }
        }

        Ok(builder.table)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn get(&self, id: DefinitionId) -> Option<&Definition> {
        self.definitions.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Definition> {
        self.definitions.iter()
    }

    /// The definition that owns a key (the first one declared with it).
    pub fn get_by_key(&self, key: &DefinitionKey) -> Option<&Definition> {
        self.keys.get(key).and_then(|id| self.get(*id))
    }

    /// First definition with the given full name.
    pub fn lookup(&self, full_name: &str) -> Option<&Definition> {
        self.by_full_name
            .get(full_name)
            .and_then(|ids| ids.first())
            .and_then(|id| self.get(*id))
    }

    /// Every definition with the given full name.
    pub fn lookup_all(&self, full_name: &str) -> Vec<&Definition> {
        self.by_full_name
            .get(full_name)
            .map(|ids| ids.iter().filter_map(|id| self.get(*id)).collect())
            .unwrap_or_default()
    }

    pub fn contains_full_name(&self, full_name: &str) -> bool {
        self.by_full_name.contains_key(full_name)
    }

    /// Declaration site of the first definition with the given full name.
    pub fn get_definition_location(&self, full_name: &str) -> Option<&Location> {
        self.lookup(full_name).map(|d| &d.location)
    }

    /// Children of the first definition with the given full name.
    pub fn children(&self, full_name: &str) -> Vec<&Definition> {
        self.lookup(full_name)
            .map(|d| d.child_entries.iter().filter_map(|id| self.get(*id)).collect())
            .unwrap_or_default()
    }

    /// Top-level definitions.
    pub fn roots(&self) -> impl Iterator<Item = &Definition> {
        self.definitions
            .iter()
            .filter(|d| d.parent.is_none() && !d.is_self_reference())
    }

    /// Definitions declared in a file, including spliced instances.
    pub fn definitions_in_file(&self, file: &Path) -> Vec<&Definition> {
        self.definitions.iter().filter(|d| d.location.file == file).collect()
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|p| p.as_path())
    }

    pub fn contains_file(&self, file: &Path) -> bool {
        self.files.contains(file)
    }

    /// Distinct full names in sorted order.
    pub fn full_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_full_name.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Find definitions whose full name matches a pattern.
    ///
    /// `*` matches any run of characters. Without a `*` the pattern matches
    /// full names ending in `pattern` at a segment boundary.
    pub fn search(&self, pattern: &str) -> Vec<&Definition> {
        let mut seen = BTreeMap::new();
        for def in &self.definitions {
            if !def.is_self_reference() && matches_pattern(&def.full_name, pattern) {
                seen.entry(def.full_name.as_str()).or_insert(def);
            }
        }
        seen.into_values().collect()
    }

    fn push(&mut self, def: Definition) -> DefinitionId {
        let id = def.id;
        self.keys
            .entry(DefinitionKey::new(&def.context, &def.name, &def.location.file))
            .or_insert(id);
        if !def.is_self_reference() {
            self.by_full_name.entry(def.full_name.clone()).or_default().push(id);
        }
        self.definitions.push(def);
        id
    }

    fn attach_child(&mut self, parent: DefinitionId, child: DefinitionId) {
        let name = self.definitions[child.index()].name.clone();
        let parent = &mut self.definitions[parent.index()];
        parent.children.push(name);
        parent.child_entries.push(child);
    }
}

fn matches_pattern(full_name: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return full_name == pattern
            || full_name
                .strip_suffix(pattern)
                .is_some_and(|prefix| prefix.ends_with('.'));
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = full_name;
    for (ix, part) in parts.iter().enumerate() {
        if ix == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if ix == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    rest.is_empty()
}

struct Builder<'a> {
    table: SymbolTable,
    by_file: HashMap<&'a Path, &'a ParseResult>,
    /// Files currently being instantiated, outermost first
    active: Vec<PathBuf>,
    instantiated: HashSet<PathBuf>,
}

impl<'a> Builder<'a> {
    /// Instantiate a file's top-level declarations under `parent`.
    fn instantiate_file(
        &mut self,
        file: &'a ParseResult,
        parent: Option<DefinitionId>,
        context: &str,
    ) -> Result<Vec<DefinitionId>> {
        self.active.push(file.file.clone());
        self.instantiated.insert(file.file.clone());

        let mut ids = Vec::new();
        for ix in file.top_level() {
            ids.push(self.instantiate(file, ix, parent, context)?);
        }

        self.active.pop();
        Ok(ids)
    }

    fn instantiate(
        &mut self,
        file: &'a ParseResult,
        ix: usize,
        parent: Option<DefinitionId>,
        context: &str,
    ) -> Result<DefinitionId> {
        let raw = &file.definitions[ix];
        let full_name = qualify(context, &raw.name);
        let id = self.table.push(Definition {
            id: DefinitionId::from_raw(self.table.definitions.len() as u32),
            name: raw.name.clone(),
            context: context.to_string(),
            full_name: full_name.clone(),
            kind: raw.kind,
            location: Location::with_end(file.file.clone(), raw.line, raw.column, raw.line, raw.end_column),
            children: Vec::new(),
            child_entries: Vec::new(),
            imports: raw.imports.iter().map(|i| i.path.clone()).collect(),
            parent,
            target: raw.target.clone(),
        });

        for &child in &raw.children {
            let child_id = self.instantiate(file, child, Some(id), &full_name)?;
            self.table.attach_child(id, child_id);
        }

        for import in &raw.imports {
            let Some(imported) = self.by_file.get(import.path.as_path()).copied() else {
                continue;
            };
            if self.active.contains(&import.path) {
                let mut chain = self.active.clone();
                chain.push(import.path.clone());
                return Err(IndexError::CyclicImport { chain });
            }
            for child_id in self.instantiate_file(imported, Some(id), &full_name)? {
                self.table.attach_child(id, child_id);
            }
        }

        Ok(id)
    }
}
