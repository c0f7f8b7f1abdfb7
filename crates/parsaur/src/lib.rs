//! parsaur: symbol extraction, import splicing and reference resolution for
//! the Parsaur definitions language (`.mql` files).
//!
//! This crate provides the engine behind the Parsaur language server and CLI:
//! - Comment stripping and brace-scope tracking over raw source text
//! - Extraction of `CREATE ...` / `ADD CONSTRUCTOR` declarations and `IMPORT` statements
//! - A symbol table with fully-qualified dotted names, built fresh on every rebuild
//! - Resolution of `?`-prefixed references, reverse lookups and diagnostics
//! - Versioned workspace snapshots that can be swapped atomically

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod completion;
pub mod config;
pub mod diagnostics;
pub mod fuzzy;
pub mod parse;
pub mod resolve;
pub mod scanner;
pub mod scope;
pub mod table;
pub mod watch;
pub mod workspace;

// Re-export main types
pub use config::Config;
pub use diagnostics::{Diagnostic, Severity};
pub use parse::{parse_file, ParseResult, RawDefinition};
pub use resolve::{sequence_at, ReferenceIndex};
pub use table::{DefinitionKey, SymbolTable};
pub use workspace::{DiskSource, MemorySource, Snapshot, SourceProvider, Workspace};

/// A location in source code (file, line, column) with start and end positions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: PathBuf,
    pub line: u32,       // 1-indexed start line
    pub column: u32,     // 1-indexed start column
    pub end_line: u32,   // 1-indexed end line
    pub end_column: u32, // 1-indexed end column (exclusive)
}

impl Location {
    pub fn new(file: PathBuf, line: u32, column: u32) -> Self {
        Self {
            file,
            line,
            column,
            end_line: line,
            end_column: column,
        }
    }

    /// Create a location with explicit start and end positions
    pub fn with_end(file: PathBuf, line: u32, column: u32, end_line: u32, end_column: u32) -> Self {
        Self {
            file,
            line,
            column,
            end_line,
            end_column,
        }
    }

    /// A single-line span starting at `column` covering `len` characters.
    pub fn span(file: PathBuf, line: u32, column: u32, len: usize) -> Self {
        Self::with_end(file, line, column, line, column + len as u32)
    }
}

/// The declaration form that introduced a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefinitionKind {
    Tag,
    Int,
    Base,
    Grid,
    List,
    Link,
    Constructor,
    /// `?Some.Definition [AS Alias]` at the start of a statement
    Inherit,
}

impl DefinitionKind {
    /// Whether a `{` following this declaration opens a context scope.
    pub fn opens_scope(self) -> bool {
        !matches!(self, DefinitionKind::Inherit)
    }

    /// The keyword phrase as written in source.
    pub fn keyword(self) -> &'static str {
        match self {
            DefinitionKind::Tag => "CREATE TAG",
            DefinitionKind::Int => "CREATE INT",
            DefinitionKind::Base => "CREATE BASE",
            DefinitionKind::Grid => "CREATE GRID",
            DefinitionKind::List => "CREATE LIST",
            DefinitionKind::Link => "CREATE LINK",
            DefinitionKind::Constructor => "ADD CONSTRUCTOR",
            DefinitionKind::Inherit => "?",
        }
    }
}

impl std::fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefinitionKind::Tag => write!(f, "Tag"),
            DefinitionKind::Int => write!(f, "Int"),
            DefinitionKind::Base => write!(f, "Base"),
            DefinitionKind::Grid => write!(f, "Grid"),
            DefinitionKind::List => write!(f, "List"),
            DefinitionKind::Link => write!(f, "Link"),
            DefinitionKind::Constructor => write!(f, "Constructor"),
            DefinitionKind::Inherit => write!(f, "Inherit"),
        }
    }
}

/// Stable index of a [`Definition`] inside one [`SymbolTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DefinitionId(u32);

impl DefinitionId {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn to_raw(self) -> u32 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One declared entity, fully resolved against the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Definition {
    pub id: DefinitionId,
    /// Bare declared identifier: "Inner"
    pub name: String,
    /// Dotted path of the enclosing scopes: "Outer" (empty at top level)
    pub context: String,
    /// `context.name`, or `name` at top level: "Outer.Inner"
    pub full_name: String,
    pub kind: DefinitionKind,
    /// Position of the name token; `location.file` is the originating file
    pub location: Location,
    /// Bare names of the children, in discovery order
    pub children: Vec<String>,
    /// Child definitions, parallel to `children`
    pub child_entries: Vec<DefinitionId>,
    /// Resolved files imported inside this definition's scope
    pub imports: Vec<PathBuf>,
    /// Enclosing definition (lexical parent or import site)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<DefinitionId>,
    /// Referenced name for `Inherit` definitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl Definition {
    pub fn is_top_level(&self) -> bool {
        self.context.is_empty()
    }

    pub fn source_file(&self) -> &Path {
        &self.location.file
    }

    /// An unaliased `?A.B` whose full name is its own target. It names
    /// nothing new and cannot satisfy a reference.
    pub fn is_self_reference(&self) -> bool {
        self.kind == DefinitionKind::Inherit && self.target.as_deref() == Some(self.full_name.as_str())
    }
}

/// Join a context path and a name into a dotted full name.
pub fn qualify(context: &str, name: &str) -> String {
    if context.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", context, name)
    }
}

/// Errors that can occur during indexing
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cyclic import: {}", format_chain(.chain))]
    CyclicImport { chain: Vec<PathBuf> },

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_creation() {
        let loc = Location::new(PathBuf::from("test.mql"), 10, 5);
        assert_eq!(loc.line, 10);
        assert_eq!(loc.column, 5);
        // Default end position equals start position
        assert_eq!(loc.end_line, 10);
        assert_eq!(loc.end_column, 5);
    }

    #[test]
    fn test_location_span() {
        let loc = Location::span(PathBuf::from("test.mql"), 3, 7, 4);
        assert_eq!(loc.end_line, 3);
        assert_eq!(loc.end_column, 11);
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify("", "Foo"), "Foo");
        assert_eq!(qualify("Foo", "Bar"), "Foo.Bar");
        assert_eq!(qualify("A.B", "C"), "A.B.C");
    }

    #[test]
    fn test_definition_kind_display() {
        assert_eq!(format!("{}", DefinitionKind::Base), "Base");
        assert_eq!(format!("{}", DefinitionKind::Constructor), "Constructor");
        assert_eq!(DefinitionKind::Grid.keyword(), "CREATE GRID");
    }

    #[test]
    fn test_inherit_does_not_open_scope() {
        assert!(DefinitionKind::Tag.opens_scope());
        assert!(!DefinitionKind::Inherit.opens_scope());
    }

    #[test]
    fn test_cyclic_import_message() {
        let err = IndexError::CyclicImport {
            chain: vec![PathBuf::from("a.mql"), PathBuf::from("b.mql"), PathBuf::from("a.mql")],
        };
        assert_eq!(err.to_string(), "Cyclic import: a.mql -> b.mql -> a.mql");
    }
}
