//! Declaration extraction from `.mql` source files.
//!
//! Parsing is line oriented and never fails: comments are blanked by the
//! [`scanner`](crate::scanner), each clean line is cut into statements by the
//! [`scope`](crate::scope) splitter, and every statement is matched against
//! the declaration forms below (first match wins).
//!
//! | form                            | kind          |
//! |---------------------------------|---------------|
//! | `IMPORT path`                   | import        |
//! | `?A.B [AS Alias]` (statement start) | `Inherit` |
//! | `CREATE TAG Name`               | `Tag`         |
//! | `CREATE INT Name`               | `Int`         |
//! | `CREATE BASE Name`              | `Base`        |
//! | `CREATE GRID Name`              | `Grid`        |
//! | `CREATE LIST Name`              | `List`        |
//! | `CREATE LINK Name`              | `Link`        |
//! | `ADD CONSTRUCTOR Name`          | `Constructor` |
//!
//! The result is file-local: definitions refer to their lexical parent by
//! index and imports are resolved to paths but not yet spliced. The
//! [`SymbolTable`](crate::SymbolTable) turns a set of these into qualified
//! definitions.
//!
//! # Examples
//!
//! ```
//! use parsaur::{parse_file, DefinitionKind};
//! use std::path::Path;
//!
//! let source = "CREATE BASE Animal {\n    CREATE TAG Legs;\n}\n";
//! let result = parse_file(Path::new("zoo.mql"), source);
//!
//! assert_eq!(result.definitions.len(), 2);
//! assert_eq!(result.definitions[0].kind, DefinitionKind::Base);
//! assert_eq!(result.definitions[1].context, "Animal");
//! assert_eq!(result.definitions[1].parent, Some(0));
//! ```

use regex::Regex;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use crate::diagnostics::Diagnostic;
use crate::scanner::{strip_comments, CleanLine};
use crate::scope::{LineSplitter, ScopeEvent, ScopeStack};
use crate::{qualify, DefinitionKind, Location};

/// Extension appended to import paths that have none.
pub const SOURCE_EXTENSION: &str = "mql";

static DECLARATIONS: LazyLock<Vec<(DefinitionKind, Regex)>> = LazyLock::new(|| {
    [
        (DefinitionKind::Tag, r"\bCREATE\s+TAG\s+"),
        (DefinitionKind::Int, r"\bCREATE\s+INT\s+"),
        (DefinitionKind::Base, r"\bCREATE\s+BASE\s+"),
        (DefinitionKind::Grid, r"\bCREATE\s+GRID\s+"),
        (DefinitionKind::List, r"\bCREATE\s+LIST\s+"),
        (DefinitionKind::Link, r"\bCREATE\s+LINK\s+"),
        (DefinitionKind::Constructor, r"\bADD\s+CONSTRUCTOR\s+"),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("valid declaration pattern")))
    .collect()
});

static IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bIMPORT\s+").expect("valid import pattern"));

static INHERIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\?([\w.]+)(?:\s+AS\s+(\w+))?").expect("valid inherit pattern")
});

/// An `IMPORT` statement resolved to a file path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub path: PathBuf,
    /// Position of the path token
    pub location: Location,
}

/// A declaration as found in one file, before import splicing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDefinition {
    pub name: String,
    pub kind: DefinitionKind,
    /// 1-indexed line of the name token
    pub line: u32,
    /// 1-indexed columns of the name token (end exclusive)
    pub column: u32,
    pub end_column: u32,
    /// Dotted path of the enclosing declarations in this file
    pub context: String,
    /// Index of the enclosing declaration in [`ParseResult::definitions`]
    pub parent: Option<usize>,
    /// Indices of lexical children, in source order
    pub children: Vec<usize>,
    /// Files imported inside this declaration's scope, duplicates collapsed
    pub imports: Vec<Import>,
    pub target: Option<String>,
}

/// Result of extracting declarations from a single file.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub file: PathBuf,
    /// Declarations in source order
    pub definitions: Vec<RawDefinition>,
    /// `IMPORT` statements found outside any declaration scope
    pub unattached_imports: Vec<Import>,
    /// Non-fatal problems (duplicates, stray braces, ignored imports)
    pub warnings: Vec<Diagnostic>,
    /// Comment-free lines, kept for the reference scan
    pub lines: Vec<CleanLine>,
    /// Declarations whose `{` was still open at end of input, outermost first
    pub open_scopes: Vec<usize>,
    /// Declaration still waiting for its `{` at end of input
    pub pending: Option<usize>,
}

impl ParseResult {
    /// Indices of declarations that have no lexical parent.
    pub fn top_level(&self) -> impl Iterator<Item = usize> + '_ {
        self.definitions
            .iter()
            .enumerate()
            .filter(|(_, d)| d.parent.is_none())
            .map(|(ix, _)| ix)
    }

    /// Every resolved import in this file that is attached to a declaration.
    pub fn imports(&self) -> impl Iterator<Item = &Import> {
        self.definitions.iter().flat_map(|d| d.imports.iter())
    }
}

/// Extract declarations, imports and scope structure from one file.
///
/// `file` is used for locations and to resolve relative `IMPORT` paths.
pub fn parse_file(file: &Path, source: &str) -> ParseResult {
    let file = normalize_path(file);
    let lines = strip_comments(source);

    let mut parser = FileParser {
        file: &file,
        definitions: Vec::new(),
        unattached_imports: Vec::new(),
        warnings: Vec::new(),
        scopes: ScopeStack::new(),
        first_seen: HashMap::new(),
    };
    let mut splitter = LineSplitter::new();

    for line in &lines {
        for event in splitter.split(&line.text) {
            match event {
                ScopeEvent::Open { .. } => parser.scopes.open(),
                ScopeEvent::Close { column } => {
                    if parser.scopes.close().is_none() {
                        parser.warnings.push(Diagnostic::warning(
                            Location::span(file.clone(), line.number, column, 1),
                            "Unbalanced '}' ignored",
                        ));
                    }
                }
                ScopeEvent::Statement {
                    text,
                    column,
                    paren_depth,
                    terminated,
                } => {
                    // Continuation lines of an argument list declare nothing
                    if paren_depth == 0 {
                        parser.statement(text, line.number, column);
                    }
                    if terminated {
                        parser.scopes.clear_pending();
                    }
                }
            }
        }
    }

    let open_scopes = parser.scopes.open_contexts();
    let pending = parser.scopes.pending();

    ParseResult {
        definitions: parser.definitions,
        unattached_imports: parser.unattached_imports,
        warnings: parser.warnings,
        lines,
        open_scopes,
        pending,
        file,
    }
}

struct FileParser<'a> {
    file: &'a Path,
    definitions: Vec<RawDefinition>,
    unattached_imports: Vec<Import>,
    warnings: Vec<Diagnostic>,
    scopes: ScopeStack,
    /// (context, name) -> line of the first declaration
    first_seen: HashMap<(String, String), u32>,
}

impl FileParser<'_> {
    fn statement(&mut self, text: &str, line: u32, column: u32) {
        if let Some(m) = IMPORT.find(text) {
            self.import(&text[m.end()..], char_offset(text, m.end()), line, column);
            return;
        }

        let trimmed = text.trim_start();
        if trimmed.starts_with('?') {
            let indent = char_offset(text, text.len() - trimmed.len());
            self.inherit(trimmed, line, column + indent);
            self.scopes.clear_pending();
            return;
        }

        for (kind, pattern) in DECLARATIONS.iter() {
            if let Some(m) = pattern.find(text) {
                let rest = &text[m.end()..];
                let name = name_token(rest);
                if !name.is_empty() {
                    let start = column + char_offset(text, m.end());
                    let ix = self.declare(name, *kind, line, start, None);
                    if kind.opens_scope() {
                        self.scopes.set_pending(name, ix);
                    }
                }
                return;
            }
        }
    }

    fn inherit(&mut self, text: &str, line: u32, column: u32) {
        let Some(caps) = INHERIT.captures(text) else {
            return;
        };
        let Some(target) = caps.get(1) else {
            return;
        };
        let target_name = target.as_str().trim_end_matches('.');
        if target_name.is_empty() {
            return;
        }

        let (name, start) = match caps.get(2) {
            Some(alias) => (alias.as_str(), column + char_offset(text, alias.start())),
            None => (target_name, column + char_offset(text, target.start())),
        };
        self.declare(name, DefinitionKind::Inherit, line, start, Some(target_name.to_string()));
    }

    fn import(&mut self, rest: &str, offset: u32, line: u32, column: u32) {
        let Some(token) = rest.split_whitespace().last() else {
            return;
        };
        let raw = token.trim_matches(|c| matches!(c, '"' | '\'' | ';' | '\r'));
        if raw.is_empty() {
            return;
        }

        let token_offset = rest.rfind(token).map(|b| char_offset(rest, b)).unwrap_or(0);
        let import = Import {
            path: resolve_import_path(self.file, raw),
            location: Location::span(
                self.file.to_path_buf(),
                line,
                column + offset + token_offset,
                token.chars().count(),
            ),
        };

        match self.scopes.current_context() {
            Some(owner) => {
                let imports = &mut self.definitions[owner].imports;
                if !imports.iter().any(|i| i.path == import.path) {
                    imports.push(import);
                }
            }
            None => {
                self.warnings.push(Diagnostic::warning(
                    import.location.clone(),
                    "IMPORT outside of a definition scope is ignored",
                ));
                self.unattached_imports.push(import);
            }
        }
    }

    fn declare(
        &mut self,
        name: &str,
        kind: DefinitionKind,
        line: u32,
        column: u32,
        target: Option<String>,
    ) -> usize {
        let parent = self.scopes.current_context();
        let context = self.scopes.context_path();
        let ix = self.definitions.len();

        let key = (context.clone(), name.to_string());
        match self.first_seen.get(&key) {
            Some(first_line) => self.warnings.push(Diagnostic::warning(
                Location::span(self.file.to_path_buf(), line, column, name.chars().count()),
                format!(
                    "Duplicate definition: {} (first declared at line {})",
                    qualify(&context, name),
                    first_line
                ),
            )),
            None => {
                self.first_seen.insert(key, line);
            }
        }

        self.definitions.push(RawDefinition {
            name: name.to_string(),
            kind,
            line,
            column,
            end_column: column + name.chars().count() as u32,
            context,
            parent,
            children: Vec::new(),
            imports: Vec::new(),
            target,
        });
        if let Some(p) = parent {
            self.definitions[p].children.push(ix);
        }
        ix
    }
}

/// The identifier following a declaration keyword.
fn name_token(rest: &str) -> &str {
    rest.split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .trim_end_matches([';', '{', '}', '\r', '\t', '\n'])
}

/// Character count of `text[..byte]`.
fn char_offset(text: &str, byte: usize) -> u32 {
    text[..byte].chars().count() as u32
}

/// Resolve an `IMPORT` path relative to the importing file.
///
/// Backslashes are treated as separators and a missing extension defaults
/// to `.mql`. The result is normalized lexically; the file is not touched.
pub fn resolve_import_path(importer: &Path, raw: &str) -> PathBuf {
    let normalized = raw.replace('\\', "/");
    let relative = Path::new(&normalized);
    let mut joined = if relative.is_absolute() {
        relative.to_path_buf()
    } else {
        importer.parent().unwrap_or(Path::new("")).join(relative)
    };
    if joined.extension().is_none() {
        joined.set_extension(SOURCE_EXTENSION);
    }
    normalize_path(&joined)
}

/// Remove `.` segments and fold `..` into its parent without touching the disk.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> ParseResult {
        parse_file(Path::new("/ws/main.mql"), source)
    }

    fn names(result: &ParseResult) -> Vec<String> {
        result
            .definitions
            .iter()
            .map(|d| qualify(&d.context, &d.name))
            .collect()
    }

    #[test]
    fn test_each_declaration_kind() {
        let result = parse(
            "CREATE TAG T;\nCREATE INT I;\nCREATE BASE B;\nCREATE GRID G;\n\
             CREATE LIST L;\nCREATE LINK K;\nADD CONSTRUCTOR C;\n",
        );
        let kinds: Vec<_> = result.definitions.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DefinitionKind::Tag,
                DefinitionKind::Int,
                DefinitionKind::Base,
                DefinitionKind::Grid,
                DefinitionKind::List,
                DefinitionKind::Link,
                DefinitionKind::Constructor,
            ]
        );
    }

    #[test]
    fn test_nested_context_and_location() {
        let result = parse("CREATE BASE Outer {\n    CREATE TAG Inner;\n}\n");
        assert_eq!(names(&result), vec!["Outer", "Outer.Inner"]);

        let inner = &result.definitions[1];
        assert_eq!(inner.line, 2);
        assert_eq!(inner.column, 16);
        assert_eq!(inner.end_column, 21);
        assert_eq!(result.definitions[0].children, vec![1]);
    }

    #[test]
    fn test_brace_on_next_line_opens_context() {
        let result = parse("CREATE BASE Outer\n{\n    CREATE TAG Inner;\n}\n");
        assert_eq!(names(&result), vec!["Outer", "Outer.Inner"]);
    }

    #[test]
    fn test_terminated_declaration_does_not_capture_block() {
        let result = parse("CREATE TAG Leaf;\n{\n    CREATE TAG Loose;\n}\n");
        assert_eq!(names(&result), vec!["Leaf", "Loose"]);
    }

    #[test]
    fn test_plain_block_does_not_extend_context() {
        let result = parse("CREATE BASE A {\n    {\n        CREATE TAG B;\n    }\n}\n");
        assert_eq!(names(&result), vec!["A", "A.B"]);
        assert_eq!(result.definitions[1].parent, Some(0));
    }

    #[test]
    fn test_constructor_name_stops_at_paren() {
        let result = parse("ADD CONSTRUCTOR Make(General; Optional) {\n    CREATE TAG Part;\n}\n");
        assert_eq!(names(&result), vec!["Make", "Make.Part"]);
    }

    #[test]
    fn test_declarations_in_comments_are_ignored() {
        let result = parse("// CREATE TAG A;\n/* CREATE TAG B; */ CREATE TAG C;\n");
        assert_eq!(names(&result), vec!["C"]);
    }

    #[test]
    fn test_inherit_with_and_without_alias() {
        let result = parse("CREATE BASE Host {\n    ?Lib.Shape AS Form;\n    ?Lib.Color;\n}\n");
        assert_eq!(names(&result), vec!["Host", "Host.Form", "Host.Lib.Color"]);

        let form = &result.definitions[1];
        assert_eq!(form.kind, DefinitionKind::Inherit);
        assert_eq!(form.target.as_deref(), Some("Lib.Shape"));
        assert_eq!(form.column, 19);

        let color = &result.definitions[2];
        assert_eq!(color.target.as_deref(), Some("Lib.Color"));
        assert_eq!(color.column, 6);
    }

    #[test]
    fn test_inherit_never_opens_scope() {
        let result = parse("?Lib.Shape AS Form {\n    CREATE TAG Inside;\n}\n");
        assert_eq!(names(&result), vec!["Form", "Inside"]);
    }

    #[test]
    fn test_inherit_cancels_pending_context() {
        let result = parse("CREATE BASE A\n?L.X AS Y\n{ CREATE TAG T; }\n");
        assert_eq!(names(&result), vec!["A", "Y", "T"]);
        assert_eq!(result.definitions[2].parent, None);
    }

    #[test]
    fn test_multiline_arguments_are_not_declarations() {
        let result = parse(
            "CREATE BASE Shop {\n    ADD CONSTRUCTOR Make(\n        ?Missing.Part,\n        General\n    );\n    CREATE TAG After;\n}\n",
        );
        assert_eq!(names(&result), vec!["Shop", "Shop.Make", "Shop.After"]);
        assert!(result.definitions[1].children.is_empty());
        assert_eq!(result.pending, None);
    }

    #[test]
    fn test_reference_mid_statement_is_not_a_definition() {
        let result = parse("CREATE TAG A(?B.C);\n");
        assert_eq!(names(&result), vec!["A"]);
    }

    #[test]
    fn test_missing_name_is_skipped() {
        let result = parse("CREATE TAG ;\nCREATE BASE\n");
        assert!(result.definitions.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_import_attaches_to_enclosing_definition() {
        let result = parse("CREATE BASE Host {\n    IMPORT lib/shapes;\n    IMPORT \"lib\\shapes.mql\";\n}\n");
        let host = &result.definitions[0];
        assert_eq!(host.imports.len(), 1);
        assert_eq!(host.imports[0].path, PathBuf::from("/ws/lib/shapes.mql"));
        assert_eq!(host.imports[0].location.line, 2);
        assert_eq!(host.imports[0].location.column, 12);
    }

    #[test]
    fn test_top_level_import_is_reported() {
        let result = parse("IMPORT other.mql;\n");
        assert_eq!(result.unattached_imports.len(), 1);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(
            result.warnings[0].message,
            "IMPORT outside of a definition scope is ignored"
        );
    }

    #[test]
    fn test_duplicate_definition_warns() {
        let result = parse("CREATE TAG A;\nCREATE TAG A;\n");
        assert_eq!(result.definitions.len(), 2);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(
            result.warnings[0].message,
            "Duplicate definition: A (first declared at line 1)"
        );
        assert_eq!(result.warnings[0].location.line, 2);
    }

    #[test]
    fn test_unbalanced_close_is_ignored() {
        let result = parse("}\nCREATE TAG A;\n");
        assert_eq!(names(&result), vec!["A"]);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].location.column, 1);
    }

    #[test]
    fn test_open_scopes_at_end_of_input() {
        let result = parse("ADD CONSTRUCTOR Make {\n    CREATE TAG Part");
        assert_eq!(result.open_scopes, vec![0]);
        assert_eq!(result.pending, Some(1));
    }

    #[test]
    fn test_resolve_import_path() {
        let importer = Path::new("/ws/defs/main.mql");
        assert_eq!(
            resolve_import_path(importer, "shared"),
            PathBuf::from("/ws/defs/shared.mql")
        );
        assert_eq!(
            resolve_import_path(importer, "..\\common\\base.mql"),
            PathBuf::from("/ws/common/base.mql")
        );
        assert_eq!(
            resolve_import_path(importer, "./x.txt"),
            PathBuf::from("/ws/defs/x.txt")
        );
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize_path(Path::new("../x")), PathBuf::from("../x"));
        assert_eq!(normalize_path(Path::new("/..")), PathBuf::from("/"));
    }
}
