//! Reference resolution.
//!
//! A reference is a `?` followed by a dotted full name, e.g. `?Shop.Price`.
//! The term runs until whitespace or one of `( ) { } , ;`. Resolution is an
//! exact full-name lookup in the [`SymbolTable`]; there is no relative
//! lookup from the referencing scope.
//!
//! This module also extracts the dotted word under a cursor, which is what
//! editor requests (go to definition, hover, completion) operate on.

use std::collections::HashMap;
use std::path::Path;

use crate::diagnostics::Diagnostic;
use crate::scanner::CleanLine;
use crate::table::SymbolTable;
use crate::Location;

/// Marks a reference to a definition.
pub const SIGIL: char = '?';

fn is_sequence_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

fn ends_term(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '{' | '}' | ',' | ';' | SIGIL)
}

/// The dotted word around a cursor position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    pub text: String,
    /// 0-indexed character columns, end exclusive
    pub start: usize,
    pub end: usize,
    /// Whether the word is directly preceded by `?`
    pub referenced: bool,
}

impl Sequence {
    /// The text without leading or trailing dots.
    pub fn name(&self) -> &str {
        self.text.trim_matches('.')
    }
}

/// Extract the run of word characters and dots around `character`.
///
/// `character` is a 0-indexed character column; a cursor just past the end
/// of a word still selects it. Returns `None` when the cursor touches no
/// word.
pub fn sequence_at(line: &str, character: usize) -> Option<Sequence> {
    let chars: Vec<char> = line.chars().collect();
    let cursor = character.min(chars.len());

    let mut start = cursor;
    while start > 0 && is_sequence_char(chars[start - 1]) {
        start -= 1;
    }
    let mut end = cursor;
    while end < chars.len() && is_sequence_char(chars[end]) {
        end += 1;
    }

    if start == end {
        return None;
    }

    Some(Sequence {
        text: chars[start..end].iter().collect(),
        start,
        end,
        referenced: start > 0 && chars[start - 1] == SIGIL,
    })
}

/// One `?term` occurrence in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermOccurrence {
    pub term: String,
    /// Span of the term, excluding the sigil
    pub location: Location,
}

/// Find every `?term` on the given comment-free lines.
pub fn scan_terms(file: &Path, lines: &[CleanLine]) -> Vec<TermOccurrence> {
    let mut terms = Vec::new();

    for line in lines {
        let chars: Vec<char> = line.text.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            if chars[i] != SIGIL {
                i += 1;
                continue;
            }
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && !ends_term(chars[end]) {
                end += 1;
            }
            if end > start {
                terms.push(TermOccurrence {
                    term: chars[start..end].iter().collect(),
                    location: Location::span(
                        file.to_path_buf(),
                        line.number,
                        start as u32 + 1,
                        end - start,
                    ),
                });
            }
            i = end;
        }
    }

    terms
}

/// Reverse index from full name to the places that reference it.
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    by_name: HashMap<String, Vec<Location>>,
}

impl ReferenceIndex {
    pub fn add(&mut self, full_name: &str, location: Location) {
        self.by_name.entry(full_name.to_string()).or_default().push(location);
    }

    /// Every reference to `full_name`, in file then position order.
    #[must_use]
    pub fn find(&self, full_name: &str) -> &[Location] {
        self.by_name.get(full_name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Number of resolved references across the workspace.
    pub fn len(&self) -> usize {
        self.by_name.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn sort(&mut self) {
        for locations in self.by_name.values_mut() {
            locations.sort_by(|a, b| (&a.file, a.line, a.column).cmp(&(&b.file, b.line, b.column)));
        }
    }
}

/// Resolve every term of one file against the table.
///
/// Resolved terms are recorded in `index`; undefined ones become errors.
pub fn resolve_file(
    table: &SymbolTable,
    file: &Path,
    lines: &[CleanLine],
    index: &mut ReferenceIndex,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for occurrence in scan_terms(file, lines) {
        if table.contains_full_name(&occurrence.term) {
            index.add(&occurrence.term, occurrence.location);
        } else {
            diagnostics.push(Diagnostic::error(
                occurrence.location,
                format!("Term: {} is invalid!", occurrence.term),
            ));
        }
    }
}

/// Resolve all files and return the finished reverse index.
pub fn build_reference_index<'a>(
    table: &SymbolTable,
    files: impl IntoIterator<Item = (&'a Path, &'a [CleanLine])>,
    mut on_diagnostic: impl FnMut(&'a Path, Diagnostic),
) -> ReferenceIndex {
    let mut index = ReferenceIndex::default();
    for (file, lines) in files {
        let mut diagnostics = Vec::new();
        resolve_file(table, file, lines, &mut index, &mut diagnostics);
        for diagnostic in diagnostics {
            on_diagnostic(file, diagnostic);
        }
    }
    index.sort();
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_file;
    use crate::scanner::strip_comments;
    use std::path::PathBuf;

    #[test]
    fn test_sequence_at_middle_and_end() {
        let line = "CREATE TAG X(?Shop.Price);";
        let seq = sequence_at(line, 16).unwrap();
        assert_eq!(seq.text, "Shop.Price");
        assert_eq!(seq.start, 14);
        assert_eq!(seq.end, 24);
        assert!(seq.referenced);

        let at_end = sequence_at(line, 24).unwrap();
        assert_eq!(at_end.text, "Shop.Price");
    }

    #[test]
    fn test_sequence_at_whitespace() {
        assert_eq!(sequence_at("A  B", 2), None);
        assert_eq!(sequence_at("", 0), None);
        assert_eq!(sequence_at("Shop.", 5).unwrap().name(), "Shop");
    }

    #[test]
    fn test_sequence_at_clamps_cursor() {
        let seq = sequence_at("Shop", 99).unwrap();
        assert_eq!(seq.text, "Shop");
        assert!(!seq.referenced);
    }

    #[test]
    fn test_scan_terms_spans_exclude_sigil() {
        let lines = strip_comments("CREATE TAG X(?A.B, ?C);\n  ?D {\n");
        let terms = scan_terms(Path::new("f.mql"), &lines);

        let found: Vec<_> = terms
            .iter()
            .map(|t| (t.term.as_str(), t.location.line, t.location.column, t.location.end_column))
            .collect();
        assert_eq!(found, vec![("A.B", 1, 15, 18), ("C", 1, 21, 22), ("D", 2, 4, 5)]);
    }

    #[test]
    fn test_scan_terms_ignores_comments_and_lone_sigils() {
        let lines = strip_comments("// ?Hidden\n? ; ??X /* ?Y */");
        let terms = scan_terms(Path::new("f.mql"), &lines);
        let names: Vec<_> = terms.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(names, vec!["X"]);
    }

    #[test]
    fn test_resolve_file_splits_valid_and_invalid() {
        let source = "CREATE BASE Shop {\n    CREATE TAG Price;\n}\nCREATE TAG Use(?Shop.Price, ?Shop.Cost);\n";
        let parsed = parse_file(Path::new("/ws/a.mql"), source);
        let table = SymbolTable::build(std::slice::from_ref(&parsed)).unwrap();

        let mut index = ReferenceIndex::default();
        let mut diagnostics = Vec::new();
        resolve_file(&table, &parsed.file, &parsed.lines, &mut index, &mut diagnostics);

        assert_eq!(index.find("Shop.Price").len(), 1);
        assert_eq!(index.find("Shop.Price")[0].line, 4);
        assert!(index.find("Shop.Cost").is_empty());

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, "Term: Shop.Cost is invalid!");
        assert_eq!(diagnostics[0].location.column, 30);
        assert_eq!(diagnostics[0].location.end_column, 39);
    }

    #[test]
    fn test_inherit_statement_needs_its_target_defined() {
        let source = "CREATE BASE Lib {\n    CREATE TAG Color;\n}\n?Lib.Color;\n?Lib.Shape;\n";
        let parsed = parse_file(Path::new("/ws/a.mql"), source);
        let table = SymbolTable::build(std::slice::from_ref(&parsed)).unwrap();

        let mut index = ReferenceIndex::default();
        let mut diagnostics = Vec::new();
        resolve_file(&table, &parsed.file, &parsed.lines, &mut index, &mut diagnostics);

        let color = index.find("Lib.Color");
        assert_eq!(color.len(), 1);
        assert_eq!(table.get_definition_location("Lib.Color").unwrap().line, 2);

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, "Term: Lib.Shape is invalid!");
        assert_eq!(diagnostics[0].location.line, 5);
        assert_eq!(diagnostics[0].location.column, 2);
        assert_eq!(diagnostics[0].location.end_column, 11);
    }

    #[test]
    fn test_build_reference_index_orders_locations() {
        let parsed = [
            parse_file(Path::new("/ws/b.mql"), "CREATE TAG Use(?T);\n"),
            parse_file(Path::new("/ws/a.mql"), "CREATE TAG T;\nCREATE TAG Other(?T, ?Missing);\n"),
        ];
        let table = SymbolTable::build(&parsed).unwrap();

        let mut errors = Vec::new();
        let index = build_reference_index(
            &table,
            parsed.iter().map(|p| (p.file.as_path(), p.lines.as_slice())),
            |file, diag| errors.push((file.to_path_buf(), diag.message)),
        );

        let files: Vec<_> = index.find("T").iter().map(|l| l.file.clone()).collect();
        assert_eq!(files, vec![PathBuf::from("/ws/a.mql"), PathBuf::from("/ws/b.mql")]);
        assert_eq!(index.len(), 2);
        assert_eq!(errors, vec![(PathBuf::from("/ws/a.mql"), "Term: Missing is invalid!".to_string())]);
    }
}
