//! Completion candidates and node search.
//!
//! Member completion works on the dotted text typed so far: everything up to
//! the last `.` names a definition (optionally with a leading `?`) and the
//! candidates are its children. With no dot the candidates are the
//! top-level definitions.
//!
//! Keyword completion depends on the innermost declaration enclosing the
//! cursor: constructor bodies, tags and links each accept a narrower set.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

use crate::parse::parse_file;
use crate::resolve::SIGIL;
use crate::table::SymbolTable;
use crate::{Definition, DefinitionKind};

/// Every keyword of the definitions language.
pub const KEYWORDS: &[&str] = &[
    "CONSTRUCTOR",
    "CHARACTER",
    "BASE",
    "INT",
    "ADD",
    "CREATE",
    "IMPORT",
    "General",
    "Decorator",
    "DefaultItem",
    "CastItem",
    "ParallelDecorator",
    "Generator",
    "LIST",
    "None",
    "AS",
    "GeneralStrict",
    "Reference",
    "BreakItem",
    "DecoratorItem",
    "Optional",
    "OptionalGroup",
    "Input",
    "Output",
    "BreakPersist",
    "StopItem",
    "ListDelimiter",
    "ListItem",
    "ContainItem",
    "Rule",
    "Condition",
    "Display",
    "Remove",
    "Inherit",
    "TAG",
    "LINK",
    "PYLINK",
    "GRID",
    "DisplayItem",
    "PROPERTY",
];

const CONSTRUCTOR_KEYWORDS: &[&str] = &[
    "CREATE",
    "GRID",
    "BASE",
    "LIST",
    "General",
    "Optional",
    "ListItem",
    "ListDelimiter",
    "DisplayItem",
    "AS",
];

const TAG_KEYWORDS: &[&str] = &["AS", "CREATE", "TAG"];

const LINK_KEYWORDS: &[&str] = &["AS", "CREATE", "ADD", "LINK"];

/// Keywords that make sense inside a declaration of the given kind.
pub fn keywords_for(enclosing: Option<DefinitionKind>) -> &'static [&'static str] {
    match enclosing {
        Some(DefinitionKind::Constructor) => CONSTRUCTOR_KEYWORDS,
        Some(DefinitionKind::Tag) => TAG_KEYWORDS,
        Some(DefinitionKind::Link) => LINK_KEYWORDS,
        _ => KEYWORDS,
    }
}

/// Kind of the innermost declaration open at the end of `prefix`.
///
/// `prefix` is the document text up to the cursor. A declaration whose
/// header is still being written (no `{` or `;` yet) counts as enclosing.
pub fn enclosing_kind(file: &Path, prefix: &str) -> Option<DefinitionKind> {
    let parsed = parse_file(file, prefix);
    parsed
        .pending
        .or_else(|| parsed.open_scopes.last().copied())
        .map(|ix| parsed.definitions[ix].kind)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateKind {
    Definition(DefinitionKind),
    Keyword,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub label: String,
    pub kind: CandidateKind,
    /// Full name for definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Candidate {
    fn definition(def: &Definition) -> Self {
        Self {
            label: def.name.clone(),
            kind: CandidateKind::Definition(def.kind),
            detail: Some(def.full_name.clone()),
        }
    }

    fn keyword(word: &str) -> Self {
        Self {
            label: word.to_string(),
            kind: CandidateKind::Keyword,
            detail: None,
        }
    }
}

/// Definitions that may follow the dotted text `typed`.
///
/// # Examples
///
/// ```
/// use parsaur::{completion::suggest_completions, parse_file, SymbolTable};
/// use std::path::Path;
///
/// let parsed = parse_file(Path::new("shop.mql"), "CREATE BASE Shop {\n    CREATE TAG Price;\n}\n");
/// let table = SymbolTable::build(&[parsed]).unwrap();
///
/// let labels: Vec<_> = suggest_completions(&table, "?Shop.Pr")
///     .into_iter()
///     .map(|c| c.label)
///     .collect();
/// assert_eq!(labels, vec!["Price"]);
/// ```
pub fn suggest_completions(table: &SymbolTable, typed: &str) -> Vec<Candidate> {
    let mut hierarchy: Vec<&str> = typed.split('.').collect();
    hierarchy.pop();

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    if hierarchy.is_empty() {
        for def in table.roots() {
            if seen.insert(def.name.as_str()) {
                candidates.push(Candidate::definition(def));
            }
        }
        return candidates;
    }

    let first = hierarchy[0];
    if let Some(stripped) = first.strip_prefix(SIGIL) {
        hierarchy[0] = stripped;
    }
    let owner = hierarchy.join(".");

    for def in table.children(&owner) {
        if seen.insert(def.name.as_str()) {
            candidates.push(Candidate::definition(def));
        }
    }
    candidates
}

/// Keyword candidates for a cursor at the end of `prefix`.
pub fn keyword_completions(file: &Path, prefix: &str) -> Vec<Candidate> {
    keywords_for(enclosing_kind(file, prefix))
        .iter()
        .map(|k| Candidate::keyword(k))
        .collect()
}

/// Find a definition by loose user input.
///
/// A case-insensitive match on the bare name wins; otherwise the first
/// definition whose full name contains the input (ignoring case).
pub fn search_node<'a>(table: &'a SymbolTable, input: &str) -> Option<&'a Definition> {
    let needle = input.trim().trim_start_matches(SIGIL).to_uppercase();
    if needle.is_empty() {
        return None;
    }

    table
        .iter()
        .find(|d| d.name.to_uppercase() == needle)
        .or_else(|| table.iter().find(|d| d.full_name.to_uppercase().contains(&needle)))
}
