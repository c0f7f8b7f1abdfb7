//! Completion support for the Parsaur language server.
//!
//! Typing after `?` or a `.` completes definition names; anywhere else the
//! server offers keywords for the enclosing declaration plus top-level
//! definitions.

use std::path::Path;

use parsaur::completion::{keyword_completions, Candidate, CandidateKind};
use parsaur::{DefinitionKind, Snapshot};
use tower_lsp::lsp_types::{CompletionItem, CompletionItemKind};

/// The dotted text typed immediately before the cursor, including a
/// leading `?` when present.
pub fn typed_before_cursor(line_prefix: &str) -> &str {
    let start = line_prefix
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphanumeric() || *c == '_' || *c == '.')
        .last()
        .map(|(i, _)| i)
        .unwrap_or(line_prefix.len());

    match line_prefix[..start].strip_suffix('?') {
        Some(rest) => &line_prefix[rest.len()..],
        None => &line_prefix[start..],
    }
}

/// Whether `typed` asks for definition names rather than keywords.
pub fn wants_definitions(typed: &str) -> bool {
    typed.starts_with('?') || typed.contains('.')
}

/// Completion items for a cursor at the end of `document_prefix`.
pub fn completions(snapshot: &Snapshot, file: &Path, document_prefix: &str) -> Vec<CompletionItem> {
    let line_prefix = document_prefix.rsplit('\n').next().unwrap_or_default();
    let typed = typed_before_cursor(line_prefix);

    if wants_definitions(typed) {
        return snapshot
            .suggest_completions(typed)
            .iter()
            .map(to_completion_item)
            .collect();
    }

    let mut items: Vec<CompletionItem> = keyword_completions(file, document_prefix)
        .iter()
        .map(to_completion_item)
        .collect();
    items.extend(snapshot.suggest_completions("").iter().map(to_completion_item));
    items
}

pub fn to_completion_item(candidate: &Candidate) -> CompletionItem {
    let kind = match candidate.kind {
        CandidateKind::Keyword => CompletionItemKind::KEYWORD,
        CandidateKind::Definition(kind) => to_completion_kind(kind),
    };
    CompletionItem {
        label: candidate.label.clone(),
        kind: Some(kind),
        detail: candidate.detail.clone(),
        ..Default::default()
    }
}

fn to_completion_kind(kind: DefinitionKind) -> CompletionItemKind {
    match kind {
        DefinitionKind::Tag => CompletionItemKind::CONSTANT,
        DefinitionKind::Int => CompletionItemKind::VALUE,
        DefinitionKind::Base => CompletionItemKind::CLASS,
        DefinitionKind::Grid => CompletionItemKind::STRUCT,
        DefinitionKind::List => CompletionItemKind::ENUM,
        DefinitionKind::Link => CompletionItemKind::REFERENCE,
        DefinitionKind::Constructor => CompletionItemKind::CONSTRUCTOR,
        DefinitionKind::Inherit => CompletionItemKind::INTERFACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parsaur::{parse_file, Snapshot};

    fn snapshot() -> Snapshot {
        let parsed = parse_file(
            Path::new("/ws/shop.mql"),
            "CREATE BASE Shop {\n    CREATE TAG Price;\n    ADD CONSTRUCTOR Make;\n}\n",
        );
        Snapshot::build(1, vec![parsed], Vec::new(), 100).unwrap()
    }

    fn labels(items: &[CompletionItem]) -> Vec<&str> {
        items.iter().map(|i| i.label.as_str()).collect()
    }

    #[test]
    fn test_typed_before_cursor() {
        assert_eq!(typed_before_cursor("CREATE TAG X(?Shop.Pr"), "?Shop.Pr");
        assert_eq!(typed_before_cursor("    Shop."), "Shop.");
        assert_eq!(typed_before_cursor("    CRE"), "CRE");
        assert_eq!(typed_before_cursor("(?"), "?");
        assert_eq!(typed_before_cursor("X "), "");
        assert_eq!(typed_before_cursor(""), "");
    }

    #[test]
    fn test_definition_completion_after_dot() {
        let items = completions(&snapshot(), Path::new("/ws/use.mql"), "CREATE TAG X(?Shop.");
        assert_eq!(labels(&items), vec!["Price", "Make"]);
        assert_eq!(items[0].kind, Some(CompletionItemKind::CONSTANT));
        assert_eq!(items[1].kind, Some(CompletionItemKind::CONSTRUCTOR));
        assert_eq!(items[0].detail.as_deref(), Some("Shop.Price"));
    }

    #[test]
    fn test_sigil_completes_top_level() {
        let items = completions(&snapshot(), Path::new("/ws/use.mql"), "CREATE TAG X(?");
        assert_eq!(labels(&items), vec!["Shop"]);
    }

    #[test]
    fn test_keywords_inside_tag() {
        let items = completions(&snapshot(), Path::new("/ws/use.mql"), "CREATE TAG T {\n    ");
        assert_eq!(labels(&items), vec!["AS", "CREATE", "TAG", "Shop"]);
        assert_eq!(items[0].kind, Some(CompletionItemKind::KEYWORD));
    }
}
