//! Fuzzy matching for quick fixes and "did you mean" hints.
//!
//! Two kinds of suggestions are produced:
//! - keyword fixes for a misspelled word (`CRAETE` -> `CREATE`)
//! - full-name replacements for a `?term` that does not resolve

use crate::table::SymbolTable;

/// Default maximum edit distance for full-name suggestions.
pub const DEFAULT_MAX_DISTANCE: usize = 2;

/// Default maximum number of suggestions to return.
pub const DEFAULT_MAX_SUGGESTIONS: usize = 5;

/// Levenshtein (edit) distance between two strings, counted in characters.
///
/// # Examples
///
/// ```
/// use parsaur::fuzzy::levenshtein_distance;
///
/// assert_eq!(levenshtein_distance("CRAETE", "CREATE"), 2);
/// assert_eq!(levenshtein_distance("", "TAG"), 3);
/// assert_eq!(levenshtein_distance("GRID", "GRID"), 0);
/// ```
#[must_use]
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Two rows are enough
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// A suggestion with its edit distance from the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub value: String,
    pub distance: usize,
}

impl Suggestion {
    pub fn new(value: impl Into<String>, distance: usize) -> Self {
        Self {
            value: value.into(),
            distance,
        }
    }
}

/// Find candidates within `max_distance` edits of `query`.
///
/// Exact matches are excluded. Results are sorted by distance, then
/// alphabetically, and truncated to `max_suggestions`.
#[must_use]
pub fn find_similar<'a, I>(
    query: &str,
    candidates: I,
    max_distance: usize,
    max_suggestions: usize,
) -> Vec<Suggestion>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut suggestions: Vec<Suggestion> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let distance = levenshtein_distance(query, candidate);
            (distance > 0 && distance <= max_distance).then(|| Suggestion::new(candidate, distance))
        })
        .collect();

    suggestions.sort_by(|a, b| a.distance.cmp(&b.distance).then(a.value.cmp(&b.value)));
    suggestions.dedup_by(|a, b| a.value == b.value);
    suggestions.truncate(max_suggestions);
    suggestions
}

/// Keywords that `word` may have been meant as.
///
/// A keyword qualifies when it equals the upper-cased word, or when it is
/// within a third of the word's length in edits. The word itself never
/// qualifies.
pub fn keyword_fixes(word: &str, keywords: &[&'static str]) -> Vec<&'static str> {
    if word.is_empty() {
        return Vec::new();
    }
    let upper = word.to_uppercase();
    let budget = word.chars().count() / 3;

    let mut fixes: Vec<(usize, &'static str)> = keywords
        .iter()
        .filter(|k| **k != word)
        .filter_map(|k| {
            if **k == upper {
                return Some((0, *k));
            }
            let distance = levenshtein_distance(word, k);
            (distance <= budget).then_some((distance, *k))
        })
        .collect();

    fixes.sort();
    fixes.dedup();
    fixes.into_iter().map(|(_, k)| k).collect()
}

/// Defined full names close to an unresolved term.
pub fn similar_full_names(table: &SymbolTable, term: &str) -> Vec<Suggestion> {
    find_similar(term, table.full_names(), DEFAULT_MAX_DISTANCE, DEFAULT_MAX_SUGGESTIONS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_file;
    use std::path::Path;

    #[test]
    fn test_levenshtein_basics() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("abc", ""), 3);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("TAG", "tag"), 3);
        assert_eq!(levenshtein_distance("LIST", "LISTS"), 1);
    }

    #[test]
    fn test_levenshtein_counts_chars_not_bytes() {
        assert_eq!(levenshtein_distance("Größe", "Grösse"), 2);
    }

    #[test]
    fn test_find_similar_filters_and_sorts() {
        let candidates = ["Shop.Price", "Shop.Prize", "Shop.Pride", "Stock"];
        let suggestions = find_similar("Shop.Pric", candidates, 2, 5);

        let values: Vec<_> = suggestions.iter().map(|s| s.value.as_str()).collect();
        assert_eq!(values, vec!["Shop.Price", "Shop.Pride", "Shop.Prize"]);
        assert_eq!(suggestions[0].distance, 1);
    }

    #[test]
    fn test_find_similar_excludes_exact_and_truncates() {
        let candidates = ["aa", "ab", "ac", "ad", "a"];
        let suggestions = find_similar("a", candidates, 2, 3);
        assert_eq!(suggestions.len(), 3);
        assert!(suggestions.iter().all(|s| s.value != "a"));
    }

    #[test]
    fn test_keyword_fixes() {
        let keywords = ["CREATE", "GRID", "BASE", "Optional", "TAG"];

        assert_eq!(keyword_fixes("CRAETE", &keywords), vec!["CREATE"]);
        assert_eq!(keyword_fixes("grid", &keywords), vec!["GRID"]);
        assert_eq!(keyword_fixes("Optinal", &keywords), vec!["Optional"]);
        // Exact match is not a fix
        assert!(keyword_fixes("BASE", &keywords).is_empty());
        // Short words get no edit budget
        assert!(keyword_fixes("TGA", &keywords).is_empty());
    }

    #[test]
    fn test_similar_full_names() {
        let parsed = parse_file(
            Path::new("/ws/a.mql"),
            "CREATE BASE Shop {\n    CREATE TAG Price;\n}\nCREATE TAG Stock;\n",
        );
        let table = SymbolTable::build(std::slice::from_ref(&parsed)).unwrap();

        let suggestions = similar_full_names(&table, "Shop.Prise");
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].value, "Shop.Price");
    }
}
