//! Problems found while indexing, attached to a source location.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub severity: Severity,
    pub location: Location,
}

impl Diagnostic {
    pub fn error(location: Location, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Error,
            location,
        }
    }

    pub fn warning(location: Location, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Warning,
            location,
        }
    }

    /// The undefined term for an "invalid term" diagnostic.
    pub fn invalid_term(&self) -> Option<&str> {
        self.message
            .strip_prefix("Term: ")
            .and_then(|rest| rest.strip_suffix(" is invalid!"))
    }

    pub fn file(&self) -> &PathBuf {
        &self.location.file
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}: {}",
            self.location.file.display(),
            self.location.line,
            self.location.column,
            self.severity,
            self.message
        )
    }
}

/// Order diagnostics by position and keep at most `limit` of them.
pub fn sort_and_cap(diagnostics: &mut Vec<Diagnostic>, limit: usize) {
    diagnostics.sort_by_key(|d| (d.location.line, d.location.column));
    diagnostics.truncate(limit);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_term_round_trip() {
        let diag = Diagnostic::error(
            Location::span(PathBuf::from("a.mql"), 1, 2, 3),
            "Term: Foo.Bar is invalid!",
        );
        assert_eq!(diag.invalid_term(), Some("Foo.Bar"));

        let other = Diagnostic::warning(Location::new(PathBuf::from("a.mql"), 1, 1), "Unbalanced '}'");
        assert_eq!(other.invalid_term(), None);
    }

    #[test]
    fn test_display_format() {
        let diag = Diagnostic::error(Location::new(PathBuf::from("a.mql"), 4, 9), "Term: X is invalid!");
        assert_eq!(diag.to_string(), "a.mql:4:9: error: Term: X is invalid!");
    }

    #[test]
    fn test_sort_and_cap() {
        let file = PathBuf::from("a.mql");
        let mut diags = vec![
            Diagnostic::error(Location::new(file.clone(), 3, 1), "c"),
            Diagnostic::error(Location::new(file.clone(), 1, 5), "b"),
            Diagnostic::error(Location::new(file, 1, 2), "a"),
        ];
        sort_and_cap(&mut diags, 2);
        let messages: Vec<_> = diags.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["a", "b"]);
    }

    #[test]
    fn test_json_shape() {
        let diag = Diagnostic::warning(Location::span(PathBuf::from("a.mql"), 2, 5, 6), "Imported file not found: b.mql");
        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["location"]["end_column"], 11);

        let back: Diagnostic = serde_json::from_value(json).unwrap();
        assert_eq!(back, diag);
    }
}
