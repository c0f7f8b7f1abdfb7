//! In-memory store for documents open in the editor.
//!
//! Cursor requests (definition, hover, completion) read the buffer the user
//! sees, which may differ from the file on disk. The workspace index itself
//! is only rebuilt from disk on save.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_lsp::lsp_types::{Position, TextDocumentContentChangeEvent, Url};

/// A document tracked in memory.
#[derive(Debug, Clone)]
pub struct Document {
    pub content: String,
    pub version: i32,
}

impl Document {
    pub fn new(content: String, version: i32) -> Self {
        Self { content, version }
    }

    /// Apply full or ranged changes in order.
    pub fn apply_changes(&mut self, changes: Vec<TextDocumentContentChangeEvent>, new_version: i32) {
        for change in changes {
            match change.range {
                Some(range) => {
                    let start = self.position_to_offset(&range.start);
                    let end = self.position_to_offset(&range.end);
                    if let (Some(start), Some(end)) = (start, end) {
                        if start <= end {
                            self.content.replace_range(start..end, &change.text);
                        }
                    }
                }
                None => self.content = change.text,
            }
        }
        self.version = new_version;
    }

    /// Byte offset of a (line, character) position. Characters past the end
    /// of a line clamp to the line end.
    fn position_to_offset(&self, position: &Position) -> Option<usize> {
        let mut offset = 0;
        for (ix, line) in self.content.split_inclusive('\n').enumerate() {
            if ix == position.line as usize {
                let body = line.trim_end_matches(['\n', '\r']);
                let within = body
                    .char_indices()
                    .nth(position.character as usize)
                    .map(|(i, _)| i)
                    .unwrap_or(body.len());
                return Some(offset + within);
            }
            offset += line.len();
        }

        // One past the last line (after a trailing newline, or an empty document)
        let lines = self.content.split_inclusive('\n').count();
        (position.line as usize == lines && position.character == 0).then_some(offset)
    }

    /// Text of line `line` (0-indexed) without its terminator.
    pub fn line(&self, line: u32) -> Option<&str> {
        self.content.lines().nth(line as usize)
    }

    /// Everything before `position`.
    pub fn prefix(&self, position: &Position) -> &str {
        let end = self.position_to_offset(position).unwrap_or(self.content.len());
        &self.content[..end]
    }
}

/// Thread-safe store for open documents.
#[derive(Debug, Default, Clone)]
pub struct DocumentStore {
    documents: Arc<RwLock<HashMap<PathBuf, Document>>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(&self, uri: &Url, content: String, version: i32) {
        if let Ok(path) = uri.to_file_path() {
            self.documents
                .write()
                .await
                .insert(path, Document::new(content, version));
        }
    }

    pub async fn change(&self, uri: &Url, changes: Vec<TextDocumentContentChangeEvent>, version: i32) {
        if let Ok(path) = uri.to_file_path() {
            if let Some(doc) = self.documents.write().await.get_mut(&path) {
                doc.apply_changes(changes, version);
            }
        }
    }

    pub async fn close(&self, uri: &Url) {
        if let Ok(path) = uri.to_file_path() {
            self.documents.write().await.remove(&path);
        }
    }

    /// The open buffer for `path`, or the file on disk.
    pub async fn get(&self, path: &Path) -> Option<Document> {
        if let Some(doc) = self.documents.read().await.get(path) {
            return Some(doc.clone());
        }
        tokio::fs::read_to_string(path)
            .await
            .ok()
            .map(|content| Document::new(content, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp::lsp_types::Range;

    fn edit(start: (u32, u32), end: (u32, u32), text: &str) -> TextDocumentContentChangeEvent {
        TextDocumentContentChangeEvent {
            range: Some(Range {
                start: Position::new(start.0, start.1),
                end: Position::new(end.0, end.1),
            }),
            range_length: None,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_position_to_offset() {
        let doc = Document::new("CREATE TAG A;\nCREATE TAG B;\n".to_string(), 1);
        assert_eq!(doc.position_to_offset(&Position::new(0, 0)), Some(0));
        assert_eq!(doc.position_to_offset(&Position::new(1, 7)), Some(21));
        assert_eq!(doc.position_to_offset(&Position::new(1, 99)), Some(27));
        assert_eq!(doc.position_to_offset(&Position::new(2, 0)), Some(28));
        assert_eq!(doc.position_to_offset(&Position::new(3, 0)), None);
    }

    #[test]
    fn test_position_to_offset_crlf() {
        let doc = Document::new("CREATE TAG A;\r\nCREATE TAG B;".to_string(), 1);
        assert_eq!(doc.position_to_offset(&Position::new(1, 0)), Some(15));
        assert_eq!(doc.position_to_offset(&Position::new(0, 99)), Some(13));
    }

    #[test]
    fn test_apply_changes() {
        let mut doc = Document::new("CREATE TAG Price;".to_string(), 1);
        doc.apply_changes(vec![edit((0, 11), (0, 16), "Cost")], 2);
        assert_eq!(doc.content, "CREATE TAG Cost;");
        assert_eq!(doc.version, 2);

        doc.apply_changes(vec![edit((0, 0), (0, 0), "// ")], 3);
        assert_eq!(doc.content, "// CREATE TAG Cost;");

        doc.apply_changes(
            vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: "CREATE TAG X;".to_string(),
            }],
            4,
        );
        assert_eq!(doc.content, "CREATE TAG X;");
    }

    #[test]
    fn test_line_and_prefix() {
        let doc = Document::new("CREATE BASE S {\n    ?S.\n}\n".to_string(), 1);
        assert_eq!(doc.line(1), Some("    ?S."));
        assert_eq!(doc.prefix(&Position::new(1, 4)), "CREATE BASE S {\n    ");
    }

    #[tokio::test]
    async fn test_document_store_open_change_close() {
        let store = DocumentStore::new();
        let uri = Url::parse("file:///ws/missing.mql").unwrap();
        let path = uri.to_file_path().unwrap();

        assert!(store.get(&path).await.is_none());

        store.open(&uri, "CREATE TAG A;".to_string(), 1).await;
        store.change(&uri, vec![edit((0, 11), (0, 12), "B")], 2).await;
        let doc = store.get(&path).await.unwrap();
        assert_eq!(doc.content, "CREATE TAG B;");
        assert_eq!(doc.version, 2);

        store.close(&uri).await;
        assert!(store.get(&path).await.is_none());
    }
}
