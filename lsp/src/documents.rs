//! Open-document store.
//!
//! Builds read sources from disk, so buffer text is kept only to answer
//! "is this document open?" and to apply edits faithfully for later use.

use std::collections::HashMap;

use url::Url;

use crate::protocol::{ContentChange, LspPosition};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
    pub version: i32,
    pub text: String,
}

/// Byte offset of an LSP position (UTF-16 columns), clamped to the text.
fn offset_at(text: &str, position: LspPosition) -> usize {
    let mut line_start = 0;
    for _ in 0..position.line {
        match text[line_start..].find('\n') {
            Some(idx) => line_start += idx + 1,
            None => return text.len(),
        }
    }

    let line_end = text[line_start..]
        .find('\n')
        .map_or(text.len(), |idx| line_start + idx);

    let mut units = 0u32;
    for (idx, ch) in text[line_start..line_end].char_indices() {
        if units >= position.character {
            return line_start + idx;
        }
        units += ch.len_utf16() as u32;
    }
    line_end
}

impl TextDocument {
    fn apply(&mut self, change: ContentChange) {
        match change.range {
            Some(range) => {
                let start = offset_at(&self.text, range.start);
                let end = offset_at(&self.text, range.end).max(start);
                self.text.replace_range(start..end, &change.text);
            }
            None => self.text = change.text,
        }
    }
}

#[derive(Debug, Default)]
pub struct DocumentStore {
    docs: HashMap<Url, TextDocument>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, uri: Url, version: i32, text: String) {
        self.docs.insert(uri, TextDocument { version, text });
    }

    /// Apply changes in order. Returns `false` for documents never opened.
    pub fn change(&mut self, uri: &Url, version: i32, changes: Vec<ContentChange>) -> bool {
        let Some(doc) = self.docs.get_mut(uri) else {
            return false;
        };
        for change in changes {
            doc.apply(change);
        }
        doc.version = version;
        true
    }

    pub fn close(&mut self, uri: &Url) -> bool {
        self.docs.remove(uri).is_some()
    }

    #[must_use]
    pub fn get(&self, uri: &Url) -> Option<&TextDocument> {
        self.docs.get(uri)
    }

    #[must_use]
    pub fn contains(&self, uri: &Url) -> bool {
        self.docs.contains_key(uri)
    }

    pub fn uris(&self) -> impl Iterator<Item = &Url> {
        self.docs.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::LspRange;

    fn uri() -> Url {
        Url::parse("file:///work/main.asm").unwrap()
    }

    fn pos(line: u32, character: u32) -> LspPosition {
        LspPosition { line, character }
    }

    fn edit(start: LspPosition, end: LspPosition, text: &str) -> ContentChange {
        ContentChange {
            range: Some(LspRange { start, end }),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_open_and_close() {
        let mut store = DocumentStore::new();
        store.open(uri(), 1, "ld a, b\n".to_string());
        assert!(store.contains(&uri()));
        assert!(store.close(&uri()));
        assert!(!store.contains(&uri()));
        assert!(!store.close(&uri()));
    }

    #[test]
    fn test_full_change_replaces_text() {
        let mut store = DocumentStore::new();
        store.open(uri(), 1, "nop\n".to_string());
        let changed = store.change(
            &uri(),
            2,
            vec![ContentChange {
                range: None,
                text: "halt\n".to_string(),
            }],
        );
        assert!(changed);
        let doc = store.get(&uri()).unwrap();
        assert_eq!(doc.text, "halt\n");
        assert_eq!(doc.version, 2);
    }

    #[test]
    fn test_change_unknown_document() {
        let mut store = DocumentStore::new();
        assert!(!store.change(&uri(), 2, Vec::new()));
    }

    #[test]
    fn test_incremental_changes_apply_in_order() {
        let mut store = DocumentStore::new();
        store.open(uri(), 1, "ld a, b\nnop\n".to_string());
        store.change(
            &uri(),
            2,
            vec![
                edit(pos(0, 6), pos(0, 7), "c"),
                edit(pos(1, 0), pos(1, 3), "halt"),
                edit(pos(2, 0), pos(2, 0), "ret\n"),
            ],
        );
        assert_eq!(store.get(&uri()).unwrap().text, "ld a, c\nhalt\nret\n");
    }

    #[test]
    fn test_utf16_columns() {
        let mut store = DocumentStore::new();
        // "é" is one UTF-16 unit, "😀" is two.
        store.open(uri(), 1, "; é😀x\n".to_string());
        store.change(&uri(), 2, vec![edit(pos(0, 5), pos(0, 6), "y")]);
        assert_eq!(store.get(&uri()).unwrap().text, "; é😀y\n");
    }

    #[test]
    fn test_positions_past_end_are_clamped() {
        let mut store = DocumentStore::new();
        store.open(uri(), 1, "nop".to_string());
        store.change(&uri(), 2, vec![edit(pos(0, 99), pos(7, 0), "\nhalt")]);
        assert_eq!(store.get(&uri()).unwrap().text, "nop\nhalt");
    }
}
