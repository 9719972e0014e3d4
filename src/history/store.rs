use super::History;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Append-only, ordered log of history records.
///
/// Entries are never mutated or removed once appended. Readers receive
/// copies or borrowed slices; there is no API to edit an entry in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryStore {
    entries: Vec<History>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with existing records, in order.
    pub fn from_entries(entries: Vec<History>) -> Self {
        Self { entries }
    }

    /// Append one record and return the resulting length.
    pub fn append(&mut self, history: History) -> usize {
        self.entries.push(history);
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[History] {
        &self.entries
    }

    pub fn last(&self) -> Option<&History> {
        self.entries.last()
    }

    /// Copy of every entry appended at or after `index`.
    pub fn slice_from(&self, index: usize) -> Vec<History> {
        self.entries
            .get(index..)
            .map(|tail| tail.to_vec())
            .unwrap_or_default()
    }

    /// Load a store from a JSON array of history records.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read history file {}", path.display()))?;
        let entries: Vec<History> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse history file {}", path.display()))?;
        Ok(Self { entries })
    }

    /// Write the store as a pretty-printed JSON array.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(&self.entries).context("Failed to serialize histories")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write history file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{UserInput, UserMessageHistory};
    use tempfile::tempdir;

    fn user(text: &str) -> History {
        History::UserMessage(UserMessageHistory::new(UserInput::from(text)))
    }

    #[test]
    fn test_append_returns_length() {
        let mut store = HistoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.append(user("a")), 1);
        assert_eq!(store.append(user("b")), 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.last().and_then(|h| h.text()).as_deref(), Some("b"));
    }

    #[test]
    fn test_slice_from_returns_tail() {
        let mut store = HistoryStore::new();
        store.append(user("a"));
        let mark = store.len();
        store.append(user("b"));
        store.append(user("c"));

        let tail = store.slice_from(mark);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].text().as_deref(), Some("b"));
        assert!(store.slice_from(3).is_empty());
        assert!(store.slice_from(10).is_empty());
    }

    #[test]
    fn test_cloned_store_is_independent() {
        let mut original = HistoryStore::new();
        original.append(user("a"));
        let mut copy = original.clone();
        copy.append(user("b"));
        assert_eq!(original.len(), 1);
        assert_eq!(copy.len(), 2);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("histories.json");

        let mut store = HistoryStore::new();
        store.append(user("hello"));
        store.save(&path).unwrap();

        let loaded = HistoryStore::load(&path).unwrap();
        assert_eq!(loaded, store);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let dir = tempdir().unwrap();
        let err = HistoryStore::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read history file"));
    }
}
