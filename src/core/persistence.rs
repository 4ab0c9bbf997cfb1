//! Document Persistence
//!
//! Loading and atomic saving of document text. Saves write to a
//! temporary file in the target directory, sync, then rename over the
//! destination, so a crash mid-save never leaves a truncated file.

use std::fs;
use std::io::Write;
use std::path::Path;

use log::info;
use tempfile::NamedTempFile;

use crate::core::error::CoreError;

/// Pluggable storage for document text.
pub trait DocumentStore {
    fn load(&self, path: &Path) -> Result<String, CoreError>;
    fn save(&self, path: &Path, text: &str) -> Result<(), CoreError>;
}

/// Filesystem-backed store with atomic replace on save.
#[derive(Debug, Default)]
pub struct FileStore;

impl FileStore {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentStore for FileStore {
    fn load(&self, path: &Path) -> Result<String, CoreError> {
        Ok(fs::read_to_string(path)?)
    }

    fn save(&self, path: &Path, text: &str) -> Result<(), CoreError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| CoreError::from(e.error))?;
        info!("saved {} bytes to {}", text.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        let store = FileStore::new();

        store.save(&path, "hello\nworld\n").unwrap();
        assert_eq!(store.load(&path).unwrap(), "hello\nworld\n");
    }

    #[test]
    fn test_save_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        let store = FileStore::new();

        store.save(&path, "first").unwrap();
        store.save(&path, "second").unwrap();
        assert_eq!(store.load(&path).unwrap(), "second");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new();
        assert!(matches!(
            store.load(&dir.path().join("absent.txt")),
            Err(CoreError::Io(_))
        ));
    }
}
