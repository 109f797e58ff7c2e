//! Model file store
//!
//! A flat filename-to-bytes namespace, grounded in `kernel/src/ramfs.rs`'s
//! flat file table. The real filesystem (any key-value-with-files store)
//! is out of scope per spec.md §1; `MemStore` is the in-memory stand-in
//! used by the simulator and tests, behind the `ModelStore` trait so a
//! real flash-backed store can be swapped in without touching the
//! dispatcher.

use crate::config::MAX_FILENAME;
use crate::errors::IoError;
use std::collections::BTreeMap;

pub trait ModelStore {
    fn write(&mut self, name: &str, data: &[u8]) -> Result<(), IoError>;
    fn read(&self, name: &str) -> Result<Vec<u8>, IoError>;
    fn delete(&mut self, name: &str) -> Result<(), IoError>;
    fn list(&self) -> Vec<String>;
}

/// Flat, in-memory namespace — filenames `<= 31` bytes, no directories
/// (spec.md §6 "Persisted state layout").
#[derive(Default)]
pub struct MemStore {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelStore for MemStore {
    fn write(&mut self, name: &str, data: &[u8]) -> Result<(), IoError> {
        if name.is_empty() || name.len() > MAX_FILENAME {
            return Err(IoError::Write);
        }
        self.files.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, IoError> {
        self.files.get(name).cloned().ok_or(IoError::NotFound)
    }

    fn delete(&mut self, name: &str) -> Result<(), IoError> {
        self.files.remove(name).map(|_| ()).ok_or(IoError::NotFound)
    }

    fn list(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_then_list_yields_filename() {
        let mut store = MemStore::new();
        store.write("xor.aif32", &[1, 2, 3]).unwrap();
        assert_eq!(store.list(), vec!["xor.aif32".to_string()]);
    }

    #[test]
    fn delete_then_list_does_not() {
        let mut store = MemStore::new();
        store.write("xor.aif32", &[1, 2, 3]).unwrap();
        store.delete("xor.aif32").unwrap();
        assert!(store.list().is_empty());
    }

    #[test]
    fn two_identical_uploads_leave_one_file() {
        let mut store = MemStore::new();
        store.write("xor.aif32", &[1, 2, 3]).unwrap();
        store.write("xor.aif32", &[1, 2, 3]).unwrap();
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn reading_missing_file_is_not_found() {
        let store = MemStore::new();
        assert_eq!(store.read("nope.aif32"), Err(IoError::NotFound));
    }
}
