//! In-memory state store for testing the chain logic without touching disk.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;

use super::StateStore;

/// In-memory state store for testing purposes.
pub struct MemoryStateStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot a file's contents, for assertions.
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        let files = self.files.lock().expect("state lock poisoned");
        files.get(name).cloned()
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStateStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let files = self.files.lock().expect("state lock poisoned");
        Ok(files.get(name).cloned())
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut files = self.files.lock().expect("state lock poisoned");
        files.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn append_line(&self, name: &str, line: &str) -> Result<()> {
        let mut files = self.files.lock().expect("state lock poisoned");
        let file = files.entry(name.to_string()).or_default();
        file.extend_from_slice(line.as_bytes());
        file.push(b'\n');
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let mut files = self.files.lock().expect("state lock poisoned");
        files.remove(name);
        Ok(())
    }
}
