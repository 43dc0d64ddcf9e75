mod file;
mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

use anyhow::Result;

/// Persistence capability for the broker's state files.
///
/// Every file this subsystem owns (encrypted store, encrypted cache, lockout
/// counters, audit log) goes through this trait, so the resolution chain can be
/// exercised against an in-memory stand-in while production uses the
/// atomically-writing file implementation.
pub trait StateStore: Send + Sync {
    /// Read a whole state file. Returns `Ok(None)` if it does not exist.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Replace a state file's contents as a single atomic operation.
    fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Append one line to a state file, creating it if absent.
    ///
    /// Appends must use an append-only open mode so a partial write can never
    /// truncate prior contents.
    fn append_line(&self, name: &str, line: &str) -> Result<()>;

    /// Remove a state file. Removing a missing file is not an error.
    fn remove(&self, name: &str) -> Result<()>;
}
