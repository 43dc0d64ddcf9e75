use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::StateStore;

/// File-backed state store rooted at the broker's data directory.
///
/// The directory is created with owner-only permissions on first use, writes
/// go through a temporary file plus rename so readers never observe a
/// half-written file, and every created file is restricted to the owner.
pub struct FileStateStore {
    base_dir: PathBuf,
}

impl FileStateStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)
            .with_context(|| format!("Failed to create data dir: {}", base_dir.display()))?;
        restrict_dir(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }
}

impl StateStore for FileStateStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(name);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read state file: {}", path.display()))
            }
        }
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(name);
        let tmp = path.with_extension("tmp");

        {
            let mut file = fs::File::create(&tmp)
                .with_context(|| format!("Failed to create temp file: {}", tmp.display()))?;
            file.write_all(bytes)
                .with_context(|| format!("Failed to write temp file: {}", tmp.display()))?;
            file.sync_all()
                .with_context(|| format!("Failed to flush temp file: {}", tmp.display()))?;
        }
        restrict_file(&tmp)?;

        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace state file: {}", path.display()))?;
        Ok(())
    }

    fn append_line(&self, name: &str, line: &str) -> Result<()> {
        let path = self.path_for(name);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open for append: {}", path.display()))?;
        restrict_file(&path)?;

        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to append to: {}", path.display()))?;
        file.write_all(b"\n")
            .with_context(|| format!("Failed to append to: {}", path.display()))?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let path = self.path_for(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to remove state file: {}", path.display()))
            }
        }
    }
}

#[cfg(unix)]
fn restrict_dir(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
        .with_context(|| format!("Failed to set permissions on: {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_dir(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn restrict_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to set permissions on: {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_file(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StateStore as _;

    #[test]
    fn read_missing_file_is_none() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let store = FileStateStore::new(dir.path().join("data"))?;
        assert!(store.read("passwords.enc")?.is_none());
        Ok(())
    }

    #[test]
    fn write_then_read_round_trips() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let store = FileStateStore::new(dir.path().join("data"))?;
        store.write_atomic("passwords.enc", b"sealed")?;
        assert_eq!(store.read("passwords.enc")?.as_deref(), Some(&b"sealed"[..]));
        Ok(())
    }

    #[test]
    fn write_leaves_no_temp_file_behind() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let store = FileStateStore::new(dir.path().join("data"))?;
        store.write_atomic("cache.enc", b"sealed")?;
        let names: Vec<_> = fs::read_dir(dir.path().join("data"))?
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["cache.enc".to_string()]);
        Ok(())
    }

    #[test]
    fn append_accumulates_lines() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let store = FileStateStore::new(dir.path().join("data"))?;
        store.append_line("audit.log", "first")?;
        store.append_line("audit.log", "second")?;
        let content = String::from_utf8(store.read("audit.log")?.unwrap())?;
        assert_eq!(content, "first\nsecond\n");
        Ok(())
    }

    #[test]
    fn remove_missing_file_is_ok() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let store = FileStateStore::new(dir.path().join("data"))?;
        store.remove("cache.enc")?;
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn data_dir_and_files_are_owner_only() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new()?;
        let store = FileStateStore::new(dir.path().join("data"))?;
        store.write_atomic("passwords.enc", b"sealed")?;

        let dir_mode = fs::metadata(dir.path().join("data"))?.permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);

        let file_mode = fs::metadata(dir.path().join("data").join("passwords.enc"))?
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);
        Ok(())
    }
}
