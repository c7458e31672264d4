use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};

/// Exclusive file lock guard preventing concurrent indexing of a project.
/// Held for the lifetime of an indexing operation; dropped (and the sentinel
/// removed) when the guard goes out of scope.
pub struct IndexLock {
    path: PathBuf,
    _file: File,
}

impl IndexLock {
    /// Attempts to acquire the lock at `<hidden_state_dir>/index.lock`.
    /// Fails immediately (no blocking wait) if another operation holds it.
    pub fn acquire(hidden_state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(hidden_state_dir)
            .map_err(|e| IndexError::FileIo { path: hidden_state_dir.display().to_string(), source: e })?;
        let path = hidden_state_dir.join("index.lock");

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|_| IndexError::ConcurrentIndexing { lock_path: path.display().to_string() })?;

        Ok(IndexLock { path, _file: file })
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let dir = TempDir::new().unwrap();
        let first = IndexLock::acquire(dir.path()).unwrap();
        let second = IndexLock::acquire(dir.path());
        assert!(second.is_err());
        drop(first);
        assert!(IndexLock::acquire(dir.path()).is_ok());
    }
}
