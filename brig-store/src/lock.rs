//! Exclusive workspace locking.

use std::{
    fs::{self, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use crate::Error;

/// The name of the lock file inside the workspace store directory.
const LOCK_FILE_NAME: &str = "brig.lock";

/// A file-based exclusive lock on a workspace.
///
/// The lock is held for the lifetime of the owning process; a second
/// process attempting to open the same workspace fails with
/// [`Error::AlreadyInUse`].
#[derive(Debug)]
pub(crate) struct StoreLock {
    /// The path to the lock file.
    path: PathBuf,
    /// The underlying file handle.
    _file: fs::File,
}

impl StoreLock {
    /// Acquires the lock for the store directory at `store_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyInUse`] if the lock file already exists
    /// and an I/O error for any other failure to create it.
    pub(crate) fn acquire(store_dir: &Path) -> Result<Self, Error> {
        let path = store_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| {
                if source.kind() == ErrorKind::AlreadyExists {
                    Error::AlreadyInUse {
                        path: store_dir.to_path_buf(),
                    }
                } else {
                    Error::IoPath {
                        path: path.clone(),
                        context: "creating the workspace lock file".to_string(),
                        source,
                    }
                }
            })?;
        Ok(Self { path, _file: file })
    }
}

impl Drop for StoreLock {
    /// Releases the lock by removing the lock file.
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;

    #[test]
    fn exclusive_acquisition() -> TestResult {
        let tmp = tempfile::tempdir()?;
        let lock = StoreLock::acquire(tmp.path())?;

        let err = StoreLock::acquire(tmp.path()).unwrap_err();
        assert!(matches!(err, Error::AlreadyInUse { .. }));

        drop(lock);
        assert!(StoreLock::acquire(tmp.path()).is_ok());
        Ok(())
    }
}
