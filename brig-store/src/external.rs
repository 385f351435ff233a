//! Change detection for external package sources.
//!
//! An external package's sources live in a user-provided directory the
//! tool does not control; its version does not change when the sources
//! do. A checksum over the source tree is recorded in the selected
//! package at configure time, and a later run that finds a different
//! checksum bumps the version iteration so that the equal version
//! still reconfigures.

use std::{
    fs,
    path::Path,
    time::UNIX_EPOCH,
};

use sha2::{Digest, Sha256};

use crate::Error;

/// Computes the checksum of an external package source directory.
///
/// Hashes the sorted relative paths together with each file's size and
/// modification time, so both content edits and file additions or
/// removals change the result. Hidden entries (leading `.`) are
/// skipped, which also keeps a nested workspace store directory out of
/// its own checksum.
///
/// # Errors
///
/// Returns an error if the directory cannot be traversed.
pub fn source_checksum(root: impl AsRef<Path>) -> Result<String, Error> {
    let root = root.as_ref();
    let mut entries = Vec::new();
    collect_entries(root, root, &mut entries)?;
    entries.sort();

    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(entry.as_bytes());
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Walks `dir`, appending one line per file to `entries`.
fn collect_entries(root: &Path, dir: &Path, entries: &mut Vec<String>) -> Result<(), Error> {
    let reader = fs::read_dir(dir).map_err(|source| Error::IoPath {
        path: dir.to_path_buf(),
        context: "reading an external source directory".to_string(),
        source,
    })?;
    for dir_entry in reader {
        let dir_entry = dir_entry.map_err(|source| Error::IoPath {
            path: dir.to_path_buf(),
            context: "iterating an external source directory".to_string(),
            source,
        })?;
        let name = dir_entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let path = dir_entry.path();
        let metadata = fs::metadata(&path).map_err(|source| Error::IoPath {
            path: path.clone(),
            context: "reading external source metadata".to_string(),
            source,
        })?;
        if metadata.is_dir() {
            collect_entries(root, &path, entries)?;
            continue;
        }
        let relative = path.strip_prefix(root).unwrap_or(&path);
        let modified = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |duration| duration.as_secs());
        entries.push(format!(
            "{} {} {modified}",
            relative.display(),
            metadata.len(),
        ));
    }
    Ok(())
}
