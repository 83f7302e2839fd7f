//! Sidecar state store.
//!
//! Every mirrored document has a `<documentId>.json` next to its exports and
//! every mirrored folder has a `_folder.json`. Reads capture a SHA-256
//! fingerprint of the bytes; [`update`] refuses to write when the file on disk
//! no longer matches that fingerprint.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{MigrateError, Result};

/// Reserved name of the folder sidecar. Quip ids never start with `_`.
pub const FOLDER_SIDECAR: &str = "_folder.json";

/// SHA-256 of a sidecar's bytes at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Fingerprint(hasher.finalize().into())
    }
}

/// A parsed sidecar together with the fingerprint of what was read.
#[derive(Debug, Clone)]
pub struct Stored<T> {
    pub value: T,
    pub fingerprint: Fingerprint,
}

pub fn is_folder_sidecar(path: &Path) -> bool {
    path.file_name().is_some_and(|n| n == FOLDER_SIDECAR)
}

/// `<id>.json`, excluding the folder sidecar.
pub fn is_document_sidecar(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "json")
        && !is_folder_sidecar(path)
        && path
            .file_stem()
            .is_some_and(|s| !s.is_empty() && !s.to_string_lossy().starts_with('.'))
}

fn read_stored<T: DeserializeOwned>(path: &Path) -> Result<Option<Stored<T>>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(MigrateError::io(path, e)),
    };
    let value = serde_json::from_slice(&bytes).map_err(|source| MigrateError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(Stored {
        value,
        fingerprint: Fingerprint::of(&bytes),
    }))
}

/// Reads a document sidecar. `None` if the path is not a document sidecar or
/// does not exist.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<Stored<T>>> {
    if !is_document_sidecar(path) {
        return Ok(None);
    }
    read_stored(path)
}

/// Reads a folder sidecar. `None` if the path is not named `_folder.json` or
/// does not exist.
pub fn read_folder<T: DeserializeOwned>(path: &Path) -> Result<Option<Stored<T>>> {
    if !is_folder_sidecar(path) {
        return Ok(None);
    }
    read_stored(path)
}

pub fn to_pretty_json<T: Serialize>(path: &Path, value: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|source| MigrateError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Serializes `value` and atomically replaces `path`. Returns the new
/// fingerprint.
pub fn write<T: Serialize>(path: &Path, value: &T) -> Result<Fingerprint> {
    let bytes = to_pretty_json(path, value)?;
    write_atomic(path, &bytes)?;
    Ok(Fingerprint::of(&bytes))
}

/// Writes to a temp file in the same directory, then renames over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| MigrateError::io(path, std::io::Error::other("path has no parent")))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| MigrateError::io(path, std::io::Error::other("path has no file name")))?;
    fs::create_dir_all(parent).map_err(|e| MigrateError::io(parent, e))?;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let tmp_path = parent.join(format!(".qdm.tmp.{}.{}", file_name.to_string_lossy(), nanos));

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp_path)
        .map_err(|e| MigrateError::io(&tmp_path, e))?;
    file.write_all(contents)
        .map_err(|e| MigrateError::io(&tmp_path, e))?;
    drop(file);

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(MigrateError::io(path, e));
    }
    Ok(())
}

/// Read-verify-write.
///
/// Re-reads `path`, requires its fingerprint to equal `stored.fingerprint`,
/// applies `mutate` to a copy and writes the copy only when it differs.
/// On success `stored` holds the new value and fingerprint. Returns whether a
/// write happened.
pub fn update<T, F>(path: &Path, stored: &mut Stored<T>, mutate: F) -> Result<bool>
where
    T: Serialize + DeserializeOwned + Clone + PartialEq,
    F: FnOnce(&mut T),
{
    let current = fs::read(path).map_err(|e| MigrateError::io(path, e))?;
    if Fingerprint::of(&current) != stored.fingerprint {
        return Err(MigrateError::consistency(format!(
            "sidecar {} changed since it was read",
            path.display()
        )));
    }

    let mut next = stored.value.clone();
    mutate(&mut next);
    if next == stored.value {
        return Ok(false);
    }

    stored.fingerprint = write(path, &next)?;
    stored.value = next;
    Ok(true)
}
