//! Keyed JSON documents with a `.bak` sibling and corruption recovery.
//!
//! Layout inside the store root:
//! ```text
//! <key>.json       - latest version
//! <key>.json.bak   - previous version, copied before every overwrite
//! ```
//! Keys may contain `/` to place documents in sub-directories
//! (`snapshots/1001/<id>`).

use crate::atomic_io::{sibling_with_suffix, write_bytes_atomic};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

const EXTENSION: &str = "json";

/// Errors from a single document read or write. Never escapes the store's
/// public API; used for logging and control flow.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("document rejected: {0}")]
    Rejected(String),
}

/// Where a loaded value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Primary,
    Backup,
    Default,
}

/// A loaded value plus its provenance.
#[derive(Debug, Clone)]
pub struct Loaded<T> {
    pub value: T,
    pub source: LoadSource,
    /// The on-disk copy does not match `value` and should be saved again.
    pub dirty: bool,
}

/// File-backed key/value document store.
#[derive(Debug, Clone)]
pub struct DurableRecordStore {
    root: PathBuf,
}

impl DurableRecordStore {
    /// Open a store rooted at `root`. The directory is created on demand;
    /// failure to create it is logged and surfaces later as failed saves.
    pub fn open(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        if let Err(e) = fs::create_dir_all(&root) {
            error!(root = %root.display(), error = %e, "cannot create record store root");
        }
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the primary document for `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.{EXTENSION}"))
    }

    /// Path of the backup document for `key`.
    pub fn backup_path_for(&self, key: &str) -> PathBuf {
        sibling_with_suffix(&self.path_for(key), ".bak")
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path_for(key).exists()
    }

    /// Serialize and write `value`, copying the previous primary to `.bak`
    /// first. Returns `false` (after logging) on any failure.
    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        match self.try_save(key, value) {
            Ok(()) => {
                debug!(key, "record saved");
                true
            }
            Err(e) => {
                error!(key, error = %e, "record save failed");
                false
            }
        }
    }

    fn try_save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        // Serialize before touching any file so an encode error leaves both
        // copies intact.
        let bytes = serde_json::to_vec_pretty(value)?;
        let primary = self.path_for(key);
        if primary.exists() {
            fs::copy(&primary, self.backup_path_for(key))?;
        }
        write_bytes_atomic(&primary, &bytes)?;
        Ok(())
    }

    /// Load `key`, falling back to the backup and then to `T::default()`.
    pub fn load<T: DeserializeOwned + Default>(&self, key: &str) -> Loaded<T> {
        self.load_validated(key, |_| Ok(()))
            .unwrap_or_else(|| Loaded {
                value: T::default(),
                source: LoadSource::Default,
                dirty: true,
            })
    }

    /// Load a document that has no meaningful default.
    pub fn load_optional<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.load_validated(key, |_| Ok(())).map(|l| l.value)
    }

    /// Load `key`, treating a parsed document rejected by `validate` exactly
    /// like a parse failure. A primary recovered from the backup is repaired
    /// on disk.
    pub fn load_validated<T: DeserializeOwned>(
        &self,
        key: &str,
        validate: impl Fn(&T) -> Result<(), String>,
    ) -> Option<Loaded<T>> {
        let primary = self.path_for(key);
        match read_document(&primary, &validate) {
            Ok(Some((value, _))) => {
                return Some(Loaded {
                    value,
                    source: LoadSource::Primary,
                    dirty: false,
                });
            }
            Ok(None) => debug!(key, "no primary record"),
            Err(e) => warn!(key, error = %e, "primary record unreadable, trying backup"),
        }

        let backup = self.backup_path_for(key);
        match read_document(&backup, &validate) {
            Ok(Some((value, bytes))) => {
                let repaired = match write_bytes_atomic(&primary, &bytes) {
                    Ok(()) => {
                        info!(key, "record recovered from backup and primary repaired");
                        true
                    }
                    Err(e) => {
                        error!(key, error = %e, "record recovered from backup, repair failed");
                        false
                    }
                };
                Some(Loaded {
                    value,
                    source: LoadSource::Backup,
                    dirty: !repaired,
                })
            }
            Ok(None) => {
                debug!(key, "no backup record");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "backup record unreadable, using default");
                None
            }
        }
    }

    /// Remove primary and backup. Returns whether a primary existed.
    pub fn delete(&self, key: &str) -> bool {
        let existed = remove_quietly(&self.path_for(key), key);
        remove_quietly(&self.backup_path_for(key), key);
        existed
    }

    /// Keys of the primary documents directly inside `dir`, sorted.
    pub fn list(&self, dir: &str) -> Vec<String> {
        let suffix = format!(".{EXTENSION}");
        let mut keys: Vec<String> = self
            .entries(dir)
            .into_iter()
            .filter(|(_, is_dir)| !is_dir)
            .filter_map(|(name, _)| name.strip_suffix(&suffix).map(str::to_string))
            .map(|stem| format!("{dir}/{stem}"))
            .collect();
        keys.sort();
        keys
    }

    /// Names of the sub-directories of `dir`, sorted.
    pub fn list_dirs(&self, dir: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries(dir)
            .into_iter()
            .filter(|(_, is_dir)| *is_dir)
            .map(|(name, _)| name)
            .collect();
        names.sort();
        names
    }

    /// Recursively remove `dir`. Missing directories are not an error.
    pub fn clear_dir(&self, dir: &str) -> bool {
        let path = self.root.join(dir);
        match fs::remove_dir_all(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                error!(dir = %path.display(), error = %e, "cannot clear directory");
                false
            }
        }
    }

    fn entries(&self, dir: &str) -> Vec<(String, bool)> {
        let path = self.root.join(dir);
        let read = match fs::read_dir(&path) {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(dir = %path.display(), error = %e, "cannot list directory");
                return Vec::new();
            }
        };
        read.filter_map(Result::ok)
            .filter_map(|entry| {
                let is_dir = entry.file_type().ok()?.is_dir();
                let name = entry.file_name().into_string().ok()?;
                Some((name, is_dir))
            })
            .collect()
    }
}

fn read_document<T: DeserializeOwned>(
    path: &Path,
    validate: &impl Fn(&T) -> Result<(), String>,
) -> Result<Option<(T, Vec<u8>)>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let value: T = serde_json::from_slice(&bytes)?;
    validate(&value).map_err(StoreError::Rejected)?;
    Ok(Some((value, bytes)))
}

fn remove_quietly(path: &Path, key: &str) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(key, path = %path.display(), error = %e, "cannot remove record file");
            false
        }
    }
}
