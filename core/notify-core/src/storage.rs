//! Storage paths and the key-value persistence collaborator.
//!
//! The notification store snapshots itself through [`KeyValueStore`], a
//! `get_item` / `set_item` contract that mirrors what a mobile key-value store
//! offers. Two implementations ship here:
//!
//! - [`FileKeyValueStore`]: one JSON file per key, written atomically
//!   (temp file + rename) so a crash never leaves a half-written snapshot.
//! - [`MemoryKeyValueStore`]: in-process map, used by tests and by callers
//!   that do not want history to survive a restart.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use fs_err as fs;
use tempfile::NamedTempFile;

use crate::error::{NotifyError, Result};

const ROOT_DIR_NAME: &str = ".seller-notify";

/// Central configuration for all on-disk paths.
///
/// Production code uses `StorageConfig::default()` which points to
/// `~/.seller-notify/`. Tests use `StorageConfig::with_root(temp_dir)`.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            root: home.join(ROOT_DIR_NAME),
        }
    }
}

impl StorageConfig {
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to config.toml (optional user configuration).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Directory holding key-value snapshots.
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

/// Durable string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
}

/// Stores each key as `<dir>/<encoded key>.json`.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }
}

/// Filesystem-safe, injective key encoding: ASCII letters, digits and `-`
/// pass through; every other byte (including `_`) becomes `_xx` in lowercase
/// hex. Distinct keys always map to distinct file names.
fn encode_key(key: &str) -> String {
    if key.is_empty() {
        return "_".to_string();
    }
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("_{:02x}", byte));
        }
    }
    encoded
}

impl KeyValueStore for FileKeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(NotifyError::Storage {
                context: format!("reading {}", path.display()),
                source,
            }),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|source| NotifyError::Storage {
            context: format!("creating {}", self.dir.display()),
            source,
        })?;

        let path = self.path_for(key);
        let mut temp_file =
            NamedTempFile::new_in(&self.dir).map_err(|source| NotifyError::Storage {
                context: "creating temp file".to_string(),
                source,
            })?;
        temp_file
            .write_all(value.as_bytes())
            .and_then(|_| temp_file.flush())
            .map_err(|source| NotifyError::Storage {
                context: "writing temp file".to_string(),
                source,
            })?;
        temp_file
            .persist(&path)
            .map_err(|err| NotifyError::Storage {
                context: format!("committing {}", path.display()),
                source: err.error,
            })?;
        Ok(())
    }
}

/// In-memory store. `set_failing(true)` makes writes fail, for exercising
/// the swallow-and-log persistence path.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    items: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn items(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map still holds usable strings.
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::StorageUnavailable {
                key: key.to_string(),
                reason: "store is marked failing".to_string(),
            });
        }
        self.items().insert(key.to_string(), value.to_string());
        Ok(())
    }
}
