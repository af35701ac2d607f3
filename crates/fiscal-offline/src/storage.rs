//! Storage collaborator for the queue snapshot
//!
//! The queue writes its whole state as one blob under a single key, so a
//! backend only needs get/set/delete on opaque bytes.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use fiscal_core::error::{ApiError, ApiResult};
use fs4::fs_std::FileExt;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

/// Key/value blob store
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read the blob stored under `key`, if any
    async fn get(&self, key: &str) -> ApiResult<Option<Vec<u8>>>;

    /// Durably replace the blob stored under `key`
    async fn set(&self, key: &str, value: &[u8]) -> ApiResult<()>;

    /// Remove `key`; removing a missing key is not an error
    async fn delete(&self, key: &str) -> ApiResult<()>;

    /// Backend name for log messages
    fn name(&self) -> &'static str;
}

/// In-process storage, lost on exit
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> ApiResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> ApiResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> ApiResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// One JSON file per key inside a directory
///
/// Writes go to a locked temporary file that is synced and then renamed over
/// the target, so a crash leaves either the old or the new snapshot.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: Utf8PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Path of the file backing `key`
    pub fn path_for(&self, key: &str) -> Utf8PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

fn write_atomically(dir: &Utf8Path, path: &Utf8Path, value: &[u8]) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let temp_path = path.with_extension("json.tmp");

    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;

        // Released when `file` is dropped
        file.lock_exclusive()?;
        file.write_all(value)?;
        file.sync_all()?;
    }

    fs::rename(&temp_path, path)
}

fn persistence_error(action: &str, path: &Utf8Path, err: impl std::fmt::Display) -> ApiError {
    ApiError::persistence(format!("failed to {action} {path}: {err}"))
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: &str) -> ApiResult<Option<Vec<u8>>> {
        let path = self.path_for(key);
        let read_path = path.clone();
        let result = tokio::task::spawn_blocking(move || match fs::read(&read_path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        })
        .await
        .map_err(|err| persistence_error("read", &path, err))?;

        result.map_err(|err| persistence_error("read", &path, err))
    }

    async fn set(&self, key: &str, value: &[u8]) -> ApiResult<()> {
        let path = self.path_for(key);
        let dir = self.dir.clone();
        let write_path = path.clone();
        let value = value.to_vec();

        tokio::task::spawn_blocking(move || write_atomically(&dir, &write_path, &value))
            .await
            .map_err(|err| persistence_error("write", &path, err))?
            .map_err(|err| persistence_error("write", &path, err))?;

        tracing::trace!(path = %path, "snapshot written");
        Ok(())
    }

    async fn delete(&self, key: &str) -> ApiResult<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(persistence_error("delete", &path, err)),
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
