//! Directory layout and filesystem primitives.
//!
//! [`DirectoryStore`] owns the three directories under the drop spot root.
//! The free functions wrap `tokio::fs` so every failure carries the operation
//! and path it happened on.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use crate::error::{Result, StoreError};

pub const RECEIVED_FILES_DIR: &str = "received-files";
pub const HOSTED_FILES_DIR: &str = "hosted-files";
pub const RECEIVED_MESSAGES_DIR: &str = "received-messages";

/// The three directories a drop spot works in.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    received_files: PathBuf,
    hosted_files: PathBuf,
    received_messages: PathBuf,
}

impl DirectoryStore {
    /// Lay out the directories under `root`, creating any that are missing.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let store = Self {
            received_files: root.join(RECEIVED_FILES_DIR),
            hosted_files: root.join(HOSTED_FILES_DIR),
            received_messages: root.join(RECEIVED_MESSAGES_DIR),
            root,
        };

        for dir in [
            &store.received_files,
            &store.hosted_files,
            &store.received_messages,
        ] {
            ensure(dir).await?;
        }

        info!(root = %store.root.display(), "Directory store initialized");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn received_files(&self) -> &Path {
        &self.received_files
    }

    pub fn hosted_files(&self) -> &Path {
        &self.hosted_files
    }

    pub fn received_messages(&self) -> &Path {
        &self.received_messages
    }
}

/// One directory entry as seen by [`list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    /// True for regular files only. Symlinks are not followed.
    pub is_file: bool,
}

/// Lazy, single-pass listing of a directory in filesystem order.
pub struct Entries {
    dir: PathBuf,
    inner: fs::ReadDir,
}

impl Entries {
    /// Next entry, or `None` once the directory is exhausted.
    ///
    /// Entries whose names are not valid UTF-8 are passed over: they cannot be
    /// addressed by peers anyway.
    pub async fn next_entry(&mut self) -> Result<Option<Entry>> {
        loop {
            let Some(entry) = self
                .inner
                .next_entry()
                .await
                .map_err(|e| StoreError::io("read_dir", &self.dir, e))?
            else {
                return Ok(None);
            };

            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                debug!(dir = %self.dir.display(), name = ?file_name, "Skipping non UTF-8 entry");
                continue;
            };

            let file_type = entry
                .file_type()
                .await
                .map_err(|e| StoreError::io("file_type", entry.path(), e))?;

            return Ok(Some(Entry {
                name: name.to_string(),
                is_file: file_type.is_file(),
            }));
        }
    }
}

/// Create `dir` and all missing parents. Idempotent.
pub async fn ensure(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| StoreError::io("create_dir_all", dir, e))
}

pub async fn list(dir: &Path) -> Result<Entries> {
    let inner = fs::read_dir(dir)
        .await
        .map_err(|e| StoreError::io("read_dir", dir, e))?;
    Ok(Entries {
        dir: dir.to_path_buf(),
        inner,
    })
}

/// Atomic when `src` and `dst` are on the same filesystem. Replaces `dst`.
pub async fn rename(src: &Path, dst: &Path) -> Result<()> {
    fs::rename(src, dst)
        .await
        .map_err(|e| StoreError::io("rename", src, e))
}

/// Create-or-truncate write. Concurrent readers may see a partial file.
pub async fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes)
        .await
        .map_err(|e| StoreError::io("write", path, e))
}

pub async fn remove(path: &Path) -> Result<()> {
    fs::remove_file(path)
        .await
        .map_err(|e| StoreError::io("remove_file", path, e))
}
