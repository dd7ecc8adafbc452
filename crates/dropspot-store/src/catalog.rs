//! Files offered for download from the hosted-files directory.
//!
//! Hidden (dot-prefixed) files are neither listed nor served.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::dirs;
use crate::error::{Result, StoreError};
use crate::names;

#[derive(Debug, Clone)]
pub struct ShareCatalog {
    dir: PathBuf,
}

impl ShareCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot of visible regular files, in filesystem order.
    pub async fn list_shared(&self) -> Result<Vec<String>> {
        let mut entries = dirs::list(&self.dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.is_file && !names::is_hidden(&entry.name) {
                files.push(entry.name);
            }
        }
        debug!(dir = %self.dir.display(), count = files.len(), "Listed shared files");
        Ok(files)
    }

    /// Map a requested name to a servable path inside the hosted directory.
    ///
    /// The name is cut down to its basename first, so the result can never
    /// point outside the directory. Unusable, hidden, missing or non-file
    /// targets all come back as [`StoreError::NotFound`].
    pub async fn resolve_download(&self, requested: &str) -> Result<PathBuf> {
        let not_found = || StoreError::NotFound(requested.to_string());

        let name = names::sanitize(requested).map_err(|_| not_found())?;
        if names::is_hidden(&name) {
            return Err(not_found());
        }

        let path = self.dir.join(&name);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(not_found()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(StoreError::io("metadata", path, e)),
        }
    }
}
