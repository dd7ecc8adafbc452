//! # dropspot-store
//!
//! Filesystem-backed exchange store for a drop spot: a LAN endpoint where
//! peers leave text messages, upload files and download shared ones.
//!
//! Everything lives in three directories under one root:
//!
//! - `received-messages/` -- text messages as `{index}.txt`, newest at `0.txt`
//!   ([`MessageLedger`])
//! - `received-files/` -- uploads landed by [`UploadLander`]
//! - `hosted-files/` -- files offered for download by [`ShareCatalog`]
//!
//! There is no database or index file; the directory listings are the state.

pub mod catalog;
pub mod dirs;
pub mod lander;
pub mod ledger;
pub mod names;

mod error;

use std::path::{Path, PathBuf};

pub use catalog::ShareCatalog;
pub use dirs::DirectoryStore;
pub use error::{Result, StoreError};
pub use lander::{LandOutcome, StagedUpload, UploadLander, UploadPart};
pub use ledger::{MessageLedger, MessageText};

/// The four store components wired to one root directory.
#[derive(Debug)]
pub struct DropSpot {
    dirs: DirectoryStore,
    ledger: MessageLedger,
    lander: UploadLander,
    catalog: ShareCatalog,
}

impl DropSpot {
    /// Open (or create) a drop spot rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let dirs = DirectoryStore::open(root).await?;
        Ok(Self {
            ledger: MessageLedger::new(dirs.received_messages()),
            lander: UploadLander::new(dirs.received_files()),
            catalog: ShareCatalog::new(dirs.hosted_files()),
            dirs,
        })
    }

    pub fn root(&self) -> &Path {
        self.dirs.root()
    }

    pub fn dirs(&self) -> &DirectoryStore {
        &self.dirs
    }

    pub fn ledger(&self) -> &MessageLedger {
        &self.ledger
    }

    pub fn lander(&self) -> &UploadLander {
        &self.lander
    }

    pub fn catalog(&self) -> &ShareCatalog {
        &self.catalog
    }

    /// Record a text message; returns the number of stored messages.
    pub async fn submit_message(&self, text: &MessageText) -> Result<usize> {
        self.ledger.submit(text).await
    }

    /// Land staged parts. Failures are reported per part, never as a whole.
    pub async fn land_uploads(&self, parts: Vec<UploadPart>) -> Vec<LandOutcome> {
        self.lander.land(parts).await
    }

    pub async fn list_shared(&self) -> Result<Vec<String>> {
        self.catalog.list_shared().await
    }

    pub async fn resolve_download(&self, name: &str) -> Result<PathBuf> {
        self.catalog.resolve_download(name).await
    }
}
