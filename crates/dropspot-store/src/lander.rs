//! Landing of uploaded files into the received-files directory.
//!
//! Upload bytes are first written to a staging file inside the destination
//! directory (`.dropspot-<uuid>.part`), so a half-received upload never shows
//! up under its real name and the final move is a same-filesystem rename.
//!
//! [`UploadLander::land`] is best-effort: every part is attempted and each
//! gets its own [`LandOutcome`]. A same-named file already in place is
//! replaced (last write wins).

use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dirs;
use crate::error::{Result, StoreError};
use crate::names;

const STAGING_PREFIX: &str = ".dropspot-";
const STAGING_SUFFIX: &str = ".part";

fn is_staging_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX) && name.ends_with(STAGING_SUFFIX)
}

/// A received file part waiting to be landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPart {
    /// Name as declared by the client, unsanitized.
    pub name: String,
    pub temp_path: PathBuf,
    pub size: u64,
}

/// What happened to one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LandOutcome {
    Landed { name: String, path: PathBuf },
    /// Zero-byte part, typically an empty file input.
    Skipped { name: String },
    /// `reason` is safe to show to the client.
    Failed { name: String, reason: String },
}

impl LandOutcome {
    pub fn name(&self) -> &str {
        match self {
            LandOutcome::Landed { name, .. }
            | LandOutcome::Skipped { name }
            | LandOutcome::Failed { name, .. } => name,
        }
    }

    pub fn is_landed(&self) -> bool {
        matches!(self, LandOutcome::Landed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, LandOutcome::Failed { .. })
    }
}

/// An upload being received into a staging file.
#[derive(Debug)]
pub struct StagedUpload {
    file: File,
    path: PathBuf,
    size: u64,
}

impl StagedUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| StoreError::io("write", &self.path, e))?;
        self.size += chunk.len() as u64;
        Ok(())
    }

    /// Close the staging file and describe it as a part named `declared_name`.
    pub async fn finish(mut self, declared_name: impl Into<String>) -> Result<UploadPart> {
        self.file
            .flush()
            .await
            .map_err(|e| StoreError::io("flush", &self.path, e))?;
        Ok(UploadPart {
            name: declared_name.into(),
            temp_path: self.path,
            size: self.size,
        })
    }

    /// Drop the staging file, e.g. after the client went away mid-upload.
    pub async fn discard(self) {
        let StagedUpload { file, path, .. } = self;
        drop(file);
        discard_file(&path).await;
    }
}

/// Lands uploads into one directory.
#[derive(Debug, Clone)]
pub struct UploadLander {
    dir: PathBuf,
}

impl UploadLander {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open a fresh staging file in the destination directory.
    pub async fn stage(&self) -> Result<StagedUpload> {
        let path = self
            .dir
            .join(format!("{STAGING_PREFIX}{}{STAGING_SUFFIX}", Uuid::new_v4()));
        let file = File::create(&path)
            .await
            .map_err(|e| StoreError::io("create", &path, e))?;
        debug!(path = %path.display(), "Staging upload");
        Ok(StagedUpload {
            file,
            path,
            size: 0,
        })
    }

    /// Land every part, in order, and report one outcome per part.
    pub async fn land(&self, parts: Vec<UploadPart>) -> Vec<LandOutcome> {
        let mut outcomes = Vec::with_capacity(parts.len());
        for part in parts {
            outcomes.push(self.land_one(part).await);
        }
        outcomes
    }

    async fn land_one(&self, part: UploadPart) -> LandOutcome {
        if part.size == 0 {
            debug!(name = %part.name, "Skipping empty upload part");
            discard_file(&part.temp_path).await;
            return LandOutcome::Skipped { name: part.name };
        }

        let file_name = match names::sanitize(&part.name) {
            Ok(file_name) if !is_staging_name(&file_name) => file_name,
            _ => {
                warn!(name = ?part.name, "Rejected upload with unusable name");
                discard_file(&part.temp_path).await;
                return LandOutcome::Failed {
                    name: part.name,
                    reason: "invalid file name".to_string(),
                };
            }
        };

        let dest = self.dir.join(&file_name);
        match dirs::rename(&part.temp_path, &dest).await {
            Ok(()) => {
                info!(path = %dest.display(), size = part.size, "New file was uploaded");
                LandOutcome::Landed {
                    name: file_name,
                    path: dest,
                }
            }
            Err(e) => {
                warn!(error = %e, name = %file_name, "Failed to land upload");
                discard_file(&part.temp_path).await;
                LandOutcome::Failed {
                    name: file_name,
                    reason: "could not save file".to_string(),
                }
            }
        }
    }

    /// Throw away parts that will not be landed.
    pub async fn discard(&self, parts: Vec<UploadPart>) {
        for part in parts {
            discard_file(&part.temp_path).await;
        }
    }

    /// Remove staging files left behind by an earlier run.
    pub async fn purge_partials(&self) -> Result<usize> {
        let mut entries = dirs::list(&self.dir).await?;
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.is_file && is_staging_name(&entry.name) {
                dirs::remove(&self.dir.join(&entry.name)).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, dir = %self.dir.display(), "Purged stale upload staging files");
        }
        Ok(removed)
    }
}

async fn discard_file(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(error = %e, path = %path.display(), "Failed to remove staging file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn staged(lander: &UploadLander, name: &str, data: &[u8]) -> UploadPart {
        let mut upload = lander.stage().await.unwrap();
        upload.write_chunk(data).await.unwrap();
        upload.finish(name).await.unwrap()
    }

    fn visible_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_land_moves_file() {
        let tmp = TempDir::new().unwrap();
        let lander = UploadLander::new(tmp.path());

        let part = staged(&lander, "photo.jpg", b"jpeg-bytes").await;
        assert_eq!(part.size, 10);
        let temp = part.temp_path.clone();

        let outcomes = lander.land(vec![part]).await;
        assert_eq!(
            outcomes,
            vec![LandOutcome::Landed {
                name: "photo.jpg".into(),
                path: tmp.path().join("photo.jpg"),
            }]
        );
        assert!(!temp.exists());
        assert_eq!(std::fs::read(tmp.path().join("photo.jpg")).unwrap(), b"jpeg-bytes");
    }

    #[tokio::test]
    async fn test_zero_byte_part_skipped() {
        let tmp = TempDir::new().unwrap();
        let lander = UploadLander::new(tmp.path());

        let part = lander.stage().await.unwrap().finish("empty.txt").await.unwrap();
        let outcomes = lander.land(vec![part]).await;

        assert_eq!(outcomes, vec![LandOutcome::Skipped { name: "empty.txt".into() }]);
        assert!(visible_files(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_traversal_name_lands_inside() {
        let tmp = TempDir::new().unwrap();
        let inbox = tmp.path().join("inbox");
        std::fs::create_dir(&inbox).unwrap();
        let lander = UploadLander::new(&inbox);

        let part = staged(&lander, "../../escape.sh", b"echo").await;
        let outcomes = lander.land(vec![part]).await;

        assert_eq!(outcomes[0].name(), "escape.sh");
        assert!(inbox.join("escape.sh").exists());
        assert!(!tmp.path().join("escape.sh").exists());
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let tmp = TempDir::new().unwrap();
        let lander = UploadLander::new(tmp.path());

        let first = staged(&lander, "same.txt", b"first").await;
        lander.land(vec![first]).await;
        let second = staged(&lander, "same.txt", b"second").await;
        lander.land(vec![second]).await;

        assert_eq!(std::fs::read(tmp.path().join("same.txt")).unwrap(), b"second");
        assert_eq!(visible_files(tmp.path()), vec!["same.txt"]);
    }

    #[tokio::test]
    async fn test_mixed_batch_is_best_effort() {
        let tmp = TempDir::new().unwrap();
        let lander = UploadLander::new(tmp.path());
        // a directory in the way makes the rename fail
        std::fs::create_dir(tmp.path().join("taken")).unwrap();
        std::fs::write(tmp.path().join("taken").join("inner"), b"x").unwrap();

        let parts = vec![
            staged(&lander, "a.txt", b"a").await,
            staged(&lander, "taken", b"b").await,
            lander.stage().await.unwrap().finish("blank").await.unwrap(),
            staged(&lander, "..", b"c").await,
            staged(&lander, "d.txt", b"d").await,
        ];
        let outcomes = lander.land(parts).await;

        assert!(outcomes[0].is_landed());
        assert!(outcomes[1].is_failed());
        assert_eq!(outcomes[2], LandOutcome::Skipped { name: "blank".into() });
        assert!(outcomes[3].is_failed());
        assert!(outcomes[4].is_landed());
        // no staging leftovers
        assert_eq!(visible_files(tmp.path()), vec!["a.txt", "d.txt", "taken"]);
    }

    #[tokio::test]
    async fn test_staging_names_are_refused() {
        let tmp = TempDir::new().unwrap();
        let lander = UploadLander::new(tmp.path());

        let part = staged(&lander, ".dropspot-1234.part", b"x").await;
        assert!(lander.land(vec![part]).await[0].is_failed());
    }

    #[tokio::test]
    async fn test_discard_removes_staging_file() {
        let tmp = TempDir::new().unwrap();
        let lander = UploadLander::new(tmp.path());

        let mut upload = lander.stage().await.unwrap();
        upload.write_chunk(b"partial").await.unwrap();
        upload.write_chunk(b" body").await.unwrap();
        assert_eq!(upload.size(), 12);
        let path = upload.path().to_path_buf();
        assert!(path.exists());

        upload.discard().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_discard_parts() {
        let tmp = TempDir::new().unwrap();
        let lander = UploadLander::new(tmp.path());

        let parts = vec![
            staged(&lander, "one", b"1").await,
            staged(&lander, "two", b"2").await,
        ];
        lander.discard(parts).await;
        assert!(visible_files(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_purge_partials() {
        let tmp = TempDir::new().unwrap();
        let lander = UploadLander::new(tmp.path());
        std::fs::write(tmp.path().join("keep.bin"), b"k").unwrap();

        let _left_over = staged(&lander, "never-landed", b"x").await;
        let _other = staged(&lander, "also", b"y").await;

        assert_eq!(lander.purge_partials().await.unwrap(), 2);
        assert_eq!(visible_files(tmp.path()), vec!["keep.bin"]);
    }
}
