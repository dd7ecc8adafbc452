//! Rotating-index message history.
//!
//! Messages live in the received-messages directory as `{index}.txt`. The
//! newest message is always `0.txt`; every submission shifts all existing
//! messages up by one index before writing the new `0.txt`.
//!
//! The shift is computed as an explicit [`RotationPlan`] whose steps run from
//! the highest index down. Running them in any other order would rename a
//! file onto one that has not moved yet.
//!
//! A failed rename half way through leaves a gap or a stale duplicate in the
//! index sequence. There is no rollback; the error is returned and the ledger
//! should be treated as inconsistent until someone looks at the directory.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::dirs;
use crate::error::{Result, StoreError};

const MESSAGE_EXT: &str = ".txt";

/// Text accepted for the ledger. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageText(String);

impl MessageText {
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.is_empty() {
            return Err(StoreError::Validation("empty text message".to_string()));
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Parse a canonical message file name (`0.txt`, `42.txt`) into its index.
///
/// Signs, leading zeros and anything else that would not round-trip through
/// [`message_file_name`] are not ledger entries.
pub fn parse_index(name: &str) -> Option<u64> {
    let digits = name.strip_suffix(MESSAGE_EXT)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    digits.parse().ok()
}

pub fn message_file_name(index: u64) -> String {
    format!("{index}{MESSAGE_EXT}")
}

/// One `{from}.txt -> {to}.txt` rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationStep {
    pub from: u64,
    pub to: u64,
}

/// Ordered renames that free index 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPlan {
    steps: Vec<RotationStep>,
}

impl RotationPlan {
    /// Build the plan for the given occupied indices, in any order.
    ///
    /// Fails when the highest index has no successor; nothing is renamed then.
    pub fn for_indices(mut indices: Vec<u64>) -> Result<Self> {
        indices.sort_unstable_by(|a, b| b.cmp(a));
        indices.dedup();
        let steps = indices
            .into_iter()
            .map(|i| {
                i.checked_add(1)
                    .map(|to| RotationStep { from: i, to })
                    .ok_or_else(|| {
                        StoreError::Validation(format!("message index {i} cannot be shifted"))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { steps })
    }

    /// Steps in execution order, highest index first.
    pub fn steps(&self) -> &[RotationStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// The message history in one directory.
///
/// `submit` holds an internal lock for its whole read-plan-rename-write
/// sequence, so concurrent submissions through the same ledger never
/// interleave. Share the ledger (e.g. behind an `Arc`) rather than creating
/// several over one directory.
#[derive(Debug)]
pub struct MessageLedger {
    dir: PathBuf,
    writer: Mutex<()>,
}

impl MessageLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record `text` as message 0 and return the number of stored messages.
    pub async fn submit(&self, text: &MessageText) -> Result<usize> {
        let _guard = self.writer.lock().await;

        let plan = RotationPlan::for_indices(self.scan().await?)?;
        self.apply(&plan).await?;

        let newest = self.dir.join(message_file_name(0));
        dirs::write(&newest, text.as_str().as_bytes()).await?;

        let count = plan.len() + 1;
        info!(
            path = %newest.display(),
            bytes = text.as_str().len(),
            count,
            "New text message"
        );
        Ok(count)
    }

    /// Read message `index` (0 = newest).
    pub async fn read(&self, index: u64) -> Result<String> {
        let path = self.dir.join(message_file_name(index));
        match fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(message_file_name(index)))
            }
            Err(e) => Err(StoreError::io("read", path, e)),
        }
    }

    /// Occupied indices, ascending.
    pub async fn indices(&self) -> Result<Vec<u64>> {
        let mut indices = self.scan().await?;
        indices.sort_unstable();
        Ok(indices)
    }

    async fn scan(&self) -> Result<Vec<u64>> {
        let mut entries = dirs::list(&self.dir).await?;
        let mut indices = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.is_file {
                continue;
            }
            if let Some(index) = parse_index(&entry.name) {
                indices.push(index);
            }
        }
        Ok(indices)
    }

    async fn apply(&self, plan: &RotationPlan) -> Result<()> {
        for step in plan.steps() {
            let from = self.dir.join(message_file_name(step.from));
            let to = self.dir.join(message_file_name(step.to));
            dirs::rename(&from, &to).await?;
            debug!(from = step.from, to = step.to, "Shifted message");
        }
        Ok(())
    }
}
