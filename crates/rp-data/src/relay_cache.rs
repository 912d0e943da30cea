//! Persistent slot → relay metadata cache.
//!
//! Explorer lookups are slow and rate limited, so every resolution is kept.
//! The cache lives in two files: the durable file holds the last complete
//! batch, and the working file is rewritten after every single resolution.
//! [`RelayCache::commit`] renames the working file over the durable one once a
//! batch finishes, so the durable file is never partially written.

use eyre::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::types::RelayResolution;

const WORKING_SUFFIX: &str = "partial";

/// Key-value store of resolved slots. A slot with no entry is unresolved.
#[derive(Debug)]
pub struct RelayCache {
    path: PathBuf,
    working_path: PathBuf,
    entries: BTreeMap<u64, RelayResolution>,
    dirty: bool,
}

fn read_entries(path: &Path) -> Result<BTreeMap<u64, RelayResolution>> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read relay cache {}", path.display()))?;
    serde_json::from_str(&content)
        .wrap_err_with(|| format!("failed to parse relay cache {}", path.display()))
}

impl RelayCache {
    /// Opens the cache at `path`, resuming from the working file if a previous
    /// run stopped mid-batch.
    ///
    /// # Errors
    /// Returns error if the durable file exists but cannot be parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let working_path = path.with_extension(WORKING_SUFFIX);

        let entries = if working_path.exists() {
            match read_entries(&working_path) {
                Ok(entries) => {
                    info!(
                        path = %working_path.display(),
                        entries = entries.len(),
                        "resuming relay cache from working file"
                    );
                    entries
                }
                Err(e) => {
                    warn!(error = %e, "ignoring unreadable relay cache working file");
                    Self::read_durable(&path)?
                }
            }
        } else {
            Self::read_durable(&path)?
        };

        Ok(Self {
            path,
            working_path,
            entries,
            dirty: false,
        })
    }

    fn read_durable(path: &Path) -> Result<BTreeMap<u64, RelayResolution>> {
        if path.exists() {
            read_entries(path)
        } else {
            debug!(path = %path.display(), "no relay cache yet, starting empty");
            Ok(BTreeMap::new())
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn working_path(&self) -> &Path {
        &self.working_path
    }

    /// Resolution for `slot`, or `None` if the slot was never resolved.
    pub fn get(&self, slot: u64) -> Option<&RelayResolution> {
        self.entries.get(&slot)
    }

    pub fn is_resolved(&self, slot: u64) -> bool {
        self.entries.contains_key(&slot)
    }

    /// Records a resolution. Existing entries are never overwritten.
    pub fn insert(&mut self, slot: u64, resolution: RelayResolution) {
        if self.entries.contains_key(&slot) {
            debug!(slot, "relay cache entry already present, keeping original");
            return;
        }
        self.entries.insert(slot, resolution);
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u64, &RelayResolution)> {
        self.entries.iter()
    }

    /// Rewrites the working file with every entry resolved so far.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn persist_working(&self) -> Result<()> {
        let body =
            serde_json::to_string(&self.entries).wrap_err("failed to serialize relay cache")?;
        std::fs::write(&self.working_path, body).wrap_err_with(|| {
            format!(
                "failed to write relay cache working file {}",
                self.working_path.display()
            )
        })
    }

    /// Replaces the durable file with the working file.
    ///
    /// Writes the working file first if there are unsaved entries. A no-op
    /// when nothing was resolved since the last commit.
    ///
    /// # Errors
    /// Returns error if the working file cannot be written or renamed.
    pub fn commit(&mut self) -> Result<()> {
        if self.dirty {
            self.persist_working()?;
        }
        if self.working_path.exists() {
            std::fs::rename(&self.working_path, &self.path).wrap_err_with(|| {
                format!(
                    "failed to replace relay cache {} with {}",
                    self.path.display(),
                    self.working_path.display()
                )
            })?;
            info!(path = %self.path.display(), entries = self.entries.len(), "relay cache committed");
        }
        self.dirty = false;
        Ok(())
    }
}
