//! Durable state store. A single JSON document, written via write-to-temp
//! + atomic rename on every mutation so a crash mid-write never leaves a
//! corrupted document behind.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::model::{DownloadTracker, ItemTracker};

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    item_trackers: HashMap<String, ItemTracker>,
    #[serde(default)]
    rd_downloads: HashMap<String, DownloadTracker>,
    #[serde(default)]
    processed_items: HashSet<String>,
}

/// Keyed persistent structure mirroring the engine's three in-memory
/// collections. Callers hold the `StateStore` and call its mutating
/// methods after every in-memory change; `StateStore` is the single writer
/// to disk.
pub struct StateStore {
    path: PathBuf,
    state: PersistedState,
}

impl StateStore {
    /// Resolve `path`. If `path` exists and is a directory, state is
    /// written inside it as `state.json`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let mut resolved = path.as_ref().to_path_buf();
        if resolved.is_dir() {
            warn!("state path {} is a directory, using state.json inside it", resolved.display());
            resolved = resolved.join("state.json");
        }
        Self {
            path: resolved,
            state: PersistedState::default(),
        }
    }

    /// Load state from disk. Returns whether a prior state existed.
    /// Missing optional fields default rather than failing; an
    /// unparseable document is treated as "no prior state" rather than a
    /// fatal error.
    pub fn load(&mut self) -> bool {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => {
                info!("no state file found at {}, starting fresh", self.path.display());
                return false;
            }
        };

        if content.trim().is_empty() {
            info!("empty state file at {}, starting fresh", self.path.display());
            return false;
        }

        match serde_json::from_str::<PersistedState>(&content) {
            Ok(state) => {
                self.state = state;
                info!(
                    "restored state: {} trackers, {} downloads, {} processed",
                    self.state.item_trackers.len(),
                    self.state.rd_downloads.len(),
                    self.state.processed_items.len()
                );
                true
            }
            Err(e) => {
                error!("failed to parse state file {}: {}", self.path.display(), e);
                false
            }
        }
    }

    /// Write-to-temp-then-rename: every mutating call above flushes this
    /// before returning, so a crash between writes never leaves a
    /// half-written document on disk.
    fn persist(&self) {
        if let Err(e) = self.try_persist() {
            // In-memory state remains authoritative; the next mutation
            // retries the write.
            error!("failed to persist state to {}: {}", self.path.display(), e);
        }
    }

    fn try_persist(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.tmp_path();
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            let json = serde_json::to_vec_pretty(&self.state)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone();
        let file_name = tmp
            .file_name()
            .map(|n| format!(".{}.tmp", n.to_string_lossy()))
            .unwrap_or_else(|| ".trc_state.tmp".to_string());
        tmp.set_file_name(file_name);
        tmp
    }

    pub fn get_item_trackers(&self) -> &HashMap<String, ItemTracker> {
        &self.state.item_trackers
    }

    pub fn set_item_tracker(&mut self, key: &str, tracker: ItemTracker) {
        self.state.item_trackers.insert(key.to_string(), tracker);
        self.persist();
    }

    pub fn remove_item_tracker(&mut self, key: &str) {
        if self.state.item_trackers.remove(key).is_some() {
            self.persist();
        }
    }

    pub fn get_rd_downloads(&self) -> &HashMap<String, DownloadTracker> {
        &self.state.rd_downloads
    }

    pub fn set_rd_download(&mut self, torrent_id: &str, download: DownloadTracker) {
        self.state.rd_downloads.insert(torrent_id.to_string(), download);
        self.persist();
    }

    pub fn remove_rd_download(&mut self, torrent_id: &str) {
        if self.state.rd_downloads.remove(torrent_id).is_some() {
            self.persist();
        }
    }

    pub fn get_processed_items(&self) -> &HashSet<String> {
        &self.state.processed_items
    }

    pub fn add_processed_item(&mut self, key: &str) {
        if self.state.processed_items.insert(key.to_string()) {
            self.persist();
        }
    }

    pub fn is_processed(&self, key: &str) -> bool {
        self.state.processed_items.contains(key)
    }
}
