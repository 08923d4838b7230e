//! In-memory indices the three control loops share, plus the single
//! writer to durable storage. All three loops run as cooperative tokio
//! tasks on a shared runtime (which may schedule them across OS threads),
//! so every read-modify-persist sequence below happens while holding the
//! `tokio::sync::Mutex` that wraps this struct in `Engine`.

use std::collections::{HashMap, HashSet};

use crate::model::{DownloadTracker, ItemTracker};
use crate::state::StateStore;

pub struct EngineState {
    pub item_trackers: HashMap<String, ItemTracker>,
    pub rd_downloads: HashMap<String, DownloadTracker>,
    pub processed_items: HashSet<String>,
    pub rr_index: usize,
    store: StateStore,
}

impl EngineState {
    pub fn new(mut store: StateStore) -> Self {
        store.load();
        let item_trackers = store.get_item_trackers().clone();
        let rd_downloads = store.get_rd_downloads().clone();
        let processed_items = store.get_processed_items().clone();

        Self {
            item_trackers,
            rd_downloads,
            processed_items,
            rr_index: 0,
            store,
        }
    }

    pub fn upsert_item_tracker(&mut self, tracker: ItemTracker) {
        let key = tracker.item_id.clone();
        self.store.set_item_tracker(&key, tracker.clone());
        self.item_trackers.insert(key, tracker);
    }

    pub fn remove_item_tracker(&mut self, key: &str) {
        if self.item_trackers.remove(key).is_some() {
            self.store.remove_item_tracker(key);
        }
    }

    pub fn upsert_rd_download(&mut self, download: DownloadTracker) {
        let id = download.torrent_id.clone();
        self.store.set_rd_download(&id, download.clone());
        self.rd_downloads.insert(id, download);
    }

    pub fn remove_rd_download(&mut self, torrent_id: &str) {
        if self.rd_downloads.remove(torrent_id).is_some() {
            self.store.remove_rd_download(torrent_id);
        }
    }

    pub fn mark_processed(&mut self, key: &str) {
        if self.processed_items.insert(key.to_string()) {
            self.store.add_processed_item(key);
        }
    }

    pub fn is_processed(&self, key: &str) -> bool {
        self.processed_items.contains(key)
    }

    /// Trackers eligible for the next slot fill: manual scrape already
    /// kicked off and at least one untried candidate remains.
    pub fn pending_tracker_keys(&self) -> Vec<String> {
        self.item_trackers
            .values()
            .filter(|t| t.has_pending_streams())
            .map(|t| t.item_id.clone())
            .collect()
    }

    /// Pick the next pending tracker by round-robin and advance the
    /// cursor. Returns `None` if there are no eligible trackers.
    pub fn next_round_robin(&mut self, pending: &[String]) -> Option<String> {
        if pending.is_empty() {
            return None;
        }
        let idx = self.rr_index % pending.len();
        self.rr_index = (self.rr_index + 1) % pending.len();
        pending.get(idx).cloned()
    }
}
