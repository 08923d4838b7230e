//! Mock `LibraryApi`/`DebridApi` implementations shared by the engine's
//! control-loop tests. Kept `pub(crate)` and `#[cfg(test)]`-only: these
//! exist purely to let each loop's tests drive the engine without
//! touching a live service.

#![cfg(test)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use crate::debrid_client::{ActiveCount, AddMagnetResponse, DebridApi, Torrent, TorrentInfo};
use crate::error::{DebridError, LibraryError};
use crate::library_client::LibraryApi;
use crate::model::{MediaItem, MediaType, Stream};
use crate::state::StateStore;

use super::Engine;

#[derive(Default)]
pub(crate) struct MockLibrary {
    pub calls: Mutex<Vec<String>>,
    pub problem_items: Mutex<Vec<MediaItem>>,
    pub scrape_responses: Mutex<VecDeque<Result<HashMap<String, Stream>, String>>>,
    pub remove_results: Mutex<VecDeque<bool>>,
    pub add_results: Mutex<VecDeque<bool>>,
    pub retry_results: Mutex<VecDeque<bool>>,
    pub item_by_ids: Mutex<Option<MediaItem>>,
    pub healthy: Mutex<bool>,
}

impl MockLibrary {
    pub fn new() -> Self {
        Self {
            healthy: Mutex::new(true),
            ..Default::default()
        }
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn log(&self, call: String) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl LibraryApi for MockLibrary {
    async fn health_check(&self) -> bool {
        *self.healthy.lock().await
    }

    async fn get_problem_items(&self, _states: &[String], _limit: usize) -> Vec<MediaItem> {
        self.log("get_problem_items".to_string()).await;
        self.problem_items.lock().await.clone()
    }

    async fn scrape_item(
        &self,
        tmdb: Option<&str>,
        tvdb: Option<&str>,
        _imdb: Option<&str>,
        media_type: MediaType,
    ) -> Result<HashMap<String, Stream>, LibraryError> {
        self.log(format!("scrape_item(tmdb={:?}, tvdb={:?}, type={:?})", tmdb, tvdb, media_type)).await;
        match self.scrape_responses.lock().await.pop_front() {
            Some(Ok(streams)) => Ok(streams),
            Some(Err(msg)) => Err(LibraryError::Decode(msg)),
            None => Ok(HashMap::new()),
        }
    }

    async fn retry_item(&self, id: &str) -> bool {
        self.log(format!("retry_item({})", id)).await;
        self.retry_results.lock().await.pop_front().unwrap_or(true)
    }

    async fn reset_item(&self, id: &str) -> bool {
        self.log(format!("reset_item({})", id)).await;
        true
    }

    async fn remove_item(&self, id: &str) -> bool {
        self.log(format!("remove_item({})", id)).await;
        self.remove_results.lock().await.pop_front().unwrap_or(true)
    }

    async fn add_item(&self, tmdb: Option<&str>, tvdb: Option<&str>, media_type: MediaType) -> bool {
        self.log(format!("add_item(tmdb={:?}, tvdb={:?}, type={:?})", tmdb, tvdb, media_type)).await;
        self.add_results.lock().await.pop_front().unwrap_or(true)
    }

    async fn get_item_by_ids(&self, tmdb: Option<&str>, tvdb: Option<&str>) -> Option<MediaItem> {
        self.log(format!("get_item_by_ids(tmdb={:?}, tvdb={:?})", tmdb, tvdb)).await;
        self.item_by_ids.lock().await.clone()
    }
}

#[derive(Default)]
pub(crate) struct MockDebrid {
    pub calls: Mutex<Vec<String>>,
    pub add_magnet_responses: Mutex<VecDeque<Result<AddMagnetResponse, DebridError>>>,
    /// Responses for `get_torrent_info`, keyed by torrent id; each call pops
    /// the next queued response (models a polling sequence).
    pub torrent_info: Mutex<HashMap<String, VecDeque<Result<TorrentInfo, DebridError>>>>,
    pub select_files_result: Mutex<bool>,
    pub torrents: Mutex<Vec<Torrent>>,
    pub active_count: Mutex<ActiveCount>,
}

impl MockDebrid {
    pub fn new() -> Self {
        Self {
            select_files_result: Mutex::new(true),
            active_count: Mutex::new(ActiveCount { nb: 0, limit: 3 }),
            ..Default::default()
        }
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn log(&self, call: String) {
        self.calls.lock().await.push(call);
    }

    pub async fn queue_torrent_info(&self, torrent_id: &str, response: Result<TorrentInfo, DebridError>) {
        self.torrent_info
            .lock()
            .await
            .entry(torrent_id.to_string())
            .or_default()
            .push_back(response);
    }
}

#[async_trait]
impl DebridApi for MockDebrid {
    async fn get_user(&self) -> Result<serde_json::Value, DebridError> {
        Ok(serde_json::json!({"id": 1}))
    }

    async fn get_active_count(&self) -> Result<ActiveCount, DebridError> {
        Ok(self.active_count.lock().await.clone())
    }

    async fn get_torrents(&self, _limit: usize) -> Result<Vec<Torrent>, DebridError> {
        self.log("get_torrents".to_string()).await;
        Ok(self.torrents.lock().await.clone())
    }

    async fn get_torrent_info(&self, id: &str) -> Result<TorrentInfo, DebridError> {
        self.log(format!("get_torrent_info({})", id)).await;
        let mut table = self.torrent_info.lock().await;
        match table.get_mut(id).and_then(|q| q.pop_front()) {
            Some(r) => r,
            None => Err(DebridError::TorrentNotFound(id.to_string())),
        }
    }

    async fn add_magnet(&self, _magnet: &str) -> Result<AddMagnetResponse, DebridError> {
        self.log("add_magnet".to_string()).await;
        self.add_magnet_responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(AddMagnetResponse { id: "default".to_string() }))
    }

    async fn select_files(&self, id: &str, selector: &str) -> bool {
        self.log(format!("select_files({}, {})", id, selector)).await;
        *self.select_files_result.lock().await
    }

    async fn delete_torrent(&self, id: &str) -> bool {
        self.log(format!("delete_torrent({})", id)).await;
        true
    }
}

/// A minimal config with all sleeps zeroed out, suitable for tests that
/// call engine internals directly without waiting on real intervals.
pub(crate) fn test_config() -> crate::config::Config {
    crate::config::Config {
        riven_url: "http://localhost".to_string(),
        riven_api_key: "key".to_string(),
        rd_api_key: "key".to_string(),
        rd_base_url: "http://localhost".to_string(),
        check_interval_hours: 6.0,
        retry_interval_minutes: 10.0,
        rd_check_interval_minutes: 5.0,
        rd_max_wait_hours: 2.0,
        rd_cleanup_interval_hours: 1.0,
        rd_stuck_torrent_hours: 24.0,
        max_riven_retries: 3,
        max_rd_torrents: 10,
        max_active_rd_downloads: 3,
        torrent_add_delay_seconds: 0,
        skip_riven_retry: false,
        skip_rd_validation: true,
        rd_rate_limit_seconds: 0.0,
        riven_rate_limit_seconds: 0.0,
        problem_states: crate::config::default_problem_states(),
        log_level: "info".to_string(),
        state_file: String::new(),
    }
}

/// Build an `Engine` wired to the given mock adapters, backed by a
/// throwaway state file, for tests that need to call loop-body methods
/// directly.
pub(crate) fn test_engine(library: Arc<dyn LibraryApi>, debrid: Arc<dyn DebridApi>) -> (Engine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path().join("state.json"));
    let (_tx, rx) = watch::channel(false);
    let engine = Engine::new(Arc::new(test_config()), library, debrid, store, rx);
    (engine, dir)
}

pub(crate) fn test_item(id: &str, kind: MediaType, tmdb: Option<&str>) -> MediaItem {
    MediaItem {
        id: id.to_string(),
        kind,
        state: "Failed".to_string(),
        imdb: None,
        tmdb: tmdb.map(|s| s.to_string()),
        tvdb: None,
        parent_ids: None,
        aired_at: None,
        title: "Test Item".to_string(),
        parent_title: None,
        season_number: None,
        episode_number: None,
    }
}
