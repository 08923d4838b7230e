//! Observes in-flight debrid downloads: disposes of dead/failed/stuck
//! torrents and, on completion, reapplies the result through the Library.

use chrono::Utc;
use tracing::{error, info, warn};

use crate::debrid_client::TorrentStatus;
use crate::error::DebridError;
use crate::model::{is_pseudo_id, MediaType};

use super::Engine;

impl Engine {
    pub(super) async fn monitor_rd_downloads(&self) {
        let downloads: Vec<_> = {
            let state = self.state.lock().await;
            state.rd_downloads.values().cloned().collect()
        };

        if downloads.is_empty() {
            return;
        }

        info!("monitoring {} rd downloads", downloads.len());

        let mut to_remove = Vec::new();
        let mut refilled_any = false;

        for download in downloads {
            let torrent_id = download.torrent_id.clone();
            let tracker = {
                let state = self.state.lock().await;
                state.item_trackers.get(&download.item_id).cloned()
            };

            match self.debrid.get_torrent_info(&torrent_id).await {
                Ok(torrent) => {
                    let elapsed = Utc::now() - download.started_at;
                    let elapsed_mins = elapsed.num_seconds() as f64 / 60.0;

                    match torrent.status() {
                        TorrentStatus::Complete => {
                            info!("torrent completed after {:.1}m: {}", elapsed_mins, torrent.filename.chars().take(50).collect::<String>());
                            if let Some(item) = tracker.map(|t| t.item) {
                                self.reapply_completed(&item, &download.infohash).await;
                            }
                            to_remove.push(torrent_id.clone());
                            let mut state = self.state.lock().await;
                            state.mark_processed(&download.item_id);
                        }
                        TorrentStatus::Failed => {
                            warn!("torrent failed ({}): {}", torrent.status, torrent.filename.chars().take(50).collect::<String>());
                            self.debrid.delete_torrent(&torrent_id).await;
                            to_remove.push(torrent_id.clone());
                            refilled_any = true;
                        }
                        TorrentStatus::Stalled => {
                            warn!("torrent dead (no seeders): {}", torrent.filename.chars().take(50).collect::<String>());
                            self.debrid.delete_torrent(&torrent_id).await;
                            to_remove.push(torrent_id.clone());
                            refilled_any = true;
                        }
                        TorrentStatus::Active if elapsed > self.config.rd_max_wait() && torrent.progress < 10.0 => {
                            warn!("torrent stalled after {:.1}m (progress={}%): {}", elapsed_mins, torrent.progress, torrent.filename.chars().take(50).collect::<String>());
                            self.debrid.delete_torrent(&torrent_id).await;
                            to_remove.push(torrent_id.clone());
                            refilled_any = true;
                        }
                        TorrentStatus::Active => {
                            info!("downloading ({}%, {:.1}m): {}", torrent.progress, elapsed_mins, torrent.filename.chars().take(50).collect::<String>());
                        }
                        TorrentStatus::WaitingSelection | TorrentStatus::Unknown => {
                            info!("waiting ({}, {}%): {}", torrent.status, torrent.progress, torrent.filename.chars().take(50).collect::<String>());
                        }
                    }
                }
                Err(DebridError::TorrentNotFound(_)) => {
                    warn!("torrent {} not found on debrid (likely manually deleted), removing from tracking", torrent_id);
                    to_remove.push(torrent_id.clone());
                    refilled_any = true;
                }
                Err(e) => {
                    error!("error checking torrent {}: {}", torrent_id, e);
                }
            }
        }

        for torrent_id in &to_remove {
            let mut state = self.state.lock().await;
            state.remove_rd_download(torrent_id);
        }

        if refilled_any || !to_remove.is_empty() {
            self.fill_rd_slots().await;
        }
    }

    /// Reapplication on completion: scrape fresh, match the completed
    /// infohash against the new results, then drive the Library back into
    /// a state where it picks the source up.
    async fn reapply_completed(&self, item: &crate::model::MediaItem, completed_infohash: &str) {
        let (scrape_tmdb, scrape_tvdb) = if matches!(item.kind, MediaType::Episode | MediaType::Season) {
            item.parent_show_ids()
        } else {
            (item.tmdb.clone(), item.tvdb.clone())
        };

        let media_type = if item.kind == MediaType::Movie { MediaType::Movie } else { MediaType::Show };

        let streams = match self
            .library
            .scrape_item(scrape_tmdb.as_deref(), scrape_tvdb.as_deref(), item.imdb.as_deref(), media_type)
            .await
        {
            Ok(streams) => streams,
            Err(e) => {
                error!("error during post-completion scrape for '{}': {}", item.display_name(), e);
                return;
            }
        };

        let matched = streams
            .values()
            .any(|s| s.infohash.eq_ignore_ascii_case(completed_infohash));

        if matched {
            info!("completed torrent matched scraped stream for '{}', applying to the library", item.display_name());

            if !is_pseudo_id(&item.id) {
                if self.library.remove_item(&item.id).await {
                    self.library.add_item(item.tmdb.as_deref(), item.tvdb.as_deref(), media_type).await;
                    if self.library.retry_item(&item.id).await {
                        info!("re-applied completed torrent to {} and triggered a retry scan", item.display_name());
                    } else {
                        warn!("failed to trigger retry scan for {}", item.display_name());
                    }
                } else {
                    warn!("failed to remove real item {} before re-adding; will still try add", item.id);
                    self.library.add_item(item.tmdb.as_deref(), item.tvdb.as_deref(), media_type).await;
                    if self.library.retry_item(&item.id).await {
                        info!("triggered retry scan for {}", item.display_name());
                    }
                }
            } else {
                self.library.add_item(scrape_tmdb.as_deref(), scrape_tvdb.as_deref(), media_type).await;
                match self.library.get_item_by_ids(scrape_tmdb.as_deref(), scrape_tvdb.as_deref()).await {
                    Some(parent_item) => {
                        if self.library.retry_item(&parent_item.id).await {
                            info!("triggered retry scan for parent '{}'", item.display_name());
                        }
                    }
                    None => {
                        info!("parent item {:?}/{:?} not in problem items yet", scrape_tmdb, scrape_tvdb);
                    }
                }
            }
        } else {
            info!("completed torrent not found in scrape results for '{}', triggering add+retry as fallback", item.display_name());
            self.library.add_item(scrape_tmdb.as_deref(), scrape_tvdb.as_deref(), media_type).await;
            match self.library.get_item_by_ids(scrape_tmdb.as_deref(), scrape_tvdb.as_deref()).await {
                Some(found) => {
                    if self.library.retry_item(&found.id).await {
                        info!("triggered retry scan for {}", found.display_name());
                    }
                }
                None => {
                    info!("item {:?}/{:?} not in problem items yet", scrape_tmdb, scrape_tvdb);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::debrid_client::TorrentInfo;
    use crate::engine::test_support::{test_engine, test_item, MockDebrid, MockLibrary};
    use crate::model::{pseudo_item_key, DownloadTracker, ItemTracker, MediaType, Stream};

    fn stream(hash: &str) -> Stream {
        Stream { infohash: hash.to_string(), raw_title: "x".to_string(), rank: 1, is_cached: false }
    }

    fn downloaded_info(id: &str, hash: &str) -> TorrentInfo {
        TorrentInfo { id: id.to_string(), filename: "f".to_string(), hash: hash.to_string(), status: "downloaded".to_string(), progress: 100.0, files: Vec::new() }
    }

    /// Completion triggers reapplication with a match for a real movie
    /// item: remove, add, retry, in that order, and the item ends up in
    /// the processed set.
    #[tokio::test]
    async fn scenario_completion_with_match_real_item() {
        let library = Arc::new(MockLibrary::new());
        library
            .scrape_responses
            .lock()
            .await
            .push_back(Ok(HashMap::from([("s1".to_string(), stream("deadbeef00000000000000000000000000000000"))])));

        let debrid = Arc::new(MockDebrid::new());
        debrid.queue_torrent_info("t1", Ok(downloaded_info("t1", "deadbeef00000000000000000000000000000000"))).await;

        let item = test_item("item1", MediaType::Movie, Some("12345"));
        let download = DownloadTracker::new(
            "t1".to_string(),
            "deadbeef00000000000000000000000000000000".to_string(),
            "item1".to_string(),
            0,
            chrono::Utc::now(),
        );

        let (engine, _dir) = test_engine(library.clone(), debrid);
        {
            let mut state = engine.state.lock().await;
            state.upsert_item_tracker(ItemTracker::new("item1".to_string(), item));
            state.upsert_rd_download(download);
        }

        engine.monitor_rd_downloads().await;

        let calls = library.calls().await;
        let positions: Vec<_> = ["scrape_item", "remove_item(item1)", "add_item(tmdb=Some(\"12345\")", "retry_item(item1)"]
            .iter()
            .map(|needle| calls.iter().position(|c| c.contains(needle)).unwrap_or_else(|| panic!("missing call matching {} in {:?}", needle, calls)))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "calls out of order: {:?}", calls);

        let state = engine.state.lock().await;
        assert!(state.is_processed("item1"));
        assert!(state.rd_downloads.is_empty(), "completed download should be retired");
    }

    /// Completion with a pseudo-tracker (parent show): scrape with parent
    /// ids, then add + lookup + retry on the resolved real id, never a
    /// `remove_item` (pseudo ids have no Library id to remove).
    #[tokio::test]
    async fn scenario_completion_with_pseudo_tracker_match() {
        let library = Arc::new(MockLibrary::new());
        library
            .scrape_responses
            .lock()
            .await
            .push_back(Ok(HashMap::from([("s1".to_string(), stream("cafebabe00000000000000000000000000000000"))])));
        let found = test_item("real-item-42", MediaType::Show, Some("244418"));
        *library.item_by_ids.lock().await = Some(found.clone());

        let debrid = Arc::new(MockDebrid::new());
        debrid.queue_torrent_info("t2", Ok(downloaded_info("t2", "cafebabe00000000000000000000000000000000"))).await;

        // Mirrors the synthetic parent-show item `handle_season_episode`
        // builds: kind `show`, id the pseudo key, own tmdb is the parent's.
        let parent_key = pseudo_item_key(Some("244418"), None);
        let parent_show = test_item(&parent_key, MediaType::Show, Some("244418"));
        let download = DownloadTracker::new(
            "t2".to_string(),
            "cafebabe00000000000000000000000000000000".to_string(),
            parent_key.clone(),
            0,
            chrono::Utc::now(),
        );

        let (engine, _dir) = test_engine(library.clone(), debrid);
        {
            let mut state = engine.state.lock().await;
            state.upsert_item_tracker(ItemTracker::new(parent_key.clone(), parent_show));
            state.upsert_rd_download(download);
        }

        engine.monitor_rd_downloads().await;

        let calls = library.calls().await;
        assert!(calls.iter().any(|c| c.contains("scrape_item(tmdb=Some(\"244418\")")), "{:?}", calls);
        assert!(calls.iter().any(|c| c.contains("add_item(tmdb=Some(\"244418\")")), "{:?}", calls);
        assert!(calls.iter().any(|c| c.contains("get_item_by_ids(tmdb=Some(\"244418\")")), "{:?}", calls);
        assert!(calls.iter().any(|c| c == &format!("retry_item({})", found.id)), "{:?}", calls);
        assert!(!calls.iter().any(|c| c.starts_with("remove_item")), "{:?}", calls);

        let state = engine.state.lock().await;
        assert!(state.is_processed(&parent_key));
    }
}
