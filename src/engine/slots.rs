//! Fair, global multiplexing of the debrid concurrency budget across every
//! tracker with pending candidates (round-robin), and the per-candidate
//! add sequence (magnet → wait-for-selection → select-files).

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::debrid_client::{magnet_uri, TorrentStatus};
use crate::error::DebridError;
use crate::model::DownloadTracker;

use super::Engine;

impl Engine {
    /// Keep adding candidates from pending trackers, round-robin, until
    /// the global slot budget is full or no tracker has anything left to
    /// try.
    pub(super) async fn fill_rd_slots(&self) {
        let max_active = self.config.max_active_rd_downloads;
        let mut added_this_round = 0u32;

        loop {
            let total_active = self.state.lock().await.rd_downloads.len();
            if total_active >= max_active {
                debug!("already at max active rd downloads ({}/{})", total_active, max_active);
                break;
            }

            let picked = {
                let mut state = self.state.lock().await;
                let pending = state.pending_tracker_keys();
                if pending.is_empty() {
                    None
                } else {
                    state.next_round_robin(&pending)
                }
            };

            let Some(key) = picked else {
                debug!("no trackers with pending streams");
                break;
            };

            let tracker = {
                let state = self.state.lock().await;
                state.item_trackers.get(&key).cloned()
            };
            let Some(tracker) = tracker else { continue };

            if self.try_add_one_stream(tracker).await {
                added_this_round += 1;
                let now_active = self.state.lock().await.rd_downloads.len();
                info!("filled rd slot {}/{}", now_active, max_active);
            }

            let still_below = self.state.lock().await.rd_downloads.len() < max_active;
            if still_below {
                if self.interruptible_sleep(self.config.torrent_add_delay()).await {
                    break;
                }
            }
        }

        if added_this_round > 0 {
            let now_active = self.state.lock().await.rd_downloads.len();
            info!("added {} torrents to rd (now {}/{} active)", added_this_round, now_active, max_active);
        }
    }

    /// Attempt to add the tracker's next candidate. Always advances
    /// `stream_index`, whether or not the attempt succeeds.
    async fn try_add_one_stream(&self, mut tracker: crate::model::ItemTracker) -> bool {
        if tracker.stream_index >= tracker.streams.len() {
            return false;
        }

        let stream = tracker.streams[tracker.stream_index].clone();
        let item_name = tracker.item.display_name();
        let magnet = magnet_uri(&stream.infohash);

        info!(
            "[{}] adding torrent {}/{}: {}",
            item_name,
            tracker.stream_index + 1,
            tracker.streams.len(),
            stream.raw_title.chars().take(50).collect::<String>()
        );

        let mut success = false;

        match self.debrid.add_magnet(&magnet).await {
            Ok(result) => {
                let torrent_id = result.id;
                match self.wait_for_file_selection(&torrent_id).await {
                    Some(needs_selection) => {
                        let selected = if needs_selection { self.debrid.select_files(&torrent_id, "all").await } else { true };
                        if selected {
                            let download = DownloadTracker::new(
                                torrent_id.clone(),
                                stream.infohash.clone(),
                                tracker.item_id.clone(),
                                tracker.stream_index,
                                Utc::now(),
                            );
                            let mut state = self.state.lock().await;
                            let active = state.rd_downloads.len();
                            state.upsert_rd_download(download);
                            info!("[{}] added torrent {} (active: {}/{})", item_name, torrent_id, active + 1, self.config.max_active_rd_downloads);
                            success = true;
                        } else {
                            warn!("[{}] failed to select files for {}, will try next", item_name, torrent_id);
                            self.debrid.delete_torrent(&torrent_id).await;
                        }
                    }
                    None => {
                        warn!("[{}] torrent {} failed during setup, will try next", item_name, torrent_id);
                        self.debrid.delete_torrent(&torrent_id).await;
                    }
                }
            }
            Err(DebridError::ContentInfringement) => {
                warn!("[{}] content flagged as infringing by the debrid, skipping", item_name);
            }
            Err(e) => {
                warn!("[{}] failed to add torrent: {}", item_name, e);
            }
        }

        tracker.stream_index += 1;
        let mut state = self.state.lock().await;
        state.upsert_item_tracker(tracker);

        success
    }

    /// Poll every 2s up to ~30s for the magnet-conversion phase to
    /// resolve. Returns `Some(needs_selection)` if the torrent reached a
    /// state from which it can proceed: `true` when `select_files` must
    /// still be called (`waiting_selection`), `false` when the Debrid has
    /// already materialized the torrent (`complete`/`active`, no
    /// selection call needed). Returns `None` on failure/timeout.
    async fn wait_for_file_selection(&self, torrent_id: &str) -> Option<bool> {
        for _ in 0..15 {
            match self.debrid.get_torrent_info(torrent_id).await {
                Ok(info) => match info.status() {
                    TorrentStatus::WaitingSelection => return Some(true),
                    TorrentStatus::Complete | TorrentStatus::Active => return Some(false),
                    TorrentStatus::Failed | TorrentStatus::Stalled => {
                        warn!("torrent {} failed during magnet conversion: {}", torrent_id, info.status);
                        return None;
                    }
                    TorrentStatus::Unknown => {}
                },
                Err(e) => {
                    warn!("error checking torrent {} status: {}", torrent_id, e);
                    return None;
                }
            }
            if self.interruptible_sleep(std::time::Duration::from_secs(2)).await {
                return None;
            }
        }
        warn!("timeout waiting for torrent {} to be ready for file selection", torrent_id);
        None
    }
}
