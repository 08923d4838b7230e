//! Independent periodic sweep of the Debrid's overall torrent inventory,
//! reconciling it against the engine's invariants regardless of what the
//! other two loops are doing.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::debrid_client::{Torrent, TorrentStatus};

use super::Engine;

impl Engine {
    pub(super) async fn cleanup_rd_torrents(&self) {
        info!("running debrid torrent cleanup check");

        let active_info = match self.debrid.get_active_count().await {
            Ok(info) => info,
            Err(e) => {
                error!("error during debrid cleanup: {}", e);
                return;
            }
        };
        info!("debrid active torrents: {}/{}", active_info.nb, active_info.limit);

        let all_torrents = match self.debrid.get_torrents(100).await {
            Ok(t) => t,
            Err(e) => {
                error!("error during debrid cleanup: {}", e);
                return;
            }
        };
        info!("total torrents in debrid: {}", all_torrents.len());

        let tracked_ids: std::collections::HashSet<String> = {
            let state = self.state.lock().await;
            state.rd_downloads.keys().cloned().collect()
        };

        let now = Utc::now();
        let mut cleaned_count = 0u32;

        for torrent in &all_torrents {
            let (should_delete, reason) = self.cleanup_reason(torrent, &tracked_ids, now);

            if should_delete {
                warn!(
                    "cleaning up torrent {}: {} - {}",
                    torrent.id,
                    reason,
                    torrent.filename.chars().take(50).collect::<String>()
                );
                self.debrid.delete_torrent(&torrent.id).await;
                let mut state = self.state.lock().await;
                state.remove_rd_download(&torrent.id);
                cleaned_count += 1;
            }
        }

        if cleaned_count > 0 {
            info!("cleaned up {} stuck/orphaned torrents from the debrid", cleaned_count);
        } else {
            debug!("no stuck torrents found");
        }

        self.enforce_max_active_torrents().await;
    }

    fn cleanup_reason(&self, torrent: &Torrent, tracked_ids: &std::collections::HashSet<String>, now: DateTime<Utc>) -> (bool, String) {
        match torrent.status() {
            TorrentStatus::Failed => (true, format!("failed ({})", torrent.status)),
            TorrentStatus::Stalled => (true, "dead/no seeders".to_string()),
            TorrentStatus::WaitingSelection => {
                if !tracked_ids.contains(&torrent.id) {
                    if let Some(age) = torrent_age(torrent, now) {
                        if age > chrono::Duration::hours(1) {
                            return (true, "orphaned (waiting selection > 1h)".to_string());
                        }
                    }
                }
                (false, String::new())
            }
            TorrentStatus::Active if torrent.progress < 5.0 => {
                if !tracked_ids.contains(&torrent.id) {
                    if let Some(age) = torrent_age(torrent, now) {
                        if age > self.config.rd_stuck_torrent_threshold() {
                            return (
                                true,
                                format!("stuck (active {:.1}h with {}% progress)", age.num_minutes() as f64 / 60.0, torrent.progress),
                            );
                        }
                    }
                }
                (false, String::new())
            }
            _ => (false, String::new()),
        }
    }

    /// Re-fetch and enforce the global active-torrent cap, deleting the
    /// excess in ascending (tracked, progress) order so engine-tracked,
    /// high-progress torrents survive last.
    async fn enforce_max_active_torrents(&self) {
        let max_active = self.config.max_active_rd_downloads;

        let mut all_torrents = None;
        for attempt in 0..2 {
            match self.debrid.get_torrents(100).await {
                Ok(t) => {
                    all_torrents = Some(t);
                    break;
                }
                Err(e) => {
                    if attempt < 1 {
                        warn!("failed to get torrents (attempt {}/2): {}, retrying", attempt + 1, e);
                        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                    } else {
                        error!("error enforcing max active torrents: {}", e);
                    }
                }
            }
        }

        let Some(all_torrents) = all_torrents else {
            return;
        };

        let tracked_ids: std::collections::HashSet<String> = {
            let state = self.state.lock().await;
            state.rd_downloads.keys().cloned().collect()
        };

        let mut active_torrents: Vec<_> = all_torrents.into_iter().filter(|t| t.status() == TorrentStatus::Active).collect();

        if active_torrents.len() <= max_active {
            debug!("active torrents ({}) within limit ({})", active_torrents.len(), max_active);
            return;
        }

        warn!("too many active torrents: {}/{}", active_torrents.len(), max_active);

        active_torrents.sort_by(|a, b| {
            let a_tracked = tracked_ids.contains(&a.id) as u8;
            let b_tracked = tracked_ids.contains(&b.id) as u8;
            a_tracked.cmp(&b_tracked).then(a.progress.partial_cmp(&b.progress).unwrap_or(std::cmp::Ordering::Equal))
        });

        let excess_count = active_torrents.len() - max_active;
        for torrent in &active_torrents[..excess_count] {
            warn!(
                "removing excess torrent {} ({}% progress): {}",
                torrent.id,
                torrent.progress,
                torrent.filename.chars().take(50).collect::<String>()
            );
            self.debrid.delete_torrent(&torrent.id).await;
            let mut state = self.state.lock().await;
            state.remove_rd_download(&torrent.id);
        }

        info!("removed {} excess torrents to enforce limit of {}", excess_count, max_active);
    }
}

fn torrent_age(torrent: &Torrent, now: DateTime<Utc>) -> Option<chrono::Duration> {
    let added = torrent.added.as_deref()?;
    let parsed = DateTime::parse_from_rfc3339(added).ok()?.with_timezone(&Utc);
    Some(now - parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn torrent(id: &str, status: &str, progress: f64, added: Option<&str>) -> Torrent {
        Torrent {
            id: id.to_string(),
            filename: "f".to_string(),
            hash: "h".to_string(),
            status: status.to_string(),
            progress,
            bytes: 0,
            seeders: None,
            added: added.map(|s| s.to_string()),
        }
    }

    #[test]
    fn sort_key_prioritises_untracked_low_progress_for_removal() {
        let tracked: std::collections::HashSet<String> = ["c".to_string(), "d".to_string(), "e".to_string()].into_iter().collect();
        let mut torrents = vec![
            torrent("a", "downloading", 2.0, None),
            torrent("b", "downloading", 10.0, None),
            torrent("c", "downloading", 5.0, None),
            torrent("d", "downloading", 40.0, None),
            torrent("e", "downloading", 80.0, None),
        ];
        torrents.sort_by(|x, y| {
            let xt = tracked.contains(&x.id) as u8;
            let yt = tracked.contains(&y.id) as u8;
            xt.cmp(&yt).then(x.progress.partial_cmp(&y.progress).unwrap())
        });
        let ids: Vec<_> = torrents.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn torrent_age_parses_rfc3339_added_timestamp() {
        let t = torrent("a", "waiting_files_selection", 0.0, Some("2020-01-01T00:00:00Z"));
        let now = "2020-01-01T02:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let age = torrent_age(&t, now).unwrap();
        assert_eq!(age.num_hours(), 2);
    }

    #[test]
    fn torrent_age_is_none_without_added_timestamp() {
        let t = torrent("a", "waiting_files_selection", 0.0, None);
        assert!(torrent_age(&t, Utc::now()).is_none());
    }

    /// Five active torrents against a limit of 3, sorted (tracked, progress)
    /// ascending as [(no,2%),(no,10%),(yes,5%),(yes,40%),(yes,80%)]. The two
    /// untracked lowest-progress torrents are deleted; tracked torrents
    /// survive regardless of progress.
    #[tokio::test]
    async fn scenario_excess_active_torrents_prunes_untracked_lowest_progress_first() {
        use std::sync::Arc;

        use crate::engine::test_support::{test_config, test_engine, test_item, MockDebrid, MockLibrary};
        use crate::model::{DownloadTracker, ItemTracker, MediaType};

        let library = Arc::new(MockLibrary::new());
        let debrid = Arc::new(MockDebrid::new());
        *debrid.torrents.lock().await = vec![
            torrent("a", "downloading", 2.0, None),
            torrent("b", "downloading", 10.0, None),
            torrent("c", "downloading", 5.0, None),
            torrent("d", "downloading", 40.0, None),
            torrent("e", "downloading", 80.0, None),
        ];

        let mut config = test_config();
        config.max_active_rd_downloads = 3;
        let (mut engine, _dir) = test_engine(library, debrid.clone());
        engine.config = Arc::new(config);

        {
            let mut state = engine.state.lock().await;
            for id in ["c", "d", "e"] {
                let item = test_item(&format!("item-{}", id), MediaType::Movie, Some("1"));
                state.upsert_item_tracker(ItemTracker::new(format!("item-{}", id), item));
                state.upsert_rd_download(DownloadTracker::new(id.to_string(), "h".to_string(), format!("item-{}", id), 0, Utc::now()));
            }
        }

        engine.cleanup_rd_torrents().await;

        let calls = debrid.calls().await;
        assert!(calls.contains(&"delete_torrent(a)".to_string()), "{:?}", calls);
        assert!(calls.contains(&"delete_torrent(b)".to_string()), "{:?}", calls);
        assert!(!calls.contains(&"delete_torrent(c)".to_string()), "{:?}", calls);
        assert!(!calls.contains(&"delete_torrent(d)".to_string()), "{:?}", calls);
        assert!(!calls.contains(&"delete_torrent(e)".to_string()), "{:?}", calls);
    }
}
