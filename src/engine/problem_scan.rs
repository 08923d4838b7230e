//! The problem-scan loop: pulls problem items from the Library, drives
//! each through library-retry, and kicks off a manual scrape once retries
//! are exhausted.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::model::{pseudo_item_key, ItemTracker, MediaItem, MediaType};

use super::Engine;

impl Engine {
    pub(super) async fn check_problem_items(&self) {
        info!("checking for items in states {:?}", self.config.problem_states);
        let items = self.library.get_problem_items(&self.config.problem_states, 200).await;
        info!("found {} items in problem states", items.len());

        let mut parent_shows_queued: HashSet<String> = HashSet::new();

        for item in items {
            let now = Utc::now();
            if !item.is_released(now) {
                debug!("skipping unreleased item: {} (aired_at={:?})", item.display_name(), item.aired_at);
                continue;
            }

            if matches!(item.kind, MediaType::Season | MediaType::Episode) {
                self.handle_season_episode(&item, &mut parent_shows_queued).await;
                continue;
            }

            let tracker = {
                let mut state = self.state.lock().await;
                state
                    .item_trackers
                    .get(&item.id)
                    .cloned()
                    .unwrap_or_else(|| ItemTracker::new(item.id.clone(), item.clone()))
            };
            self.handle_problem_item(tracker).await;
        }
    }

    async fn handle_season_episode(&self, item: &MediaItem, parent_shows_queued: &mut HashSet<String>) {
        let (parent_tmdb, parent_tvdb) = item.parent_show_ids();

        if parent_tmdb.is_none() && parent_tvdb.is_none() {
            warn!("cannot retry {}: no parent ids available", item.display_name());
            return;
        }

        let parent_key = pseudo_item_key(parent_tmdb.as_deref(), parent_tvdb.as_deref());

        if !parent_shows_queued.insert(parent_key.clone()) {
            debug!("parent show already queued this cycle for {}", item.display_name());
            return;
        }

        let tracker = {
            let mut state = self.state.lock().await;
            if let Some(existing) = state.item_trackers.get(&parent_key) {
                existing.clone()
            } else {
                let parent_title = item
                    .parent_title
                    .clone()
                    .unwrap_or_else(|| item.title.split_whitespace().next().unwrap_or(&item.title).to_string());
                let parent_item = MediaItem {
                    id: parent_key.clone(),
                    kind: MediaType::Show,
                    state: item.state.clone(),
                    imdb: item.parent_ids.as_ref().and_then(|p| p.imdb.clone()),
                    tmdb: parent_tmdb.clone(),
                    tvdb: parent_tvdb.clone(),
                    parent_ids: None,
                    aired_at: item.aired_at,
                    title: parent_title,
                    parent_title: None,
                    season_number: None,
                    episode_number: None,
                };
                let tracker = ItemTracker::new(parent_key.clone(), parent_item);
                state.upsert_item_tracker(tracker.clone());
                tracker
            }
        };

        if self.config.skip_riven_retry {
            if !tracker.manual_scrape_started {
                info!("skipping library retry, starting manual scrape for parent show {}", tracker.item.display_name());
                self.start_manual_scrape(tracker).await;
            }
            return;
        }

        if tracker.retry_count >= self.config.max_riven_retries {
            if !tracker.manual_scrape_started {
                info!("max retries exceeded for parent show {}, starting manual scrape", tracker.item.display_name());
                self.start_manual_scrape(tracker).await;
            }
            return;
        }

        let now = Utc::now();
        let due = match tracker.last_retry {
            None => true,
            Some(last) => (now - last).num_seconds() as f64 > self.config.retry_interval_minutes * 60.0,
        };
        if !due {
            return;
        }

        let mut tracker = tracker;
        tracker.retry_count += 1;
        tracker.last_retry = Some(now);
        {
            let mut state = self.state.lock().await;
            state.upsert_item_tracker(tracker.clone());
        }

        info!(
            "retrying parent show for {} (tmdb={:?}, tvdb={:?}) attempt {}",
            item.display_name(),
            parent_tmdb,
            parent_tvdb,
            tracker.retry_count
        );

        let added = self
            .library
            .add_item(parent_tmdb.as_deref(), parent_tvdb.as_deref(), MediaType::Show)
            .await;
        if added {
            info!("re-added parent show for {}", item.display_name());
        } else {
            error!("failed to re-add parent show for {}", item.display_name());
        }
    }

    pub(super) async fn handle_problem_item(&self, tracker: ItemTracker) {
        let item = tracker.item.clone();

        if !self.config.problem_states.contains(&item.state) {
            debug!("item {} left problem states ({}), dropping tracker", item.display_name(), item.state);
            let mut state = self.state.lock().await;
            state.remove_item_tracker(&item.id);
            return;
        }

        info!(
            "handling {} (state={}, retries={})",
            item.display_name(),
            item.state,
            tracker.retry_count
        );

        if self.config.skip_riven_retry {
            if !tracker.manual_scrape_started {
                info!("skipping library retry, starting manual scrape for {}", item.display_name());
                self.start_manual_scrape(tracker).await;
            }
            return;
        }

        if tracker.retry_count >= self.config.max_riven_retries {
            if !tracker.manual_scrape_started {
                info!("max retries exceeded for {}, starting manual scrape", item.display_name());
                self.start_manual_scrape(tracker).await;
            }
            return;
        }

        let now = Utc::now();
        let due = match tracker.last_retry {
            None => true,
            Some(last) => (now - last).num_seconds() as f64 > self.config.retry_interval_minutes * 60.0,
        };
        if !due {
            return;
        }

        info!("retrying {} via remove+add (attempt {})", item.display_name(), tracker.retry_count + 1);

        let media_type = if item.kind == MediaType::Movie { MediaType::Movie } else { MediaType::Show };
        let removed = self.library.remove_item(&item.id).await;
        if !removed {
            error!("failed to remove {}", item.display_name());
            return;
        }

        let added = self.library.add_item(item.tmdb.as_deref(), item.tvdb.as_deref(), media_type).await;
        if added {
            info!("successfully re-added {}", item.display_name());
            let mut tracker = tracker;
            tracker.retry_count += 1;
            tracker.last_retry = Some(now);
            let mut state = self.state.lock().await;
            state.upsert_item_tracker(tracker);
        } else {
            error!("failed to re-add {}", item.display_name());
        }
    }

    pub(super) async fn start_manual_scrape(&self, mut tracker: ItemTracker) {
        tracker.manual_scrape_started = true;
        {
            let mut state = self.state.lock().await;
            state.upsert_item_tracker(tracker.clone());
        }

        let item_id = tracker.item_id.clone();
        if self.state.lock().await.is_processed(&item_id) {
            info!("already processed manual scrape for {}", tracker.item.display_name());
            return;
        }

        info!("starting manual scrape for {}", tracker.item.display_name());

        let media_type = if tracker.item.kind == MediaType::Movie { MediaType::Movie } else { MediaType::Show };
        let scrape = self
            .library
            .scrape_item(tracker.item.tmdb.as_deref(), tracker.item.tvdb.as_deref(), tracker.item.imdb.as_deref(), media_type)
            .await;

        let streams = match scrape {
            Ok(streams) => streams,
            Err(e) => {
                error!("failed to scrape {}: {}", tracker.item.display_name(), e);
                let mut state = self.state.lock().await;
                state.mark_processed(&item_id);
                return;
            }
        };

        let all_streams: Vec<_> = streams.into_values().collect();
        tracker.set_streams(all_streams, self.config.max_rd_torrents);

        if tracker.streams.is_empty() {
            warn!("no streams found for {}", tracker.item.display_name());
            let mut state = self.state.lock().await;
            state.mark_processed(&item_id);
            return;
        }

        info!("found {} streams for {}", tracker.streams.len(), tracker.item.display_name());
        {
            let mut state = self.state.lock().await;
            state.upsert_item_tracker(tracker);
        }

        self.fill_rd_slots().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration as ChronoDuration, Utc};

    use crate::engine::test_support::{test_engine, test_item, MockDebrid, MockLibrary};
    use crate::model::{ItemTracker, MediaType, ParentIds};

    /// An item whose `aired_at` is in the future is skipped entirely for
    /// this cycle, no tracker is created.
    #[tokio::test]
    async fn scenario_unreleased_item_is_skipped() {
        let library = Arc::new(MockLibrary::new());
        let mut item = test_item("item1", MediaType::Movie, Some("1"));
        item.aired_at = Some(Utc::now() + ChronoDuration::days(30));
        *library.problem_items.lock().await = vec![item];

        let debrid = Arc::new(MockDebrid::new());
        let (engine, _dir) = test_engine(library.clone(), debrid);

        engine.check_problem_items().await;

        let state = engine.state.lock().await;
        assert!(state.item_trackers.is_empty());
    }

    /// Missing parent ids on a season/episode item: skipped with a
    /// warning, not an error, and no tracker is created for it.
    #[tokio::test]
    async fn season_without_parent_ids_is_skipped() {
        let library = Arc::new(MockLibrary::new());
        let mut item = test_item("season1", MediaType::Season, None);
        item.parent_ids = Some(ParentIds::default());
        *library.problem_items.lock().await = vec![item];

        let debrid = Arc::new(MockDebrid::new());
        let (engine, _dir) = test_engine(library.clone(), debrid);

        engine.check_problem_items().await;

        let state = engine.state.lock().await;
        assert!(state.item_trackers.is_empty());
    }

    /// Processed-items gating: once an item is in the processed set,
    /// `start_manual_scrape` must not re-enter the scrape flow for it.
    #[tokio::test]
    async fn start_manual_scrape_is_a_no_op_once_processed() {
        let library = Arc::new(MockLibrary::new());
        let debrid = Arc::new(MockDebrid::new());
        let (engine, _dir) = test_engine(library.clone(), debrid);

        let item = test_item("item1", MediaType::Movie, Some("1"));
        let tracker = ItemTracker::new("item1".to_string(), item);
        {
            let mut state = engine.state.lock().await;
            state.mark_processed("item1");
        }

        engine.start_manual_scrape(tracker).await;

        let calls = library.calls().await;
        assert!(!calls.iter().any(|c| c.starts_with("scrape_item")), "{:?}", calls);
    }
}
