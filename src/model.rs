//! Core data model shared by the adapters, state store and engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of a Library item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Show,
    Season,
    Episode,
}

impl MediaType {
    /// The media type string the Library's scrape/add endpoints expect:
    /// `show` is translated to `tv`, everything else passes through.
    pub fn as_api_str(self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Show | MediaType::Season | MediaType::Episode => "tv",
        }
    }
}

/// External IDs for a parent show, carried by season/episode items.
/// Seasons and episodes are expected to carry at least one of these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentIds {
    pub imdb: Option<String>,
    pub tmdb: Option<String>,
    pub tvdb: Option<String>,
}

impl ParentIds {
    pub fn is_empty(&self) -> bool {
        self.imdb.is_none() && self.tmdb.is_none() && self.tvdb.is_none()
    }
}

/// An identity in the Library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MediaType,
    pub state: String,
    pub imdb: Option<String>,
    pub tmdb: Option<String>,
    pub tvdb: Option<String>,
    pub parent_ids: Option<ParentIds>,
    pub aired_at: Option<DateTime<Utc>>,
    pub title: String,
    pub parent_title: Option<String>,
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
}

impl MediaItem {
    /// Human-readable display name, including season/episode numbering.
    pub fn display_name(&self) -> String {
        match self.kind {
            MediaType::Episode => {
                if let (Some(s), Some(e)) = (self.season_number, self.episode_number) {
                    return format!(
                        "{} S{:02}E{:02}",
                        self.parent_title.as_deref().unwrap_or(&self.title),
                        s,
                        e
                    );
                }
                self.title.clone()
            }
            MediaType::Season => {
                if let Some(s) = self.season_number {
                    return format!(
                        "{} Season {}",
                        self.parent_title.as_deref().unwrap_or(&self.title),
                        s
                    );
                }
                self.title.clone()
            }
            _ => self.title.clone(),
        }
    }

    /// Whether the item's `aired_at` is not in the future. Missing or
    /// unparseable dates are treated as released.
    pub fn is_released(&self, now: DateTime<Utc>) -> bool {
        match self.aired_at {
            Some(aired) => aired <= now,
            None => true,
        }
    }

    /// Parent show's tmdb/tvdb ids, for season/episode items.
    pub fn parent_show_ids(&self) -> (Option<String>, Option<String>) {
        match &self.parent_ids {
            Some(p) => (p.tmdb.clone(), p.tvdb.clone()),
            None => (None, None),
        }
    }
}

/// A candidate source returned by a scrape. Pure
/// value type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub infohash: String,
    pub raw_title: String,
    pub rank: i64,
    #[serde(default)]
    pub is_cached: bool,
}

/// Builds the pseudo-item-tracker key used for a parent show synthesized
/// from a failed season/episode. The `tmdb:<t>|tvdb:<v>` form is a
/// discriminator, never a real Library id: `is_pseudo_id` must gate any
/// operation that requires a real Library id (namely `remove_item`).
pub fn pseudo_item_key(tmdb: Option<&str>, tvdb: Option<&str>) -> String {
    format!(
        "tmdb:{}|tvdb:{}",
        tmdb.unwrap_or("None"),
        tvdb.unwrap_or("None")
    )
}

pub fn is_pseudo_id(item_id: &str) -> bool {
    item_id.starts_with("tmdb:") && item_id.contains("|tvdb:")
}

/// The per-item control block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemTracker {
    pub item_id: String,
    pub item: MediaItem,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_retry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub manual_scrape_started: bool,
    #[serde(default)]
    pub streams: Vec<Stream>,
    #[serde(default)]
    pub stream_index: usize,
}

impl ItemTracker {
    pub fn new(item_id: String, item: MediaItem) -> Self {
        Self {
            item_id,
            item,
            retry_count: 0,
            last_retry: None,
            manual_scrape_started: false,
            streams: Vec::new(),
            stream_index: 0,
        }
    }

    pub fn is_pseudo(&self) -> bool {
        is_pseudo_id(&self.item_id)
    }

    /// Streams not yet attempted.
    pub fn has_pending_streams(&self) -> bool {
        self.manual_scrape_started && self.stream_index < self.streams.len()
    }

    /// Sort by rank descending (ties broken by existing insertion order,
    /// which `sort_by` preserves as a stable sort) and truncate to
    /// `max_candidate_streams`.
    pub fn set_streams(&mut self, mut streams: Vec<Stream>, max_candidate_streams: usize) {
        streams.sort_by(|a, b| b.rank.cmp(&a.rank));
        streams.truncate(max_candidate_streams);
        self.streams = streams;
        self.stream_index = 0;
    }
}

/// The per-in-flight-torrent control block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTracker {
    pub torrent_id: String,
    pub infohash: String,
    pub item_id: String,
    pub stream_index: usize,
    pub started_at: DateTime<Utc>,
    pub last_check: Option<DateTime<Utc>>,
}

impl DownloadTracker {
    pub fn new(torrent_id: String, infohash: String, item_id: String, stream_index: usize, now: DateTime<Utc>) -> Self {
        Self {
            torrent_id,
            infohash,
            item_id,
            stream_index,
            started_at: now,
            last_check: None,
        }
    }
}
