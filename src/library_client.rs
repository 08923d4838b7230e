//! Library adapter. `LibraryApi` is the typed interface the engine depends
//! on; `RivenClient` is the concrete `reqwest`-backed implementation
//! talking to a Riven-shaped HTTP API.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::LibraryError;
use crate::model::{MediaItem, MediaType, ParentIds, Stream};
use crate::rate_limiter::RateLimiter;

/// Operations the reconciliation engine consumes from the Library.
#[async_trait]
pub trait LibraryApi: Send + Sync {
    async fn health_check(&self) -> bool;

    async fn get_problem_items(&self, states: &[String], limit: usize) -> Vec<MediaItem>;

    async fn scrape_item(
        &self,
        tmdb: Option<&str>,
        tvdb: Option<&str>,
        imdb: Option<&str>,
        media_type: MediaType,
    ) -> Result<HashMap<String, Stream>, LibraryError>;

    async fn retry_item(&self, id: &str) -> bool;

    async fn reset_item(&self, id: &str) -> bool;

    async fn remove_item(&self, id: &str) -> bool;

    async fn add_item(&self, tmdb: Option<&str>, tvdb: Option<&str>, media_type: MediaType) -> bool;

    async fn get_item_by_ids(&self, tmdb: Option<&str>, tvdb: Option<&str>) -> Option<MediaItem>;
}

pub struct RivenClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    rate_limiter: Arc<RateLimiter>,
}

impl RivenClient {
    pub fn new(config: &Config, rate_limiter: Arc<RateLimiter>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build riven http client");

        Self {
            client,
            base_url: format!("{}/api/v1", config.riven_url.trim_end_matches('/')),
            api_key: config.riven_api_key.clone(),
            rate_limiter,
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    #[serde(default)]
    items: Vec<WireMediaItem>,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    streams: HashMap<String, WireStream>,
}

#[derive(Debug, Deserialize)]
struct WireStream {
    #[serde(default)]
    infohash: String,
    #[serde(default)]
    raw_title: String,
    #[serde(default)]
    rank: i64,
    #[serde(default)]
    is_cached: bool,
}

impl From<WireStream> for Stream {
    fn from(w: WireStream) -> Self {
        Stream {
            infohash: w.infohash.to_lowercase(),
            raw_title: w.raw_title,
            rank: w.rank,
            is_cached: w.is_cached,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireParentIds {
    imdb_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_stringly")]
    tmdb_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_stringly")]
    tvdb_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMediaItem {
    id: serde_json::Value,
    #[serde(default)]
    title: String,
    #[serde(default)]
    state: String,
    #[serde(rename = "type", default)]
    item_type: String,
    imdb_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_stringly")]
    tmdb_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_stringly")]
    tvdb_id: Option<String>,
    parent_title: Option<String>,
    season_number: Option<u32>,
    episode_number: Option<u32>,
    parent_ids: Option<WireParentIds>,
    aired_at: Option<String>,
}

fn deserialize_stringly<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

fn parse_media_type(raw: &str) -> MediaType {
    match raw {
        "movie" => MediaType::Movie,
        "show" | "tv" => MediaType::Show,
        "season" => MediaType::Season,
        "episode" => MediaType::Episode,
        _ => MediaType::Movie,
    }
}

/// Best-effort parse of the Library's timestamp format
/// ("2025-12-30 22:38:36.105213" or ISO-8601). Unparseable values degrade
/// to `None`, matching `is_released`'s "unparseable is released" stance.
fn parse_aired_at(raw: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let normalized = raw.replacen(' ', "T", 1);
    let truncated = normalized.split('.').next().unwrap_or(&normalized);
    chrono::NaiveDateTime::parse_from_str(truncated, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&chrono::Utc))
        })
}

impl From<WireMediaItem> for MediaItem {
    fn from(w: WireMediaItem) -> Self {
        let id = match w.id {
            serde_json::Value::String(s) => s,
            other => other.to_string().trim_matches('"').to_string(),
        };
        MediaItem {
            id,
            kind: parse_media_type(&w.item_type),
            state: w.state,
            imdb: w.imdb_id,
            tmdb: w.tmdb_id,
            tvdb: w.tvdb_id,
            parent_ids: w.parent_ids.map(|p| ParentIds {
                imdb: p.imdb_id,
                tmdb: p.tmdb_id,
                tvdb: p.tvdb_id,
            }),
            aired_at: w.aired_at.as_deref().and_then(parse_aired_at),
            title: w.title,
            parent_title: w.parent_title,
            season_number: w.season_number,
            episode_number: w.episode_number,
        }
    }
}

#[async_trait]
impl LibraryApi for RivenClient {
    async fn health_check(&self) -> bool {
        self.rate_limiter.acquire("library").await;
        match self
            .client
            .get(self.url("/health"))
            .query(&[("api_key", &self.api_key)])
            .send()
            .await
        {
            Ok(resp) => match resp.json::<HealthResponse>().await {
                Ok(body) => body.message.as_deref() == Some("True"),
                Err(e) => {
                    error!("riven health check: failed to decode response: {}", e);
                    false
                }
            },
            Err(e) => {
                error!("riven health check failed: {}", e);
                false
            }
        }
    }

    async fn get_problem_items(&self, states: &[String], limit: usize) -> Vec<MediaItem> {
        self.rate_limiter.acquire("library").await;

        let mut query: Vec<(String, String)> = vec![("limit".to_string(), limit.to_string())];
        for s in states {
            query.push(("states".to_string(), s.clone()));
        }

        let filtered: Result<reqwest::Response, LibraryError> = async {
            let resp = self
                .client
                .get(self.url("/items"))
                .query(&[("api_key", self.api_key.as_str())])
                .query(&query)
                .send()
                .await?;
            Ok(resp.error_for_status()?)
        }
        .await;

        match filtered {
            Ok(resp) => match resp.json::<ItemsResponse>().await {
                Ok(body) => return body.items.into_iter().map(MediaItem::from).collect(),
                Err(e) => warn!("failed to decode filtered problem-items response: {}", e),
            },
            Err(e) => warn!("failed to get problem items with state filter: {}", e),
        }

        // Fallback: fetch unfiltered and filter locally.
        self.rate_limiter.acquire("library").await;
        match self
            .client
            .get(self.url("/items"))
            .query(&[("api_key", self.api_key.as_str()), ("limit", &limit.to_string())])
            .send()
            .await
        {
            Ok(resp) => match resp.json::<ItemsResponse>().await {
                Ok(body) => {
                    let all_items: Vec<MediaItem> = body.items.into_iter().map(MediaItem::from).collect();
                    let total = all_items.len();
                    let filtered: Vec<MediaItem> = all_items
                        .into_iter()
                        .filter(|item| states.iter().any(|s| s == &item.state))
                        .collect();
                    info!(
                        "fallback: retrieved {} items, filtered to {} with states {:?}",
                        total,
                        filtered.len(),
                        states
                    );
                    filtered
                }
                Err(e) => {
                    error!("failed to get items even without states: {}", e);
                    Vec::new()
                }
            },
            Err(e) => {
                error!("failed to get items even without states: {}", e);
                Vec::new()
            }
        }
    }

    async fn scrape_item(
        &self,
        tmdb: Option<&str>,
        tvdb: Option<&str>,
        imdb: Option<&str>,
        media_type: MediaType,
    ) -> Result<HashMap<String, Stream>, LibraryError> {
        self.rate_limiter.acquire("library").await;

        let mut query: Vec<(&str, &str)> = vec![("api_key", &self.api_key), ("media_type", media_type.as_api_str())];
        if let Some(t) = tmdb {
            query.push(("tmdb_id", t));
        }
        if let Some(t) = tvdb {
            query.push(("tvdb_id", t));
        }
        if let Some(i) = imdb {
            query.push(("imdb_id", i));
        }

        let resp = self
            .client
            .post(self.url("/scrape/scrape"))
            .query(&query)
            .send()
            .await?
            .error_for_status()?;

        let body: ScrapeResponse = resp.json().await.map_err(LibraryError::from)?;
        Ok(body.streams.into_iter().map(|(k, v)| (k, v.into())).collect())
    }

    async fn retry_item(&self, id: &str) -> bool {
        self.rate_limiter.acquire("library").await;
        let result = self
            .client
            .post(self.url("/items/retry"))
            .query(&[("api_key", self.api_key.as_str())])
            .json(&json!({"ids": [id]}))
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match result {
            Ok(_) => {
                info!("retried item {}", id);
                true
            }
            Err(e) => {
                error!("failed to retry item {}: {}", id, e);
                false
            }
        }
    }

    async fn reset_item(&self, id: &str) -> bool {
        self.rate_limiter.acquire("library").await;
        let result = self
            .client
            .post(self.url("/items/reset"))
            .query(&[("api_key", self.api_key.as_str())])
            .json(&json!({"ids": [id]}))
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match result {
            Ok(_) => {
                info!("reset item {}", id);
                true
            }
            Err(e) => {
                error!("failed to reset item {}: {}", id, e);
                false
            }
        }
    }

    async fn remove_item(&self, id: &str) -> bool {
        self.rate_limiter.acquire("library").await;
        let result = self
            .client
            .delete(self.url("/items/remove"))
            .query(&[("api_key", self.api_key.as_str())])
            .json(&json!({"ids": [id]}))
            .send()
            .await;

        match result {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    info!("removed item {}", id);
                    true
                } else if status.as_u16() == 400 {
                    // A bad id is a logged non-error, not a hard failure.
                    error!("failed to remove item {}: invalid item id (400 bad request)", id);
                    false
                } else {
                    error!("failed to remove item {}: http {}", id, status);
                    false
                }
            }
            Err(e) => {
                error!("failed to remove item {}: {}", id, e);
                false
            }
        }
    }

    async fn add_item(&self, tmdb: Option<&str>, tvdb: Option<&str>, media_type: MediaType) -> bool {
        self.rate_limiter.acquire("library").await;

        let mut payload = serde_json::Map::new();
        payload.insert("media_type".to_string(), json!(media_type.as_api_str()));
        if let Some(t) = tmdb {
            payload.insert("tmdb_ids".to_string(), json!([t]));
        }
        if let Some(t) = tvdb {
            payload.insert("tvdb_ids".to_string(), json!([t]));
        }

        let result = self
            .client
            .post(self.url("/items/add"))
            .query(&[("api_key", self.api_key.as_str())])
            .json(&serde_json::Value::Object(payload))
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(_) => {
                info!("added item tmdb={:?}, tvdb={:?}", tmdb, tvdb);
                true
            }
            Err(e) => {
                error!("failed to add item: {}", e);
                false
            }
        }
    }

    async fn get_item_by_ids(&self, tmdb: Option<&str>, tvdb: Option<&str>) -> Option<MediaItem> {
        let problem_states = crate::config::default_problem_states();
        let items = self.get_problem_items(&problem_states, 100).await;
        for item in items {
            if let Some(t) = tmdb {
                if item.tmdb.as_deref() == Some(t) {
                    return Some(item);
                }
            }
            if let Some(t) = tvdb {
                if item.tvdb.as_deref() == Some(t) {
                    return Some(item);
                }
            }
        }
        debug!("no library item found for tmdb={:?} tvdb={:?}", tmdb, tvdb);
        None
    }
}
