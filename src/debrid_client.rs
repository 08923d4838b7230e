//! Debrid adapter. `DebridApi` is the typed interface the engine depends
//! on; `RealDebridClient` is the concrete `reqwest` implementation, using
//! a retry/backoff idiom for transient-error handling (exponential
//! backoff + `Retry-After` respect).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, warn};

use crate::config::Config;
use crate::error::DebridError;
use crate::rate_limiter::RateLimiter;

/// The five behavioural predicates the engine actually branches on.
/// Raw statuses collapse into these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentStatus {
    Failed,
    Stalled,
    WaitingSelection,
    Active,
    Complete,
    /// A raw status outside the enumerated set (defensive: the Debrid is
    /// free to add statuses the engine doesn't yet understand).
    Unknown,
}

impl TorrentStatus {
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "magnet_error" | "error" | "virus" => TorrentStatus::Failed,
            "dead" => TorrentStatus::Stalled,
            "waiting_files_selection" => TorrentStatus::WaitingSelection,
            "magnet_conversion" | "queued" | "downloading" | "compressing" | "uploading" => TorrentStatus::Active,
            "downloaded" => TorrentStatus::Complete,
            _ => TorrentStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Torrent {
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub hash: String,
    pub status: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub seeders: Option<u32>,
    #[serde(default)]
    pub added: Option<String>,
}

impl Torrent {
    pub fn status(&self) -> TorrentStatus {
        TorrentStatus::from_raw(&self.status)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TorrentFile {
    pub id: u32,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TorrentInfo {
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub hash: String,
    pub status: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub files: Vec<TorrentFile>,
}

impl TorrentInfo {
    pub fn status(&self) -> TorrentStatus {
        TorrentStatus::from_raw(&self.status)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActiveCount {
    #[serde(default)]
    pub nb: u32,
    #[serde(default)]
    pub limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddMagnetResponse {
    pub id: String,
}

/// Operations the reconciliation engine consumes from the Debrid.
#[async_trait]
pub trait DebridApi: Send + Sync {
    async fn get_user(&self) -> Result<serde_json::Value, DebridError>;

    async fn get_active_count(&self) -> Result<ActiveCount, DebridError>;

    async fn get_torrents(&self, limit: usize) -> Result<Vec<Torrent>, DebridError>;

    async fn get_torrent_info(&self, id: &str) -> Result<TorrentInfo, DebridError>;

    async fn add_magnet(&self, magnet: &str) -> Result<AddMagnetResponse, DebridError>;

    async fn select_files(&self, id: &str, selector: &str) -> bool;

    async fn delete_torrent(&self, id: &str) -> bool;
}

/// Build a magnet URI from a lowercased 40-char hex infohash.
pub fn magnet_uri(infohash: &str) -> String {
    format!("magnet:?xt=urn:btih:{}", infohash)
}

pub struct RealDebridClient {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<RateLimiter>,
}

impl RealDebridClient {
    pub fn new(config: &Config, rate_limiter: Arc<RateLimiter>) -> Self {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", config.rd_api_key))
            .expect("rd api key must be a valid header value");
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build real-debrid http client");

        Self {
            client,
            base_url: config.rd_base_url.clone(),
            rate_limiter,
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Issue `make_request` with up to `max_attempts` tries, honoring
    /// `Retry-After` on 429s and applying jittered exponential backoff
    /// otherwise.
    async fn request_with_retry<T, F>(&self, service: &str, max_attempts: u32, make_request: F) -> Result<reqwest::Response, DebridError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let _ = std::marker::PhantomData::<T>;
        let mut last_err: Option<DebridError> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let backoff_ms = 1000u64 * 2u64.pow(attempt - 2);
                let jitter_ms = rand::random::<u64>() % 500;
                tokio::time::sleep(Duration::from_millis(backoff_ms + jitter_ms)).await;
            }

            self.rate_limiter.acquire(service).await;

            match make_request().send().await {
                Ok(resp) => {
                    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        if let Some(secs) = resp
                            .headers()
                            .get(reqwest::header::RETRY_AFTER)
                            .and_then(|h| h.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                        {
                            warn!("rd rate limited (429), respecting retry-after {}s", secs);
                            tokio::time::sleep(Duration::from_secs(secs)).await;
                        }
                        continue;
                    }

                    if resp.status().as_u16() == 404 {
                        return Err(DebridError::TorrentNotFound(resp.status().to_string()));
                    }

                    match resp.error_for_status() {
                        Ok(resp) => return Ok(resp),
                        Err(e) => {
                            warn!("rd api error status (attempt {}/{}): {}", attempt, max_attempts, e);
                            last_err = Some(DebridError::Transport(e));
                        }
                    }
                }
                Err(e) => {
                    warn!("rd api request failed (attempt {}/{}): {}", attempt, max_attempts, e);
                    last_err = Some(DebridError::Transport(e));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| DebridError::Decode("exhausted retries".to_string())))
    }
}

#[async_trait]
impl DebridApi for RealDebridClient {
    async fn get_user(&self) -> Result<serde_json::Value, DebridError> {
        let resp = self
            .request_with_retry::<serde_json::Value, _>(
                "debrid",
                3,
                || self.client.get(self.url("/user")),
            )
            .await?;
        resp.json().await.map_err(DebridError::from)
    }

    async fn get_active_count(&self) -> Result<ActiveCount, DebridError> {
        let resp = self
            .request_with_retry::<ActiveCount, _>("debrid", 3, || self.client.get(self.url("/torrents/activeCount")))
            .await?;
        resp.json().await.map_err(DebridError::from)
    }

    async fn get_torrents(&self, limit: usize) -> Result<Vec<Torrent>, DebridError> {
        let url = self.url(&format!("/torrents?limit={}", limit));
        let resp = self
            .request_with_retry::<Vec<Torrent>, _>("debrid", 3, || self.client.get(&url))
            .await?;
        resp.json().await.map_err(DebridError::from)
    }

    async fn get_torrent_info(&self, id: &str) -> Result<TorrentInfo, DebridError> {
        let url = self.url(&format!("/torrents/info/{}", id));
        let resp = self
            .request_with_retry::<TorrentInfo, _>("debrid", 3, || self.client.get(&url))
            .await?;
        resp.json().await.map_err(DebridError::from)
    }

    async fn add_magnet(&self, magnet: &str) -> Result<AddMagnetResponse, DebridError> {
        self.rate_limiter.acquire("debrid").await;
        let resp = self
            .client
            .post(self.url("/torrents/addMagnet"))
            .form(&[("magnet", magnet)])
            .send()
            .await
            .map_err(DebridError::from)?;

        if resp.status().as_u16() == 403 {
            // Real-Debrid signals a legal takedown with a 403 on this
            // specific endpoint.
            return Err(DebridError::ContentInfringement);
        }

        let resp = resp.error_for_status().map_err(DebridError::from)?;
        resp.json().await.map_err(DebridError::from)
    }

    async fn select_files(&self, id: &str, selector: &str) -> bool {
        self.rate_limiter.acquire("debrid").await;
        let result = self
            .client
            .post(self.url(&format!("/torrents/selectFiles/{}", id)))
            .form(&[("files", selector)])
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(_) => true,
            Err(e) => {
                error!("failed to select files for torrent {}: {}", id, e);
                false
            }
        }
    }

    async fn delete_torrent(&self, id: &str) -> bool {
        self.rate_limiter.acquire("debrid").await;
        let result = self
            .client
            .delete(self.url(&format!("/torrents/delete/{}", id)))
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(_) => true,
            Err(e) => {
                error!("failed to delete torrent {}: {}", id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_predicates_group_raw_statuses() {
        assert_eq!(TorrentStatus::from_raw("magnet_error"), TorrentStatus::Failed);
        assert_eq!(TorrentStatus::from_raw("error"), TorrentStatus::Failed);
        assert_eq!(TorrentStatus::from_raw("virus"), TorrentStatus::Failed);
        assert_eq!(TorrentStatus::from_raw("dead"), TorrentStatus::Stalled);
        assert_eq!(TorrentStatus::from_raw("waiting_files_selection"), TorrentStatus::WaitingSelection);
        assert_eq!(TorrentStatus::from_raw("magnet_conversion"), TorrentStatus::Active);
        assert_eq!(TorrentStatus::from_raw("queued"), TorrentStatus::Active);
        assert_eq!(TorrentStatus::from_raw("downloading"), TorrentStatus::Active);
        assert_eq!(TorrentStatus::from_raw("compressing"), TorrentStatus::Active);
        assert_eq!(TorrentStatus::from_raw("uploading"), TorrentStatus::Active);
        assert_eq!(TorrentStatus::from_raw("downloaded"), TorrentStatus::Complete);
    }

    #[test]
    fn magnet_uri_follows_btih_format() {
        assert_eq!(
            magnet_uri("abcdef0123456789abcdef0123456789abcdef01"),
            "magnet:?xt=urn:btih:abcdef0123456789abcdef0123456789abcdef01"
        );
    }
}
