use std::time::Duration;

use crate::error::AppError;

/// Library states that mark an item as needing attention.
pub fn default_problem_states() -> Vec<String> {
    vec!["Failed".to_string(), "Unknown".to_string()]
}

/// Application configuration loaded from environment variables, following
/// `original_source/src/config.py`'s field set and defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub riven_url: String,
    pub riven_api_key: String,

    pub rd_api_key: String,
    pub rd_base_url: String,

    pub check_interval_hours: f64,
    pub retry_interval_minutes: f64,
    pub rd_check_interval_minutes: f64,
    pub rd_max_wait_hours: f64,
    pub rd_cleanup_interval_hours: f64,
    pub rd_stuck_torrent_hours: f64,

    pub max_riven_retries: u32,
    pub max_rd_torrents: usize,
    pub max_active_rd_downloads: usize,
    pub torrent_add_delay_seconds: u64,

    pub skip_riven_retry: bool,
    pub skip_rd_validation: bool,

    pub rd_rate_limit_seconds: f64,
    pub riven_rate_limit_seconds: f64,

    pub problem_states: Vec<String>,

    pub log_level: String,

    pub state_file: String,
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from the environment (and `.env`, if present).
    pub fn from_env() -> Self {
        Self {
            riven_url: env_string("RIVEN_URL", "http://localhost:8083"),
            riven_api_key: env_string("RIVEN_API_KEY", ""),

            rd_api_key: env_string("RD_API_KEY", ""),
            rd_base_url: "https://api.real-debrid.com/rest/1.0".to_string(),

            check_interval_hours: env_f64("CHECK_INTERVAL_HOURS", 6.0),
            retry_interval_minutes: env_f64("RETRY_INTERVAL_MINUTES", 10.0),
            rd_check_interval_minutes: env_f64("RD_CHECK_INTERVAL_MINUTES", 5.0),
            rd_max_wait_hours: env_f64("RD_MAX_WAIT_HOURS", 2.0),
            rd_cleanup_interval_hours: env_f64("RD_CLEANUP_INTERVAL_HOURS", 1.0),
            rd_stuck_torrent_hours: env_f64("RD_STUCK_TORRENT_HOURS", 24.0),

            max_riven_retries: env_u32("MAX_RIVEN_RETRIES", 3),
            max_rd_torrents: env_usize("MAX_RD_TORRENTS", 10),
            max_active_rd_downloads: env_usize("MAX_ACTIVE_RD_DOWNLOADS", 3),
            torrent_add_delay_seconds: env_u64("TORRENT_ADD_DELAY_SECONDS", 30),

            skip_riven_retry: env_bool("SKIP_RIVEN_RETRY", false),
            skip_rd_validation: env_bool("SKIP_RD_VALIDATION", false),

            rd_rate_limit_seconds: env_f64("RD_RATE_LIMIT_SECONDS", 5.0),
            riven_rate_limit_seconds: env_f64("RIVEN_RATE_LIMIT_SECONDS", 1.0),

            problem_states: default_problem_states(),

            log_level: env_string("LOG_LEVEL", "info"),

            state_file: env_string("TRC_STATE_FILE", "data/trc_state.json"),
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval_hours * 3600.0)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs_f64(self.retry_interval_minutes * 60.0)
    }

    pub fn rd_check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.rd_check_interval_minutes * 60.0)
    }

    pub fn rd_max_wait(&self) -> Duration {
        Duration::from_secs_f64(self.rd_max_wait_hours * 3600.0)
    }

    pub fn rd_cleanup_interval(&self) -> Duration {
        Duration::from_secs_f64(self.rd_cleanup_interval_hours * 3600.0)
    }

    pub fn rd_stuck_torrent_threshold(&self) -> Duration {
        Duration::from_secs_f64(self.rd_stuck_torrent_hours * 3600.0)
    }

    pub fn torrent_add_delay(&self) -> Duration {
        Duration::from_secs(self.torrent_add_delay_seconds)
    }

    /// Validate required configuration. Fatal on failure: the process must
    /// exit before any loop starts rather than run with missing credentials.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.riven_api_key.is_empty() {
            return Err(AppError::Config("RIVEN_API_KEY is required".to_string()));
        }
        if self.rd_api_key.is_empty() {
            return Err(AppError::Config("RD_API_KEY is required".to_string()));
        }
        Ok(())
    }
}
