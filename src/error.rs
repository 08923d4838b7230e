use thiserror::Error;

/// Crate-wide error type for failures that abort a whole operation rather
/// than being inspected and recovered from inline by the engine.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("state store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Errors surfaced by the Library adapter. Transport failures are the only
/// variant the engine cannot recover from inline; everything else is
/// surfaced as a boolean return instead.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response shape: {0}")]
    Decode(String),
}

/// Errors surfaced by the Debrid adapter.
#[derive(Debug, Error)]
pub enum DebridError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response shape: {0}")]
    Decode(String),

    /// The Debrid reports the torrent id no longer exists.
    #[error("torrent not found: {0}")]
    TorrentNotFound(String),

    /// The magnet was refused on legal grounds.
    #[error("content flagged as infringing")]
    ContentInfringement,
}
