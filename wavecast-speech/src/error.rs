use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("request failed: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    #[error("speech service returned status {status}")]
    Status { status: u16 },

    #[error("cache database error: {0}")]
    Cache(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpeechError {
    /// Auth and quota failures; the narration engine should fall back to
    /// the on-device voice rather than retry.
    #[must_use]
    pub const fn is_quota_or_auth(&self) -> bool {
        matches!(
            self,
            Self::Status {
                status: 401 | 403 | 429
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, SpeechError>;
