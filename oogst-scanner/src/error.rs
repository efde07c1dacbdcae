use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Navigation to {url} timed out after {secs}s")]
    NavigationTimeout { url: String, secs: u64 },

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl ScanError {
    /// Navigation problems are worth another attempt; everything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScanError::NavigationTimeout { .. } | ScanError::Navigation { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
