use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("compatibility dataset unavailable: {reason}")]
    DatasetUnavailable { reason: String },

    #[error("unknown email client: {id}")]
    UnknownClient { id: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl EngineError {
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::DatasetUnavailable {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether a retry against the dataset endpoint could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::DatasetUnavailable { .. })
    }
}
