use thiserror::Error;

pub type Result<T> = std::result::Result<T, PokerError>;

/// Failure of a single operation. No variant implies partial application.
#[derive(Debug, Error)]
pub enum PokerError {
    /// Missing or malformed required field
    #[error("{0}")]
    InvalidInput(String),

    /// Referenced session, story or token does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Caller is not the session host
    #[error("forbidden")]
    Forbidden,

    /// Missing, invalid or expired credential
    #[error("unauthorized")]
    Unauthorized,

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl PokerError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

impl From<tokio::task::JoinError> for PokerError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Storage(anyhow::anyhow!("spawn_blocking join error: {}", e))
    }
}
