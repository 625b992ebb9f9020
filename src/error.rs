//! Error types for Chatstats.

use thiserror::Error;

/// Result type alias using [`StatsError`].
pub type Result<T> = std::result::Result<T, StatsError>;

/// Errors raised by the ranking engine and the stats cache.
///
/// Absence (no such user, no such room, zero messages) is never an error;
/// it is reported as `None` or an empty leaderboard.
#[derive(Error, Debug)]
pub enum StatsError {
    /// A period symbol other than `today`, `month`, `year` or `all_time`.
    #[error("Unknown period: {0}")]
    UnknownPeriod(String),

    /// The underlying query store failed.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    /// A value could not be encoded for the cache.
    #[error("Failed to serialize cache payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StatsError {
    /// True for errors caused by the caller's input rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(self, StatsError::UnknownPeriod(_))
    }
}
