//! Crate-wide error types.

use calltree_protocol::LocationId;
use thiserror::Error;

pub type ProfileResult<T> = Result<T, ProfileError>;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile memory exhausted: all {limit} pages of {page_size} bytes in use")]
    ArenaExhausted { limit: usize, page_size: usize },

    #[error("allocation failed: {0}")]
    Allocation(#[from] std::collections::TryReserveError),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("profiling is not initialized")]
    NotInitialized,

    #[error("unknown location {0}")]
    UnknownLocation(LocationId),

    #[error("location {0} belongs to an earlier measurement phase")]
    StaleLocation(LocationId),
}
