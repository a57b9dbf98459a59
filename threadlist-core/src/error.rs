//! Error types for threadlist-core

use thiserror::Error;

use crate::partition::{GroupMode, LifecycleEvent};

/// Main error type for the threadlist-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The store could not serve the request at all
    #[error("conversation store unavailable: {0}")]
    StoreUnavailable(String),

    /// A page request with an empty window
    #[error("invalid page window: offset {offset}, length {length}")]
    InvalidWindow { offset: usize, length: usize },

    /// Lifecycle event not valid for the group's current mode
    #[error("invalid lifecycle transition: {event:?} from {from:?}")]
    InvalidTransition {
        from: GroupMode,
        event: LifecycleEvent,
    },

    /// Group not found (by fid or cname)
    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// Thread not found
    #[error("thread not found: {0}")]
    ThreadNotFound(i64),

    /// A stored numeric code that maps to no known variant
    #[error("unknown {kind} code: {value}")]
    UnknownCode { kind: &'static str, value: i64 },
}

/// Result type alias for threadlist-core
pub type Result<T> = std::result::Result<T, Error>;
