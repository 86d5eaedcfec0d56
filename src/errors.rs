//! Central error hierarchy.
//!
//! Mirrors the layered-enum approach used throughout the orchestrator: each
//! subsystem owns a `thiserror` enum, and `UmbrasolError` composes them with
//! `#[from]` so call sites can `?` freely while callers that need to match on
//! a specific failure still can.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UmbrasolError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("hands error: {0}")]
    Hands(#[from] HandsError),

    #[error("safety error: {0}")]
    Safety(#[from] SafetyError),

    #[error("brain error: {0}")]
    Brain(#[from] BrainError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("no row for key: {0}")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum HandsError {
    #[error("capability '{capability}' unsupported on this platform")]
    Unsupported { capability: String },

    #[error("command timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("launch failed: {0}")]
    Launch(String),

    #[error("voice queue closed")]
    QueueClosed,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("tool '{tool}' is not in the whitelist")]
    NotWhitelisted { tool: String },

    #[error("snapshot failed for {path}: {reason}")]
    SnapshotFailed { path: String, reason: String },
}

#[derive(Error, Debug)]
pub enum BrainError {
    #[error("request to inference endpoint timed out")]
    Timeout,

    #[error("stream stalled for more than the inter-chunk timeout")]
    StallTimeout,

    #[error("http error: {0}")]
    Http(String),

    #[error("malformed ndjson chunk: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, UmbrasolError>;
