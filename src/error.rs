//! Error types for every stage of the ingestion pipeline.
//!
//! Per-feed failures ([`FetchFailure`], [`ParseFailure`], [`StoreError`] while
//! writing a feed) are recorded in the batch report and never stop the batch.
//! [`ConfigError`] is the only error that is fatal at startup.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Why a feed could not be retrieved.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind")]
pub enum FetchFailure {
    #[error("request timed out")]
    Timeout,

    #[error("connection error: {detail}")]
    ConnectionError { detail: String },

    #[error("HTTP error {status}")]
    HttpError { status: u16 },

    #[error("unknown error: {detail}")]
    Unknown { detail: String },
}

impl FetchFailure {
    /// Whether retrying the same request has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchFailure::Timeout | FetchFailure::ConnectionError { .. } => true,
            FetchFailure::HttpError { status } => {
                matches!(status, 408 | 429) || (500..=599).contains(status)
            }
            FetchFailure::Unknown { .. } => false,
        }
    }
}

impl From<reqwest::Error> for FetchFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchFailure::Timeout
        } else if e.is_connect() {
            FetchFailure::ConnectionError {
                detail: e.to_string(),
            }
        } else if let Some(status) = e.status() {
            FetchFailure::HttpError {
                status: status.as_u16(),
            }
        } else {
            FetchFailure::Unknown {
                detail: e.to_string(),
            }
        }
    }
}

/// A payload that could not be read as a feed at all.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind")]
pub enum ParseFailure {
    #[error("malformed feed: {detail}")]
    Malformed { detail: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read feed list {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON feed list: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed YAML feed list: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid feed URL {url:?} in group {group:?}: {source}")]
    InvalidUrl {
        group: String,
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("feed list contains no feed sources")]
    Empty,
}
