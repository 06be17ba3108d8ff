//! Error types for page fetching and unit loading
//!
//! Fetch errors never escape a worker; they are counted and folded into the
//! worker's result. Source errors are the only ones allowed to abort a run,
//! and only before it starts.

use std::time::Duration;
use thiserror::Error;

/// Failure to retrieve or interpret a single page
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport-level failure talking to the remote source
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote source answered with a non-success status
    #[error("Unexpected status {0}")]
    Status(u16),

    /// Page content could not be turned into records
    #[error("Malformed page: {0}")]
    Malformed(String),

    /// A single page took longer than its allotted time
    #[error("Page fetch timed out after {0:?}")]
    Timeout(Duration),

    /// A worker's fetch session could not be opened
    #[error("Could not open fetch session: {0}")]
    Session(String),

    #[error("{0}")]
    Other(String),
}

/// Failure to load the list of units
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read unit listing: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON unit listing: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse YAML unit listing: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("Failed to fetch unit listing: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unsupported unit listing format: '{0}'. Use .json, .yaml or .yml")]
    UnsupportedFormat(String),

    #[error("Invalid unit listing: {0}")]
    Invalid(String),
}
