//! Agent error types

use std::io;

use burrow_core::{ConfigError, LockError};
use thiserror::Error;

/// Coordination API failures
///
/// Any of these means the exchange did not happen: a reply is only
/// returned once status, content type and shape have all been checked.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The base URL and command do not form a valid URL
    #[error("Invalid API URL {url}: {message}")]
    Url { url: String, message: String },

    /// The request could not be sent or the body could not be read
    #[error("API request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status
    #[error("API request to {url} returned {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    /// The reply is not declared as JSON
    #[error("API response from {url} has content type {content_type:?}, expected application/json")]
    ContentType {
        url: String,
        content_type: Option<String>,
    },

    /// The reply is not valid JSON or does not have the expected shape
    #[error("API response from {url} could not be decoded: {message}")]
    Decode { url: String, message: String },
}

/// Checkin and restore session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Restore mode found several storage units and none was chosen
    #[error(
        "Multiple storage units found ({}). Please use --restore-storage to specify one.",
        .0.join(", ")
    )]
    AmbiguousStorage(Vec<String>),

    /// The requested restore storage unit holds none of this machine's sources
    #[error("Cannot find storage unit \"{requested}\" (available: {})", available.join(", "))]
    UnknownStorage {
        requested: String,
        available: Vec<String>,
    },

    /// Restore mode found no storage unit at all
    #[error("Cannot find any storage unit holding this machine's sources")]
    NoStorage,

    /// A subprocess could not be started
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// An argv template is empty
    #[error("{0} is empty")]
    EmptyCommand(&'static str),

    #[error("Failed to encode session request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Session I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Config publishing errors
#[derive(Error, Debug)]
pub enum PublishError {
    /// A key needed to publish is missing
    #[error("Required config \"{0}\" not found.")]
    IncompleteConfig(String),

    #[error("Failed to encode source {source_name}: {source}")]
    Encode {
        source_name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Api(#[from] ApiError),
}
