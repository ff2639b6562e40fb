//! Typed errors for the validation engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can tell
//! run-terminating faults apart from configuration mistakes.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or writing a captured dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Dataset file could not be read or written
    #[error("dataset I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Dataset content is not in the expected shape
    #[error("dataset is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Configuration errors: bad validator selection or settings.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Selected identifier is not in the catalog
    #[error("unknown validator: {id}")]
    UnknownValidator { id: String },

    /// Same identifier selected more than once
    #[error("validator selected more than once: {id}")]
    DuplicateSelection { id: String },

    /// Two validators registered under one identifier
    #[error("validator already registered: {id}")]
    AlreadyRegistered { id: String },

    /// Validator parameter out of range
    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    /// Unrecognised ECID scope token
    #[error("unknown ECID scope '{0}' (expected 'post_data' or 'all')")]
    UnknownScope(String),
}

/// Internal fault inside a validator. Always isolated to that validator.
#[derive(Debug, Error)]
pub enum ValidatorError {
    /// Input the validator cannot interpret at all
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Detail records could not be serialized
    #[error("failed to serialize details: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Anything else that went wrong while validating
    #[error("validator fault: {0}")]
    Internal(String),
}

/// Errors from the external crawl subsystem. Fatal for a run.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Crawl could not be started
    #[error("failed to launch crawler: {0}")]
    Launch(#[source] std::io::Error),

    /// Crawler ran but reported failure
    #[error("crawler exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    /// Crawler output could not be loaded
    #[error("crawl output unusable: {0}")]
    Output(#[from] DatasetError),

    /// Transport or rendering failure reported by the collaborator
    #[error("crawl failed: {0}")]
    Transport(String),
}

/// Errors from the progress event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// A terminal event was already published for this session
    #[error("event stream for session {session_id} is closed")]
    Closed { session_id: String },
}

/// Run-terminating outcomes. Apart from `Configuration`, each has already
/// been published as the session's `error` event when it is returned.
#[derive(Debug, Error)]
pub enum RunError {
    /// The crawl subsystem failed; no validator ran
    #[error("crawl failed: {0}")]
    Crawl(#[from] CrawlError),

    /// Selection or bounds rejected; no session was created
    #[error(transparent)]
    Configuration(#[from] RegistryError),

    /// Cancellation was requested between steps
    #[error("run cancelled")]
    Cancelled,

    /// Event stream rejected an event
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Result type alias for dataset operations.
pub type DatasetResult<T> = std::result::Result<T, DatasetError>;

/// Result type alias for registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Result type alias for crawl operations.
pub type CrawlResult<T> = std::result::Result<T, CrawlError>;
