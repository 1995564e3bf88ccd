//! Error types for the consolesync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use std::path::PathBuf;

use thiserror::Error;

use crate::merge::MergeStage;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

/// Errors from the authenticated HTTP session layer.
#[derive(Debug, Error)]
pub enum SessionError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The logon call did not return success.
    #[error("logon to '{host}' as '{user}' failed (HTTP {status})")]
    AuthenticationFailed {
        host: String,
        user: String,
        status: u16,
    },

    /// A binary upload was attempted with an empty file.
    #[error("file '{}' is empty, no data to upload", .0.display())]
    EmptyUpload(PathBuf),

    /// The host / path combination is not a valid URL.
    #[error("invalid request URL '{url}': {detail}")]
    InvalidUrl { url: String, detail: String },

    /// A token could not be placed in a request header.
    #[error("invalid header value: {0}")]
    InvalidHeader(String),

    /// A request body could not be serialized.
    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    /// Local I/O while preparing a request (reading an upload file).
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Registry errors
// ---------------------------------------------------------------------------

/// Errors from saved-configuration registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The named saved configuration does not exist on the server.
    #[error("saved configuration '{0}' not found")]
    NotFound(String),

    /// The server answered with a non-success status.
    #[error("{operation} of '{name}' rejected (HTTP {status}): {body}")]
    Rejected {
        operation: &'static str,
        name: String,
        status: u16,
        body: String,
    },

    /// Underlying session / transport error.
    #[error("registry session error: {0}")]
    Session(#[from] SessionError),

    /// Local I/O (writing a downloaded bundle).
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// True if this error only says the configuration was already absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

// ---------------------------------------------------------------------------
// Archive errors
// ---------------------------------------------------------------------------

/// Errors from archive extraction, reconciliation and packaging.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The zip stream is not a readable archive.
    #[error("corrupt archive '{}': {detail}", path.display())]
    Corrupt { path: PathBuf, detail: String },

    /// Writing the output archive failed.
    #[error("failed to write archive '{}': {detail}", path.display())]
    Write { path: PathBuf, detail: String },

    /// The descriptor document could not be parsed or serialized.
    #[error("descriptor error in '{}': {detail}", path.display())]
    Descriptor { path: PathBuf, detail: String },

    /// A directory tree could not be copied or replaced.
    #[error("failed to {action} '{}': {source}", path.display())]
    Tree {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic I/O wrapper.
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Workspace errors
// ---------------------------------------------------------------------------

/// Errors from the ephemeral workspace manager.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The temporary root or one of its subdirectories could not be created.
    #[error("failed to allocate merge workspace: {0}")]
    Allocate(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Merge errors
// ---------------------------------------------------------------------------

/// A fatal failure of one merge run, tagged with the stage it happened in.
#[derive(Debug, Error)]
#[error("merge failed during {stage}: {cause}")]
pub struct MergeError {
    pub stage: MergeStage,
    #[source]
    pub cause: MergeCause,
}

impl MergeError {
    pub fn new(stage: MergeStage, cause: impl Into<MergeCause>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }
}

/// The underlying reason a merge stage failed.
#[derive(Debug, Error)]
pub enum MergeCause {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    /// Writing a downloaded bundle into the workspace.
    #[error("workspace I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The background merge task ended without reporting.
    #[error("merge worker stopped unexpectedly: {0}")]
    Worker(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
