//! Error types for popupd.
//!
//! Wire-level failures (parse, validation, timeout) are converted straight
//! into JSON-RPC error responses by the dispatcher and never surface here;
//! this enum covers the failure modes of the service itself.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// All error types that can occur in popupd operations.
#[derive(Debug, Error)]
pub enum PopupError {
    /// Failed to read a configuration file.
    #[error("Failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to parse a configuration file.
    #[error("Failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A pending entry already exists under this key. Internal keys are
    /// generated to be unique for the process lifetime, so this is a
    /// programmer error, never overwritten silently.
    #[error("Duplicate pending key: {0}")]
    DuplicateKey(String),

    /// Transport setup or teardown failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Generic I/O error (for cases not covered above).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias using PopupError.
pub type Result<T> = std::result::Result<T, PopupError>;
