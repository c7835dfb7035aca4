//! Custom error types for the hub.
//!
//! This module defines the primary error type, `HubError`, used across the library.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures the hub can run into, from configuration mistakes
//! to I/O trouble on the log file or a misbehaving socket client.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically parse or type errors in the TOML
//!   file or in environment overrides.
//! - **`Configuration`**: Semantic errors that pass parsing but are logically wrong, such as
//!   reading and writing through the same connection. Caught by `HubConfig::validate`.
//! - **`Io`**: Wraps `std::io::Error`, covering file and network I/O.
//! - **`Bind`**: A required listening port could not be opened. Fatal at startup.
//! - **`Schema`**: The slot schema XML could not be read or is malformed.
//! - **`Parse`** / **`Wire`**: Per-line decoding failures. These never leave the component
//!   that owns the line; they surface here only so callers can report them uniformly.
//! - **`Unavailable`**: An operation that the current source or target cannot perform,
//!   for example pausing a live network source.
//!
//! By using `#[from]`, `HubError` can be created from the underlying error types with `?`.

use crate::parser::ParseError;
use crate::wire::WireError;
use thiserror::Error;

/// Convenience alias for results using the hub error type.
pub type HubResult<T> = std::result::Result<T, HubError>;

/// Errors raised by the replay hub.
#[derive(Error, Debug)]
pub enum HubError {
    /// Loading the layered configuration failed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The configuration parsed but is not usable.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File or network I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A listening socket could not be bound.
    #[error("Cannot bind {address}: {source}")]
    Bind {
        /// Address the hub tried to listen on.
        address: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The slot schema file is unusable.
    #[error("Schema error: {0}")]
    Schema(String),

    /// A log line could not be decoded.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// A socket record violated the wire protocol.
    #[error("Protocol error: {0}")]
    Wire(#[from] WireError),

    /// The requested operation is not supported by the active connection.
    #[error("Operation '{0}' is not available for this connection")]
    Unavailable(String),

    /// A worker thread could not be started or did not come up.
    #[error("Worker '{0}' failed to start: {1}")]
    Startup(String, String),
}

impl From<figment::Error> for HubError {
    fn from(value: figment::Error) -> Self {
        HubError::Config(Box::new(value))
    }
}

impl From<roxmltree::Error> for HubError {
    fn from(value: roxmltree::Error) -> Self {
        HubError::Schema(value.to_string())
    }
}

impl HubError {
    /// Whether the hub can keep running after this error.
    ///
    /// Per-line and per-connection failures are contained; everything that
    /// prevents the pipeline from starting is not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HubError::Parse(_) | HubError::Wire(_) | HubError::Unavailable(_)
        )
    }
}
