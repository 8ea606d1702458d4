//! Error types for Ludus range tooling

use thiserror::Error;

/// Result type alias using the Ludus Error
pub type Result<T> = std::result::Result<T, Error>;

/// Ludus error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Network, timeout or connection failure talking to the status endpoint
    #[error("Transport error: {0}")]
    Transport(String),

    /// The upstream API answered with a non-success status code
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tracking cancelled")]
    Cancelled,

    #[error("Gave up after {attempts} consecutive failed polls")]
    GaveUp { attempts: u32 },
}

impl Error {
    /// Whether the failure is recoverable by polling again later.
    ///
    /// Server-side 5xx answers count as transport failures; 4xx answers do
    /// not, since repeating the same request will not change the outcome.
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
