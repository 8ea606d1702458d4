//! Ludus Common Library
//!
//! Resource aggregation over range topologies and status tracking for
//! long-running range and template operations.

pub mod error;
pub mod logs;
pub mod range_config;
pub mod status;
pub mod topology;
pub mod tracker;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use logs::LogCursor;
pub use range_config::RangeConfig;
pub use status::{Badge, OperationStatus};
pub use topology::aggregate;
pub use tracker::{
    OperationHandle, OperationTracker, PollError, PollRequest, StatusReport, StatusSource,
    TrackerConfig, TrackerHandle, TrackerSnapshot,
};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default directory for local CLI state
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".ludus")
}

/// Default config file path
pub fn default_config_path() -> std::path::PathBuf {
    default_store_path().join("config.toml")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
