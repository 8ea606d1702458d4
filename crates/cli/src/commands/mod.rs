//! CLI Commands

pub mod config;
pub mod range;
pub mod templates;
pub mod topology;
pub mod watch;
