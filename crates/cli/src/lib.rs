//! Ludus Range Watch CLI
//!
//! Command-line interface for sizing Ludus ranges and following range
//! deployments and template builds.

pub mod client;
pub mod commands;
pub mod config;
pub mod output;

pub use client::{LudusClient, RangeStatusSource, TemplateBuildSource};
pub use config::CliConfig;
