//! Config Commands

use anyhow::Result;
use clap::Subcommand;
use std::path::Path;

use crate::config::CliConfig;
use crate::output::{print_info, print_success, print_value, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Write a config file with default settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the config file path
    Path,
}

fn redacted(config: &CliConfig) -> CliConfig {
    let mut shown = config.clone();
    if let Some(key) = shown.api_key.as_mut() {
        let user: String = key.split('.').next().unwrap_or_default().to_string();
        *key = format!("{}.********", user);
    }
    shown
}

pub fn execute(
    cmd: ConfigCommands,
    config: &CliConfig,
    path: &Path,
    format: OutputFormat,
) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let shown = redacted(config);
            if format.is_structured() {
                print_value(&shown, format);
            } else {
                print!("{}", toml::to_string_pretty(&shown)?);
            }
        }

        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            CliConfig::default().save(path)?;
            print_success(&format!("Wrote {}", path.display()));
        }

        ConfigCommands::Path => {
            if !path.exists() {
                print_info("File does not exist yet; defaults are in effect");
            }
            println!("{}", path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_key_secret() {
        let config = CliConfig {
            api_key: Some("JD._7Gx2T5kTUSD%uTWZ*lFi=Os6MpFR^OrG+yT94Xt".into()),
            ..Default::default()
        };
        assert_eq!(redacted(&config).api_key.as_deref(), Some("JD.********"));
        assert_eq!(redacted(&CliConfig::default()).api_key, None);
    }

    #[test]
    fn test_init_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = CliConfig::default();

        execute(ConfigCommands::Init { force: false }, &config, &path, OutputFormat::Plain).unwrap();
        assert!(path.exists());
        assert!(
            execute(ConfigCommands::Init { force: false }, &config, &path, OutputFormat::Plain)
                .is_err()
        );
        execute(ConfigCommands::Init { force: true }, &config, &path, OutputFormat::Plain).unwrap();
    }
}
