//! Template Commands

use anyhow::Result;
use clap::Subcommand;
use ludus_common::OperationTracker;
use serde::Serialize;
use std::sync::Arc;

use super::watch::{ensure_success, follow};
use crate::client::{LudusClient, TemplateBuildSource, TemplateStatus};
use crate::config::CliConfig;
use crate::output::{print_list, print_value, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum TemplateCommands {
    /// List templates currently building
    Status,

    /// Follow template builds until none are running
    Watch {
        /// Only wait for these templates
        templates: Vec<String>,

        /// Do not stream the build log
        #[arg(long)]
        no_logs: bool,
    },

    /// Print the template build log
    Logs {
        /// Start after this line
        #[arg(long)]
        resume: Option<u64>,
    },
}

#[derive(Serialize)]
pub struct BuildDisplay {
    pub template: String,
    pub user: String,
}

impl From<TemplateStatus> for BuildDisplay {
    fn from(status: TemplateStatus) -> Self {
        Self {
            template: status.template,
            user: status.user,
        }
    }
}

impl TableDisplay for BuildDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Template", "Started By"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.template.clone(), self.user.clone()]
    }
}

pub async fn execute(
    cmd: TemplateCommands,
    client: LudusClient,
    config: &CliConfig,
    format: OutputFormat,
) -> Result<()> {
    match cmd {
        TemplateCommands::Status => {
            let builds: Vec<BuildDisplay> = client
                .templates_status()
                .await?
                .into_iter()
                .map(BuildDisplay::from)
                .collect();
            print_list(&builds, format);
        }

        TemplateCommands::Watch { templates, no_logs } => {
            let mut polling = config.template_polling.clone();
            polling.fetch_logs = polling.fetch_logs && !no_logs;
            let source = Arc::new(TemplateBuildSource::new(client, templates));
            let tracker = OperationTracker::new(source, polling)?;

            let last = follow(tracker.track(""), "templates", format).await?;
            ensure_success(&last)?;
        }

        TemplateCommands::Logs { resume } => {
            let page = client.template_logs(resume).await?;
            if format.is_structured() {
                print_value(&page, format);
            } else {
                print!("{}", page.result);
            }
        }
    }

    Ok(())
}
