//! Range Commands

use anyhow::Result;
use clap::{Args, Subcommand};
use ludus_common::{OperationHandle, OperationStatus, OperationTracker};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::watch::{ensure_success, follow};
use crate::client::{DeployRequest, LudusClient, RangeObject, RangeStatusSource, VmObject};
use crate::config::CliConfig;
use crate::output::{
    print_item, print_list, print_message, print_success, print_value, OutputFormat, TableDisplay,
};

/// Selects whose range a command acts on
#[derive(Args, Debug, Clone, Default)]
pub struct UserArg {
    /// User ID owning the range (admins only; defaults to the API key's user)
    #[arg(short, long)]
    pub user: Option<String>,
}

impl UserArg {
    fn id(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

#[derive(Subcommand)]
pub enum RangeCommands {
    /// Show range state and VMs
    Status(UserArg),

    /// Follow a deployment until it finishes
    Watch {
        #[command(flatten)]
        user: UserArg,

        /// Do not stream the deploy log
        #[arg(long)]
        no_logs: bool,

        /// Continue the deploy log from this line
        #[arg(long)]
        resume: Option<u64>,
    },

    /// Deploy the range
    Deploy {
        #[command(flatten)]
        user: UserArg,

        /// Ansible tags to run
        #[arg(short, long)]
        tags: Option<String>,

        /// Deploy even while testing mode is enabled
        #[arg(long)]
        force: bool,

        /// Only run these user-defined roles
        #[arg(long, value_delimiter = ',')]
        only_roles: Vec<String>,

        /// Limit the deploy to matching VMs
        #[arg(long)]
        limit: Option<String>,

        /// Follow the deployment after starting it
        #[arg(short, long)]
        watch: bool,
    },

    /// Abort a running deployment
    Abort(UserArg),

    /// Print the deploy log
    Logs {
        #[command(flatten)]
        user: UserArg,

        /// Start after this line
        #[arg(long)]
        resume: Option<u64>,
    },
}

/// Range display wrapper for serialization
#[derive(Serialize)]
pub struct RangeDisplay {
    pub user_id: String,
    pub range_number: u32,
    pub state: String,
    pub vm_count: u32,
    pub last_deployment: Option<String>,
    pub testing: bool,
    pub vms: Vec<VmDisplay>,
}

impl From<RangeObject> for RangeDisplay {
    fn from(range: RangeObject) -> Self {
        Self {
            user_id: range.user_id,
            range_number: range.range_number,
            state: range.range_state,
            vm_count: range.number_of_vms,
            last_deployment: range.last_deployment,
            testing: range.testing_enabled,
            vms: range.vms.into_iter().map(VmDisplay::from).collect(),
        }
    }
}

impl TableDisplay for RangeDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["User", "Range", "State", "VMs", "Last Deployment", "Testing"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.user_id.clone(),
            self.range_number.to_string(),
            OperationStatus::display_label(&self.state),
            self.vm_count.to_string(),
            self.last_deployment.clone().unwrap_or_else(|| "never".to_string()),
            if self.testing { "on" } else { "off" }.to_string(),
        ]
    }
}

#[derive(Serialize)]
pub struct VmDisplay {
    pub proxmox_id: u32,
    pub name: String,
    pub powered_on: bool,
    pub ip: Option<String>,
}

impl From<VmObject> for VmDisplay {
    fn from(vm: VmObject) -> Self {
        Self {
            proxmox_id: vm.proxmox_id,
            name: vm.name,
            powered_on: vm.powered_on,
            ip: vm.ip,
        }
    }
}

impl TableDisplay for VmDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Proxmox ID", "Name", "Power", "IP"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.proxmox_id.to_string(),
            self.name.clone(),
            if self.powered_on { "on" } else { "off" }.to_string(),
            self.ip.clone().unwrap_or_else(|| "-".to_string()),
        ]
    }
}

fn tracker(client: &LudusClient, config: &CliConfig, fetch_logs: bool) -> Result<OperationTracker> {
    let mut polling = config.polling.clone();
    polling.fetch_logs = polling.fetch_logs && fetch_logs;
    let source = Arc::new(RangeStatusSource::new(client.clone()));
    Ok(OperationTracker::new(source, polling)?)
}

fn label(user: &UserArg) -> &str {
    user.id().unwrap_or("range")
}

pub async fn execute(
    cmd: RangeCommands,
    client: LudusClient,
    config: &CliConfig,
    format: OutputFormat,
) -> Result<()> {
    match cmd {
        RangeCommands::Status(user) => {
            let range = RangeDisplay::from(client.get_range(user.id()).await?);
            print_item(&range, format);
            if !format.is_structured() && !range.vms.is_empty() {
                print_list(&range.vms, format);
            }
        }

        RangeCommands::Watch { user, no_logs, resume } => {
            let tracker = tracker(&client, config, !no_logs)?;
            let owner = user.user.clone().unwrap_or_default();
            let handle = match resume {
                Some(line) => tracker.spawn(OperationHandle::resume(owner, line)),
                None => tracker.track(owner),
            };
            let last = follow(handle, label(&user), format).await?;
            ensure_success(&last)?;
        }

        RangeCommands::Deploy {
            user,
            tags,
            force,
            only_roles,
            limit,
            watch,
        } => {
            let body = DeployRequest {
                tags,
                force: force.then_some(true),
                only_roles,
                limit,
            };
            client.deploy_range(user.id(), &body).await?;
            info!(user = label(&user), "Deploy started");
            let started = format!("Deployment of {} started", label(&user));
            if !format.is_structured() {
                print_success(&started);
            } else if !watch {
                print_message(&started, format);
            }

            if watch {
                let tracker = tracker(&client, config, true)?;
                let handle = tracker.track(user.user.clone().unwrap_or_default());
                let last = follow(handle, label(&user), format).await?;
                ensure_success(&last)?;
            }
        }

        RangeCommands::Abort(user) => {
            client.abort_range(user.id()).await?;
            let aborted = format!("Deployment of {} aborted", label(&user));
            if format.is_structured() {
                print_message(&aborted, format);
            } else {
                print_success(&aborted);
            }
        }

        RangeCommands::Logs { user, resume } => {
            let page = client.range_logs(user.id(), resume).await?;
            if format.is_structured() {
                print_value(&page, format);
            } else {
                print!("{}", page.result);
            }
        }
    }

    Ok(())
}
