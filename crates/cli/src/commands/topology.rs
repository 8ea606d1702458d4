//! Topology Commands

use anyhow::{Context, Result};
use clap::Subcommand;
use ludus_common::{aggregate, Node, RangeConfig, ResourceTotals};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::client::LudusClient;
use crate::output::{print_list, print_value, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum TopologyCommands {
    /// Sum the VMs, CPUs and RAM a topology needs
    Totals {
        /// Range config (YAML) or editor snapshot (JSON); fetched from the
        /// server when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// User whose range config to fetch
        #[arg(short, long, conflicts_with = "file")]
        user: Option<String>,

        /// Value substituted for `{{ range_id }}` in VM names
        #[arg(long)]
        range_id: Option<String>,
    },
}

/// One line of the totals table
#[derive(Debug, Serialize)]
pub struct NodeRow {
    pub id: String,
    pub kind: String,
    pub vms: u64,
    pub cpus: u64,
    pub ram_gb: f64,
}

impl NodeRow {
    fn new(id: &str, kind: &str, totals: ResourceTotals) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            vms: totals.vms,
            cpus: totals.cpus,
            ram_gb: totals.ram,
        }
    }
}

impl TableDisplay for NodeRow {
    fn headers() -> Vec<&'static str> {
        vec!["Node", "Type", "VMs", "CPUs", "RAM"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.kind.clone(),
            self.vms.to_string(),
            self.cpus.to_string(),
            format!("{} GB", self.ram_gb),
        ]
    }
}

#[derive(Serialize)]
struct TotalsReport {
    nodes: Vec<NodeRow>,
    totals: ResourceTotals,
}

/// Read a topology from disk. JSON files are editor snapshots, anything
/// else is treated as a Ludus range config.
pub fn load_topology(path: &Path, range_id: &str) -> Result<Vec<Node>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("{} is not a topology snapshot", path.display()))
    } else {
        let config = RangeConfig::from_yaml(&content)
            .with_context(|| format!("{} is not a range config", path.display()))?;
        Ok(config.to_topology(range_id))
    }
}

fn rows(nodes: &[Node]) -> Vec<NodeRow> {
    nodes
        .iter()
        .map(|node| NodeRow::new(node.id(), node.kind(), node.totals()))
        .collect()
}

pub async fn execute(
    cmd: TopologyCommands,
    client: Option<LudusClient>,
    format: OutputFormat,
) -> Result<()> {
    match cmd {
        TopologyCommands::Totals { file, user, range_id } => {
            let range_id = range_id
                .or_else(|| user.clone())
                .unwrap_or_else(|| "range".to_string());

            let nodes = match file {
                Some(path) => load_topology(&path, &range_id)?,
                None => {
                    let client = client.context("No file given and no API client configured")?;
                    client
                        .range_config(user.as_deref())
                        .await?
                        .to_topology(&range_id)
                }
            };

            let totals = aggregate(&nodes);
            let mut rows = rows(&nodes);
            if format.is_structured() {
                print_value(&TotalsReport { nodes: rows, totals }, format);
            } else {
                rows.push(NodeRow::new("TOTAL", "", totals));
                print_list(&rows, format);
            }
        }
    }

    Ok(())
}
