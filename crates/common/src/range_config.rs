//! Ludus range config to topology conversion
//!
//! A range config lists VMs under `ludus:`, each pinned to a VLAN, plus an
//! optional `router:` block. Ludus always deploys a router, so one is
//! added even when the config leaves it out.

use crate::error::Result;
use crate::types::{Node, RouterNode, SegmentNode, VmResources};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

static RANGE_ID_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*range_id\s*\}\}").expect("valid placeholder pattern"));

/// One VM entry under `ludus:`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LudusVm {
    pub vm_name: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    pub vlan: u32,
    #[serde(default)]
    pub ip_last_octet: Option<u32>,
    #[serde(default)]
    pub ram_gb: Option<f64>,
    #[serde(default)]
    pub cpus: Option<u32>,
}

/// The `router:` block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub vm_name: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub ram_gb: Option<f64>,
    #[serde(default)]
    pub cpus: Option<u32>,
}

/// Subset of a Ludus range config needed to size a range
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeConfig {
    #[serde(default)]
    pub ludus: Vec<LudusVm>,
    #[serde(default)]
    pub router: Option<RouterConfig>,
}

impl RangeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Build the topology node sequence: one segment per VLAN in
    /// ascending order, then the router.
    pub fn to_topology(&self, range_id: &str) -> Vec<Node> {
        let mut vlans: BTreeMap<u32, Vec<VmResources>> = BTreeMap::new();
        for vm in &self.ludus {
            vlans.entry(vm.vlan).or_default().push(VmResources {
                id: Some(resolve_range_id(&vm.vm_name, range_id)),
                label: vm
                    .hostname
                    .as_deref()
                    .map(|h| resolve_range_id(h, range_id)),
                cpus: vm.cpus,
                ram_gb: vm.ram_gb,
            });
        }

        let mut nodes: Vec<Node> = vlans
            .into_iter()
            .map(|(vlan, vms)| {
                Node::Segment(SegmentNode {
                    id: format!("vlan{}", vlan),
                    label: Some(format!("VLAN {}", vlan)),
                    vms,
                })
            })
            .collect();

        let router = self.router.clone().unwrap_or_default();
        let default_name = format!("{}-router", range_id);
        nodes.push(Node::Router(RouterNode {
            id: "router".to_string(),
            label: Some(
                router
                    .vm_name
                    .as_deref()
                    .map_or(default_name.clone(), |n| resolve_range_id(n, range_id)),
            ),
            hostname: Some(
                router
                    .hostname
                    .as_deref()
                    .map_or(default_name, |h| resolve_range_id(h, range_id)),
            ),
            cpus: router.cpus,
            ram_gb: router.ram_gb,
        }));

        nodes
    }
}

/// Substitute `{{ range_id }}` templating in VM names
pub fn resolve_range_id(name: &str, range_id: &str) -> String {
    RANGE_ID_PLACEHOLDER
        .replace_all(name, regex::NoExpand(range_id))
        .into_owned()
}
