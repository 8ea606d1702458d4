//! Core types for Ludus range topologies

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// CPUs assumed for a router that has none configured
pub const DEFAULT_ROUTER_CPUS: u32 = 2;

/// RAM (GB) assumed for a router that has none configured
pub const DEFAULT_ROUTER_RAM_GB: f64 = 2.0;

/// Resource footprint of a VM inside a segment.
///
/// Absent, zero or unparseable fields count as zero. A fractional CPU
/// count is rounded to the nearest whole CPU.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32", skip_serializing_if = "Option::is_none")]
    pub cpus: Option<u32>,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub ram_gb: Option<f64>,
}

impl VmResources {
    pub fn new(cpus: u32, ram_gb: f64) -> Self {
        Self {
            cpus: Some(cpus),
            ram_gb: Some(ram_gb),
            ..Default::default()
        }
    }

    pub fn effective_cpus(&self) -> u32 {
        positive_u32(self.cpus).unwrap_or(0)
    }

    pub fn effective_ram_gb(&self) -> f64 {
        positive_f64(self.ram_gb).unwrap_or(0.0)
    }
}

/// A network segment (VLAN) and the VMs placed in it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentNode {
    #[serde(skip)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub vms: Vec<VmResources>,
}

/// The range router, which is itself a VM.
///
/// Absent, zero or unparseable fields fall back to
/// [`DEFAULT_ROUTER_CPUS`] and [`DEFAULT_ROUTER_RAM_GB`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterNode {
    #[serde(skip)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32", skip_serializing_if = "Option::is_none")]
    pub cpus: Option<u32>,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub ram_gb: Option<f64>,
}

impl RouterNode {
    pub fn effective_cpus(&self) -> u32 {
        positive_u32(self.cpus).unwrap_or(DEFAULT_ROUTER_CPUS)
    }

    pub fn effective_ram_gb(&self) -> f64 {
        positive_f64(self.ram_gb).unwrap_or(DEFAULT_ROUTER_RAM_GB)
    }
}

/// A node kind this version does not understand. Kept so topologies
/// round-trip, ignored by aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct OtherNode {
    pub id: String,
    pub kind: String,
    pub data: Value,
}

/// A node of the range topology graph.
///
/// The wire shape is the editor's flow node:
/// `{"id": "...", "type": "vlan" | "router" | ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Segment(SegmentNode),
    Router(RouterNode),
    Other(OtherNode),
}

impl Node {
    pub fn segment(id: impl Into<String>, vms: Vec<VmResources>) -> Self {
        Node::Segment(SegmentNode {
            id: id.into(),
            label: None,
            vms,
        })
    }

    pub fn router(id: impl Into<String>, cpus: Option<u32>, ram_gb: Option<f64>) -> Self {
        Node::Router(RouterNode {
            id: id.into(),
            cpus,
            ram_gb,
            ..Default::default()
        })
    }

    pub fn id(&self) -> &str {
        match self {
            Node::Segment(n) => &n.id,
            Node::Router(n) => &n.id,
            Node::Other(n) => &n.id,
        }
    }

    /// Wire name of the node kind
    pub fn kind(&self) -> &str {
        match self {
            Node::Segment(_) => "vlan",
            Node::Router(_) => "router",
            Node::Other(n) => &n.kind,
        }
    }
}

#[derive(Deserialize)]
struct RawNode {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl From<RawNode> for Node {
    fn from(raw: RawNode) -> Self {
        match raw.kind.as_str() {
            "vlan" => {
                let mut node: SegmentNode = serde_json::from_value(raw.data).unwrap_or_default();
                node.id = raw.id;
                Node::Segment(node)
            }
            "router" => {
                let mut node: RouterNode = serde_json::from_value(raw.data).unwrap_or_default();
                node.id = raw.id;
                Node::Router(node)
            }
            _ => Node::Other(OtherNode {
                id: raw.id,
                kind: raw.kind,
                data: raw.data,
            }),
        }
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawNode::deserialize(deserializer).map(Node::from)
    }
}

impl Serialize for Node {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("Node", 3)?;
        state.serialize_field("id", self.id())?;
        state.serialize_field("type", self.kind())?;
        match self {
            Node::Segment(n) => state.serialize_field("data", n)?,
            Node::Router(n) => state.serialize_field("data", n)?,
            Node::Other(n) => state.serialize_field("data", &n.data)?,
        }
        state.end()
    }
}

/// Aggregate resource usage of a topology. Always derived, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceTotals {
    pub vms: u64,
    pub cpus: u64,
    pub ram: f64,
}

impl ResourceTotals {
    pub fn one_vm(cpus: u32, ram_gb: f64) -> Self {
        Self {
            vms: 1,
            cpus: u64::from(cpus),
            ram: ram_gb,
        }
    }
}

impl Add for ResourceTotals {
    type Output = ResourceTotals;

    fn add(self, rhs: Self) -> Self::Output {
        ResourceTotals {
            vms: self.vms + rhs.vms,
            cpus: self.cpus + rhs.cpus,
            ram: self.ram + rhs.ram,
        }
    }
}

impl AddAssign for ResourceTotals {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for ResourceTotals {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(ResourceTotals::default(), Add::add)
    }
}

impl std::fmt::Display for ResourceTotals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} VMs, {} CPUs, {} GB RAM", self.vms, self.cpus, self.ram)
    }
}

// Zero is treated as "not configured", the same as a missing field.
fn positive_u32(value: Option<u32>) -> Option<u32> {
    value.filter(|v| *v > 0)
}

fn positive_f64(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts numbers or numeric strings; anything else becomes `None`.
/// Fractional counts round to the nearest whole CPU.
fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(number_from_value)
        .map(f64::round)
        .filter(|n| n.is_finite() && *n >= 0.0 && *n <= f64::from(u32::MAX))
        .map(|n| n as u32))
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(number_from_value)
        .filter(|n| n.is_finite()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_parsing_by_type() {
        let json = r#"[
            {"id": "vlan10", "type": "vlan", "data": {"label": "VLAN 10", "vms": [{"id": "vm1", "cpus": 4, "ramGb": 8}]}, "position": {"x": 0, "y": 0}},
            {"id": "router", "type": "router", "data": {"cpus": 4, "ram_gb": 8}},
            {"id": "note", "type": "sticky-note", "data": {"text": "hi"}}
        ]"#;
        let nodes: Vec<Node> = serde_json::from_str(json).unwrap();

        match &nodes[0] {
            Node::Segment(seg) => {
                assert_eq!(seg.id, "vlan10");
                assert_eq!(seg.vms.len(), 1);
                assert_eq!(seg.vms[0].cpus, Some(4));
                assert_eq!(seg.vms[0].ram_gb, Some(8.0));
            }
            other => panic!("Expected segment, got {:?}", other),
        }
        match &nodes[1] {
            Node::Router(router) => {
                assert_eq!(router.effective_cpus(), 4);
                assert_eq!(router.effective_ram_gb(), 8.0);
            }
            other => panic!("Expected router, got {:?}", other),
        }
        assert_eq!(nodes[2].kind(), "sticky-note");
    }

    #[test]
    fn test_malformed_numbers_are_absorbed() {
        let json = r#"{"id": "v", "type": "vlan", "data": {"vms": [
            {"cpus": "3", "ramGb": "4.5"},
            {"cpus": -1, "ramGb": null},
            {"cpus": {"nested": true}, "ramGb": [1]}
        ]}}"#;
        let node: Node = serde_json::from_str(json).unwrap();
        let Node::Segment(seg) = node else {
            panic!("Expected segment");
        };

        assert_eq!(seg.vms[0].effective_cpus(), 3);
        assert_eq!(seg.vms[0].effective_ram_gb(), 4.5);
        assert_eq!(seg.vms[1].cpus, None);
        assert_eq!(seg.vms[2].effective_cpus(), 0);
        assert_eq!(seg.vms[2].effective_ram_gb(), 0.0);
    }

    #[test]
    fn test_fractional_cpus_round() {
        let json = r#"{"id": "v", "type": "vlan", "data": {"vms": [
            {"cpus": 2.7, "ramGb": 1.5},
            {"cpus": "1.2"},
            {"cpus": 0.4}
        ]}}"#;
        let node: Node = serde_json::from_str(json).unwrap();

        assert_eq!(node.totals(), ResourceTotals { vms: 3, cpus: 4, ram: 1.5 });

        let router: Node = serde_json::from_str(
            r#"{"id": "router", "type": "router", "data": {"cpus": 3.5}}"#,
        )
        .unwrap();
        assert_eq!(router.totals().cpus, 4);
    }

    #[test]
    fn test_segment_with_non_object_data() {
        let node: Node = serde_json::from_str(r#"{"id": "v", "type": "vlan", "data": 7}"#).unwrap();
        match node {
            Node::Segment(seg) => assert!(seg.vms.is_empty()),
            other => panic!("Expected segment, got {:?}", other),
        }
    }

    #[test]
    fn test_router_zero_and_negative_use_defaults() {
        let router = RouterNode {
            cpus: Some(0),
            ram_gb: Some(-4.0),
            ..Default::default()
        };
        assert_eq!(router.effective_cpus(), DEFAULT_ROUTER_CPUS);
        assert_eq!(router.effective_ram_gb(), DEFAULT_ROUTER_RAM_GB);
    }

    #[test]
    fn test_node_serializes_in_flow_shape() {
        let node = Node::router("router", Some(4), None);
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["id"], "router");
        assert_eq!(json["type"], "router");
        assert_eq!(json["data"]["cpus"], 4);
        assert!(json["data"].get("ram_gb").is_none());
    }

    #[test]
    fn test_totals_sum() {
        let total: ResourceTotals = vec![
            ResourceTotals::one_vm(2, 4.0),
            ResourceTotals::one_vm(4, 8.0),
        ]
        .into_iter()
        .sum();
        assert_eq!(total, ResourceTotals { vms: 2, cpus: 6, ram: 12.0 });
        assert_eq!(total.to_string(), "2 VMs, 6 CPUs, 12 GB RAM");
    }
}
