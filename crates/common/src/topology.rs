//! Resource aggregation over a range topology
//!
//! Totals are a pure fold over the node sequence: every VM inside a segment
//! counts once with its own CPUs and RAM, and a router counts as one VM with
//! router defaults for anything not configured. Unknown node kinds are
//! skipped.

use crate::types::{Node, ResourceTotals};

impl Node {
    /// Resources contributed by this node alone
    pub fn totals(&self) -> ResourceTotals {
        match self {
            Node::Segment(segment) => segment
                .vms
                .iter()
                .map(|vm| ResourceTotals::one_vm(vm.effective_cpus(), vm.effective_ram_gb()))
                .sum(),
            Node::Router(router) => {
                ResourceTotals::one_vm(router.effective_cpus(), router.effective_ram_gb())
            }
            Node::Other(_) => ResourceTotals::default(),
        }
    }
}

/// Compute total VM count, CPUs and RAM across a topology snapshot.
pub fn aggregate(nodes: &[Node]) -> ResourceTotals {
    nodes.iter().map(Node::totals).sum()
}
