//! Per-node topology configuration, and the process-wide store of it
//!
//! `TopologyOptionsManager` is this crate's analogue of the teacher's
//! `Environment`/`EnvBuilder` pair in `env.rs`: a small builder produces
//! a configuration value with sane defaults, and a lock-guarded map
//! publishes it per keyed identity (a node name here, a path there).

use crate::cpuset::CpuSet;
use crate::numa_resource::{amplify_node_resource, NumaNodeResource, ResourceName};
use crate::policy::NumaAllocateStrategy;
use crate::topology::CpuTopology;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

/// Default bound on how many workloads may share a single logical CPU
pub const DEFAULT_MAX_REF_COUNT: u32 = 1;

/// Bundle of everything the allocator needs to know about a node's
/// hardware and admission policy
#[derive(Debug, Clone, Default)]
pub struct TopologyOptions {
    /// The node's CPU topology
    pub cpu_topology: CpuTopology,
    /// Raw (unamplified) per-NUMA-cell resource capacity
    pub numa_node_resources: Vec<NumaNodeResource>,
    /// CPUs withheld from scheduling (kernel/system reserved)
    pub reserved_cpus: CpuSet,
    /// Maximum number of workloads allowed to share one logical CPU
    pub max_ref_count: u32,
    /// Per-resource-name amplification ratios, applied to capacity at
    /// read time (never mutated in place — see `numa_resource::amplify`)
    pub amplification_ratios: BTreeMap<ResourceName, f64>,
    /// Per-node override of the NUMA packing/spreading tie-break
    /// (spec.md §6, "NUMA allocate strategy label")
    pub numa_allocate_strategy: NumaAllocateStrategy,
}

impl TopologyOptions {
    /// Per-NUMA-cell capacity with amplification ratios applied
    pub fn amplified_numa_node_resources(&self) -> Vec<NumaNodeResource> {
        self.numa_node_resources
            .iter()
            .map(|raw| amplify_node_resource(raw, &self.amplification_ratios))
            .collect()
    }

    /// Capacity ledger for a single NUMA node, amplified
    pub fn amplified_resource_for(&self, node_id: u32) -> Option<NumaNodeResource> {
        self.numa_node_resources
            .iter()
            .find(|r| r.node_id == node_id)
            .map(|raw| amplify_node_resource(raw, &self.amplification_ratios))
    }
}

/// Ergonomic builder for `TopologyOptions`, filling in the documented
/// defaults (`max_ref_count = 1`, empty reserved set, empty
/// amplification map) for callers that only want to override a few
/// fields — topology discovery, or tests.
#[derive(Debug, Clone, Default)]
pub struct TopologyOptionsBuilder {
    opts: TopologyOptions,
}

impl TopologyOptionsBuilder {
    /// Start from the documented defaults
    pub fn new() -> Self {
        Self {
            opts: TopologyOptions { max_ref_count: DEFAULT_MAX_REF_COUNT, ..Default::default() },
        }
    }

    /// Set the CPU topology
    pub fn cpu_topology(mut self, topology: CpuTopology) -> Self {
        self.opts.cpu_topology = topology;
        self
    }

    /// Set the raw per-NUMA-cell resource capacity
    pub fn numa_node_resources(mut self, resources: Vec<NumaNodeResource>) -> Self {
        self.opts.numa_node_resources = resources;
        self
    }

    /// Set the reserved CPU set
    pub fn reserved_cpus(mut self, cpus: CpuSet) -> Self {
        self.opts.reserved_cpus = cpus;
        self
    }

    /// Set the max-ref-count bound
    pub fn max_ref_count(mut self, max_ref_count: u32) -> Self {
        self.opts.max_ref_count = max_ref_count;
        self
    }

    /// Set a single resource's amplification ratio
    pub fn amplification_ratio(mut self, resource: ResourceName, ratio: f64) -> Self {
        self.opts.amplification_ratios.insert(resource, ratio);
        self
    }

    /// Set the node's NUMA allocate strategy override
    pub fn numa_allocate_strategy(mut self, strategy: NumaAllocateStrategy) -> Self {
        self.opts.numa_allocate_strategy = strategy;
        self
    }

    /// Finish building
    pub fn build(self) -> TopologyOptions {
        self.opts
    }
}

/// Process-wide, node-keyed store of topology descriptors
///
/// Readers observe a consistent snapshot because each entry is an
/// immutable `Arc<TopologyOptions>`: a writer builds a whole new value
/// and swaps the `Arc`, rather than mutating fields a reader might be
/// mid-read on (spec.md §5, "replace-by-pointer-swap").
#[derive(Default)]
pub struct TopologyOptionsManager {
    nodes: RwLock<HashMap<String, Arc<TopologyOptions>>>,
}

impl TopologyOptionsManager {
    /// An empty manager
    pub fn new() -> Self {
        Self { nodes: RwLock::new(HashMap::new()) }
    }

    /// Current topology options for `node`, or an empty-but-constructible
    /// default if the node has not yet published one. Callers that need
    /// to distinguish "never registered" from "registered but empty"
    /// should check `cpu_topology.is_valid()` on the result and surface
    /// `Error::NotFoundCpuTopology` themselves (the manager has no
    /// opinion on that distinction; it just stores what it's given).
    pub fn get_topology_options(&self, node: &str) -> Arc<TopologyOptions> {
        self.nodes
            .read()
            .get(node)
            .cloned()
            .unwrap_or_else(|| Arc::new(TopologyOptions::default()))
    }

    /// Replace `node`'s topology options wholesale
    pub fn set_topology_options(&self, node: impl Into<String>, options: TopologyOptions) {
        let node = node.into();
        info!(node = %node, num_cpus = options.cpu_topology.num_cpus(), "topology options updated");
        self.nodes.write().insert(node, Arc::new(options));
    }

    /// Atomically read-modify-write `node`'s topology options: clones the
    /// current (or default) value, applies `mutator`, then publishes the
    /// result. Holds the write lock for the whole operation so concurrent
    /// mutators cannot interleave.
    pub fn update_topology_options(&self, node: &str, mutator: impl FnOnce(&mut TopologyOptions)) {
        let mut guard = self.nodes.write();
        let mut updated = guard
            .get(node)
            .map(|arc| (**arc).clone())
            .unwrap_or_default();
        mutator(&mut updated);
        info!(node, "topology options updated via mutator");
        guard.insert(node.to_string(), Arc::new(updated));
    }

    /// Drop a node's stored topology entirely (node deletion)
    pub fn remove(&self, node: &str) {
        self.nodes.write().remove(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_node_returns_default() {
        let mgr = TopologyOptionsManager::new();
        let opts = mgr.get_topology_options("missing-node");
        assert!(!opts.cpu_topology.is_valid());
        assert_eq!(opts.max_ref_count, 0);
    }

    #[test]
    fn builder_fills_documented_defaults() {
        let opts = TopologyOptionsBuilder::new().build();
        assert_eq!(opts.max_ref_count, DEFAULT_MAX_REF_COUNT);
        assert!(opts.reserved_cpus.is_empty());
        assert!(opts.amplification_ratios.is_empty());
    }

    #[test]
    fn update_is_atomic_read_modify_write() {
        let mgr = TopologyOptionsManager::new();
        mgr.update_topology_options("node-a", |opts| {
            opts.max_ref_count = 2;
        });
        assert_eq!(mgr.get_topology_options("node-a").max_ref_count, 2);

        mgr.update_topology_options("node-a", |opts| {
            opts.max_ref_count += 1;
        });
        assert_eq!(mgr.get_topology_options("node-a").max_ref_count, 3);
    }

    #[test]
    fn remove_drops_node_entry() {
        let mgr = TopologyOptionsManager::new();
        mgr.set_topology_options("node-a", TopologyOptions::default());
        mgr.remove("node-a");
        assert!(!mgr.get_topology_options("node-a").cpu_topology.is_valid());
    }
}
