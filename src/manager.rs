//! `ResourceManager` — the façade exposed to scheduling collaborators
//!
//! One process-wide `ResourceManager` fronts every node's
//! `TopologyOptionsManager` entry and `NodeAllocation` ledger. Node
//! ledgers are created lazily on first touch and looked up under a short
//! `parking_lot::Mutex` hold on the map itself; all the actual work runs
//! against the looked-up `Arc<NodeAllocation>`'s own lock, so two calls
//! against different nodes never contend (spec.md §4.6).

use crate::allocate::{allocate, PodIdentity};
use crate::cpuset::CpuSet;
use crate::error::{Error, Result};
use crate::hints::generate_resource_hints;
use crate::node_allocation::NodeAllocation;
use crate::numa_resource::ResourceName;
use crate::options::{TopologyOptions, TopologyOptionsManager};
use crate::pod_allocation::{NumaTopologyHint, PodAllocation, ResourceOptions};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Process-wide entry point for topology hints, allocation, and release
#[derive(Default)]
pub struct ResourceManager {
    topology_options: TopologyOptionsManager,
    nodes: Mutex<HashMap<String, Arc<NodeAllocation>>>,
}

impl ResourceManager {
    /// A manager with no nodes registered
    pub fn new() -> Self {
        Self { topology_options: TopologyOptionsManager::new(), nodes: Mutex::new(HashMap::new()) }
    }

    /// Publish or replace a node's topology and resource capacity
    pub fn set_topology_options(&self, node: impl Into<String>, options: TopologyOptions) {
        self.topology_options.set_topology_options(node, options);
    }

    fn node_allocation(&self, node: &str) -> Arc<NodeAllocation> {
        let mut nodes = self.nodes.lock();
        nodes.entry(node.to_string()).or_insert_with(|| Arc::new(NodeAllocation::new(node))).clone()
    }

    /// NUMA topology hints for a prospective request, without committing
    /// anything (spec.md §4.3).
    pub fn get_topology_hints(
        &self,
        node: &str,
        request: &BTreeMap<ResourceName, crate::numa_resource::Quantity>,
        reusable_resources: &BTreeMap<u32, crate::numa_resource::NumaNodeResource>,
    ) -> Result<BTreeMap<ResourceName, Vec<NumaTopologyHint>>> {
        let topology_options = self.topology_options.get_topology_options(node);
        if !topology_options.cpu_topology.is_valid() {
            return Err(Error::NotFoundCpuTopology { node: node.to_string() });
        }
        let node_allocation = self.node_allocation(node);
        let (available, _) =
            node_allocation.get_available_numa_node_resources(&topology_options, reusable_resources);
        let numa_nodes = topology_options.cpu_topology.numa_nodes();
        Ok(generate_resource_hints(&numa_nodes, request, &available))
    }

    /// Decide, but do not commit, an allocation for a workload (spec.md
    /// §4.5). Callers that intend to keep the result must follow up with
    /// [`ResourceManager::update`].
    pub fn allocate(
        &self,
        node: &str,
        uid: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        opts: &ResourceOptions,
    ) -> Result<PodAllocation> {
        let topology_options = self.topology_options.get_topology_options(node);
        if !topology_options.cpu_topology.is_valid() {
            return Err(Error::NotFoundCpuTopology { node: node.to_string() });
        }
        let node_allocation = self.node_allocation(node);
        let pod = PodIdentity { uid: uid.into(), namespace: namespace.into(), name: name.into() };
        debug!(node, pod_uid = %pod.uid, "dispatching allocation request");
        allocate(&topology_options, &node_allocation, pod, opts)
    }

    /// Commit a `PodAllocation` into the node's ledger. Idempotent:
    /// calling this again with the same UID supersedes the prior entry
    /// rather than compounding it (spec.md §4.6, "Update").
    pub fn update(&self, node: &str, allocation: PodAllocation) {
        let topology_options = self.topology_options.get_topology_options(node);
        let node_allocation = self.node_allocation(node);
        node_allocation.update(&topology_options.cpu_topology, allocation);
    }

    /// Release a workload's allocation on `node`, if it has one
    pub fn release(&self, node: &str, uid: &str) {
        if let Some(node_allocation) = self.nodes.lock().get(node).cloned() {
            node_allocation.release(uid);
        }
    }

    /// CPUs currently assigned to `uid` on `node`, if any
    pub fn get_allocated_cpu_set(&self, node: &str, uid: &str) -> Option<CpuSet> {
        self.nodes.lock().get(node)?.get_cpus(uid)
    }

    /// CPUs currently available for new allocations on `node`, given its
    /// registered reservations and ref-count bound. `preferred_cpus` are
    /// provisionally treated as released, so a caller re-evaluating its
    /// own prior allocation sees those CPUs as available again.
    pub fn get_available_cpus(
        &self,
        node: &str,
        preferred_cpus: &CpuSet,
    ) -> Result<(CpuSet, crate::topology::CpuDetails)> {
        let topology_options = self.topology_options.get_topology_options(node);
        if !topology_options.cpu_topology.is_valid() {
            return Err(Error::NotFoundCpuTopology { node: node.to_string() });
        }
        let node_allocation = self.node_allocation(node);
        Ok(node_allocation.get_available_cpus(
            &topology_options.cpu_topology,
            topology_options.max_ref_count,
            &topology_options.reserved_cpus,
            preferred_cpus,
        ))
    }

    /// The live ledger for `node`, if it has ever been touched
    pub fn get_node_allocation(&self, node: &str) -> Option<Arc<NodeAllocation>> {
        self.nodes.lock().get(node).cloned()
    }

    /// Evict a node entirely: drops its topology options and its
    /// allocation ledger. Used when a node leaves the cluster.
    pub fn remove_node(&self, node: &str) {
        self.topology_options.remove(node);
        self.nodes.lock().remove(node);
        info!(node, "node evicted from resource manager");
    }
}
