//! Per-node aggregate of all placed workloads
//!
//! `NodeAllocation` owns the two ledgers a node's scheduling decisions
//! are checked against: the CPU reference-count ledger (`CpuDetails`) and
//! the per-NUMA-cell resource ledger. A single `parking_lot::RwLock`
//! guards both, mirroring the teacher's one-lock-per-shared-state
//! discipline in `env.rs`'s `EnvInner`.

use crate::cpuset::CpuSet;
use crate::numa_resource::NumaNodeResource;
use crate::options::TopologyOptions;
use crate::pod_allocation::PodAllocation;
use crate::topology::{CpuDetails, CpuTopology};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::trace;

struct NodeAllocationInner {
    allocated_pods: BTreeMap<String, PodAllocation>,
    allocated_cpus: CpuDetails,
    allocated_resources: BTreeMap<u32, NumaNodeResource>,
}

impl NodeAllocationInner {
    fn new() -> Self {
        Self {
            allocated_pods: BTreeMap::new(),
            allocated_cpus: CpuDetails::new(),
            allocated_resources: BTreeMap::new(),
        }
    }

    fn add(&mut self, topology: &CpuTopology, alloc: &PodAllocation) {
        self.allocated_cpus.add_ref(topology, &alloc.cpu_set, alloc.cpu_exclusive_policy);
        for resource in &alloc.numa_node_resources {
            self.allocated_resources
                .entry(resource.node_id)
                .or_insert_with(|| NumaNodeResource::new(resource.node_id))
                .merge_from(resource);
        }
    }

    fn subtract(&mut self, alloc: &PodAllocation) {
        self.allocated_cpus.release(&alloc.cpu_set);
        for resource in &alloc.numa_node_resources {
            if let Some(existing) = self.allocated_resources.get_mut(&resource.node_id) {
                for (name, qty) in &resource.resources {
                    let entry = existing.resources.entry(name.clone()).or_default();
                    *entry = entry.saturating_sub(*qty);
                }
            }
        }
    }
}

/// Per-node ledger of committed workload allocations
pub struct NodeAllocation {
    node_name: String,
    inner: RwLock<NodeAllocationInner>,
}

impl NodeAllocation {
    /// Create an empty ledger for `node_name`
    pub fn new(node_name: impl Into<String>) -> Self {
        Self { node_name: node_name.into(), inner: RwLock::new(NodeAllocationInner::new()) }
    }

    /// Name of the node this ledger tracks
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Atomic "release then add" keyed by the allocation's UID.
    /// Idempotent: calling this again with the same UID and the same
    /// allocation value produces the same final ledger state.
    pub fn update(&self, topology: &CpuTopology, allocation: PodAllocation) {
        let mut inner = self.inner.write();
        if let Some(prev) = inner.allocated_pods.remove(&allocation.uid) {
            inner.subtract(&prev);
        }
        inner.add(topology, &allocation);
        trace!(node = %self.node_name, uid = %allocation.uid, "pod allocation updated");
        inner.allocated_pods.insert(allocation.uid.clone(), allocation);
    }

    /// Remove a workload's allocation entirely; a no-op if `uid` is not
    /// present.
    pub fn release(&self, uid: &str) {
        let mut inner = self.inner.write();
        if let Some(prev) = inner.allocated_pods.remove(uid) {
            inner.subtract(&prev);
            trace!(node = %self.node_name, uid, "pod allocation released");
        }
    }

    /// CPU set currently assigned to `uid`, if it has a live allocation
    pub fn get_cpus(&self, uid: &str) -> Option<CpuSet> {
        self.inner.read().allocated_pods.get(uid).map(|a| a.cpu_set.clone())
    }

    /// The full committed allocation for `uid`, if present
    pub fn get_allocation(&self, uid: &str) -> Option<PodAllocation> {
        self.inner.read().allocated_pods.get(uid).cloned()
    }

    /// Number of workloads with a live allocation on this node
    pub fn len(&self) -> usize {
        self.inner.read().allocated_pods.len()
    }

    /// Whether this node currently has no live allocations
    pub fn is_empty(&self) -> bool {
        self.inner.read().allocated_pods.is_empty()
    }

    /// Compute the CPUs available for a new allocation, along with a
    /// view of the CPU ledger with `preferred_cpus`' reference counts
    /// provisionally released (so a workload being re-scheduled can see
    /// its own previously-held CPUs as available again).
    ///
    /// `available = topology.CPUs \ { c : refCount(c) >= maxRefCount } \
    /// reservedCPUs` (spec.md §4.2).
    pub fn get_available_cpus(
        &self,
        topology: &CpuTopology,
        max_ref_count: u32,
        reserved_cpus: &CpuSet,
        preferred_cpus: &CpuSet,
    ) -> (CpuSet, CpuDetails) {
        let inner = self.inner.read();
        let mut view = inner.allocated_cpus.clone();
        view.release(preferred_cpus);

        let mut available = CpuSet::new();
        for cpu in topology.all_cpus().iter() {
            if reserved_cpus.contains(cpu) {
                continue;
            }
            if view.ref_count(cpu) >= max_ref_count.max(1) {
                continue;
            }
            available.insert(cpu);
        }
        (available, view)
    }

    /// Compute per-NUMA-cell availability: `available[n] = capacity[n] -
    /// allocated[n] + reusableResources[n]`, clamped non-negative
    /// (spec.md §4.2).
    pub fn get_available_numa_node_resources(
        &self,
        topology_options: &TopologyOptions,
        reusable_resources: &BTreeMap<u32, NumaNodeResource>,
    ) -> (Vec<NumaNodeResource>, BTreeMap<u32, NumaNodeResource>) {
        let inner = self.inner.read();
        let capacity = topology_options.amplified_numa_node_resources();

        let mut available = Vec::with_capacity(capacity.len());
        for cap in &capacity {
            let allocated = inner
                .allocated_resources
                .get(&cap.node_id)
                .cloned()
                .unwrap_or_else(|| NumaNodeResource::new(cap.node_id));
            let reusable = reusable_resources
                .get(&cap.node_id)
                .cloned()
                .unwrap_or_else(|| NumaNodeResource::new(cap.node_id));

            let mut cell = NumaNodeResource::new(cap.node_id);
            for (name, cap_qty) in &cap.resources {
                let avail_qty =
                    cap_qty.saturating_sub(allocated.get(name)).saturating_add(reusable.get(name));
                cell.resources.insert(name.clone(), avail_qty.non_negative());
            }
            available.push(cell);
        }

        (available, inner.allocated_resources.clone())
    }
}
