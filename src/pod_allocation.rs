//! Request envelopes and the committed allocation record
//!
//! `ResourceOptions` is what a scheduling call passes in; `PodAllocation`
//! is what `Allocate` hands back and `Update` persists. Neither is
//! retained by reference past the call that produced it — values are
//! copied in, copied out (spec.md §3, "Ownership").

use crate::cpuset::{CpuSet, NumaMask};
use crate::numa_resource::{NumaNodeResource, Quantity, ResourceName};
use crate::options::TopologyOptions;
use crate::policy::{CpuBindPolicy, CpuExclusivePolicy};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A hint describing which NUMA cells a workload should be confined to,
/// and whether that confinement is minimal (preferred)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumaTopologyHint {
    /// Bitmask of NUMA cell indices this hint covers
    pub numa_node_affinity: NumaMask,
    /// Whether this hint's cell count is the minimum that could satisfy
    /// the request (spec.md §4.3)
    pub preferred: bool,
}

/// The request envelope passed to `GetTopologyHints` and `Allocate`
#[derive(Debug, Clone)]
pub struct ResourceOptions {
    /// Integer count of whole CPU cores the workload needs, if CPU-bound.
    /// Sized from the amplified (not raw) request per spec.md §4.1.
    pub num_cpus_needed: u32,
    /// Resource requests, already amplified by the outer layer
    pub requests: BTreeMap<ResourceName, Quantity>,
    /// Raw (unamplified) resource requests
    pub original_requests: BTreeMap<ResourceName, Quantity>,
    /// Whether the workload requests CPU binding at all
    pub request_cpu_bind: bool,
    /// A mandatory binding shape the result must satisfy, if any
    pub required_cpu_bind_policy: Option<CpuBindPolicy>,
    /// The binding shape heuristic to optimize for during selection
    pub cpu_bind_policy: CpuBindPolicy,
    /// Exclusivity granularity requested
    pub cpu_exclusive_policy: CpuExclusivePolicy,
    /// CPUs the workload previously held and may reuse (e.g. on update)
    pub preferred_cpus: CpuSet,
    /// Resources the workload previously held, per NUMA node, that may be
    /// reused rather than counted as newly consumed
    pub reusable_resources: BTreeMap<u32, NumaNodeResource>,
    /// The NUMA affinity hint chosen by the outer scheduler for this call
    pub numa_hint: Option<NumaMask>,
    /// The node's topology options, as resolved by the caller
    pub topology_options: Arc<TopologyOptions>,
}

impl ResourceOptions {
    /// Whether `cpu` is present in `requests` when CPU binding is
    /// requested (spec.md §3 invariant on `ResourceOptions`)
    pub fn cpu_request_is_consistent(&self) -> bool {
        !self.request_cpu_bind || self.requests.contains_key(&ResourceName::cpu())
    }
}

/// A committed allocation for one workload on one node
#[derive(Debug, Clone)]
pub struct PodAllocation {
    /// Stable workload identity
    pub uid: String,
    /// Workload namespace
    pub namespace: String,
    /// Workload name
    pub name: String,
    /// Logical CPUs assigned to this workload, if CPU-bound
    pub cpu_set: CpuSet,
    /// Exclusivity policy this workload holds over `cpu_set`
    pub cpu_exclusive_policy: CpuExclusivePolicy,
    /// Per-NUMA-node resource quantities consumed by this workload
    pub numa_node_resources: Vec<NumaNodeResource>,
}

impl PodAllocation {
    /// Sum of this allocation's per-NUMA CPU-milli quantities
    pub fn total_cpu_millis(&self) -> Quantity {
        self.numa_node_resources
            .iter()
            .fold(Quantity::ZERO, |acc, r| acc.saturating_add(r.get(&ResourceName::cpu())))
    }
}
