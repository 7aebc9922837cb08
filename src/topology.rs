//! CPU topology model and the per-node CPU reference-count ledger
//!
//! `CPUTopology` is the immutable description of a node's hardware
//! (grounded on the teacher's `NumaTopology` in `numa.rs`, extended with
//! core/socket/L3 membership rather than just NUMA membership).
//! `CPUDetails` is the mutable ledger derived from it, tracking how many
//! workloads currently reference each logical CPU.

use crate::cpuset::{CpuId, CpuSet};
use crate::policy::CpuExclusivePolicy;
use std::collections::BTreeMap;

/// Static per-CPU membership: which core, socket, NUMA node and L3 cache
/// domain a logical CPU belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuInfo {
    /// Physical core id
    pub core_id: u32,
    /// Socket (package) id
    pub socket_id: u32,
    /// NUMA node id
    pub numa_node_id: u32,
    /// L3 cache domain id
    pub l3_id: u32,
}

/// Immutable description of a node's logical CPUs and their membership
#[derive(Debug, Clone, Default)]
pub struct CpuTopology {
    cpus: BTreeMap<CpuId, CpuInfo>,
}

impl CpuTopology {
    /// Build a topology from an explicit CPU → membership map
    pub fn new(cpus: BTreeMap<CpuId, CpuInfo>) -> Self {
        Self { cpus }
    }

    /// Whether the topology is well formed: non-empty and every physical
    /// core hosts at least one logical CPU (spec.md §3)
    pub fn is_valid(&self) -> bool {
        !self.cpus.is_empty() && self.cpus_per_core() >= 1
    }

    /// Total number of logical CPUs described
    pub fn num_cpus(&self) -> usize {
        self.cpus.len()
    }

    /// Membership info for a single CPU, if it exists in this topology
    pub fn cpu_info(&self, cpu: CpuId) -> Option<CpuInfo> {
        self.cpus.get(&cpu).copied()
    }

    /// Whether `cpu` is described by this topology
    pub fn contains(&self, cpu: CpuId) -> bool {
        self.cpus.contains_key(&cpu)
    }

    /// The full set of CPUs this topology describes
    pub fn all_cpus(&self) -> CpuSet {
        CpuSet::from_iter(self.cpus.keys().copied())
    }

    /// Number of logical CPUs per physical core (SMT width), derived from
    /// the most populous core. Topologies with uneven SMT width per core
    /// are not modeled; `is_valid` only requires at least one CPU per
    /// core, so callers relying on a uniform width should validate their
    /// own discovery data.
    pub fn cpus_per_core(&self) -> usize {
        if self.cpus.is_empty() {
            return 0;
        }
        let mut per_core: BTreeMap<(u32, u32), usize> = BTreeMap::new();
        for info in self.cpus.values() {
            *per_core.entry((info.socket_id, info.core_id)).or_insert(0) += 1;
        }
        per_core.values().copied().max().unwrap_or(0)
    }

    /// Ascending, deduplicated NUMA node ids present in this topology
    pub fn numa_nodes(&self) -> Vec<u32> {
        let mut nodes: Vec<u32> = self.cpus.values().map(|i| i.numa_node_id).collect();
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }

    /// CPUs that belong to the given NUMA node
    pub fn cpus_in_numa_node(&self, node: u32) -> CpuSet {
        CpuSet::from_iter(
            self.cpus
                .iter()
                .filter(|(_, info)| info.numa_node_id == node)
                .map(|(cpu, _)| *cpu),
        )
    }

    /// CPUs that belong to the given socket
    pub fn cpus_in_socket(&self, socket: u32) -> CpuSet {
        CpuSet::from_iter(
            self.cpus
                .iter()
                .filter(|(_, info)| info.socket_id == socket)
                .map(|(cpu, _)| *cpu),
        )
    }

    /// CPUs that belong to the given physical core (socket, core) pair
    pub fn cpus_in_core(&self, socket: u32, core: u32) -> CpuSet {
        CpuSet::from_iter(self.cpus.iter().filter_map(|(cpu, info)| {
            (info.socket_id == socket && info.core_id == core).then_some(*cpu)
        }))
    }

    /// Ascending, deduplicated (socket, core) pairs present in this
    /// topology, restricted to `within` if given
    pub fn cores(&self, within: Option<&CpuSet>) -> Vec<(u32, u32)> {
        let mut cores: Vec<(u32, u32)> = self
            .cpus
            .iter()
            .filter(|(cpu, _)| within.map(|s| s.contains(**cpu)).unwrap_or(true))
            .map(|(_, info)| (info.socket_id, info.core_id))
            .collect();
        cores.sort_unstable();
        cores.dedup();
        cores
    }
}

/// A single ledger entry: static membership plus live allocation state
/// for one logical CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuDetail {
    /// Static membership, copied from the topology at insertion time
    pub info: CpuInfo,
    /// Number of workloads currently referencing this CPU
    pub ref_count: u32,
    /// Exclusivity policy held by the current occupant(s), if any
    pub exclusive_policy: CpuExclusivePolicy,
}

/// Mutable per-node ledger mapping CPU id → {membership, ref count,
/// exclusivity policy}
///
/// Invariant: a CPU with `ref_count == 0` is absent from the map — it is
/// simply not in `allocatedCPUs`, never present as a zeroed entry
/// (spec.md §3).
#[derive(Debug, Clone, Default)]
pub struct CpuDetails {
    entries: BTreeMap<CpuId, CpuDetail>,
}

impl CpuDetails {
    /// An empty ledger
    pub fn new() -> Self {
        Self { entries: BTreeMap::new() }
    }

    /// Number of CPUs with a non-zero reference count
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger has no referenced CPUs
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current reference count for `cpu` (0 if absent)
    pub fn ref_count(&self, cpu: CpuId) -> u32 {
        self.entries.get(&cpu).map(|e| e.ref_count).unwrap_or(0)
    }

    /// Current exclusivity policy held against `cpu`, if referenced
    pub fn exclusive_policy(&self, cpu: CpuId) -> Option<CpuExclusivePolicy> {
        self.entries.get(&cpu).map(|e| e.exclusive_policy)
    }

    /// Entry for `cpu`, if referenced
    pub fn get(&self, cpu: CpuId) -> Option<&CpuDetail> {
        self.entries.get(&cpu)
    }

    /// All currently-referenced CPUs
    pub fn cpu_set(&self) -> CpuSet {
        CpuSet::from_iter(self.entries.keys().copied())
    }

    /// Iterate over ledger entries in ascending CPU id order
    pub fn iter(&self) -> impl Iterator<Item = (CpuId, &CpuDetail)> {
        self.entries.iter().map(|(cpu, detail)| (*cpu, detail))
    }

    /// Add one reference against each CPU in `cpus`, recording `policy` as
    /// the occupant's exclusivity policy. Used by `NodeAllocation::update`
    /// when admitting a new workload's CPU set into the ledger.
    pub fn add_ref(&mut self, topology: &CpuTopology, cpus: &CpuSet, policy: CpuExclusivePolicy) {
        for cpu in cpus.iter() {
            let Some(info) = topology.cpu_info(cpu) else { continue };
            let entry = self.entries.entry(cpu).or_insert(CpuDetail {
                info,
                ref_count: 0,
                exclusive_policy: CpuExclusivePolicy::None,
            });
            entry.ref_count += 1;
            if policy != CpuExclusivePolicy::None {
                entry.exclusive_policy = policy;
            }
        }
    }

    /// Release one reference against each CPU in `cpus`; entries whose
    /// count drops to zero are removed entirely so the invariant in the
    /// type's doc comment holds.
    pub fn release(&mut self, cpus: &CpuSet) {
        for cpu in cpus.iter() {
            if let Some(entry) = self.entries.get_mut(&cpu) {
                entry.ref_count = entry.ref_count.saturating_sub(1);
                if entry.ref_count == 0 {
                    self.entries.remove(&cpu);
                }
            }
        }
    }
}
