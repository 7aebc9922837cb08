//! Policy enums recognized from workload metadata and node labels
//!
//! These are plain closed enums (mirroring the teacher's `PageType` /
//! `Operation` enums in `error.rs`) rather than raw strings, so policy
//! mismatches are caught by the type system instead of at match time.

/// How a CPU-bound workload's logical CPUs should be shaped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuBindPolicy {
    /// No binding shape constraint; any CPUs will do
    #[default]
    None,
    /// Whole physical cores only — a core contributes all its logical
    /// CPUs or none
    FullPCPUs,
    /// At most one logical CPU per physical core
    SpreadByPCPUs,
}

/// Whether selected CPUs exclude other workloads at core or socket
/// granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuExclusivePolicy {
    /// No exclusivity requested
    #[default]
    None,
    /// Exclude other workloads from the same physical core
    PcpuLevel,
    /// Exclude other workloads from the same socket
    SocketLevel,
}

/// Per-node tie-break preference when multiple NUMA cells/sockets/cores
/// are otherwise equally valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumaAllocateStrategy {
    /// Pack: prefer cells/sockets/cores with the most existing allocations
    MostAllocated,
    /// Spread: prefer the least allocated
    #[default]
    LeastAllocated,
}

/// NUMA topology admission policy for a workload (mirrors kubelet's
/// topology manager policy naming)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumaTopologyPolicy {
    /// No NUMA alignment required
    None,
    /// Best-effort alignment; a hint is preferred but not mandatory
    #[default]
    BestEffort,
    /// Alignment is mandatory for every resource kind the workload requests
    Restricted,
    /// The entire request must fit within a single NUMA node
    SingleNumaNode,
}

/// Quality-of-service class of a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosClass {
    /// Latency-Sensitive Exclusive
    Lse,
    /// Latency-Sensitive Reserved
    Lsr,
    /// Latency-Sensitive, CPU-share only
    Ls,
    /// Best-effort
    Be,
}

/// Scheduling priority class of a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityClass {
    /// Production priority
    Prod,
    /// Mid priority
    Mid,
    /// Batch priority
    Batch,
    /// Free (opportunistic) priority
    Free,
}

/// Whether a workload of this QoS/priority combination is eligible for
/// CPU binding at all (spec.md §6, "Workload gating")
///
/// Workloads that don't qualify are treated as CPU-share: the allocator
/// still accounts for their NUMA resource consumption but never performs
/// CPU selection for them.
pub fn is_cpu_bind_eligible(qos: QosClass, priority: PriorityClass) -> bool {
    matches!(qos, QosClass::Lse | QosClass::Lsr) && matches!(priority, PriorityClass::Prod)
}
