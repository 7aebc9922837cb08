//! CPU selection heuristics
//!
//! Given a pool of candidate CPUs, chooses exactly the requested count
//! according to binding shape (`FullPCPUs` / `SpreadByPCPUs`),
//! exclusivity policy, and the node's NUMA allocate strategy. This is the
//! largest single piece of the allocator: everything else in this crate
//! exists to hand this module a correct candidate pool.

use crate::cpuset::{CpuId, CpuSet};
use crate::error::{Error, Result};
use crate::policy::{CpuBindPolicy, CpuExclusivePolicy, NumaAllocateStrategy};
use crate::topology::{CpuDetails, CpuTopology};
use std::collections::BTreeMap;

/// Prune a candidate pool to CPUs that could plausibly form a valid set
/// under `required_policy`, before the more expensive ranked selection
/// runs. This is a best-effort narrowing, not a correctness gate — when
/// the pool doesn't cleanly decompose, it is returned unchanged so the
/// later `satisfied_required_cpu_bind_policy` check can emit a precise
/// `PolicyUnsatisfiable` error instead of this function guessing wrong
/// (spec.md §4.4).
pub fn filter_available_cpus_by_required_cpu_bind_policy(
    topology: &CpuTopology,
    candidates: &CpuSet,
    required_policy: CpuBindPolicy,
) -> CpuSet {
    match required_policy {
        CpuBindPolicy::FullPCPUs => {
            let cpus_per_core = topology.cpus_per_core().max(1);
            if candidates.len() % cpus_per_core != 0 {
                return candidates.clone();
            }
            let whole_cores = full_cores(topology, candidates);
            let mut kept = CpuSet::new();
            for cpus in whole_cores.values() {
                for cpu in cpus.iter() {
                    kept.insert(cpu);
                }
            }
            kept
        }
        CpuBindPolicy::SpreadByPCPUs | CpuBindPolicy::None => candidates.clone(),
    }
}

/// Validate a selected CPU set against a mandatory binding policy
/// (spec.md §4.4):
/// - `FullPCPUs`: `|cores(result)| * CPUsPerCore == |result|`
/// - `SpreadByPCPUs`: `|cores(result)| == |result|`
pub fn satisfied_required_cpu_bind_policy(
    topology: &CpuTopology,
    result: &CpuSet,
    policy: CpuBindPolicy,
) -> bool {
    if result.is_empty() {
        return true;
    }
    let cores = topology.cores(Some(result));
    match policy {
        CpuBindPolicy::FullPCPUs => cores.len() * topology.cpus_per_core().max(1) == result.len(),
        CpuBindPolicy::SpreadByPCPUs => cores.len() == result.len(),
        CpuBindPolicy::None => true,
    }
}

/// Select exactly `n` CPUs from `available` honoring (in priority order)
/// preferred reuse, exclusivity, binding shape, and the NUMA allocate
/// strategy tie-break (spec.md §4.4).
#[allow(clippy::too_many_arguments)]
pub fn take_preferred_cpus(
    topology: &CpuTopology,
    available: &CpuSet,
    preferred: &CpuSet,
    allocated: &CpuDetails,
    n: usize,
    bind_policy: CpuBindPolicy,
    exclusive_policy: CpuExclusivePolicy,
    numa_strategy: NumaAllocateStrategy,
) -> Result<CpuSet> {
    if n == 0 {
        return Ok(CpuSet::new());
    }

    let excluded = excluded_by_exclusivity(topology, allocated, exclusive_policy);
    let candidates = available.difference(&excluded);

    match bind_policy {
        CpuBindPolicy::None => select_individual(topology, &candidates, preferred, allocated, n, numa_strategy),
        CpuBindPolicy::SpreadByPCPUs => {
            select_cores(topology, &candidates, preferred, allocated, n, numa_strategy, false)
        }
        CpuBindPolicy::FullPCPUs => {
            select_cores(topology, &candidates, preferred, allocated, n, numa_strategy, true)
        }
    }
}

/// CPUs excluded from candidacy because an existing occupant holds
/// core- or socket-level exclusivity over them, or because granting the
/// requested exclusivity would strand an existing (even non-exclusive)
/// occupant of the same core/socket.
fn excluded_by_exclusivity(
    topology: &CpuTopology,
    allocated: &CpuDetails,
    requested: CpuExclusivePolicy,
) -> CpuSet {
    let mut excluded = CpuSet::new();
    for (_, detail) in allocated.iter() {
        match detail.exclusive_policy {
            CpuExclusivePolicy::PcpuLevel => {
                excluded = excluded.union(&topology.cpus_in_core(detail.info.socket_id, detail.info.core_id));
            }
            CpuExclusivePolicy::SocketLevel => {
                excluded = excluded.union(&topology.cpus_in_socket(detail.info.socket_id));
            }
            CpuExclusivePolicy::None => {}
        }

        if detail.ref_count > 0 {
            match requested {
                CpuExclusivePolicy::PcpuLevel => {
                    excluded =
                        excluded.union(&topology.cpus_in_core(detail.info.socket_id, detail.info.core_id));
                }
                CpuExclusivePolicy::SocketLevel => {
                    excluded = excluded.union(&topology.cpus_in_socket(detail.info.socket_id));
                }
                CpuExclusivePolicy::None => {}
            }
        }
    }
    excluded
}

fn strategy_score(strategy: NumaAllocateStrategy, allocated_count: u32) -> i64 {
    match strategy {
        NumaAllocateStrategy::MostAllocated => -(allocated_count as i64),
        NumaAllocateStrategy::LeastAllocated => allocated_count as i64,
    }
}

fn allocated_counts_by<K: Ord + Copy>(
    allocated: &CpuDetails,
    key_fn: impl Fn(CpuId, &crate::topology::CpuInfo) -> K,
) -> BTreeMap<K, u32> {
    let mut counts = BTreeMap::new();
    for (cpu, detail) in allocated.iter() {
        *counts.entry(key_fn(cpu, &detail.info)).or_insert(0) += detail.ref_count;
    }
    counts
}

fn select_individual(
    topology: &CpuTopology,
    candidates: &CpuSet,
    preferred: &CpuSet,
    allocated: &CpuDetails,
    n: usize,
    strategy: NumaAllocateStrategy,
) -> Result<CpuSet> {
    if candidates.len() < n {
        return Err(Error::InsufficientCpus { requested: n, available: candidates.len() });
    }

    let numa_counts = allocated_counts_by(allocated, |_, info| info.numa_node_id);
    let socket_counts = allocated_counts_by(allocated, |_, info| info.socket_id);
    let core_counts = allocated_counts_by(allocated, |_, info| (info.socket_id, info.core_id));

    let mut ranked: Vec<CpuId> = candidates.iter().collect();
    ranked.sort_by_key(|cpu| {
        let info = topology.cpu_info(*cpu).expect("candidate CPU must exist in topology");
        let pref_flag = u8::from(!preferred.contains(*cpu));
        let numa_score = strategy_score(strategy, numa_counts.get(&info.numa_node_id).copied().unwrap_or(0));
        let socket_score = strategy_score(strategy, socket_counts.get(&info.socket_id).copied().unwrap_or(0));
        let core_score = strategy_score(
            strategy,
            core_counts.get(&(info.socket_id, info.core_id)).copied().unwrap_or(0),
        );
        (pref_flag, numa_score, socket_score, core_score, *cpu)
    });

    Ok(ranked.into_iter().take(n).collect())
}

/// Group `candidates` by (socket, core), keeping only the candidate CPUs
/// present in each core (not necessarily the whole core).
fn group_by_core(topology: &CpuTopology, candidates: &CpuSet) -> BTreeMap<(u32, u32), CpuSet> {
    let mut groups: BTreeMap<(u32, u32), CpuSet> = BTreeMap::new();
    for cpu in candidates.iter() {
        let info = topology.cpu_info(cpu).expect("candidate CPU must exist in topology");
        groups.entry((info.socket_id, info.core_id)).or_default().insert(cpu);
    }
    groups
}

/// Cores whose entire logical-CPU membership is present in `candidates`
/// (i.e. the core is wholly unallocated, as `FullPCPUs` requires)
fn full_cores(topology: &CpuTopology, candidates: &CpuSet) -> BTreeMap<(u32, u32), CpuSet> {
    group_by_core(topology, candidates)
        .into_iter()
        .filter(|((socket, core), cpus)| topology.cpus_in_core(*socket, *core).len() == cpus.len())
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn select_cores(
    topology: &CpuTopology,
    candidates: &CpuSet,
    preferred: &CpuSet,
    allocated: &CpuDetails,
    n: usize,
    strategy: NumaAllocateStrategy,
    whole_core: bool,
) -> Result<CpuSet> {
    let groups = if whole_core { full_cores(topology, candidates) } else { group_by_core(topology, candidates) };

    let cpus_per_core = topology.cpus_per_core().max(1);
    if whole_core && n % cpus_per_core != 0 {
        return Err(Error::PolicyUnsatisfiable { policy: "FullPCPUs".to_string() });
    }
    let cores_needed = if whole_core { n / cpus_per_core } else { n };

    if groups.len() < cores_needed {
        return Err(Error::InsufficientCpus { requested: cores_needed, available: groups.len() });
    }

    let numa_counts = allocated_counts_by(allocated, |_, info| info.numa_node_id);
    let socket_counts = allocated_counts_by(allocated, |_, info| info.socket_id);
    let core_counts = allocated_counts_by(allocated, |_, info| (info.socket_id, info.core_id));

    let mut ranked: Vec<((u32, u32), CpuSet)> = groups.into_iter().collect();
    ranked.sort_by_key(|((socket, core), cpus)| {
        let info = topology.cpu_info(cpus.iter().next().unwrap()).expect("core must contain a CPU");
        let pref_flag = u8::from(cpus.intersection(preferred).is_empty());
        let numa_score = strategy_score(strategy, numa_counts.get(&info.numa_node_id).copied().unwrap_or(0));
        let socket_score = strategy_score(strategy, socket_counts.get(socket).copied().unwrap_or(0));
        let core_score =
            strategy_score(strategy, core_counts.get(&(*socket, *core)).copied().unwrap_or(0));
        (pref_flag, numa_score, socket_score, core_score, *socket, *core)
    });

    let mut result = CpuSet::new();
    if whole_core {
        for (_, cpus) in ranked.into_iter().take(cores_needed) {
            for cpu in cpus.iter() {
                result.insert(cpu);
            }
        }
    } else {
        for (_, cpus) in ranked.into_iter().take(cores_needed) {
            let chosen = cpus.intersection(preferred).iter().min().unwrap_or_else(|| cpus.iter().min().unwrap());
            result.insert(chosen);
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::CpuInfo;
    use std::collections::BTreeMap as Map;

    /// 2 sockets x 1 NUMA node each x 2 cores x 2 threads = 8 CPUs
    fn sample_topology() -> CpuTopology {
        let mut cpus = Map::new();
        let mut cpu = 0u32;
        for socket in 0..2u32 {
            for core in 0..2u32 {
                for _thread in 0..2u32 {
                    cpus.insert(
                        cpu,
                        CpuInfo { core_id: core, socket_id: socket, numa_node_id: socket, l3_id: socket },
                    );
                    cpu += 1;
                }
            }
        }
        CpuTopology::new(cpus)
    }

    #[test]
    fn full_pcpus_picks_whole_cores_ascending() {
        let topo = sample_topology();
        let available = topo.all_cpus();
        let result = take_preferred_cpus(
            &topo,
            &available,
            &CpuSet::new(),
            &CpuDetails::new(),
            4,
            CpuBindPolicy::FullPCPUs,
            CpuExclusivePolicy::None,
            NumaAllocateStrategy::LeastAllocated,
        )
        .unwrap();
        assert_eq!(result, CpuSet::from_iter([0, 1, 2, 3]));
        assert!(satisfied_required_cpu_bind_policy(&topo, &result, CpuBindPolicy::FullPCPUs));
    }

    #[test]
    fn spread_by_pcpus_picks_one_per_core_ascending() {
        let topo = sample_topology();
        let available = topo.all_cpus();
        let result = take_preferred_cpus(
            &topo,
            &available,
            &CpuSet::new(),
            &CpuDetails::new(),
            4,
            CpuBindPolicy::SpreadByPCPUs,
            CpuExclusivePolicy::None,
            NumaAllocateStrategy::LeastAllocated,
        )
        .unwrap();
        assert_eq!(result, CpuSet::from_iter([0, 2, 4, 6]));
        assert!(satisfied_required_cpu_bind_policy(&topo, &result, CpuBindPolicy::SpreadByPCPUs));
    }

    #[test]
    fn full_pcpus_succeeds_on_remaining_core_after_partial_allocation() {
        let topo = sample_topology();
        // cores at cpus {4,5,6,7} plus socket 1's second core fully
        // allocated, leaving only core {0,1} free — mirrors scenario 2
        // from spec.md §8 restricted to this topology's smaller size.
        let mut allocated = CpuDetails::new();
        allocated.add_ref(&topo, &CpuSet::from_iter([2, 3, 4, 5, 6, 7]), CpuExclusivePolicy::None);

        let available = topo.all_cpus().difference(&CpuSet::from_iter([2, 3, 4, 5, 6, 7]));
        let result = take_preferred_cpus(
            &topo,
            &available,
            &CpuSet::new(),
            &allocated,
            2,
            CpuBindPolicy::FullPCPUs,
            CpuExclusivePolicy::None,
            NumaAllocateStrategy::LeastAllocated,
        )
        .unwrap();
        assert_eq!(result, CpuSet::from_iter([0, 1]));
    }

    #[test]
    fn spread_by_pcpus_fails_when_cores_exhausted() {
        let topo = sample_topology();
        let allocated_cpus = CpuSet::from_iter([0, 1, 2, 3, 4, 5, 6]);
        let mut allocated = CpuDetails::new();
        allocated.add_ref(&topo, &allocated_cpus, CpuExclusivePolicy::None);
        let available = topo.all_cpus().difference(&allocated_cpus);

        let err = take_preferred_cpus(
            &topo,
            &available,
            &CpuSet::new(),
            &allocated,
            4,
            CpuBindPolicy::SpreadByPCPUs,
            CpuExclusivePolicy::None,
            NumaAllocateStrategy::LeastAllocated,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InsufficientCpus { .. }));
    }

    #[test]
    fn preferred_cpus_are_chosen_first() {
        let topo = sample_topology();
        let available = topo.all_cpus();
        let preferred = CpuSet::from_iter([6]);
        let result = take_preferred_cpus(
            &topo,
            &available,
            &preferred,
            &CpuDetails::new(),
            1,
            CpuBindPolicy::None,
            CpuExclusivePolicy::None,
            NumaAllocateStrategy::LeastAllocated,
        )
        .unwrap();
        assert_eq!(result, CpuSet::from_iter([6]));
    }

    #[test]
    fn most_allocated_strategy_packs_into_busier_numa_node() {
        let topo = sample_topology();
        let mut allocated = CpuDetails::new();
        allocated.add_ref(&topo, &CpuSet::from_iter([0]), CpuExclusivePolicy::None);
        let available = topo.all_cpus().difference(&CpuSet::from_iter([0]));

        let result = take_preferred_cpus(
            &topo,
            &available,
            &CpuSet::new(),
            &allocated,
            1,
            CpuBindPolicy::None,
            CpuExclusivePolicy::None,
            NumaAllocateStrategy::MostAllocated,
        )
        .unwrap();
        // NUMA node 0 (socket 0) already has an allocation; MostAllocated
        // should prefer to pack into it over the empty node 1.
        assert!(topo.cpu_info(result.iter().next().unwrap()).unwrap().numa_node_id == 0);
    }

    #[test]
    fn exclusive_pcpu_policy_blocks_sharing_the_core() {
        let topo = sample_topology();
        let mut allocated = CpuDetails::new();
        allocated.add_ref(&topo, &CpuSet::from_iter([0]), CpuExclusivePolicy::PcpuLevel);
        let available = topo.all_cpus().difference(&CpuSet::from_iter([0]));

        // CPU 1 shares a core with CPU 0, which is exclusively held.
        let result = take_preferred_cpus(
            &topo,
            &available,
            &CpuSet::new(),
            &allocated,
            6,
            CpuBindPolicy::None,
            CpuExclusivePolicy::None,
            NumaAllocateStrategy::LeastAllocated,
        )
        .unwrap();
        assert!(!result.contains(1));
    }

    #[test]
    fn required_policy_prefilter_passes_through_when_not_divisible() {
        let topo = sample_topology();
        let candidates = CpuSet::from_iter([0, 1, 2]); // not a multiple of 2
        let filtered =
            filter_available_cpus_by_required_cpu_bind_policy(&topo, &candidates, CpuBindPolicy::FullPCPUs);
        assert_eq!(filtered, candidates);
    }

    #[test]
    fn full_pcpus_rejects_a_count_that_is_not_a_whole_number_of_cores() {
        let topo = sample_topology();
        let available = topo.all_cpus();
        // cpus_per_core == 2; 3 cannot be satisfied by whole cores without
        // rounding up to 4, which would over-allocate and desync the NUMA
        // ledger's CPU-millis accounting from the returned CPU count.
        let err = take_preferred_cpus(
            &topo,
            &available,
            &CpuSet::new(),
            &CpuDetails::new(),
            3,
            CpuBindPolicy::FullPCPUs,
            CpuExclusivePolicy::None,
            NumaAllocateStrategy::LeastAllocated,
        )
        .unwrap_err();
        assert!(matches!(err, Error::PolicyUnsatisfiable { .. }));
    }
}
