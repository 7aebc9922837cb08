//! `Allocate` orchestration — the per-call decision function
//!
//! `allocate` is a pure function of its inputs: it reads `NodeAllocation`'s
//! availability snapshots but never mutates them. Only `NodeAllocation::
//! update` persists a decision, so a failed or abandoned `Allocate` call
//! leaves no trace (spec.md §5, "Partial allocations are never
//! persisted").

use crate::cpu_selector::{satisfied_required_cpu_bind_policy, take_preferred_cpus};
use crate::cpuset::{CpuSet, NumaMask};
use crate::error::{Error, Result};
use crate::node_allocation::NodeAllocation;
use crate::numa_resource::{allocate_res, NumaNodeResource, Quantity, ResourceName};
use crate::options::TopologyOptions;
use crate::pod_allocation::{PodAllocation, ResourceOptions};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Identity of the workload being allocated for
pub struct PodIdentity {
    /// Stable workload identity
    pub uid: String,
    /// Workload namespace
    pub namespace: String,
    /// Workload name
    pub name: String,
}

/// Decide a `PodAllocation` for `pod` on the node described by
/// `topology_options`/`node_allocation`, given `opts` (spec.md §4.5).
pub fn allocate(
    topology_options: &TopologyOptions,
    node_allocation: &NodeAllocation,
    pod: PodIdentity,
    opts: &ResourceOptions,
) -> Result<PodAllocation> {
    debug_assert!(
        opts.cpu_request_is_consistent(),
        "ResourceOptions requests CPU binding but omits cpu from requests"
    );

    let topology = &topology_options.cpu_topology;
    if !topology.is_valid() {
        return Err(Error::InvalidCpuTopology {
            node: node_allocation.node_name().to_string(),
            reason: "topology describes no CPUs".to_string(),
        });
    }

    debug!(
        node = node_allocation.node_name(),
        pod_uid = %pod.uid,
        numa_hint = ?opts.numa_hint,
        "allocating resources"
    );

    let numa_node_resources = match opts.numa_hint {
        Some(hint) => allocate_numa_resources(topology_options, node_allocation, hint, opts).map_err(|e| {
            warn!(node = node_allocation.node_name(), pod_uid = %pod.uid, error = %e, "numa resource allocation failed");
            e
        })?,
        None => Vec::new(),
    };

    let cpu_set = if opts.request_cpu_bind {
        select_cpus(topology_options, node_allocation, opts, &numa_node_resources).map_err(|e| {
            warn!(node = node_allocation.node_name(), pod_uid = %pod.uid, error = %e, "cpu selection failed");
            e
        })?
    } else {
        CpuSet::new()
    };

    if let Some(required) = opts.required_cpu_bind_policy {
        if !satisfied_required_cpu_bind_policy(topology, &cpu_set, required) {
            return Err(Error::PolicyUnsatisfiable { policy: format!("{:?}", required) });
        }
    }

    Ok(PodAllocation {
        uid: pod.uid,
        namespace: pod.namespace,
        name: pod.name,
        cpu_set,
        cpu_exclusive_policy: opts.cpu_exclusive_policy,
        numa_node_resources,
    })
}

/// Per-NUMA-cell resource allocation: consumes `opts.original_requests`
/// from each cell in `hint`'s bit order via the three-way `allocate_res`
/// split, stopping once every request reaches zero (spec.md §4.5 step 1).
fn allocate_numa_resources(
    topology_options: &TopologyOptions,
    node_allocation: &NodeAllocation,
    hint: NumaMask,
    opts: &ResourceOptions,
) -> Result<Vec<NumaNodeResource>> {
    let (available_cells, _) =
        node_allocation.get_available_numa_node_resources(topology_options, &opts.reusable_resources);

    let mut cell_map: BTreeMap<u32, NumaNodeResource> =
        available_cells.into_iter().map(|c| (c.node_id, c)).collect();

    let present: BTreeSet<ResourceName> = hint
        .iter()
        .filter_map(|node| cell_map.get(&node))
        .flat_map(|cell| cell.resources.keys().cloned())
        .collect();

    let mut remaining: BTreeMap<ResourceName, Quantity> = opts.original_requests.clone();
    let mut per_cell_allocated: BTreeMap<u32, NumaNodeResource> = BTreeMap::new();

    for node in hint.iter() {
        if remaining.values().all(|q| q.0 <= 0) {
            break;
        }
        let Some(cell) = cell_map.get_mut(&node) else { continue };

        let names: Vec<ResourceName> = remaining.keys().cloned().collect();
        for name in names {
            let remain_qty = remaining[&name];
            if remain_qty.0 <= 0 {
                continue;
            }
            let have = cell.get(&name);
            let (new_avail, new_remaining, took) = allocate_res(have, remain_qty);
            cell.resources.insert(name.clone(), new_avail);
            remaining.insert(name.clone(), new_remaining);
            if took.0 > 0 {
                per_cell_allocated
                    .entry(node)
                    .or_insert_with(|| NumaNodeResource::new(node))
                    .add(name, took);
            }
        }
    }

    for (name, remain_qty) in &remaining {
        if remain_qty.0 > 0 && present.contains(name) {
            return Err(Error::InsufficientNumaResource { resource: name.0.clone() });
        }
    }

    Ok(per_cell_allocated.into_values().collect())
}

/// CPU selection (spec.md §4.5 step 2): scoped per NUMA cell when a hint
/// was used, falling back to whole-pool selection otherwise.
fn select_cpus(
    topology_options: &TopologyOptions,
    node_allocation: &NodeAllocation,
    opts: &ResourceOptions,
    numa_node_resources: &[NumaNodeResource],
) -> Result<CpuSet> {
    let topology = &topology_options.cpu_topology;
    let max_ref_count = topology_options.max_ref_count.max(1);
    let (available, allocated_view) = node_allocation.get_available_cpus(
        topology,
        max_ref_count,
        &topology_options.reserved_cpus,
        &opts.preferred_cpus,
    );

    match opts.numa_hint {
        Some(hint) => {
            let mut union = CpuSet::new();
            for node in hint.iter() {
                let cell_cpus = topology.cpus_in_numa_node(node);
                let candidates = available.intersection(&cell_cpus);
                let cell_millis = numa_node_resources
                    .iter()
                    .find(|r| r.node_id == node)
                    .map(|r| r.get(&ResourceName::cpu()).0)
                    .unwrap_or(0);
                let node_num_needed = ((cell_millis / 1000).max(0) as usize).min(candidates.len());
                if node_num_needed == 0 {
                    continue;
                }
                let chosen = take_preferred_cpus(
                    topology,
                    &candidates,
                    &opts.preferred_cpus,
                    &allocated_view,
                    node_num_needed,
                    opts.cpu_bind_policy,
                    opts.cpu_exclusive_policy,
                    topology_options.numa_allocate_strategy,
                )?;
                union = union.union(&chosen);
            }

            let needed = opts.num_cpus_needed as usize;
            if union.len() < needed {
                return Err(Error::InsufficientCpus { requested: needed, available: union.len() });
            }
            Ok(union)
        }
        None => take_preferred_cpus(
            topology,
            &available,
            &opts.preferred_cpus,
            &allocated_view,
            opts.num_cpus_needed as usize,
            opts.cpu_bind_policy,
            opts.cpu_exclusive_policy,
            topology_options.numa_allocate_strategy,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpuset::CpuSet;
    use crate::options::TopologyOptionsBuilder;
    use crate::policy::{CpuBindPolicy, CpuExclusivePolicy};
    use crate::topology::{CpuInfo, CpuTopology};
    use std::collections::BTreeMap as Map;
    use std::sync::Arc;

    /// 2 sockets x 1 NUMA node each x 26 cores x 2 threads = 104 CPUs,
    /// 52 CPUs per NUMA cell — the topology size used throughout
    /// spec.md §8's concrete scenarios.
    fn large_topology() -> CpuTopology {
        let mut cpus = Map::new();
        let mut cpu = 0u32;
        for socket in 0..2u32 {
            for core in 0..26u32 {
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

    fn topology_options_with(topology: CpuTopology) -> TopologyOptions {
        let mut numa_resources = Vec::new();
        for node in topology.numa_nodes() {
            let mut r = NumaNodeResource::new(node);
            r.add(ResourceName::cpu(), Quantity(52_000));
            numa_resources.push(r);
        }
        TopologyOptionsBuilder::new().cpu_topology(topology).numa_node_resources(numa_resources).build()
    }

    fn base_opts(topology_options: &TopologyOptions) -> ResourceOptions {
        ResourceOptions {
            num_cpus_needed: 4,
            requests: BTreeMap::new(),
            original_requests: BTreeMap::new(),
            request_cpu_bind: true,
            required_cpu_bind_policy: Some(CpuBindPolicy::FullPCPUs),
            cpu_bind_policy: CpuBindPolicy::FullPCPUs,
            cpu_exclusive_policy: CpuExclusivePolicy::None,
            preferred_cpus: CpuSet::new(),
            reusable_resources: Map::new(),
            numa_hint: Some(NumaMask::single(0)),
            topology_options: Arc::new(topology_options.clone()),
        }
    }

    #[test]
    fn scenario_1_full_pcpus_request_on_empty_node() {
        let topo = large_topology();
        let topology_options = topology_options_with(topo);
        let node = NodeAllocation::new("node-a");

        let mut opts = base_opts(&topology_options);
        opts.requests.insert(ResourceName::cpu(), Quantity(4_000));
        opts.original_requests.insert(ResourceName::cpu(), Quantity(4_000));

        let pod = PodIdentity { uid: "pod-1".into(), namespace: "ns".into(), name: "pod-1".into() };
        let result = allocate(&topology_options, &node, pod, &opts).unwrap();

        assert_eq!(result.cpu_set, CpuSet::from_iter([0, 1, 2, 3]));
        assert_eq!(result.total_cpu_millis(), Quantity(4_000));
    }

    #[test]
    fn scenario_2_succeeds_on_remaining_core_after_partial_allocation() {
        let topo = large_topology();
        let topology_options = topology_options_with(topo.clone());
        let node = NodeAllocation::new("node-a");

        // Pre-allocate 48 CPUs {4..=51} leaving only core {0,1,2,3} free.
        node.update(
            &topo,
            PodAllocation {
                uid: "prior".into(),
                namespace: "ns".into(),
                name: "prior".into(),
                cpu_set: CpuSet::from_iter(4..52),
                cpu_exclusive_policy: CpuExclusivePolicy::None,
                numa_node_resources: vec![{
                    let mut r = NumaNodeResource::new(0);
                    r.add(ResourceName::cpu(), Quantity(48_000));
                    r
                }],
            },
        );

        let mut opts = base_opts(&topology_options);
        opts.requests.insert(ResourceName::cpu(), Quantity(4_000));
        opts.original_requests.insert(ResourceName::cpu(), Quantity(4_000));

        let pod = PodIdentity { uid: "pod-2".into(), namespace: "ns".into(), name: "pod-2".into() };
        let result = allocate(&topology_options, &node, pod, &opts).unwrap();
        assert_eq!(result.cpu_set, CpuSet::from_iter([0, 1, 2, 3]));
    }

    #[test]
    fn scenario_3_spread_by_pcpus_on_empty_node() {
        let topo = large_topology();
        let topology_options = topology_options_with(topo);
        let node = NodeAllocation::new("node-a");

        let mut opts = base_opts(&topology_options);
        opts.cpu_bind_policy = CpuBindPolicy::SpreadByPCPUs;
        opts.required_cpu_bind_policy = Some(CpuBindPolicy::SpreadByPCPUs);
        opts.requests.insert(ResourceName::cpu(), Quantity(4_000));
        opts.original_requests.insert(ResourceName::cpu(), Quantity(4_000));

        let pod = PodIdentity { uid: "pod-3".into(), namespace: "ns".into(), name: "pod-3".into() };
        let result = allocate(&topology_options, &node, pod, &opts).unwrap();
        assert_eq!(result.cpu_set, CpuSet::from_iter([0, 2, 4, 6]));
    }

    #[test]
    fn scenario_4_spread_by_pcpus_fails_when_insufficient() {
        let topo = large_topology();
        let topology_options = topology_options_with(topo.clone());
        let node = NodeAllocation::new("node-a");

        node.update(
            &topo,
            PodAllocation {
                uid: "prior".into(),
                namespace: "ns".into(),
                name: "prior".into(),
                cpu_set: CpuSet::from_iter(4..104),
                cpu_exclusive_policy: CpuExclusivePolicy::None,
                numa_node_resources: vec![
                    {
                        let mut r = NumaNodeResource::new(0);
                        r.add(ResourceName::cpu(), Quantity(48_000));
                        r
                    },
                    {
                        let mut r = NumaNodeResource::new(1);
                        r.add(ResourceName::cpu(), Quantity(52_000));
                        r
                    },
                ],
            },
        );

        let mut opts = base_opts(&topology_options);
        opts.cpu_bind_policy = CpuBindPolicy::SpreadByPCPUs;
        opts.required_cpu_bind_policy = Some(CpuBindPolicy::SpreadByPCPUs);
        opts.requests.insert(ResourceName::cpu(), Quantity(4_000));
        opts.original_requests.insert(ResourceName::cpu(), Quantity(4_000));

        let pod = PodIdentity { uid: "pod-4".into(), namespace: "ns".into(), name: "pod-4".into() };
        let err = allocate(&topology_options, &node, pod, &opts).unwrap_err();
        assert!(matches!(err, Error::InsufficientCpus { .. }));
    }

    #[test]
    fn scenario_5_amplified_cpu_sizing_raw_numa_accounting() {
        let topo = large_topology();
        let topology_options = TopologyOptionsBuilder::new()
            .cpu_topology(topo)
            .numa_node_resources(vec![{
                let mut r = NumaNodeResource::new(0);
                r.add(ResourceName::cpu(), Quantity(52_000));
                r
            }])
            .amplification_ratio(ResourceName::cpu(), 1.5)
            .build();
        let node = NodeAllocation::new("node-a");

        let mut opts = base_opts(&topology_options);
        // amplified request for CPU count sizing...
        opts.requests.insert(ResourceName::cpu(), Quantity(6_000));
        // ...but raw accounting for the NUMA ledger
        opts.original_requests.insert(ResourceName::cpu(), Quantity(4_000));
        opts.num_cpus_needed = 4;

        let pod = PodIdentity { uid: "pod-5".into(), namespace: "ns".into(), name: "pod-5".into() };
        let result = allocate(&topology_options, &node, pod, &opts).unwrap();

        assert_eq!(result.cpu_set.len(), 4);
        assert_eq!(result.total_cpu_millis(), Quantity(4_000));
    }

    #[test]
    fn insufficient_numa_resource_reported_by_name() {
        let topo = large_topology();
        let topology_options = topology_options_with(topo);
        let node = NodeAllocation::new("node-a");

        let mut opts = base_opts(&topology_options);
        opts.requests.insert(ResourceName::cpu(), Quantity(60_000));
        opts.original_requests.insert(ResourceName::cpu(), Quantity(60_000));
        opts.num_cpus_needed = 60;

        let pod = PodIdentity { uid: "pod-6".into(), namespace: "ns".into(), name: "pod-6".into() };
        let err = allocate(&topology_options, &node, pod, &opts).unwrap_err();
        match err {
            Error::InsufficientNumaResource { resource } => assert_eq!(resource, "cpu"),
            other => panic!("expected InsufficientNumaResource, got {other:?}"),
        }
    }

    #[test]
    fn allocate_is_pure_and_does_not_mutate_node_allocation() {
        let topo = large_topology();
        let topology_options = topology_options_with(topo);
        let node = NodeAllocation::new("node-a");

        let mut opts = base_opts(&topology_options);
        opts.requests.insert(ResourceName::cpu(), Quantity(4_000));
        opts.original_requests.insert(ResourceName::cpu(), Quantity(4_000));

        let pod = PodIdentity { uid: "pod-7".into(), namespace: "ns".into(), name: "pod-7".into() };
        let _ = allocate(&topology_options, &node, pod, &opts).unwrap();

        assert!(node.is_empty());
    }
}
