//! NUMA topology hint generation
//!
//! Enumerates feasible NUMA-cell subsets for a resource request and
//! marks the narrowest satisfying subsets as preferred, mirroring the
//! hint-generation contract of a kubelet topology manager.

use crate::cpuset::NumaMask;
use crate::numa_resource::{NumaNodeResource, Quantity, ResourceName};
use crate::pod_allocation::NumaTopologyHint;
use std::collections::{BTreeMap, BTreeSet};

/// Enumerate every feasible NUMA-cell subset for `request` against
/// `available` (the node's per-cell resource availability) and return one
/// hint list per resource name that appears in both.
///
/// Subsets are tried in ascending cardinality order (`NumaMask::
/// subsets_by_cardinality`); a subset "satisfies" the request if, for
/// every resource present in both the request and the node's
/// availability, the subset's summed availability meets the requested
/// quantity. The smallest cardinality among all satisfying subsets is
/// recorded once; every hint whose subset has that cardinality is marked
/// `preferred`. A resource absent from every cell's availability is
/// dropped from consideration entirely rather than forcing every subset
/// to fail (spec.md §4.3, "Edge cases").
pub fn generate_resource_hints(
    numa_nodes: &[u32],
    request: &BTreeMap<ResourceName, Quantity>,
    available: &[NumaNodeResource],
) -> BTreeMap<ResourceName, Vec<NumaTopologyHint>> {
    let mut hints: BTreeMap<ResourceName, Vec<NumaTopologyHint>> = BTreeMap::new();

    if numa_nodes.is_empty() || request.is_empty() {
        return hints;
    }

    let present_in_any: BTreeSet<&ResourceName> =
        available.iter().flat_map(|cell| cell.resources.keys()).collect();

    let relevant: Vec<ResourceName> =
        request.keys().filter(|name| present_in_any.contains(name)).cloned().collect();
    if relevant.is_empty() {
        return hints;
    }

    let universe = NumaMask::from_nodes(numa_nodes.iter().copied());
    let subsets = NumaMask::subsets_by_cardinality(universe);

    let mut satisfying: Vec<NumaMask> = Vec::new();
    let mut min_cardinality: Option<u32> = None;

    for mask in subsets {
        let fits_every_resource = relevant.iter().all(|name| {
            let need = request.get(name).copied().unwrap_or(Quantity::ZERO);
            let sum = mask.iter().fold(Quantity::ZERO, |acc, node| {
                let have = available
                    .iter()
                    .find(|cell| cell.node_id == node)
                    .map(|cell| cell.get(name))
                    .unwrap_or(Quantity::ZERO);
                acc.saturating_add(have)
            });
            sum.0 >= need.0
        });

        if fits_every_resource {
            let card = mask.count();
            min_cardinality = Some(min_cardinality.map_or(card, |m| m.min(card)));
            satisfying.push(mask);
        }
    }

    let Some(min_card) = min_cardinality else {
        return hints;
    };

    for mask in satisfying {
        let preferred = mask.count() == min_card;
        for name in &relevant {
            hints.entry(name.clone()).or_default().push(NumaTopologyHint {
                numa_node_affinity: mask,
                preferred,
            });
        }
    }

    for list in hints.values_mut() {
        list.sort_by_key(|h| h.numa_node_affinity.0);
    }

    hints
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(node: u32, cpu_millis: i64) -> NumaNodeResource {
        let mut r = NumaNodeResource::new(node);
        r.add(ResourceName::cpu(), Quantity(cpu_millis));
        r
    }

    #[test]
    fn two_equal_cells_both_singletons_preferred() {
        let available = vec![cell(0, 52_000), cell(1, 52_000)];
        let mut request = BTreeMap::new();
        request.insert(ResourceName::cpu(), Quantity(4_000));

        let hints = generate_resource_hints(&[0, 1], &request, &available);
        let cpu_hints = &hints[&ResourceName::cpu()];

        assert_eq!(cpu_hints.len(), 3); // {0}, {1}, {0,1}
        assert!(cpu_hints
            .iter()
            .filter(|h| h.numa_node_affinity.count() == 1)
            .all(|h| h.preferred));
        assert!(!cpu_hints
            .iter()
            .find(|h| h.numa_node_affinity == NumaMask::from_nodes([0, 1]))
            .unwrap()
            .preferred);
    }

    #[test]
    fn request_equal_to_full_capacity_prefers_full_mask() {
        let available = vec![cell(0, 52_000), cell(1, 52_000)];
        let mut request = BTreeMap::new();
        request.insert(ResourceName::cpu(), Quantity(104_000));

        let hints = generate_resource_hints(&[0, 1], &request, &available);
        let cpu_hints = &hints[&ResourceName::cpu()];
        assert_eq!(cpu_hints.len(), 1);
        assert_eq!(cpu_hints[0].numa_node_affinity, NumaMask::from_nodes([0, 1]));
        assert!(cpu_hints[0].preferred);
    }

    #[test]
    fn only_union_satisfies_is_still_preferred_as_the_sole_minimum() {
        // Neither cell alone can fit the request, but their union can.
        // The algorithm in spec.md §4.3 marks the smallest cardinality
        // among satisfying subsets as preferred — when {0,1} is the
        // only satisfying subset, it is trivially also the smallest
        // one, so it is preferred.
        let available = vec![cell(0, 10_000), cell(1, 10_000)];
        let mut request = BTreeMap::new();
        request.insert(ResourceName::cpu(), Quantity(15_000));

        let hints = generate_resource_hints(&[0, 1], &request, &available);
        let cpu_hints = &hints[&ResourceName::cpu()];
        assert_eq!(cpu_hints.len(), 1);
        assert_eq!(cpu_hints[0].numa_node_affinity, NumaMask::from_nodes([0, 1]));
        assert!(cpu_hints[0].preferred);
    }

    #[test]
    fn unsatisfiable_request_yields_no_hints() {
        let available = vec![cell(0, 1_000), cell(1, 1_000)];
        let mut request = BTreeMap::new();
        request.insert(ResourceName::cpu(), Quantity(10_000));

        let hints = generate_resource_hints(&[0, 1], &request, &available);
        assert!(hints.is_empty());
    }

    #[test]
    fn resource_absent_from_every_cell_is_ignored() {
        let available = vec![cell(0, 52_000)];
        let mut request = BTreeMap::new();
        request.insert(ResourceName::cpu(), Quantity(1_000));
        request.insert(ResourceName::from("example.com/gpu"), Quantity(1));

        let hints = generate_resource_hints(&[0], &request, &available);
        assert!(!hints.contains_key(&ResourceName::from("example.com/gpu")));
        assert!(hints.contains_key(&ResourceName::cpu()));
    }

    #[test]
    fn deterministic_across_repeated_calls() {
        let available = vec![cell(0, 52_000), cell(1, 52_000), cell(2, 52_000)];
        let mut request = BTreeMap::new();
        request.insert(ResourceName::cpu(), Quantity(60_000));

        let a = generate_resource_hints(&[0, 1, 2], &request, &available);
        let b = generate_resource_hints(&[0, 1, 2], &request, &available);
        assert_eq!(format!("{:?}", a), format!("{:?}", b));
    }
}
