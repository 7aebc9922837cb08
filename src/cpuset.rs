//! A logical-CPU set, and the fixed-width NUMA affinity bitmask
//!
//! `CPUSet` backs every allocation result and ledger entry in this crate.
//! It is kept as an ordered `BTreeSet` (not a `Vec`) so iteration order is
//! deterministic across runs, which the selector's tie-breaking rules
//! depend on.

use static_assertions::const_assert;
use std::collections::BTreeSet;
use std::fmt;

/// A logical CPU identifier
pub type CpuId = u32;

/// An ordered, deduplicated set of logical CPU ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuSet(BTreeSet<CpuId>);

impl CpuSet {
    /// The empty set
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Build a set from an iterator of CPU ids
    pub fn from_iter(ids: impl IntoIterator<Item = CpuId>) -> Self {
        Self(ids.into_iter().collect())
    }

    /// Number of CPUs in the set
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `cpu` is a member
    pub fn contains(&self, cpu: CpuId) -> bool {
        self.0.contains(&cpu)
    }

    /// Insert a CPU id, returning whether it was newly inserted
    pub fn insert(&mut self, cpu: CpuId) -> bool {
        self.0.insert(cpu)
    }

    /// Remove a CPU id, returning whether it was present
    pub fn remove(&mut self, cpu: CpuId) -> bool {
        self.0.remove(&cpu)
    }

    /// Ascending iterator over member CPU ids
    pub fn iter(&self) -> impl Iterator<Item = CpuId> + '_ {
        self.0.iter().copied()
    }

    /// Set union
    pub fn union(&self, other: &CpuSet) -> CpuSet {
        CpuSet(self.0.union(&other.0).copied().collect())
    }

    /// Set intersection
    pub fn intersection(&self, other: &CpuSet) -> CpuSet {
        CpuSet(self.0.intersection(&other.0).copied().collect())
    }

    /// Set difference (`self` minus `other`)
    pub fn difference(&self, other: &CpuSet) -> CpuSet {
        CpuSet(self.0.difference(&other.0).copied().collect())
    }

    /// Whether every member of `self` is also a member of `other`
    pub fn is_subset(&self, other: &CpuSet) -> bool {
        self.0.is_subset(&other.0)
    }
}

impl FromIterator<CpuId> for CpuSet {
    fn from_iter<T: IntoIterator<Item = CpuId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "{{{}}}", parts.join(","))
    }
}

/// A fixed-width bitmask over NUMA cell indices
///
/// Realistic hardware never exceeds 64 NUMA cells, so a `u64` backs the
/// mask and subset enumeration is plain bit arithmetic rather than
/// collection generators (spec.md, Design Notes: "Bitmask set").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NumaMask(pub u64);

const_assert!(std::mem::size_of::<NumaMask>() == std::mem::size_of::<u64>());

impl NumaMask {
    /// The empty mask
    pub const EMPTY: NumaMask = NumaMask(0);

    /// A mask with a single bit set for `node`
    pub fn single(node: u32) -> Self {
        NumaMask(1u64 << node)
    }

    /// A mask built from an iterator of NUMA node indices
    pub fn from_nodes(nodes: impl IntoIterator<Item = u32>) -> Self {
        nodes.into_iter().fold(NumaMask::EMPTY, |m, n| m.with(n))
    }

    /// Whether `node`'s bit is set
    pub fn has(&self, node: u32) -> bool {
        self.0 & (1u64 << node) != 0
    }

    /// Return a copy of this mask with `node`'s bit set
    pub fn with(&self, node: u32) -> Self {
        NumaMask(self.0 | (1u64 << node))
    }

    /// Number of set bits
    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    /// Whether no bits are set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Ascending iterator over the set node indices
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..64).filter(move |n| self.has(*n))
    }

    /// Union of two masks
    pub fn union(&self, other: &NumaMask) -> NumaMask {
        NumaMask(self.0 | other.0)
    }

    /// Enumerate every non-empty subset of `universe`'s bits in ascending
    /// cardinality order, then ascending bit-pattern order within a given
    /// cardinality. This fixed ordering is what makes hint generation
    /// deterministic across invocations (spec.md §4.3).
    pub fn subsets_by_cardinality(universe: NumaMask) -> Vec<NumaMask> {
        let bits: Vec<u32> = universe.iter().collect();
        let n = bits.len();
        let mut subsets = Vec::with_capacity((1usize << n).saturating_sub(1));
        for mask in 1u64..(1u64 << n) {
            let mut m = NumaMask::EMPTY;
            for (i, &bit) in bits.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    m = m.with(bit);
                }
            }
            subsets.push(m);
        }
        subsets.sort_by_key(|m| (m.count(), m.0));
        subsets
    }
}

impl fmt::Display for NumaMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
