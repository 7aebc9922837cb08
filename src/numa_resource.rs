//! Per-NUMA-cell resource accounting
//!
//! Grounded on the teacher's newtype-over-primitive pattern for `PageId`
//! / `TransactionId` in `error.rs`: resource names and quantities are
//! distinct types rather than bare `String`/`i64`, so a caller cannot
//! accidentally compare a CPU-milli quantity against a memory quantity.

use std::collections::BTreeMap;
use std::fmt;

/// Name of an accounted resource (`cpu`, `memory`, or an extended
/// resource such as a vendor device count)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceName(pub String);

impl ResourceName {
    /// The well-known CPU-millis resource name
    pub fn cpu() -> Self {
        ResourceName("cpu".to_string())
    }

    /// The well-known memory-bytes resource name
    pub fn memory() -> Self {
        ResourceName("memory".to_string())
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceName {
    fn from(s: &str) -> Self {
        ResourceName(s.to_string())
    }
}

/// A non-negative resource quantity (CPU in millis, memory in bytes, or
/// an extended-resource count)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Quantity(pub i64);

impl Quantity {
    /// Zero quantity
    pub const ZERO: Quantity = Quantity(0);

    /// Clamp to zero if negative
    pub fn non_negative(self) -> Quantity {
        Quantity(self.0.max(0))
    }

    /// Saturating subtraction, clamped at zero
    pub fn saturating_sub(self, other: Quantity) -> Quantity {
        Quantity((self.0 - other.0).max(0))
    }

    /// Saturating addition
    pub fn saturating_add(self, other: Quantity) -> Quantity {
        Quantity(self.0.saturating_add(other.0))
    }

    /// The smaller of two quantities
    pub fn min(self, other: Quantity) -> Quantity {
        Quantity(self.0.min(other.0))
    }
}

/// Per-NUMA-cell accounting of allocated resource quantities
#[derive(Debug, Clone, Default)]
pub struct NumaNodeResource {
    /// The NUMA node this ledger entry describes
    pub node_id: u32,
    /// Quantities keyed by resource name
    pub resources: BTreeMap<ResourceName, Quantity>,
}

impl NumaNodeResource {
    /// An empty resource ledger for `node_id`
    pub fn new(node_id: u32) -> Self {
        Self { node_id, resources: BTreeMap::new() }
    }

    /// Quantity recorded for `name` (zero if absent)
    pub fn get(&self, name: &ResourceName) -> Quantity {
        self.resources.get(name).copied().unwrap_or(Quantity::ZERO)
    }

    /// Add `qty` to the quantity recorded for `name`
    pub fn add(&mut self, name: ResourceName, qty: Quantity) {
        let entry = self.resources.entry(name).or_insert(Quantity::ZERO);
        *entry = entry.saturating_add(qty);
    }

    /// Sum another ledger's quantities, resource by resource, into this
    /// one (used when aggregating per-pod ledgers into the node ledger)
    pub fn merge_from(&mut self, other: &NumaNodeResource) {
        for (name, qty) in &other.resources {
            self.add(name.clone(), *qty);
        }
    }
}

/// Apply an amplification ratio to a raw per-NUMA capacity quantity,
/// per resource: `amplified = ceil(raw * ratio)`. A ratio `<= 1.0` is a
/// no-op and returns the raw quantity unchanged (spec.md §4.1).
///
/// This is a pure function of its inputs rather than an in-place
/// mutation, so calling it any number of times on the same raw quantity
/// is idempotent by construction — there's no mutable "already
/// amplified" state to double-apply against.
pub fn amplify(raw: Quantity, ratio: f64) -> Quantity {
    if ratio <= 1.0 || raw.0 <= 0 {
        return raw;
    }
    let amplified = (raw.0 as f64 * ratio).ceil();
    Quantity(amplified as i64)
}

/// Apply a per-resource amplification ratio map to a raw capacity
/// ledger, returning a new, amplified ledger.
pub fn amplify_node_resource(
    raw: &NumaNodeResource,
    ratios: &BTreeMap<ResourceName, f64>,
) -> NumaNodeResource {
    let mut out = NumaNodeResource::new(raw.node_id);
    for (name, qty) in &raw.resources {
        let ratio = ratios.get(name).copied().unwrap_or(1.0);
        out.resources.insert(name.clone(), amplify(*qty, ratio));
    }
    out
}

/// Split one resource's available quantity against a remaining request:
/// returns `(updated_available, updated_remaining, allocated_here)`.
///
/// Each arithmetic step produces a fresh `Quantity` value rather than
/// mutating `available`/`remaining` in place — the reference
/// implementation's in-place mutation of shared quantity values is the
/// documented source of aliasing bugs this crate avoids (spec.md §9,
/// Open Question).
pub fn allocate_res(available: Quantity, remaining: Quantity) -> (Quantity, Quantity, Quantity) {
    let take = available.min(remaining).non_negative();
    let updated_available = available.saturating_sub(take);
    let updated_remaining = remaining.saturating_sub(take);
    (updated_available, updated_remaining, take)
}
