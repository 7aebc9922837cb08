//! NUMA-aware CPU and resource allocator for cluster workload scheduling
//!
//! This crate answers three questions a node-level scheduling component
//! needs asked of it: which NUMA cells could satisfy a prospective
//! request ([`hints::generate_resource_hints`]), which concrete CPUs and
//! per-cell resource quantities should be handed to a specific workload
//! ([`allocate::allocate`]), and how to keep both answers consistent as
//! workloads come and go ([`manager::ResourceManager`]).
//!
//! Every module below operates on one node's state; `ResourceManager` is
//! the only type that spans multiple nodes, and it does so by holding one
//! independently-locked [`node_allocation::NodeAllocation`] per node name
//! rather than a single process-wide lock.

#![warn(missing_docs)]
#![cfg_attr(not(test), warn(clippy::unwrap_used))]

pub mod allocate;
pub mod cpu_selector;
pub mod cpuset;
pub mod error;
pub mod hints;
pub mod manager;
pub mod node_allocation;
pub mod numa_resource;
pub mod options;
pub mod pod_allocation;
pub mod policy;
pub mod topology;

pub use allocate::{allocate, PodIdentity};
pub use cpuset::{CpuId, CpuSet, NumaMask};
pub use error::{Error, Result};
pub use manager::ResourceManager;
pub use node_allocation::NodeAllocation;
pub use numa_resource::{NumaNodeResource, Quantity, ResourceName};
pub use options::{TopologyOptions, TopologyOptionsBuilder, TopologyOptionsManager};
pub use pod_allocation::{NumaTopologyHint, PodAllocation, ResourceOptions};
pub use policy::{
    is_cpu_bind_eligible, CpuBindPolicy, CpuExclusivePolicy, NumaAllocateStrategy, NumaTopologyPolicy,
    PriorityClass, QosClass,
};
pub use topology::{CpuDetail, CpuDetails, CpuInfo, CpuTopology};
