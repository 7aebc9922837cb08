//! Error types for the node resource allocator

use thiserror::Error;

/// The main error type for allocator operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The node has not yet registered a CPU topology
    #[error("no CPU topology registered for node {node}")]
    NotFoundCpuTopology {
        /// Node name
        node: String,
    },

    /// The node's registered topology fails basic validity checks
    #[error("invalid CPU topology for node {node}: {reason}")]
    InvalidCpuTopology {
        /// Node name
        node: String,
        /// Why the topology is invalid
        reason: String,
    },

    /// A NUMA cell (or the union of cells under the chosen hint) cannot
    /// satisfy the requested quantity of some resource
    #[error("insufficient NUMA resource: {resource}")]
    InsufficientNumaResource {
        /// Name of the resource that could not be satisfied
        resource: String,
    },

    /// The candidate CPU pool is smaller than the number of CPUs needed
    #[error("insufficient CPUs: requested {requested}, available {available}")]
    InsufficientCpus {
        /// Number of CPUs the request needed
        requested: usize,
        /// Number of CPUs that were actually available
        available: usize,
    },

    /// The selected CPU set fails to satisfy a required binding policy
    #[error("selected CPUs do not satisfy required policy {policy}")]
    PolicyUnsatisfiable {
        /// Name of the policy that could not be satisfied
        policy: String,
    },
}

/// Result type alias for allocator operations
pub type Result<T> = std::result::Result<T, Error>;
