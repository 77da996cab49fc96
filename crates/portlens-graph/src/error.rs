//! Error types for dependency-graph queries.

/// Errors that can occur while building or querying a dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("cycle detected involving line {0}")]
    CycleDetected(usize),

    #[error("edge {from} -> {to} refers to an instruction outside the kernel")]
    DanglingEdge { from: usize, to: usize },
}
