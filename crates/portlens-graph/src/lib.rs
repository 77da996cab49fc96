//! Dependency analysis for portlens.
//!
//! Builds the instruction dependency graph of an annotated kernel and
//! answers the latency questions asked of it: the critical path within one
//! iteration and the dependency chains carried across iterations.

pub mod error;
pub mod graph;
pub mod lcd;
pub mod path;

pub use error::GraphError;
pub use graph::{DependencyGraph, DependencyKind, Dependent, Edge, GraphOptions};
pub use lcd::{LoopCarriedDependency, LoopCarriedReport};
pub use path::CriticalPath;
