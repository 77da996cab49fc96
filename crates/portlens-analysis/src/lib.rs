//! End-to-end analysis for portlens.
//!
//! Runs a parsed kernel through operand-role assignment, performance-data
//! assignment, port balancing and dependency analysis, and summarizes the
//! results in an [`AnalysisReport`].

pub mod config;
pub mod error;
pub mod pipeline;
pub mod report;

pub use config::{load_config, parse_config, AnalysisConfig};
pub use error::AnalysisError;
pub use pipeline::{analyze, dependency_graph, load_kernel, parse_kernel, AnalysisOutput};
pub use report::{AnalysisReport, ChainStep, InstructionRow, LoopCarriedSummary};
