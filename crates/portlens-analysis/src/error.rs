//! Analysis errors.

use portlens_core::Isa;
use portlens_graph::GraphError;
use portlens_targets::TargetError;
use thiserror::Error;

/// Errors that can occur while loading inputs for, or running, an analysis.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("model error: {0}")]
    Target(#[from] TargetError),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("kernel JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("ISA model is {isa_model} but machine model '{machine}' is {machine_isa}")]
    IsaMismatch {
        isa_model: Isa,
        machine: String,
        machine_isa: Isa,
    },

    #[error("line number {line} appears more than once in the kernel")]
    DuplicateLine { line: usize },
}
