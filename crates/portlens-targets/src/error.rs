//! Error types for model loading and lookup.

use std::path::PathBuf;

/// Errors that can occur while loading or querying models.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    /// TOML deserialization error.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// I/O error reading/writing model files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Model file not found.
    #[error("model file not found: {}", path.display())]
    NotFound {
        /// The path that was not found.
        path: PathBuf,
    },

    /// A port-pressure descriptor names a port the model does not have.
    #[error("port '{port}' is not a port of model '{model}'")]
    UnknownPort { port: String, model: String },
}

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, TargetError>;
