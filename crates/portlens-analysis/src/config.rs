//! Analysis configuration.
//!
//! Read from the `[analysis]` table of a `portlens.toml` file:
//!
//! ```toml
//! [analysis]
//! consider-flag-deps = false
//! lcd-timeout = 10          # seconds, -1 for no limit
//! assign-optimal-throughput = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Default wall-clock budget of the loop-carried dependency search.
pub const DEFAULT_LCD_TIMEOUT: Duration = Duration::from_secs(10);

/// Knobs controlling an analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AnalysisConfig {
    /// Track dependencies through condition flags.
    pub consider_flag_deps: bool,
    /// Budget of the loop-carried dependency search; `None` is unbounded.
    #[serde(with = "timeout_secs")]
    pub lcd_timeout: Option<Duration>,
    /// Balance port pressure across alternative ports.
    pub assign_optimal_throughput: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            consider_flag_deps: false,
            lcd_timeout: Some(DEFAULT_LCD_TIMEOUT),
            assign_optimal_throughput: true,
        }
    }
}

/// Convert a timeout in seconds. Negative values and values too large for
/// a [`Duration`] mean unbounded.
pub fn timeout_from_secs(secs: f64) -> Option<Duration> {
    if secs < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

mod timeout_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(timeout: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match timeout {
            Some(t) => s.serialize_f64(t.as_secs_f64()),
            None => s.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(super::timeout_from_secs(secs))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    analysis: AnalysisConfig,
}

/// Parse a `portlens.toml` document. Missing keys take their defaults.
pub fn parse_config(toml_str: &str) -> Result<AnalysisConfig, AnalysisError> {
    let file: ConfigFile = toml::from_str(toml_str)?;
    Ok(file.analysis)
}

/// Load a `portlens.toml` file.
pub fn load_config(path: &Path) -> Result<AnalysisConfig, AnalysisError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}
