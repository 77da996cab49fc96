//! TOML parsing, serialization, validation, and discovery for model files.
//!
//! Machine models are stored as `.model.toml` files and ISA role models as
//! `.isa.toml` files. This module provides functions to load, validate,
//! serialize, and discover them.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use portlens_core::PortUop;

use crate::error::{Result, TargetError};
use crate::isa::IsaModel;
use crate::microarch::MachineModel;

/// File suffix of machine model files.
pub const MACHINE_MODEL_SUFFIX: &str = ".model.toml";
/// File suffix of ISA role model files.
pub const ISA_MODEL_SUFFIX: &str = ".isa.toml";

/// A validation issue found in a model definition.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity: "error" or "warning".
    pub severity: &'static str,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)
    }
}

fn read_model_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(TargetError::NotFound {
            path: path.to_path_buf(),
        });
    }
    Ok(std::fs::read_to_string(path)?)
}

/// Load a machine model from a `.model.toml` file.
pub fn load_machine_model(path: &Path) -> Result<MachineModel> {
    parse_machine_model(&read_model_file(path)?)
}

/// Parse a machine model from a TOML string.
pub fn parse_machine_model(toml_str: &str) -> Result<MachineModel> {
    let model: MachineModel = toml::from_str(toml_str)?;
    Ok(model)
}

/// Serialize a machine model to pretty TOML.
pub fn machine_model_to_toml(model: &MachineModel) -> Result<String> {
    let toml_str = toml::to_string_pretty(model)?;
    Ok(toml_str)
}

/// Load an ISA role model from a `.isa.toml` file.
pub fn load_isa_model(path: &Path) -> Result<IsaModel> {
    parse_isa_model(&read_model_file(path)?)
}

/// Parse an ISA role model from a TOML string.
pub fn parse_isa_model(toml_str: &str) -> Result<IsaModel> {
    let model: IsaModel = toml::from_str(toml_str)?;
    Ok(model)
}

fn check_descriptor_ports(
    model: &MachineModel,
    what: &str,
    descriptor: &[PortUop],
    issues: &mut Vec<ValidationIssue>,
) {
    for uop in descriptor {
        if uop.ports.is_empty() && uop.cycles > 0.0 {
            issues.push(ValidationIssue {
                severity: "warning",
                message: format!("{what}: micro-op of {} cycles has no ports", uop.cycles),
            });
        }
        for port in &uop.ports {
            if model.port_index(port).is_none() {
                issues.push(ValidationIssue {
                    severity: "error",
                    message: format!("{what}: unknown port '{port}'"),
                });
            }
        }
        if uop.cycles < 0.0 {
            issues.push(ValidationIssue {
                severity: "error",
                message: format!("{what}: negative cycle count {}", uop.cycles),
            });
        }
    }
}

/// Validate a machine model for structural correctness.
///
/// Returns `Ok(())` if valid, or `Err(issues)` with a list of problems.
pub fn validate_machine_model(model: &MachineModel) -> std::result::Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    // 1. At least one port
    if model.ports().is_empty() {
        issues.push(ValidationIssue {
            severity: "error",
            message: "model has no ports".into(),
        });
    }

    // 2. Port names are unique
    let mut seen = HashSet::new();
    for port in model.ports() {
        if !seen.insert(port.as_str()) {
            issues.push(ValidationIssue {
                severity: "error",
                message: format!("duplicate port '{port}'"),
            });
        }
    }

    // 3. Every descriptor references known ports
    for entry in model.instructions() {
        let what = format!("instruction '{}'", entry.name);
        check_descriptor_ports(model, &what, &entry.port_pressure, &mut issues);
    }

    // 4. Load/store tables reference known ports
    check_descriptor_ports(
        model,
        "load-throughput default",
        &model.load_throughput.default,
        &mut issues,
    );
    for mode in &model.load_throughput.modes {
        check_descriptor_ports(model, "load-throughput mode", &mode.port_pressure, &mut issues);
    }
    check_descriptor_ports(
        model,
        "store-throughput default",
        &model.store_throughput.default,
        &mut issues,
    );
    for mode in &model.store_throughput.modes {
        check_descriptor_ports(model, "store-throughput mode", &mode.port_pressure, &mut issues);
    }

    // 5. Hidden loads need data ports to hide
    if model.has_hidden_loads() && model.data_ports().is_empty() {
        issues.push(ValidationIssue {
            severity: "warning",
            message: "hidden-loads is set but the model has no data ports".into(),
        });
    }

    // 6. Latencies and throughputs are non-negative
    for entry in model.instructions() {
        let negative = entry.latency.is_some_and(|l| l < 0.0)
            || entry.throughput.is_some_and(|t| t < 0.0);
        if negative {
            issues.push(ValidationIssue {
                severity: "error",
                message: format!("instruction '{}' has a negative latency or throughput", entry.name),
            });
        }
    }

    // 7. Duplicate instruction forms
    let entries = model.instructions();
    for (i, a) in entries.iter().enumerate() {
        if entries[..i].iter().any(|b| b.same_form(a)) {
            issues.push(ValidationIssue {
                severity: "warning",
                message: format!("duplicate entry for instruction form '{}'", a.name),
            });
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

/// Validate an ISA role model, optionally against the machine model it is
/// used with.
pub fn validate_isa_model(
    isa: &IsaModel,
    machine: Option<&MachineModel>,
) -> std::result::Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    // 1. ISA matches the machine model
    if let Some(machine) = machine {
        if machine.isa != isa.isa {
            issues.push(ValidationIssue {
                severity: "error",
                message: format!(
                    "ISA model is for '{}' but machine model '{}' is for '{}'",
                    isa.isa, machine.name, machine.isa
                ),
            });
        }
    }

    // 2. Every operand position has a role
    for entry in isa.entries() {
        for (pos, op) in entry.operands.iter().enumerate() {
            if op.role().is_none() {
                issues.push(ValidationIssue {
                    severity: "warning",
                    message: format!(
                        "instruction '{}' operand {pos} is neither source nor destination; it is read as a source",
                        entry.name
                    ),
                });
            }
        }
        for hidden in &entry.hidden_operands {
            if hidden.role().is_none() {
                issues.push(ValidationIssue {
                    severity: "warning",
                    message: format!(
                        "instruction '{}' hidden operand '{}' is neither source nor destination",
                        entry.name, hidden.operand
                    ),
                });
            }
        }
    }

    // 3. Duplicate entries
    let entries = isa.entries();
    for (i, a) in entries.iter().enumerate() {
        let dup = entries[..i]
            .iter()
            .any(|b| b.name.eq_ignore_ascii_case(&a.name) && b.patterns() == a.patterns());
        if dup {
            issues.push(ValidationIssue {
                severity: "warning",
                message: format!("duplicate ISA entry for '{}'", a.name),
            });
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

/// Kind of model file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Machine,
    Isa,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Machine => write!(f, "machine"),
            ModelKind::Isa => write!(f, "isa"),
        }
    }
}

/// A model file found by [`discover_models`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredModel {
    pub name: String,
    pub kind: ModelKind,
    pub path: PathBuf,
}

/// Discover all `.model.toml` and `.isa.toml` files in a directory.
///
/// Results are sorted by kind, then name.
pub fn discover_models(dir: &Path) -> Result<Vec<DiscoveredModel>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut models = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let found = if let Some(name) = file_name.strip_suffix(MACHINE_MODEL_SUFFIX) {
            Some((name.to_string(), ModelKind::Machine))
        } else {
            file_name
                .strip_suffix(ISA_MODEL_SUFFIX)
                .map(|name| (name.to_string(), ModelKind::Isa))
        };
        if let Some((name, kind)) = found {
            models.push(DiscoveredModel { name, kind, path });
        }
    }
    models.sort_by(|a, b| {
        (a.kind == ModelKind::Isa, &a.name).cmp(&(b.kind == ModelKind::Isa, &b.name))
    });
    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::microarch::InstructionEntry;
    use portlens_core::Isa;

    const MODEL: &str = r#"
name = "mini"
isa = "x86-intel"
ports = ["0", "1", "2D"]
hidden-loads = true

[[instruction]]
name = "add"
operands = [
    { class = "register", name = "gpr" },
    { class = "register", name = "gpr" },
]
latency = 1
throughput = 0.5
port-pressure = [[1, ["0", "1"]]]
"#;

    const ISA: &str = r#"
isa = "x86-intel"

[[instruction]]
name = "add"
operands = [
    { class = "register", name = "gpr", source = true, destination = true },
    { class = "register", name = "gpr", source = true },
]
"#;

    #[test]
    fn parse_and_validate_machine_model() {
        let model = parse_machine_model(MODEL).unwrap();
        assert_eq!(model.name, "mini");
        assert_eq!(model.isa, Isa::X86Intel);
        assert!(validate_machine_model(&model).is_ok());
    }

    #[test]
    fn parse_invalid_returns_error() {
        assert!(parse_machine_model("this is not valid toml [[[").is_err());
        assert!(parse_isa_model("isa = \"z80\"").is_err());
    }

    #[test]
    fn parse_missing_field_returns_error() {
        assert!(parse_machine_model("name = \"incomplete\"").is_err());
    }

    #[test]
    fn validate_unknown_port() {
        let mut model = parse_machine_model(MODEL).unwrap();
        let mut entry = InstructionEntry::new("imul", vec![]);
        entry.port_pressure = vec![PortUop::new(1.0, ["5"])];
        model.set_instruction(entry);
        let issues = validate_machine_model(&model).unwrap_err();
        assert!(issues.iter().any(|i| i.message.contains("unknown port '5'")));
    }

    #[test]
    fn validate_duplicate_ports() {
        let text = MODEL.replace(r#"["0", "1", "2D"]"#, r#"["0", "1", "1", "2D"]"#);
        let model = parse_machine_model(&text).unwrap();
        let issues = validate_machine_model(&model).unwrap_err();
        assert!(issues.iter().any(|i| i.message.contains("duplicate port")));
    }

    #[test]
    fn validate_hidden_loads_without_data_ports() {
        let text = MODEL.replace(r#""2D""#, r#""2""#);
        let model = parse_machine_model(&text).unwrap();
        let issues = validate_machine_model(&model).unwrap_err();
        assert!(issues.iter().all(|i| i.severity == "warning"));
        assert!(issues.iter().any(|i| i.message.contains("no data ports")));
    }

    #[test]
    fn validate_isa_against_machine() {
        let machine = parse_machine_model(MODEL).unwrap();
        let isa = parse_isa_model(ISA).unwrap();
        assert!(validate_isa_model(&isa, Some(&machine)).is_ok());

        let att = parse_isa_model(&ISA.replace("x86-intel", "x86-att")).unwrap();
        let issues = validate_isa_model(&att, Some(&machine)).unwrap_err();
        assert!(issues.iter().any(|i| i.severity == "error"));
        assert!(validate_isa_model(&att, None).is_ok());
    }

    #[test]
    fn validate_isa_missing_role() {
        let text = ISA.replace(", source = true }", " }");
        let isa = parse_isa_model(&text).unwrap();
        let issues = validate_isa_model(&isa, None).unwrap_err();
        assert!(issues
            .iter()
            .any(|i| i.message.contains("neither source nor destination")));
    }

    #[test]
    fn machine_model_toml_round_trip() {
        let model = parse_machine_model(MODEL).unwrap();
        let text = machine_model_to_toml(&model).unwrap();
        assert_eq!(parse_machine_model(&text).unwrap(), model);
    }

    #[test]
    fn discover_models_finds_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zen4.model.toml"), MODEL).unwrap();
        std::fs::write(dir.path().join("a64fx.model.toml"), MODEL).unwrap();
        std::fs::write(dir.path().join("x86.isa.toml"), ISA).unwrap();
        // Other files should be ignored
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let models = discover_models(dir.path()).unwrap();
        assert_eq!(models.len(), 3);
        assert_eq!(models[0].name, "a64fx");
        assert_eq!(models[1].name, "zen4");
        assert_eq!(models[2].kind, ModelKind::Isa);
    }

    #[test]
    fn discover_missing_dir() {
        let models = discover_models(Path::new("/nonexistent/models")).unwrap();
        assert!(models.is_empty());
    }

    #[test]
    fn load_not_found() {
        let result = load_machine_model(Path::new("/nonexistent/path.model.toml"));
        assert!(matches!(result.unwrap_err(), TargetError::NotFound { .. }));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mini.model.toml");
        std::fs::write(&path, MODEL).unwrap();
        let model = load_machine_model(&path).unwrap();
        assert_eq!(model.instructions().len(), 1);

        let isa_path = dir.path().join("x86.isa.toml");
        std::fs::write(&isa_path, ISA).unwrap();
        assert_eq!(load_isa_model(&isa_path).unwrap().entries().len(), 1);
    }
}
