use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use portlens_targets::parse::{
    discover_models, load_isa_model, load_machine_model, machine_model_to_toml,
    validate_isa_model, validate_machine_model, DiscoveredModel, ModelKind, ISA_MODEL_SUFFIX,
    MACHINE_MODEL_SUFFIX,
};
use portlens_targets::{IsaModel, MachineModel};

/// Find a model by name in `data_dir`, or take `name` as a file path.
pub fn resolve(name: &str, data_dir: &Path) -> anyhow::Result<DiscoveredModel> {
    let path = Path::new(name);
    if path.is_file() {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or(name);
        let (stem, kind) = if let Some(stem) = file_name.strip_suffix(ISA_MODEL_SUFFIX) {
            (stem, ModelKind::Isa)
        } else {
            (
                file_name.strip_suffix(MACHINE_MODEL_SUFFIX).unwrap_or(file_name),
                ModelKind::Machine,
            )
        };
        return Ok(DiscoveredModel {
            name: stem.to_string(),
            kind,
            path: path.to_path_buf(),
        });
    }

    let models = discover_models(data_dir)
        .with_context(|| format!("scanning {}", data_dir.display()))?;
    match models.into_iter().find(|m| m.name == name) {
        Some(model) => Ok(model),
        None => bail!("unknown model: '{name}'. Use 'portlens model list' to see available models."),
    }
}

pub fn load_machine(name: &str, data_dir: &Path) -> anyhow::Result<MachineModel> {
    let found = resolve(name, data_dir)?;
    if found.kind != ModelKind::Machine {
        bail!("'{name}' is an ISA model, not a machine model");
    }
    load_machine_model(&found.path).with_context(|| format!("loading {}", found.path.display()))
}

pub fn load_isa(name: &str, data_dir: &Path) -> anyhow::Result<IsaModel> {
    let found = resolve(name, data_dir)?;
    if found.kind != ModelKind::Isa {
        bail!("'{name}' is a machine model, not an ISA model");
    }
    load_isa_model(&found.path).with_context(|| format!("loading {}", found.path.display()))
}

/// Pick the ISA model in `data_dir` that matches the machine's ISA.
pub fn isa_for(machine: &MachineModel, data_dir: &Path) -> anyhow::Result<IsaModel> {
    let models = discover_models(data_dir)
        .with_context(|| format!("scanning {}", data_dir.display()))?;
    for found in models.iter().filter(|m| m.kind == ModelKind::Isa) {
        let isa = load_isa_model(&found.path)
            .with_context(|| format!("loading {}", found.path.display()))?;
        if isa.isa == machine.isa {
            tracing::info!(isa_model = %found.name, "selected ISA model");
            return Ok(isa);
        }
    }
    bail!(
        "no ISA model for '{}' in {}; pass one with --isa",
        machine.isa,
        data_dir.display()
    )
}

pub fn list(data_dir: &Path) -> anyhow::Result<()> {
    let models = discover_models(data_dir)
        .with_context(|| format!("scanning {}", data_dir.display()))?;
    if models.is_empty() {
        println!("No models found in {}", data_dir.display());
        return Ok(());
    }

    println!("Available models:");
    for model in &models {
        println!("  {:<24} {:<8} {}", model.name, model.kind, model.path.display());
    }
    Ok(())
}

pub fn describe(name: &str, data_dir: &Path, format: Option<&str>) -> anyhow::Result<()> {
    let found = resolve(name, data_dir)?;
    match (found.kind, format) {
        (ModelKind::Machine, Some("toml")) => {
            let model = load_machine_model(&found.path)?;
            print!("{}", machine_model_to_toml(&model)?);
        }
        (ModelKind::Machine, None) => {
            let model = load_machine_model(&found.path)?;
            print!("{}", describe_machine(&model));
        }
        (ModelKind::Isa, None) => {
            let model = load_isa_model(&found.path)?;
            print!("{}", describe_isa(&found.name, &model));
        }
        (ModelKind::Isa, Some("toml")) => bail!("TOML output is only available for machine models"),
        (_, Some(other)) => bail!("unknown format: '{other}' (expected 'toml')"),
    }
    Ok(())
}

fn describe_machine(model: &MachineModel) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== Machine Model: {} ===\n", model.name));
    out.push_str(&format!("ISA: {}\n", model.isa));
    out.push_str(&format!(
        "Hidden loads: {}\n",
        if model.has_hidden_loads() { "yes" } else { "no" }
    ));
    out.push_str(&format!(
        "Write-back latency: {}  Store forwarding: +{}\n",
        model.p_index_latency, model.store_to_load_forward_latency
    ));

    out.push_str(&format!("\n--- Ports ({}) ---\n", model.ports().len()));
    out.push_str(&format!("  {}\n", model.ports().join(", ")));
    let data_ports: Vec<&str> = model
        .data_ports()
        .into_iter()
        .map(|i| model.ports()[i].as_str())
        .collect();
    if !data_ports.is_empty() {
        out.push_str(&format!("  Data ports: {}\n", data_ports.join(", ")));
    }

    if !model.load_latency.is_empty() {
        out.push_str("\n--- Load Latency ---\n");
        for (class, latency) in &model.load_latency {
            out.push_str(&format!("  {class:<10} {latency}\n"));
        }
    }

    out.push_str(&format!(
        "\n--- Instructions ({} forms) ---\n",
        model.instructions().len()
    ));
    for entry in model.instructions() {
        let latency = entry.latency.map_or_else(|| "-".to_string(), |l| l.to_string());
        let throughput = entry
            .throughput
            .map_or_else(|| "-".to_string(), |t| t.to_string());
        out.push_str(&format!(
            "  {:<16} operands={} lat={latency} tp={throughput}\n",
            entry.name,
            entry.operands.len(),
        ));
    }
    out
}

fn describe_isa(name: &str, model: &IsaModel) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== ISA Model: {name} ===\n"));
    out.push_str(&format!("ISA: {}\n", model.isa));
    out.push_str(&format!(
        "\n--- Instructions ({} forms) ---\n",
        model.entries().len()
    ));
    for entry in model.entries() {
        let mut line = format!("  {:<16} operands={}", entry.name, entry.operands.len());
        if !entry.hidden_operands.is_empty() {
            line.push_str(&format!(" hidden={}", entry.hidden_operands.len()));
        }
        if entry.breaks_dependency_on_equal_operands {
            line.push_str(" breaks-dependency");
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

pub fn validate(name: &str, data_dir: &Path) -> anyhow::Result<()> {
    let found = resolve(name, data_dir)?;
    let result = match found.kind {
        ModelKind::Machine => {
            let model = load_machine(name, data_dir)?;
            validate_machine_model(&model)
        }
        ModelKind::Isa => {
            let isa = load_isa(name, data_dir)?;
            // Check port and operand coverage against a machine of the same ISA when one exists.
            let machine = matching_machine(&isa, data_dir)?;
            validate_isa_model(&isa, machine.as_ref())
        }
    };

    let issues = match result {
        Ok(()) => {
            println!("{}: ok", found.path.display());
            return Ok(());
        }
        Err(issues) => issues,
    };
    for issue in &issues {
        println!("{issue}");
    }
    let errors = issues.iter().filter(|i| i.severity == "error").count();
    if errors > 0 {
        bail!("{} has {errors} error(s)", found.path.display());
    }
    Ok(())
}

fn matching_machine(isa: &IsaModel, data_dir: &Path) -> anyhow::Result<Option<MachineModel>> {
    let paths: Vec<PathBuf> = discover_models(data_dir)?
        .into_iter()
        .filter(|m| m.kind == ModelKind::Machine)
        .map(|m| m.path)
        .collect();
    for path in paths {
        let machine =
            load_machine_model(&path).with_context(|| format!("loading {}", path.display()))?;
        if machine.isa == isa.isa {
            return Ok(Some(machine));
        }
    }
    Ok(None)
}
