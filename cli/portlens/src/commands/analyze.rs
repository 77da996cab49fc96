use std::path::Path;

use anyhow::{bail, Context};
use portlens_analysis::config::timeout_from_secs;
use portlens_analysis::{analyze, dependency_graph, load_config, load_kernel, AnalysisConfig};

use super::model;

/// Configuration file picked up from the working directory when `--config`
/// is not given.
const DEFAULT_CONFIG_FILE: &str = "portlens.toml";

pub struct AnalyzeArgs<'a> {
    pub kernel: &'a Path,
    pub model: &'a str,
    pub isa: Option<&'a str>,
    pub data_dir: &'a Path,
    pub config: Option<&'a Path>,
    pub lcd_timeout: Option<f64>,
    pub consider_flag_deps: bool,
    pub no_optimal_throughput: bool,
    pub export: Option<&'a str>,
    pub dot: Option<&'a Path>,
}

/// Load the configuration file and apply command-line overrides.
fn resolve_config(args: &AnalyzeArgs<'_>) -> anyhow::Result<AnalysisConfig> {
    let mut config = match args.config {
        Some(path) => load_config(path).with_context(|| format!("reading {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            tracing::info!(path = DEFAULT_CONFIG_FILE, "using configuration file");
            load_config(Path::new(DEFAULT_CONFIG_FILE))
                .with_context(|| format!("reading {DEFAULT_CONFIG_FILE}"))?
        }
        None => AnalysisConfig::default(),
    };

    if let Some(secs) = args.lcd_timeout {
        config.lcd_timeout = timeout_from_secs(secs);
    }
    if args.consider_flag_deps {
        config.consider_flag_deps = true;
    }
    if args.no_optimal_throughput {
        config.assign_optimal_throughput = false;
    }
    Ok(config)
}

pub fn run(args: &AnalyzeArgs<'_>) -> anyhow::Result<()> {
    let export = args.export.unwrap_or("text");
    if export != "text" && export != "json" {
        bail!("unknown export format: '{export}' (expected 'text' or 'json')");
    }

    let config = resolve_config(args)?;
    let machine = model::load_machine(args.model, args.data_dir)?;
    let isa = match args.isa {
        Some(name) => model::load_isa(name, args.data_dir)?,
        None => model::isa_for(&machine, args.data_dir)?,
    };
    let kernel = load_kernel(args.kernel)
        .with_context(|| format!("reading {}", args.kernel.display()))?;

    tracing::info!(
        kernel = %args.kernel.display(),
        machine = %machine.name,
        lines = kernel.len(),
        "analyzing"
    );
    let output = analyze(kernel, &isa, &machine, &config)?;

    if let Some(path) = args.dot {
        let graph = dependency_graph(&output.kernel, &machine, &config);
        let highlight: Vec<usize> = output.report.critical_path.iter().map(|s| s.line).collect();
        std::fs::write(path, graph.to_dot(&highlight))
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote dependency graph");
    }

    if export == "json" {
        println!("{}", serde_json::to_string_pretty(&output.report)?);
    } else {
        print!("{}", output.report);
    }
    Ok(())
}
