//! Analysis pipeline orchestrator.

use std::collections::HashSet;
use std::path::Path;

use portlens_core::{AnnotatedInstruction, InstructionForm};
use portlens_graph::{DependencyGraph, GraphOptions};
use portlens_semantics::{ArchSemantics, IsaSemantics};
use portlens_targets::{IsaModel, MachineModel};

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::report::AnalysisReport;

/// Output of a successful analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    /// The kernel with latency, throughput and port pressure assigned.
    pub kernel: Vec<AnnotatedInstruction>,
    pub report: AnalysisReport,
}

/// Parse a kernel given as a JSON array of instruction forms.
pub fn parse_kernel(json: &str) -> Result<Vec<InstructionForm>, AnalysisError> {
    Ok(serde_json::from_str(json)?)
}

/// Load a `*.kernel.json` file.
pub fn load_kernel(path: &Path) -> Result<Vec<InstructionForm>, AnalysisError> {
    let content = std::fs::read_to_string(path)?;
    parse_kernel(&content)
}

/// Build the dependency graph of an annotated kernel.
pub fn dependency_graph<'k>(
    kernel: &'k [AnnotatedInstruction],
    machine: &MachineModel,
    config: &AnalysisConfig,
) -> DependencyGraph<'k> {
    DependencyGraph::build(
        kernel,
        &machine.isa,
        GraphOptions {
            consider_flag_deps: config.consider_flag_deps,
            p_index_latency: machine.p_index_latency,
            store_to_load_forward_latency: machine.store_to_load_forward_latency,
        },
    )
}

/// Run the full analysis:
/// operand roles -> performance data -> balancing -> dependency graph ->
/// critical path + loop-carried dependencies -> report.
///
/// A cyclic dependency graph does not fail the run; the error is recorded
/// in the report in place of the latency results.
pub fn analyze(
    kernel: Vec<InstructionForm>,
    isa_model: &IsaModel,
    machine: &MachineModel,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, AnalysisError> {
    // Stage 1: Input checks
    if isa_model.isa != machine.isa {
        return Err(AnalysisError::IsaMismatch {
            isa_model: isa_model.isa,
            machine: machine.name.clone(),
            machine_isa: machine.isa,
        });
    }
    let mut lines = HashSet::new();
    for form in &kernel {
        if !lines.insert(form.line_number) {
            return Err(AnalysisError::DuplicateLine {
                line: form.line_number,
            });
        }
    }

    // Stage 2: Operand roles
    let semantic = IsaSemantics::new(isa_model).process(kernel);

    // Stage 3: Latency, throughput, port pressure (+ hidden loads)
    let arch = ArchSemantics::new(machine);
    let mut annotated = arch.add_semantics(semantic);

    // Stage 4: Port balancing
    if config.assign_optimal_throughput {
        annotated = arch.assign_optimal_throughput(annotated);
    }

    // Stage 5: Dependency analysis
    let mut report = AnalysisReport::new(&machine.name, machine.isa, machine.ports(), &annotated);
    {
        let graph = dependency_graph(&annotated, machine, config);
        match graph.critical_path() {
            Ok(path) => report.set_critical_path(&path),
            Err(err) => report.critical_path_error = Some(err.to_string()),
        }
        match graph.loop_carried_dependencies(config.lcd_timeout) {
            Ok(lcd) => {
                report.set_loop_carried(lcd.dependencies.values(), lcd.longest(), lcd.timed_out)
            }
            Err(err) => report.lcd_error = Some(err.to_string()),
        }
    }

    tracing::debug!(
        machine = %machine.name,
        instructions = annotated.len(),
        throughput = report.throughput_bound,
        critical_path = report.critical_path_latency,
        loop_carried = report.loop_carried_latency(),
        "analysis complete"
    );

    Ok(AnalysisOutput {
        kernel: annotated,
        report,
    })
}
