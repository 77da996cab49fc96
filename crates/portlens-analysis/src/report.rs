//! Analysis report aggregating all pipeline stages.

use std::fmt;

use portlens_core::{AnnotatedInstruction, InstructionFlag, Isa};
use portlens_graph::{CriticalPath, LoopCarriedDependency};
use serde::Serialize;

/// One kernel line with its performance data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstructionRow {
    /// Line number in the kernel.
    pub line: usize,
    /// Source text of the line.
    pub text: String,
    /// Whether the line holds an instruction (not a label or comment).
    pub is_instruction: bool,
    /// Cycles per port, in the machine's port order.
    pub port_pressure: Vec<f64>,
    /// Result latency, including any memory load.
    pub latency: f64,
    /// Result latency once the operands are available.
    pub latency_without_load: f64,
    /// Reciprocal throughput in cycles.
    pub throughput: f64,
    pub flags: Vec<InstructionFlag>,
    /// Part of the critical path.
    pub on_critical_path: bool,
    /// Part of the longest loop-carried dependency.
    pub on_loop_carried: bool,
}

impl InstructionRow {
    pub fn from_instruction(instr: &AnnotatedInstruction) -> Self {
        Self {
            line: instr.line_number(),
            text: instr.form().text(),
            is_instruction: instr.form().mnemonic.is_some(),
            port_pressure: instr.port_pressure.clone(),
            latency: instr.latency,
            latency_without_load: instr.latency_without_load,
            throughput: instr.throughput,
            flags: instr.semantic.flags.iter().copied().collect(),
            on_critical_path: false,
            on_loop_carried: false,
        }
    }

    pub fn markers(&self) -> String {
        self.flags.iter().map(|f| f.marker()).collect::<Vec<_>>().join(",")
    }
}

/// One step of a latency chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainStep {
    pub line: usize,
    /// Cycles this step adds to the chain.
    pub latency: f64,
    /// Source text of the line.
    pub text: String,
}

/// A loop-carried dependency chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoopCarriedSummary {
    /// Line the chain starts and ends at.
    pub root: usize,
    /// Cycles one trip around the chain takes.
    pub latency: f64,
    /// Steps in dependency order, starting at `root`.
    pub chain: Vec<ChainStep>,
}

impl LoopCarriedSummary {
    pub fn from_dependency(dep: &LoopCarriedDependency, rows: &[InstructionRow]) -> Self {
        let chain = dep
            .chain
            .iter()
            .map(|&(line, latency)| ChainStep {
                line,
                latency,
                text: text_of(rows, line),
            })
            .collect();
        Self {
            root: dep.root,
            latency: dep.latency,
            chain,
        }
    }
}

fn text_of(rows: &[InstructionRow], line: usize) -> String {
    rows.iter()
        .find(|r| r.line == line)
        .map(|r| r.text.clone())
        .unwrap_or_default()
}

/// Summary report of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AnalysisReport {
    /// Machine model name.
    pub machine: String,
    pub isa: Isa,
    /// Port names, in the order of every pressure vector.
    pub ports: Vec<String>,
    /// One row per kernel line.
    pub instructions: Vec<InstructionRow>,
    /// Port pressure summed over the kernel.
    pub port_totals: Vec<f64>,
    /// Cycles per iteration imposed by the busiest port.
    pub throughput_bound: f64,
    /// Name of the busiest port, if any port carries pressure.
    pub bottleneck_port: Option<String>,
    /// Steps of the longest chain within one iteration.
    pub critical_path: Vec<ChainStep>,
    /// Cycles per iteration imposed by the critical path.
    pub critical_path_latency: f64,
    /// Why the critical path could not be computed.
    pub critical_path_error: Option<String>,
    /// Longest chain per root line.
    pub loop_carried: Vec<LoopCarriedSummary>,
    /// Index into `loop_carried` of the longest chain.
    pub longest_loop_carried: Option<usize>,
    /// The loop-carried search hit its timeout; `loop_carried` is partial.
    pub lcd_timed_out: bool,
    /// Why loop-carried dependencies could not be computed.
    pub lcd_error: Option<String>,
    /// Share of instructions with neither latency nor throughput data.
    pub unmatched_percentage: f64,
}

impl AnalysisReport {
    /// A report with per-line data and port totals filled in; latency
    /// results are added by the caller.
    pub fn new(machine: &str, isa: Isa, ports: &[String], kernel: &[AnnotatedInstruction]) -> Self {
        let instructions: Vec<InstructionRow> =
            kernel.iter().map(InstructionRow::from_instruction).collect();

        let mut port_totals = vec![0.0; ports.len()];
        for row in &instructions {
            for (t, p) in port_totals.iter_mut().zip(&row.port_pressure) {
                *t += p;
            }
        }
        let mut bottleneck = None;
        for (i, &total) in port_totals.iter().enumerate() {
            if total > 0.0 && bottleneck.map_or(true, |b: usize| total > port_totals[b]) {
                bottleneck = Some(i);
            }
        }

        let counted = kernel.iter().filter(|i| i.form().mnemonic.is_some()).count();
        let unmatched = kernel.iter().filter(|i| i.is_unmatched()).count();
        let unmatched_percentage = if counted == 0 {
            0.0
        } else {
            unmatched as f64 / counted as f64 * 100.0
        };

        Self {
            machine: machine.to_string(),
            isa,
            ports: ports.to_vec(),
            instructions,
            throughput_bound: bottleneck.map_or(0.0, |b| port_totals[b]),
            bottleneck_port: bottleneck.map(|b| ports[b].clone()),
            port_totals,
            critical_path: Vec::new(),
            critical_path_latency: 0.0,
            critical_path_error: None,
            loop_carried: Vec::new(),
            longest_loop_carried: None,
            lcd_timed_out: false,
            lcd_error: None,
            unmatched_percentage,
        }
    }

    pub fn set_critical_path(&mut self, path: &CriticalPath<'_>) {
        let lines = path.lines();
        self.critical_path = path
            .instructions
            .iter()
            .zip(&path.latencies)
            .map(|(i, &latency)| ChainStep {
                line: i.line_number(),
                latency,
                text: i.form().text(),
            })
            .collect();
        self.critical_path_latency = path.latency;
        for row in &mut self.instructions {
            row.on_critical_path = lines.contains(&row.line);
        }
    }

    pub fn set_loop_carried<'a>(
        &mut self,
        dependencies: impl IntoIterator<Item = &'a LoopCarriedDependency>,
        longest: Option<&LoopCarriedDependency>,
        timed_out: bool,
    ) {
        self.loop_carried = dependencies
            .into_iter()
            .map(|dep| LoopCarriedSummary::from_dependency(dep, &self.instructions))
            .collect();
        self.longest_loop_carried =
            longest.and_then(|l| self.loop_carried.iter().position(|s| s.root == l.root));
        self.lcd_timed_out = timed_out;
        if let Some(longest) = longest {
            let lines = longest.lines();
            for row in &mut self.instructions {
                row.on_loop_carried = lines.contains(&row.line);
            }
        }
    }

    pub fn longest_loop_carried(&self) -> Option<&LoopCarriedSummary> {
        self.longest_loop_carried.and_then(|i| self.loop_carried.get(i))
    }

    /// Latency of the longest loop-carried chain, zero if none.
    pub fn loop_carried_latency(&self) -> f64 {
        self.longest_loop_carried().map_or(0.0, |l| l.latency)
    }

    /// Lines with neither latency nor throughput data.
    pub fn unmatched_lines(&self) -> Vec<usize> {
        self.instructions
            .iter()
            .filter(|r| {
                r.flags.contains(&InstructionFlag::ThroughputUnknown)
                    && r.flags.contains(&InstructionFlag::LatencyUnknown)
            })
            .map(|r| r.line)
            .collect()
    }
}

fn cell(value: f64, width: usize) -> String {
    if value == 0.0 {
        " ".repeat(width)
    } else {
        format!("{value:>width$.2}")
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Analysis Report ===")?;
        writeln!(f, "Machine: {} ({})", self.machine, self.isa)?;
        writeln!(
            f,
            "Instructions: {} ({:.1}% unmatched)",
            self.instructions.iter().filter(|r| r.is_instruction).count(),
            self.unmatched_percentage
        )?;

        writeln!(f)?;
        writeln!(f, "--- Port Pressure (cycles) ---")?;
        let widths: Vec<usize> = self.ports.iter().map(|p| p.len().max(5)).collect();
        write!(f, "  {:>4} |", "Line")?;
        for (port, &w) in self.ports.iter().zip(&widths) {
            write!(f, " {port:^w$} |")?;
        }
        writeln!(f, " {:>5} | CP | LCD | Flags     | Instruction", "Lat")?;
        for row in &self.instructions {
            write!(f, "  {:>4} |", row.line)?;
            for (&p, &w) in row.port_pressure.iter().zip(&widths) {
                write!(f, " {} |", cell(p, w))?;
            }
            if row.is_instruction {
                writeln!(
                    f,
                    " {} | {:^2} | {:^3} | {:<9} | {}",
                    cell(row.latency, 5),
                    if row.on_critical_path { "*" } else { "" },
                    if row.on_loop_carried { "*" } else { "" },
                    row.markers(),
                    row.text
                )?;
            } else {
                writeln!(f, " {:5} |    |     | {:9} | {}", "", "", row.text)?;
            }
        }
        write!(f, "  {:>4} |", "Sum")?;
        for (&t, &w) in self.port_totals.iter().zip(&widths) {
            write!(f, " {} |", cell(t, w))?;
        }
        writeln!(f)?;

        writeln!(f)?;
        writeln!(f, "--- Throughput ---")?;
        match &self.bottleneck_port {
            Some(port) => writeln!(
                f,
                "  Bound: {:.2} cycles/iteration (port {port})",
                self.throughput_bound
            )?,
            None => writeln!(f, "  Bound: 0.00 cycles/iteration")?,
        }

        writeln!(f)?;
        match &self.critical_path_error {
            Some(err) => {
                writeln!(f, "--- Critical Path ---")?;
                writeln!(f, "  unavailable: {err}")?;
            }
            None => {
                writeln!(f, "--- Critical Path ({:.2} cycles) ---", self.critical_path_latency)?;
                for step in &self.critical_path {
                    writeln!(f, "  {:>4} | {:>6.2} | {}", step.line, step.latency, step.text)?;
                }
            }
        }

        writeln!(f)?;
        writeln!(f, "--- Loop-Carried Dependencies ---")?;
        if let Some(err) = &self.lcd_error {
            writeln!(f, "  unavailable: {err}")?;
        } else if self.loop_carried.is_empty() {
            writeln!(f, "  none")?;
        } else {
            for dep in &self.loop_carried {
                let lines: Vec<String> = dep.chain.iter().map(|s| s.line.to_string()).collect();
                writeln!(
                    f,
                    "  {:>4} | {:>6.2} | [{}]",
                    dep.root,
                    dep.latency,
                    lines.join(", ")
                )?;
            }
            if let Some(longest) = self.longest_loop_carried() {
                writeln!(
                    f,
                    "  Longest: {:.2} cycles (line {})",
                    longest.latency, longest.root
                )?;
            }
        }
        if self.lcd_timed_out {
            writeln!(f, "  TIMEOUT: search stopped early; results are partial")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portlens_core::{InstructionForm, SemanticInstruction};

    fn annotated(line: usize, pressure: Vec<f64>, latency: f64) -> AnnotatedInstruction {
        let form = InstructionForm::new(line, "add", vec![]).with_line(format!("add {line}"));
        let mut a = AnnotatedInstruction::zero_cost(SemanticInstruction::bare(form), pressure.len());
        a.port_pressure = pressure;
        a.latency = latency;
        a
    }

    fn ports() -> Vec<String> {
        vec!["0".into(), "1".into()]
    }

    #[test]
    fn totals_and_bound() {
        let kernel = vec![
            annotated(1, vec![0.5, 0.5], 1.0),
            annotated(2, vec![1.0, 0.0], 3.0),
        ];
        let report = AnalysisReport::new("m", Isa::X86Att, &ports(), &kernel);
        assert_eq!(report.port_totals, vec![1.5, 0.5]);
        assert_eq!(report.throughput_bound, 1.5);
        assert_eq!(report.bottleneck_port.as_deref(), Some("0"));
        assert_eq!(report.unmatched_percentage, 0.0);
    }

    #[test]
    fn unmatched_share_ignores_blank_lines() {
        let mut unknown = annotated(2, vec![0.0, 0.0], 0.0);
        unknown.add_flag(InstructionFlag::ThroughputUnknown);
        unknown.add_flag(InstructionFlag::LatencyUnknown);
        let blank = AnnotatedInstruction::zero_cost(
            SemanticInstruction::bare(InstructionForm::blank(3, ".L1:")),
            2,
        );
        let kernel = vec![annotated(1, vec![1.0, 0.0], 1.0), unknown, blank];
        let report = AnalysisReport::new("m", Isa::X86Att, &ports(), &kernel);
        assert_eq!(report.unmatched_percentage, 50.0);
        assert_eq!(report.unmatched_lines(), vec![2]);
    }

    #[test]
    fn display_sections() {
        let kernel = vec![annotated(1, vec![1.0, 0.0], 1.0)];
        let mut report = AnalysisReport::new("generic", Isa::X86Att, &ports(), &kernel);
        report.critical_path_error = Some("cycle detected involving line 1".into());
        report.lcd_timed_out = true;
        let out = format!("{report}");
        assert!(out.contains("=== Analysis Report ==="));
        assert!(out.contains("Machine: generic"));
        assert!(out.contains("--- Throughput ---"));
        assert!(out.contains("unavailable: cycle detected"));
        assert!(out.contains("TIMEOUT"));
        assert!(out.contains("add 1"));
    }

    #[test]
    fn serializes_as_json() {
        let kernel = vec![annotated(1, vec![1.0, 0.0], 1.0)];
        let report = AnalysisReport::new("m", Isa::AArch64, &ports(), &kernel);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["isa"], "aarch64");
        assert_eq!(json["throughput-bound"], 1.0);
        assert_eq!(json["instructions"][0]["line"], 1);
    }

    #[test]
    fn latency_results_in_json() {
        let kernel = vec![
            annotated(1, vec![1.0, 0.0], 3.0),
            annotated(2, vec![0.0, 1.0], 1.0),
        ];
        let mut report = AnalysisReport::new("m", Isa::X86Att, &ports(), &kernel);
        let path = CriticalPath {
            instructions: vec![&kernel[0], &kernel[1]],
            latencies: vec![3.0, 1.0],
            latency: 4.0,
        };
        report.set_critical_path(&path);
        let dep = LoopCarriedDependency {
            root: 2,
            chain: vec![(2, 1.0)],
            latency: 1.0,
        };
        report.set_loop_carried([&dep], Some(&dep), false);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["critical-path"][0]["latency"], 3.0);
        assert_eq!(json["critical-path"][1]["text"], "add 2");
        assert_eq!(json["critical-path-latency"], 4.0);
        assert_eq!(json["loop-carried"][0]["root"], 2);
        assert_eq!(json["loop-carried"][0]["chain"][0]["latency"], 1.0);
        assert_eq!(json["longest-loop-carried"], 0);
        assert_eq!(json["instructions"][0]["on-critical-path"], true);
        assert_eq!(json["instructions"][0]["on-loop-carried"], false);
        assert_eq!(json["instructions"][1]["on-loop-carried"], true);
        assert_eq!(json["lcd-timed-out"], false);
        assert!(json["lcd-error"].is_null());
    }
}
