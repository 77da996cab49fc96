//! Instruction records at each stage of the analysis pipeline.
//!
//! A kernel flows through three typed stages:
//! [`InstructionForm`] (as parsed) -> [`SemanticInstruction`] (operand roles
//! assigned) -> [`AnnotatedInstruction`] (latency, throughput and port
//! pressure assigned).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::operand::Operand;

/// A parsed instruction line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstructionForm {
    /// `None` for labels, comments and directives-only lines.
    #[serde(default)]
    pub mnemonic: Option<String>,
    #[serde(default)]
    pub operands: Vec<Operand>,
    /// 1-based, unique within a kernel.
    pub line_number: usize,
    /// Original source text, used for display.
    #[serde(default)]
    pub line: String,
}

impl InstructionForm {
    pub fn new(line_number: usize, mnemonic: impl Into<String>, operands: Vec<Operand>) -> Self {
        Self {
            mnemonic: Some(mnemonic.into()),
            operands,
            line_number,
            line: String::new(),
        }
    }

    /// A line without an instruction (label or comment).
    pub fn blank(line_number: usize, line: impl Into<String>) -> Self {
        Self {
            mnemonic: None,
            operands: Vec::new(),
            line_number,
            line: line.into(),
        }
    }

    pub fn with_line(mut self, line: impl Into<String>) -> Self {
        self.line = line.into();
        self
    }

    pub fn has_memory_operand(&self) -> bool {
        self.operands.iter().any(Operand::is_memory)
    }

    /// Source text if known, otherwise a rendering from the parsed fields.
    pub fn text(&self) -> String {
        if !self.line.is_empty() {
            return self.line.trim().to_string();
        }
        self.to_string()
    }
}

impl fmt::Display for InstructionForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(mnemonic) = &self.mnemonic else {
            return write!(f, "{}", self.line.trim());
        };
        write!(f, "{mnemonic}")?;
        for (i, op) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{op}")?;
        }
        Ok(())
    }
}

/// Properties attached to an instruction during analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstructionFlag {
    PerformsLoad,
    PerformsStore,
    /// The matched model entry already accounts for the memory load.
    LoadIncluded,
    ThroughputUnknown,
    LatencyUnknown,
    /// Matched, but uses no modeled port.
    NotBound,
    /// Load assumed to be served by store forwarding.
    HiddenLoad,
}

impl InstructionFlag {
    /// Short marker shown in report tables.
    pub fn marker(self) -> &'static str {
        match self {
            InstructionFlag::PerformsLoad => "L",
            InstructionFlag::PerformsStore => "S",
            InstructionFlag::LoadIncluded => "LI",
            InstructionFlag::ThroughputUnknown => "X",
            InstructionFlag::LatencyUnknown => "?",
            InstructionFlag::NotBound => "NB",
            InstructionFlag::HiddenLoad => "H",
        }
    }
}

pub type FlagSet = BTreeSet<InstructionFlag>;

/// Where a semantic operand came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperandOrigin {
    /// Position in the instruction's explicit operand list.
    Explicit(usize),
    /// Implicit operand declared by the ISA model (e.g. flags).
    Hidden,
    /// Base register written back by pre/post-indexed addressing.
    IndexedBase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticOperand {
    pub operand: Operand,
    pub origin: OperandOrigin,
}

impl SemanticOperand {
    pub fn explicit(position: usize, operand: Operand) -> Self {
        Self {
            operand,
            origin: OperandOrigin::Explicit(position),
        }
    }

    pub fn hidden(operand: Operand) -> Self {
        Self {
            operand,
            origin: OperandOrigin::Hidden,
        }
    }
}

/// Operands split by role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SemanticOperands {
    pub source: Vec<SemanticOperand>,
    pub destination: Vec<SemanticOperand>,
    /// Operands both read and written.
    pub src_dst: Vec<SemanticOperand>,
}

impl SemanticOperands {
    /// Operands read by the instruction.
    pub fn reads(&self) -> impl Iterator<Item = &Operand> {
        self.source.iter().chain(&self.src_dst).map(|s| &s.operand)
    }

    /// Operands written by the instruction.
    pub fn writes(&self) -> impl Iterator<Item = &Operand> {
        self.destination.iter().chain(&self.src_dst).map(|s| &s.operand)
    }

    pub fn all(&self) -> impl Iterator<Item = &SemanticOperand> {
        self.source.iter().chain(&self.destination).chain(&self.src_dst)
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty() && self.destination.is_empty() && self.src_dst.is_empty()
    }
}

/// An instruction with operand roles assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticInstruction {
    pub form: InstructionForm,
    pub operands: SemanticOperands,
    #[serde(default)]
    pub flags: FlagSet,
}

impl SemanticInstruction {
    /// An instruction with no roles and no flags.
    pub fn bare(form: InstructionForm) -> Self {
        Self {
            form,
            operands: SemanticOperands::default(),
            flags: FlagSet::new(),
        }
    }

    pub fn line_number(&self) -> usize {
        self.form.line_number
    }

    pub fn mnemonic(&self) -> Option<&str> {
        self.form.mnemonic.as_deref()
    }

    pub fn has_flag(&self, flag: InstructionFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn performs_load(&self) -> bool {
        self.has_flag(InstructionFlag::PerformsLoad)
    }

    pub fn performs_store(&self) -> bool {
        self.has_flag(InstructionFlag::PerformsStore)
    }
}

/// One micro-op of a port-pressure descriptor: `cycles` spread evenly over
/// any of `ports`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, Vec<String>)", into = "(f64, Vec<String>)")]
pub struct PortUop {
    pub cycles: f64,
    pub ports: Vec<String>,
}

impl PortUop {
    pub fn new<S: Into<String>>(cycles: f64, ports: impl IntoIterator<Item = S>) -> Self {
        Self {
            cycles,
            ports: ports.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<(f64, Vec<String>)> for PortUop {
    fn from((cycles, ports): (f64, Vec<String>)) -> Self {
        Self { cycles, ports }
    }
}

impl From<PortUop> for (f64, Vec<String>) {
    fn from(uop: PortUop) -> Self {
        (uop.cycles, uop.ports)
    }
}

/// An instruction with performance data assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AnnotatedInstruction {
    pub semantic: SemanticInstruction,
    pub latency: f64,
    /// Latency excluding a synthesized memory load.
    pub latency_without_load: f64,
    /// Reciprocal throughput in cycles.
    pub throughput: f64,
    /// Cycles per port, aligned with the machine model's port list.
    pub port_pressure: Vec<f64>,
    pub port_uops: Vec<PortUop>,
}

impl AnnotatedInstruction {
    /// Zero cost on `ports` ports.
    pub fn zero_cost(semantic: SemanticInstruction, ports: usize) -> Self {
        Self {
            semantic,
            latency: 0.0,
            latency_without_load: 0.0,
            throughput: 0.0,
            port_pressure: vec![0.0; ports],
            port_uops: Vec::new(),
        }
    }

    pub fn line_number(&self) -> usize {
        self.semantic.line_number()
    }

    pub fn form(&self) -> &InstructionForm {
        &self.semantic.form
    }

    pub fn operands(&self) -> &SemanticOperands {
        &self.semantic.operands
    }

    pub fn has_flag(&self, flag: InstructionFlag) -> bool {
        self.semantic.has_flag(flag)
    }

    pub fn add_flag(&mut self, flag: InstructionFlag) {
        self.semantic.flags.insert(flag);
    }

    /// Whether no model entry could be found for this instruction.
    pub fn is_unmatched(&self) -> bool {
        self.has_flag(InstructionFlag::ThroughputUnknown)
            && self.has_flag(InstructionFlag::LatencyUnknown)
    }

    pub fn total_pressure(&self) -> f64 {
        self.port_pressure.iter().sum()
    }
}
