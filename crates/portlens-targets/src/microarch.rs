//! Micro-architecture performance model.
//!
//! Describes the execution ports of a processor and, per instruction form,
//! its latency, reciprocal throughput and port-pressure descriptor. Also
//! carries the load/store tables used to synthesize data for memory forms
//! that have no entry of their own.

use std::collections::BTreeMap;

use portlens_core::{Isa, Memory, Operand, PortUop};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TargetError};
use crate::pattern::{MemoryPattern, Mnemonics, MnemonicIndex, OperandPattern, OperandQuery};

/// Per-instruction performance data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstructionEntry {
    pub name: String,
    #[serde(default)]
    pub operands: Vec<OperandPattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<f64>,
    /// Reciprocal throughput in cycles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput: Option<f64>,
    #[serde(default)]
    pub port_pressure: Vec<PortUop>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uops: Option<u32>,
}

impl InstructionEntry {
    pub fn new(name: impl Into<String>, operands: Vec<OperandPattern>) -> Self {
        Self {
            name: name.into(),
            operands,
            latency: None,
            throughput: None,
            port_pressure: Vec::new(),
            uops: None,
        }
    }

    /// Whether `self` and `other` describe the same instruction form.
    pub fn same_form(&self, other: &InstructionEntry) -> bool {
        self.name.eq_ignore_ascii_case(&other.name) && self.operands == other.operands
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct InstructionEntryDef {
    name: Mnemonics,
    #[serde(default)]
    operands: Vec<OperandPattern>,
    latency: Option<f64>,
    throughput: Option<f64>,
    #[serde(default)]
    port_pressure: Vec<PortUop>,
    uops: Option<u32>,
}

/// Port pressure of one memory addressing mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AddressingMode {
    #[serde(flatten)]
    pub memory: MemoryPattern,
    pub port_pressure: Vec<PortUop>,
}

/// Port pressure of loads or stores by addressing mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ThroughputTable {
    /// Used when no addressing mode matches.
    #[serde(default)]
    pub default: Vec<PortUop>,
    #[serde(default, rename = "mode", skip_serializing_if = "Vec::is_empty")]
    pub modes: Vec<AddressingMode>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MachineModelDef {
    name: String,
    isa: Isa,
    ports: Vec<String>,
    #[serde(default)]
    hidden_loads: bool,
    #[serde(default = "default_p_index_latency")]
    p_index_latency: f64,
    #[serde(default)]
    store_to_load_forward_latency: f64,
    #[serde(default)]
    load_latency: BTreeMap<String, f64>,
    #[serde(default)]
    store_latency: BTreeMap<String, f64>,
    #[serde(default)]
    load_throughput_multiplier: BTreeMap<String, f64>,
    #[serde(default)]
    load_throughput: ThroughputTable,
    #[serde(default)]
    store_throughput: ThroughputTable,
    #[serde(default, rename = "instruction")]
    instructions: Vec<InstructionEntryDef>,
}

/// Performance model of one micro-architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "MachineModelDef", rename_all = "kebab-case")]
pub struct MachineModel {
    /// Micro-architecture name (e.g. "generic-x86", "neoverse-n1").
    pub name: String,
    pub isa: Isa,
    ports: Vec<String>,
    /// Whether loads may be served by store forwarding.
    pub hidden_loads: bool,
    /// Cycles until a base register written back by pre/post-indexed
    /// addressing can be used.
    pub p_index_latency: f64,
    /// Extra cycles for a load reading data just stored.
    pub store_to_load_forward_latency: f64,
    /// Load latency by register class, with `vector`/`scalar` fallbacks.
    pub load_latency: BTreeMap<String, f64>,
    pub store_latency: BTreeMap<String, f64>,
    pub load_throughput_multiplier: BTreeMap<String, f64>,
    pub load_throughput: ThroughputTable,
    pub store_throughput: ThroughputTable,
    #[serde(rename = "instruction")]
    instructions: Vec<InstructionEntry>,
    #[serde(skip)]
    index: MnemonicIndex,
}

fn default_p_index_latency() -> f64 {
    1.0
}

impl From<MachineModelDef> for MachineModel {
    fn from(def: MachineModelDef) -> Self {
        let mut model = MachineModel::new(def.name, def.isa);
        model.ports = def.ports;
        model.hidden_loads = def.hidden_loads;
        model.p_index_latency = def.p_index_latency;
        model.store_to_load_forward_latency = def.store_to_load_forward_latency;
        model.load_latency = def.load_latency;
        model.store_latency = def.store_latency;
        model.load_throughput_multiplier = def.load_throughput_multiplier;
        model.load_throughput = def.load_throughput;
        model.store_throughput = def.store_throughput;
        for entry in def.instructions {
            for name in entry.name.names() {
                model.push_instruction(InstructionEntry {
                    name,
                    operands: entry.operands.clone(),
                    latency: entry.latency,
                    throughput: entry.throughput,
                    port_pressure: entry.port_pressure.clone(),
                    uops: entry.uops,
                });
            }
        }
        model
    }
}

impl MachineModel {
    /// An empty model with no ports and no entries.
    pub fn new(name: impl Into<String>, isa: Isa) -> Self {
        Self {
            name: name.into(),
            isa,
            ports: Vec::new(),
            hidden_loads: false,
            p_index_latency: default_p_index_latency(),
            store_to_load_forward_latency: 0.0,
            load_latency: BTreeMap::new(),
            store_latency: BTreeMap::new(),
            load_throughput_multiplier: BTreeMap::new(),
            load_throughput: ThroughputTable::default(),
            store_throughput: ThroughputTable::default(),
            instructions: Vec::new(),
            index: MnemonicIndex::default(),
        }
    }

    pub fn ports(&self) -> &[String] {
        &self.ports
    }

    pub fn port_index(&self, port: &str) -> Option<usize> {
        self.ports.iter().position(|p| p == port)
    }

    pub fn instructions(&self) -> &[InstructionEntry] {
        &self.instructions
    }

    pub fn has_hidden_loads(&self) -> bool {
        self.hidden_loads
    }

    /// Indices of the data ports (named digits followed by `D`, e.g. `2D`).
    pub fn data_ports(&self) -> Vec<usize> {
        self.ports
            .iter()
            .enumerate()
            .filter(|(_, p)| is_data_port(p))
            .map(|(i, _)| i)
            .collect()
    }

    /// Append a port unless it already exists.
    pub fn add_port(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.ports.contains(&name) {
            self.ports.push(name);
        }
    }

    /// Import an entry, replacing an existing entry for the same form.
    pub fn set_instruction(&mut self, entry: InstructionEntry) {
        match self.instructions.iter().position(|e| e.same_form(&entry)) {
            Some(pos) => self.instructions[pos] = entry,
            None => self.push_instruction(entry),
        }
    }

    fn push_instruction(&mut self, entry: InstructionEntry) {
        self.index.insert(&entry.name, self.instructions.len());
        self.instructions.push(entry);
    }

    /// Look up the entry for `name` applied to `operands`.
    pub fn get_instruction(&self, name: &str, operands: &[Operand]) -> Option<&InstructionEntry> {
        self.get_instruction_with(name, &OperandQuery::for_operands(operands, false))
    }

    /// Look up with explicit queries, which may contain register wildcards.
    ///
    /// Several matches indicate a data-quality problem in the model; the
    /// first one is used.
    pub fn get_instruction_with(
        &self,
        name: &str,
        queries: &[OperandQuery<'_>],
    ) -> Option<&InstructionEntry> {
        let mut found = self
            .index
            .get(name)
            .iter()
            .map(|&i| &self.instructions[i])
            .filter(|e| OperandPattern::all_match(&e.operands, queries, &self.isa));
        let first = found.next()?;
        if found.next().is_some() {
            tracing::warn!(
                model = %self.name,
                mnemonic = name,
                "multiple entries match; using the first"
            );
        }
        Some(first)
    }

    /// Spread each micro-op's cycles evenly over its ports.
    ///
    /// Returns one value per model port, in port order.
    pub fn average_port_pressure(&self, descriptor: &[PortUop]) -> Result<Vec<f64>> {
        let mut pressure = vec![0.0; self.ports.len()];
        for uop in descriptor {
            if uop.ports.is_empty() {
                continue;
            }
            let share = uop.cycles / uop.ports.len() as f64;
            for port in &uop.ports {
                let idx = self.port_index(port).ok_or_else(|| TargetError::UnknownPort {
                    port: port.clone(),
                    model: self.name.clone(),
                })?;
                pressure[idx] += share;
            }
        }
        Ok(pressure)
    }

    pub fn get_load_throughput(&self, memory: &Memory) -> &[PortUop] {
        self.lookup_throughput(&self.load_throughput, memory)
    }

    pub fn get_store_throughput(&self, memory: &Memory) -> &[PortUop] {
        self.lookup_throughput(&self.store_throughput, memory)
    }

    fn lookup_throughput<'a>(&self, table: &'a ThroughputTable, memory: &Memory) -> &'a [PortUop] {
        table
            .modes
            .iter()
            .find(|mode| mode.memory.matches(memory, &self.isa))
            .map_or(table.default.as_slice(), |mode| mode.port_pressure.as_slice())
    }

    /// Load-to-use latency for a destination register class.
    pub fn load_latency(&self, class: &str, is_vector: bool) -> f64 {
        match latency_for(&self.load_latency, class, is_vector) {
            Some(lat) => lat,
            None => {
                tracing::warn!(
                    model = %self.name,
                    class,
                    "no load latency for register class; assuming 0"
                );
                0.0
            }
        }
    }

    pub fn store_latency(&self, class: &str, is_vector: bool) -> f64 {
        latency_for(&self.store_latency, class, is_vector).unwrap_or(0.0)
    }

    /// Scale applied to synthesized load pressure (1.0 when unset).
    pub fn load_throughput_multiplier(&self, class: &str) -> f64 {
        self.load_throughput_multiplier
            .get(class)
            .copied()
            .unwrap_or(1.0)
    }
}

fn is_data_port(name: &str) -> bool {
    name.strip_suffix('D')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

fn latency_for(table: &BTreeMap<String, f64>, class: &str, is_vector: bool) -> Option<f64> {
    let fallback = if is_vector { "vector" } else { "scalar" };
    table.get(class).or_else(|| table.get(fallback)).copied()
}
