//! Latency, throughput and port-pressure assignment.

use portlens_core::{
    AnnotatedInstruction, InstructionFlag, Operand, PortUop, RegisterSemantics,
    SemanticInstruction,
};
use portlens_targets::{InstructionEntry, MachineModel, OperandQuery};

use crate::balance;

/// Operand-size suffixes tried when an AT&T mnemonic has no model entry.
pub const SIZE_SUFFIXES: &str = "bwlq";

/// Assigns performance data against a machine model.
#[derive(Debug, Clone, Copy)]
pub struct ArchSemantics<'m> {
    machine: &'m MachineModel,
}

impl<'m> ArchSemantics<'m> {
    pub fn new(machine: &'m MachineModel) -> Self {
        Self { machine }
    }

    pub fn machine(&self) -> &'m MachineModel {
        self.machine
    }

    /// Annotate every instruction, then hide loads if the model asks for it.
    pub fn add_semantics(&self, kernel: Vec<SemanticInstruction>) -> Vec<AnnotatedInstruction> {
        let annotated = kernel.into_iter().map(|s| self.assign_tp_lt(s)).collect();
        if self.machine.has_hidden_loads() {
            self.set_hidden_loads(annotated)
        } else {
            annotated
        }
    }

    /// Assign latency, throughput and port pressure to one instruction.
    pub fn assign_tp_lt(&self, semantic: SemanticInstruction) -> AnnotatedInstruction {
        let ports = self.machine.ports().len();
        let Some(mnemonic) = semantic.mnemonic().map(str::to_owned) else {
            return AnnotatedInstruction::zero_cost(semantic, ports);
        };

        if let Some(entry) = self.lookup(&mnemonic, &semantic.form.operands, false) {
            return self.from_entry(semantic, entry);
        }
        if semantic.performs_load() || semantic.performs_store() {
            if let Some(entry) = self.lookup(&mnemonic, &semantic.form.operands, true) {
                return self.synthesize_memory_form(semantic, entry);
            }
        }

        tracing::debug!(
            line = semantic.line_number(),
            mnemonic = %mnemonic,
            "no model entry; cost unknown"
        );
        let mut annotated = AnnotatedInstruction::zero_cost(semantic, ports);
        annotated.add_flag(InstructionFlag::ThroughputUnknown);
        annotated.add_flag(InstructionFlag::LatencyUnknown);
        annotated
    }

    fn lookup(
        &self,
        mnemonic: &str,
        operands: &[Operand],
        memory_as_register: bool,
    ) -> Option<&'m InstructionEntry> {
        let queries = OperandQuery::for_operands(operands, memory_as_register);
        self.machine.get_instruction_with(mnemonic, &queries).or_else(|| {
            self.machine
                .isa
                .without_suffix(mnemonic, SIZE_SUFFIXES)
                .and_then(|stem| self.machine.get_instruction_with(stem, &queries))
        })
    }

    /// Averaged pressure of `descriptor`, or `None` (with a warning) if it
    /// names ports the model does not have.
    fn pressure_of(&self, descriptor: &[PortUop], line: usize) -> Option<Vec<f64>> {
        match self.machine.average_port_pressure(descriptor) {
            Ok(pressure) => Some(pressure),
            Err(err) => {
                tracing::warn!(line, error = %err, "malformed port-pressure descriptor");
                None
            }
        }
    }

    fn from_entry(
        &self,
        semantic: SemanticInstruction,
        entry: &InstructionEntry,
    ) -> AnnotatedInstruction {
        let loads = semantic.performs_load();
        let line = semantic.line_number();
        let mut annotated = AnnotatedInstruction::zero_cost(semantic, self.machine.ports().len());

        match self.pressure_of(&entry.port_pressure, line) {
            Some(pressure) => {
                if entry.throughput.is_some() && pressure.iter().all(|&p| p == 0.0) {
                    annotated.add_flag(InstructionFlag::NotBound);
                }
                annotated.port_pressure = pressure;
                annotated.port_uops = entry.port_pressure.clone();
            }
            None => annotated.add_flag(InstructionFlag::ThroughputUnknown),
        }
        match entry.throughput {
            Some(tp) => annotated.throughput = tp,
            None => annotated.add_flag(InstructionFlag::ThroughputUnknown),
        }
        match entry.latency {
            Some(lat) => {
                annotated.latency = lat;
                annotated.latency_without_load = lat;
            }
            None => annotated.add_flag(InstructionFlag::LatencyUnknown),
        }
        if loads {
            annotated.add_flag(InstructionFlag::LoadIncluded);
        }
        annotated
    }

    /// Combine the register form of a memory instruction with the model's
    /// load/store tables.
    fn synthesize_memory_form(
        &self,
        semantic: SemanticInstruction,
        entry: &InstructionEntry,
    ) -> AnnotatedInstruction {
        let machine = self.machine;
        let isa = machine.isa;
        let line = semantic.line_number();
        let loads = semantic.performs_load();
        let stores = semantic.performs_store();

        let (class, is_vector) = semantic
            .form
            .operands
            .iter()
            .find_map(Operand::as_register)
            .map(|reg| (isa.register_class(reg), isa.is_vector_register(reg)))
            .unwrap_or_default();

        let mut uops = entry.port_pressure.clone();
        let mut pressure = self.pressure_of(&entry.port_pressure, line);
        let mut latency = entry.latency.unwrap_or(0.0);

        if loads {
            if let Some(mem) = semantic.operands.reads().find_map(Operand::as_memory) {
                let load_uops = machine.get_load_throughput(mem);
                let multiplier = machine.load_throughput_multiplier(&class);
                let load = self
                    .pressure_of(load_uops, line)
                    .map(|pp| pp.into_iter().map(|p| p * multiplier).collect());
                pressure = add_pressure(pressure, load);
                uops.extend_from_slice(load_uops);
            }
            latency += machine.load_latency(&class, is_vector);
        }
        if stores {
            if let Some(mem) = semantic.operands.writes().find_map(Operand::as_memory) {
                let store_uops = machine.get_store_throughput(mem);
                let store = self.pressure_of(store_uops, line);
                pressure = add_pressure(pressure, store);
                uops.extend_from_slice(store_uops);
            }
            latency += machine.store_latency(&class, is_vector);
        }

        let mut annotated = AnnotatedInstruction::zero_cost(semantic, machine.ports().len());
        match pressure {
            Some(pressure) => {
                let peak = pressure.iter().copied().fold(0.0, f64::max);
                annotated.throughput = peak.max(entry.throughput.unwrap_or(0.0));
                annotated.port_pressure = pressure;
                annotated.port_uops = uops;
            }
            None => annotated.add_flag(InstructionFlag::ThroughputUnknown),
        }
        if entry.throughput.is_none() {
            annotated.add_flag(InstructionFlag::ThroughputUnknown);
        }
        match entry.latency {
            Some(lat) => {
                annotated.latency = latency;
                annotated.latency_without_load = lat;
            }
            None => annotated.add_flag(InstructionFlag::LatencyUnknown),
        }
        annotated
    }

    /// Mark loads assumed to be served by store forwarding and remove their
    /// data-port pressure.
    ///
    /// Instructions that both load and store take no part. With at most as
    /// many loads as stores every load is hidden; otherwise each store (in
    /// program order) hides its nearest remaining load, ties going to the
    /// lower line number.
    pub fn set_hidden_loads(
        &self,
        mut kernel: Vec<AnnotatedInstruction>,
    ) -> Vec<AnnotatedInstruction> {
        let is_load = |i: &AnnotatedInstruction| {
            i.has_flag(InstructionFlag::PerformsLoad) && !i.has_flag(InstructionFlag::PerformsStore)
        };
        let is_store = |i: &AnnotatedInstruction| {
            i.has_flag(InstructionFlag::PerformsStore) && !i.has_flag(InstructionFlag::PerformsLoad)
        };
        let loads: Vec<usize> = (0..kernel.len()).filter(|&i| is_load(&kernel[i])).collect();
        let stores: Vec<usize> = (0..kernel.len()).filter(|&i| is_store(&kernel[i])).collect();
        if loads.is_empty() || stores.is_empty() {
            return kernel;
        }

        let hidden: Vec<usize> = if loads.len() <= stores.len() {
            loads
        } else {
            let mut available = loads;
            let mut hidden = Vec::with_capacity(stores.len());
            for &store in &stores {
                let store_line = kernel[store].line_number();
                let nearest = available
                    .iter()
                    .enumerate()
                    .min_by_key(|&(_, &ld)| {
                        let line = kernel[ld].line_number();
                        (line.abs_diff(store_line), line)
                    })
                    .map(|(pos, _)| pos);
                if let Some(pos) = nearest {
                    hidden.push(available.remove(pos));
                }
            }
            hidden
        };

        let data_ports = self.machine.data_ports();
        for idx in hidden {
            let instr = &mut kernel[idx];
            instr.add_flag(InstructionFlag::HiddenLoad);
            for &port in &data_ports {
                if let Some(p) = instr.port_pressure.get_mut(port) {
                    *p = 0.0;
                }
            }
        }
        kernel
    }

    /// Rebalance port pressure across alternative ports, see
    /// [`balance::assign_optimal_throughput`].
    pub fn assign_optimal_throughput(
        &self,
        kernel: Vec<AnnotatedInstruction>,
    ) -> Vec<AnnotatedInstruction> {
        balance::assign_optimal_throughput(kernel, self.machine.ports())
    }
}

fn add_pressure(total: Option<Vec<f64>>, extra: Option<Vec<f64>>) -> Option<Vec<f64>> {
    let (mut total, extra) = (total?, extra?);
    for (t, e) in total.iter_mut().zip(extra) {
        *t += e;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IsaSemantics;
    use portlens_core::{InstructionForm, Memory, Register};
    use portlens_targets::IsaModel;

    const MODEL: &str = r#"
name = "test-x86"
isa = "x86-att"
ports = ["0", "1", "2", "2D", "3", "3D", "4"]
hidden-loads = true

[load-latency]
gpr = 4
xmm = 5

[store-latency]
gpr = 0

[load-throughput]
default = [[1, ["2", "3"]], [1, ["2D", "3D"]]]

[store-throughput]
default = [[1, ["4"]], [1, ["2", "3"]]]

[[instruction]]
name = ["add", "sub"]
operands = [
    { class = "register", name = "gpr" },
    { class = "register", name = "gpr" },
]
latency = 1
throughput = 0.5
port-pressure = [[1, ["0", "1"]]]

[[instruction]]
name = "mov"
operands = [
    { class = "memory", base = "gpr" },
    { class = "register", name = "gpr" },
]
latency = 4
throughput = 0.5
port-pressure = [[1, ["2", "3"]], [1, ["2D", "3D"]]]

[[instruction]]
name = "mov"
operands = [
    { class = "register", name = "gpr" },
    { class = "memory", base = "gpr" },
]
latency = 0
throughput = 1
port-pressure = [[1, ["4"]], [1, ["2", "3"]]]

[[instruction]]
name = "nop"
latency = 0
throughput = 0.25

[[instruction]]
name = "div"
operands = [{ class = "register", name = "gpr" }]
port-pressure = [[1, ["0"]]]
"#;

    const ISA: &str = r#"
isa = "x86-att"

[[instruction]]
name = "add"
operands = [
    { class = "register", name = "gpr", source = true },
    { class = "register", name = "gpr", source = true, destination = true },
]
"#;

    fn models() -> (MachineModel, IsaModel) {
        (toml::from_str(MODEL).unwrap(), toml::from_str(ISA).unwrap())
    }

    fn reg(name: &str) -> Operand {
        Operand::Register(Register::new(name))
    }

    fn mem(base: &str) -> Operand {
        Operand::Memory(Memory::based(Register::new(base)))
    }

    fn annotate(forms: Vec<InstructionForm>) -> Vec<AnnotatedInstruction> {
        let (machine, isa) = models();
        let semantics = IsaSemantics::new(&isa).process(forms);
        ArchSemantics::new(&machine).add_semantics(semantics)
    }

    #[test]
    fn port_pressure_has_one_value_per_port() {
        let kernel = annotate(vec![
            InstructionForm::blank(1, ".L1:"),
            InstructionForm::new(2, "addq", vec![reg("rbx"), reg("rax")]),
            InstructionForm::new(3, "frobnicate", vec![reg("rax")]),
        ]);
        for instr in &kernel {
            assert_eq!(instr.port_pressure.len(), 7);
        }
    }

    #[test]
    fn matched_entry_with_suffix_retry() {
        let kernel = annotate(vec![InstructionForm::new(1, "addq", vec![reg("rbx"), reg("rax")])]);
        let add = &kernel[0];
        assert_eq!(add.latency, 1.0);
        assert_eq!(add.throughput, 0.5);
        assert_eq!(add.port_pressure[..2], [0.5, 0.5]);
        assert!(add.semantic.flags.is_empty());
    }

    #[test]
    fn matched_load_form_is_load_included() {
        let kernel = annotate(vec![InstructionForm::new(1, "movq", vec![mem("rsi"), reg("rax")])]);
        let mov = &kernel[0];
        assert!(mov.has_flag(InstructionFlag::LoadIncluded));
        assert_eq!(mov.latency, 4.0);
        assert_eq!(mov.latency_without_load, 4.0);
    }

    #[test]
    fn load_form_synthesized_from_register_form() {
        let kernel = annotate(vec![InstructionForm::new(1, "addq", vec![mem("rsi"), reg("rax")])]);
        let add = &kernel[0];
        assert!(!add.is_unmatched());
        assert!(!add.has_flag(InstructionFlag::LoadIncluded));
        assert_eq!(add.latency, 5.0);
        assert_eq!(add.latency_without_load, 1.0);
        assert_eq!(add.port_pressure, vec![0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.0]);
        assert_eq!(add.throughput, 0.5);
        assert_eq!(add.port_uops.len(), 3);
    }

    #[test]
    fn load_store_form_adds_both_tables() {
        let kernel = annotate(vec![InstructionForm::new(1, "addq", vec![reg("rax"), mem("rdi")])]);
        let add = &kernel[0];
        assert!(add.has_flag(InstructionFlag::PerformsLoad));
        assert!(add.has_flag(InstructionFlag::PerformsStore));
        assert_eq!(add.port_pressure, vec![0.5, 0.5, 1.0, 0.5, 1.0, 0.5, 1.0]);
        assert_eq!(add.throughput, 1.0);
        assert_eq!(add.latency, 5.0);
    }

    #[test]
    fn unknown_instruction_is_flagged() {
        let kernel = annotate(vec![InstructionForm::new(1, "frobnicate", vec![reg("rax")])]);
        let x = &kernel[0];
        assert!(x.is_unmatched());
        assert_eq!(x.latency, 0.0);
        assert_eq!(x.throughput, 0.0);
        assert!(x.port_pressure.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn missing_values_are_flagged() {
        let kernel = annotate(vec![
            InstructionForm::new(1, "nop", vec![]),
            InstructionForm::new(2, "div", vec![reg("rcx")]),
        ]);
        assert!(kernel[0].has_flag(InstructionFlag::NotBound));
        assert!(kernel[1].has_flag(InstructionFlag::ThroughputUnknown));
        assert!(kernel[1].has_flag(InstructionFlag::LatencyUnknown));
        assert_eq!(kernel[1].port_pressure[0], 1.0);
    }

    #[test]
    fn labels_cost_nothing() {
        let kernel = annotate(vec![InstructionForm::blank(1, "# comment")]);
        assert_eq!(kernel[0].latency, 0.0);
        assert!(kernel[0].semantic.flags.is_empty());
    }

    #[test]
    fn fewer_loads_than_stores_hides_every_load() {
        let kernel = annotate(vec![
            InstructionForm::new(1, "movq", vec![mem("rsi"), reg("rax")]),
            InstructionForm::new(2, "movq", vec![reg("rax"), mem("rdi")]),
            InstructionForm::new(3, "movq", vec![reg("rbx"), mem("rdx")]),
        ]);
        assert!(kernel[0].has_flag(InstructionFlag::HiddenLoad));
        assert_eq!(kernel[0].port_pressure[3], 0.0);
        assert_eq!(kernel[0].port_pressure[5], 0.0);
        assert_eq!(kernel[0].port_pressure[2], 0.5);
        assert!(!kernel[1].has_flag(InstructionFlag::HiddenLoad));
    }

    #[test]
    fn more_loads_than_stores_hides_nearest() {
        let kernel = annotate(vec![
            InstructionForm::new(1, "movq", vec![mem("rsi"), reg("rax")]),
            InstructionForm::new(2, "movq", vec![mem("rsi"), reg("rbx")]),
            InstructionForm::new(3, "movq", vec![reg("rax"), mem("rdi")]),
            InstructionForm::new(4, "movq", vec![mem("rdx"), reg("rcx")]),
        ]);
        let hidden: Vec<usize> = kernel
            .iter()
            .filter(|i| i.has_flag(InstructionFlag::HiddenLoad))
            .map(|i| i.line_number())
            .collect();
        // Lines 2 and 4 are both one away from the store; the lower wins.
        assert_eq!(hidden, vec![2]);
    }

    #[test]
    fn no_hidden_loads_without_stores() {
        let kernel = annotate(vec![
            InstructionForm::new(1, "movq", vec![mem("rsi"), reg("rax")]),
            InstructionForm::new(2, "addq", vec![reg("rax"), mem("rdi")]),
        ]);
        assert!(kernel
            .iter()
            .all(|i| !i.has_flag(InstructionFlag::HiddenLoad)));
    }
}
