//! Operand role assignment.
//!
//! Decides which operands of an instruction are read, written, or both,
//! and whether the instruction loads from or stores to memory.

use portlens_core::{
    InstructionFlag, InstructionForm, Isa, Operand, OperandOrder, OperandOrigin,
    SemanticInstruction, SemanticOperand, SemanticOperands,
};
use portlens_targets::{IsaEntry, IsaModel, OperandQuery, OperandRole};

/// GAS operand-size suffixes tried when an AT&T mnemonic is not modeled.
pub const GAS_SUFFIXES: &str = "bswlqt";

/// Assigns source/destination roles against an ISA role model.
#[derive(Debug, Clone, Copy)]
pub struct IsaSemantics<'m> {
    model: &'m IsaModel,
}

impl<'m> IsaSemantics<'m> {
    pub fn new(model: &'m IsaModel) -> Self {
        Self { model }
    }

    pub fn isa(&self) -> Isa {
        self.model.isa
    }

    /// Assign roles to every instruction of a kernel.
    pub fn process(&self, kernel: Vec<InstructionForm>) -> Vec<SemanticInstruction> {
        kernel.into_iter().map(|form| self.assign_src_dst(form)).collect()
    }

    /// Assign operand roles and load/store flags to one instruction.
    pub fn assign_src_dst(&self, form: InstructionForm) -> SemanticInstruction {
        let Some(mnemonic) = form.mnemonic.as_deref() else {
            return SemanticInstruction::bare(form);
        };
        if form.operands.is_empty() {
            return SemanticInstruction::bare(form);
        }

        let exact = OperandQuery::for_operands(&form.operands, false);
        let mut operands = match self.find_entry(mnemonic, &exact) {
            Some(entry) => apply_entry(entry, &form.operands),
            None => {
                let wildcard = form
                    .has_memory_operand()
                    .then(|| OperandQuery::for_operands(&form.operands, true))
                    .and_then(|queries| self.find_entry(mnemonic, &queries));
                match wildcard {
                    Some(entry) => apply_entry(entry, &form.operands),
                    None => self.default_roles(&form.operands),
                }
            }
        };
        add_indexed_bases(&mut operands);

        let mut semantic = SemanticInstruction {
            form,
            operands,
            flags: Default::default(),
        };
        if semantic.operands.reads().any(Operand::is_memory) {
            semantic.flags.insert(InstructionFlag::PerformsLoad);
        }
        if semantic.operands.writes().any(Operand::is_memory) {
            semantic.flags.insert(InstructionFlag::PerformsStore);
        }
        semantic
    }

    fn find_entry(&self, mnemonic: &str, queries: &[OperandQuery<'_>]) -> Option<&'m IsaEntry> {
        self.model.get_entry(mnemonic, queries).or_else(|| {
            self.isa()
                .without_suffix(mnemonic, GAS_SUFFIXES)
                .and_then(|stem| self.model.get_entry(stem, queries))
        })
    }

    /// Positional roles: one destination at the syntax's destination slot,
    /// everything else a source. A lone operand is a source.
    fn default_roles(&self, operands: &[Operand]) -> SemanticOperands {
        let mut roles = SemanticOperands::default();
        let explicit = operands
            .iter()
            .enumerate()
            .map(|(i, op)| SemanticOperand::explicit(i, op.clone()));
        if operands.len() == 1 {
            roles.source.extend(explicit);
            return roles;
        }
        let dest = match self.isa().operand_order() {
            OperandOrder::DestinationLast => operands.len() - 1,
            OperandOrder::DestinationFirst => 0,
        };
        for op in explicit {
            if op.origin == OperandOrigin::Explicit(dest) {
                roles.destination.push(op);
            } else {
                roles.source.push(op);
            }
        }
        roles
    }
}

fn push_role(roles: &mut SemanticOperands, role: OperandRole, operand: SemanticOperand) {
    match role {
        OperandRole::Source => roles.source.push(operand),
        OperandRole::Destination => roles.destination.push(operand),
        OperandRole::SourceDestination => roles.src_dst.push(operand),
    }
}

fn apply_entry(entry: &IsaEntry, operands: &[Operand]) -> SemanticOperands {
    let mut roles = SemanticOperands::default();

    if entry.breaks_dependency_on_equal_operands && operands.windows(2).all(|w| w[0] == w[1]) {
        roles.destination.extend(
            operands
                .iter()
                .enumerate()
                .map(|(i, op)| SemanticOperand::explicit(i, op.clone())),
        );
        roles.destination.extend(
            entry
                .hidden_operands
                .iter()
                .map(|h| SemanticOperand::hidden(h.operand.clone())),
        );
        return roles;
    }

    for (i, (declared, op)) in entry.operands.iter().zip(operands).enumerate() {
        let role = declared.role().unwrap_or_else(|| {
            tracing::warn!(
                instruction = %entry.name,
                operand = i,
                "operand has no role in the ISA model; treating it as a source"
            );
            OperandRole::Source
        });
        push_role(&mut roles, role, SemanticOperand::explicit(i, op.clone()));
    }
    for hidden in &entry.hidden_operands {
        if let Some(role) = hidden.role() {
            push_role(&mut roles, role, SemanticOperand::hidden(hidden.operand.clone()));
        }
    }
    roles
}

/// Pre/post-indexed accesses also update their base register.
fn add_indexed_bases(roles: &mut SemanticOperands) {
    let bases: Vec<_> = roles
        .source
        .iter()
        .chain(&roles.destination)
        .filter_map(|s| s.operand.as_memory())
        .filter(|mem| mem.is_indexed())
        .filter_map(|mem| mem.base.clone())
        .collect();
    roles.src_dst.extend(bases.into_iter().map(|base| SemanticOperand {
        operand: Operand::Register(base),
        origin: OperandOrigin::IndexedBase,
    }));
}
