//! Core instruction model for the portlens static performance analyzer.
//!
//! Provides the typed operand and instruction records shared by every stage
//! of the analysis, plus the per-ISA register aliasing rules:
//! - **Operands:** registers, memory references, immediates and friends
//! - **Instructions:** parsed, role-assigned and performance-annotated forms
//! - **ISA:** syntax conventions and [`RegisterSemantics`]

pub mod instruction;
pub mod isa;
pub mod operand;

pub use instruction::{
    AnnotatedInstruction, FlagSet, InstructionFlag, InstructionForm, OperandOrigin, PortUop,
    SemanticInstruction, SemanticOperand, SemanticOperands,
};
pub use isa::{Isa, OperandOrder, RegisterSemantics};
pub use operand::{
    Condition, DirectiveParameter, Flag, Identifier, Immediate, ImmediateKind, Memory, Offset,
    Operand, Prefetch, Register,
};
