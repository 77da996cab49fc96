//! Machine and ISA model definitions and parsing for portlens.
//!
//! Two models describe a target:
//! - **ISA Model:** operand roles (read/written) per instruction form
//! - **Machine Model:** ports, latency, throughput and port pressure per
//!   instruction form, plus load/store tables for memory forms

pub mod error;
pub mod isa;
pub mod microarch;
pub mod parse;
pub mod pattern;

pub use error::{Result, TargetError};
pub use isa::{HiddenOperand, IsaEntry, IsaModel, IsaOperand, OperandRole};
pub use microarch::{AddressingMode, InstructionEntry, MachineModel, ThroughputTable};
pub use pattern::{MemoryPattern, OperandPattern, OperandQuery, RegisterPattern};
