//! Instruction semantics for portlens.
//!
//! Two passes turn parsed instructions into costed ones:
//! - [`IsaSemantics`] assigns operand roles against an ISA role model
//! - [`ArchSemantics`] assigns latency, throughput and port pressure
//!   against a machine model, then runs the whole-kernel passes (hidden
//!   loads, port balancing)

pub mod arch_semantics;
pub mod balance;
pub mod isa_semantics;

pub use arch_semantics::ArchSemantics;
pub use isa_semantics::IsaSemantics;
