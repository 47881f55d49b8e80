//! Bytecode instruction encoding for the lanevm SIMD interpreter.
//!
//! This crate plays the same role `fuel-asm` plays for `fuel-vm`: it owns
//! the wire shape of a single instruction and the fault taxonomy an
//! instruction can raise, independent of how the interpreter executes them.

mod fault;
mod instruction;
mod opcode;

pub use fault::FaultReason;
pub use instruction::{Arg, Instruction, SlotId};
pub use opcode::Opcode;

pub use lanevm_types::{Fingerprint, LaneMask, Ref, SymbolId, VmmOffset, Word, LANES};
