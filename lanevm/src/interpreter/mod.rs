//! The 16-lane bytecode virtual machine (spec §4).

pub mod exec;
pub mod program;
pub mod registers;

pub use exec::{ExecContext, Interpreter};
pub use program::BytecodeProgram;
pub use registers::{LaneOps, Lanes, SlotValue, Slots};
