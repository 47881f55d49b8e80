//! Atomic types for the lanevm execution engine.
//!
//! This crate has no logic of its own: it exists so that `lanevm-asm`,
//! `lanevm-vmm` and `lanevm` agree on the handful of primitive types that
//! cross their boundaries, the same role `fuel-types` plays for `fuel-asm`
//! and `fuel-vm`.

mod lane_mask;
mod refs;
mod symbol;

pub use lane_mask::LaneMask;
pub use refs::Ref;
pub use symbol::SymbolId;

/// Register/slot value type. All scalar lanes hold a `Word`, reinterpreted
/// as `i64` or `f64` depending on the SSA type that produced it.
pub type Word = u64;

/// A 32-bit offset from the base of the VMM reserved window.
pub type VmmOffset = u32;

/// Number of lanes processed per bytecode invocation.
pub const LANES: usize = 16;

/// Size in bytes of one VMM page.
pub const PAGE_SIZE: u32 = 1 << 20;

/// Number of symbol IDs reserved for system-defined field names.
pub const RESERVED_SYMBOL_COUNT: u32 = 10;

/// 128-bit keyed hash of a group's composite key.
pub type Fingerprint = u128;
