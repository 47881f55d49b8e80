//! The VM memory region (VMM): a reserved, 32-bit-addressable arena that
//! every byte the bytecode interpreter can touch must live inside.
//!
//! This plays the role `fuel_vm::interpreter::memory` plays for the
//! FuelVM — bounds-checked byte access behind a small `ToAddr`-indexed API
//! — generalized from a growing stack/heap pair into a page-bitmap arena
//! per spec §4.1, since the query engine has no notion of a call stack.

mod arena;
mod range;

pub use arena::{AllocError, Vmm, VmmConfig};
pub use range::{MemoryRange, ToAddr};

pub use lanevm_types::{VmmOffset, PAGE_SIZE};

/// Size of the default committed read/write window, in bytes (512 MiB per
/// spec §4.1's "typically 512 MiB").
pub const DEFAULT_COMMITTED_SIZE: u32 = 512 * 1024 * 1024;

/// Size of the full reserved address window (4 GiB, the limit of a 32-bit
/// offset).
pub const RESERVED_SIZE: u64 = 4 * 1024 * 1024 * 1024;
