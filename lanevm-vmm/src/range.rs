use core::ops::Range;

use lanevm_types::{Ref, VmmOffset};

use crate::arena::AllocError;

/// Conversion into a validated VMM address. Implemented for the integer
/// widths bytecode gather/scatter offsets naturally arrive in; mirrors
/// `fuel_vm`'s `ToAddr` trait, which exists so `Memory::read`/`write` can
/// accept `u32`, `u64` and `RegisterId` offsets uniformly.
pub trait ToAddr {
    /// Convert to a `usize` address, failing if it can't fit or is
    /// negative.
    fn to_addr(self) -> Result<usize, AllocError>;
}

impl ToAddr for u32 {
    fn to_addr(self) -> Result<usize, AllocError> {
        Ok(self as usize)
    }
}

impl ToAddr for usize {
    fn to_addr(self) -> Result<usize, AllocError> {
        Ok(self)
    }
}

impl ToAddr for u64 {
    fn to_addr(self) -> Result<usize, AllocError> {
        usize::try_from(self).map_err(|_| AllocError::OutOfWindow)
    }
}

/// An address range inside the VMM that has already been bounds-checked
/// against the committed window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRange(pub(crate) Range<usize>);

impl MemoryRange {
    /// Start of the range.
    pub fn start(&self) -> usize {
        self.0.start
    }

    /// One past the end of the range.
    pub fn end(&self) -> usize {
        self.0.end
    }

    /// Length of the range in bytes.
    pub fn len(&self) -> usize {
        self.0.end - self.0.start
    }

    /// Whether the range names zero bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The range as a `usize` `Range`, suitable for indexing a `Vec<u8>`.
    pub fn usizes(&self) -> Range<usize> {
        self.0.clone()
    }

    /// Reinterpret this range as a `Ref` (offset/length pair).
    pub fn as_ref(&self) -> Ref {
        Ref::new(self.0.start as VmmOffset, self.len() as VmmOffset)
    }
}
