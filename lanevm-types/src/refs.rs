use core::fmt;

use crate::VmmOffset;

/// A reference to a byte range inside the VMM: `(offset, length)`.
///
/// This is the only pointer representation that ever crosses the
/// bytecode/operator boundary; every `Ref` is meaningful only relative to a
/// particular VMM base address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Ref {
    offset: VmmOffset,
    length: VmmOffset,
}

impl Ref {
    /// Construct a new reference.
    pub const fn new(offset: VmmOffset, length: VmmOffset) -> Self {
        Self { offset, length }
    }

    /// The null reference: zero offset, zero length. Used to mark a lane as
    /// not carrying a value-reference without resorting to `Option`.
    pub const NULL: Self = Self::new(0, 0);

    /// Offset from VMM base.
    pub const fn offset(&self) -> VmmOffset {
        self.offset
    }

    /// Length in bytes.
    pub const fn length(&self) -> VmmOffset {
        self.length
    }

    /// One past the last byte named by this reference.
    pub fn end(&self) -> VmmOffset {
        self.offset.saturating_add(self.length)
    }

    /// A reference immediately following this one, of the given length.
    pub fn followed_by(&self, length: VmmOffset) -> Self {
        Self::new(self.end(), length)
    }

    /// Whether this reference names zero bytes.
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({:#x}..{:#x})", self.offset, self.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_is_offset_plus_length() {
        let r = Ref::new(100, 40);
        assert_eq!(r.end(), 140);
    }

    #[test]
    fn followed_by_chains_refs() {
        let r = Ref::new(100, 40);
        let next = r.followed_by(8);
        assert_eq!(next, Ref::new(140, 8));
    }

    #[test]
    fn null_is_empty() {
        assert!(Ref::NULL.is_empty());
    }
}
