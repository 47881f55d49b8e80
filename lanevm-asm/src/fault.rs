use core::fmt;

/// The fault an opcode can raise mid-program. Execution halts at the first
/// fault; the enclosing operator inspects the code and either retries after
/// growing a resource or surfaces a fatal error.
///
/// Mirrors `fuel_asm::PanicReason`'s shape: a small `repr(u8)` enum that is
/// `non_exhaustive` so new fault codes can be added without a breaking
/// change to callers that already match on the ones they understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
#[non_exhaustive]
pub enum FaultReason {
    /// The scratch buffer was exhausted while boxing an output. Recoverable:
    /// the operator grows scratch and re-runs the program from the top.
    MoreScratch = 0x00,
    /// A radix-tree lookup missed during group-by accumulation. Recoverable:
    /// the operator inserts a new leaf and re-runs the program.
    NeedRadix = 0x01,
    /// A TLV header was internally inconsistent (length ran past the end of
    /// the enclosing value, or declared an unknown type tag). Fatal.
    Corrupt = 0x02,
    /// A radix-tree internal-node index pointed outside the tree's node
    /// arena. Fatal; indicates a bug in tree maintenance, not bad input.
    TreeCorrupt = 0x03,
    /// An opcode dereferenced a symbol ID with no active symbol table.
    /// Fatal.
    NullSymbolTable = 0x04,
    /// A computed offset or length fell outside `[0, vmm_size)`. Fatal.
    MemoryOverflow = 0x05,
    /// A value's runtime type tag didn't match what the opcode required.
    /// Fatal (this is a query-shape bug, not a data bug).
    TypeMismatch = 0x06,
    /// `find-symbol` was asked for a symbol ID absent from the struct.
    /// Recoverable at the SQL level (the field is simply null), surfaced to
    /// the operator as an ordinary fault so it can decide.
    MissingSymbol = 0x07,
    /// Integer overflow on an arithmetic opcode. The lane is masked off
    /// rather than the program aborting; this code exists for profiling and
    /// tests, not for control flow.
    ArithmeticOverflow = 0x08,
    /// Integer division or modulo by zero.
    DivideByZero = 0x09,
    /// The virtual program counter walked past the end of the compiled
    /// instruction array without hitting `ret`. Fatal; indicates a bytecode
    /// compiler bug.
    BytecodeBounds = 0x0a,
    /// A page allocation from the VMM failed because the arena is
    /// exhausted. Fatal for the in-flight query.
    PageAllocationFailed = 0x0b,
}

impl FaultReason {
    /// Whether this fault is recoverable by the operator that issued the
    /// bytecode call, per spec §7's resource-fault taxonomy.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::MoreScratch | Self::NeedRadix)
    }
}

impl fmt::Display for FaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn only_scratch_and_radix_are_recoverable() {
        for reason in FaultReason::iter() {
            let expected = matches!(
                reason,
                FaultReason::MoreScratch | FaultReason::NeedRadix
            );
            assert_eq!(reason.is_recoverable(), expected, "{reason:?}");
        }
    }
}
