/// A single bytecode opcode.
///
/// Each program is an array of `(Opcode, args...)` entries (see
/// [`crate::Instruction`]); the opcode alone determines how many output and
/// input [`crate::Arg`]s follow and whether a variadic trailing block is
/// present. The families below follow spec §4.3 in order; most variants are
/// mechanical repeats of a handful of shapes (register form / immediate
/// form, int / float, case-sensitive / case-insensitive) so only the first
/// of each shape carries a full doc comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum Opcode {
    // --- Control -----------------------------------------------------
    /// Stop executing the program. Always the last instruction.
    Ret = 0x0000,
    /// Skip the next `imm` instructions if the input mask has no active
    /// lanes. Used to short-circuit branches (`CASE`, short-circuit `AND`)
    /// once a predicate can no longer select any row.
    SkipIfMaskEmpty = 0x0001,

    // --- Load / save ---------------------------------------------------
    /// Materialize an immediate as a scalar in every masked-on lane.
    LoadScalarImm = 0x0100,
    /// Copy a scalar slot to another scalar slot, masked.
    MoveScalar = 0x0101,
    /// Copy a value-reference slot to another, masked.
    MoveValue = 0x0102,
    /// Copy a mask slot to another mask slot (no predication; masks compose
    /// via `AND`/`OR` opcodes, not via predicated move).
    MoveMask = 0x0103,
    /// Zero every masked-on lane's scalar slot.
    ZeroScalar = 0x0104,
    /// Blend: `out[i] = mask[i] ? a[i] : b[i]`, lane-wise, over scalars.
    SelectScalar = 0x0105,
    /// Blend over value-reference slots.
    SelectValue = 0x0106,

    // --- Integer arithmetic/logic --------------------------------------
    /// `out = a + b`, masked; overflow narrows the mask rather than
    /// aborting (spec §7, "flagged as a masked-off lane").
    AddInt = 0x0200,
    AddIntImm = 0x0201,
    SubInt = 0x0202,
    SubIntImm = 0x0203,
    MulInt = 0x0204,
    MulIntImm = 0x0205,
    DivInt = 0x0206,
    DivIntImm = 0x0207,
    ModInt = 0x0208,
    ModIntImm = 0x0209,
    AndInt = 0x020a,
    AndIntImm = 0x020b,
    OrInt = 0x020c,
    OrIntImm = 0x020d,
    XorInt = 0x020e,
    XorIntImm = 0x020f,
    ShlInt = 0x0210,
    ShlIntImm = 0x0211,
    ShrInt = 0x0212,
    ShrIntImm = 0x0213,
    NegInt = 0x0214,
    NotInt = 0x0215,

    // --- Float arithmetic ------------------------------------------------
    AddFloat = 0x0300,
    AddFloatImm = 0x0301,
    SubFloat = 0x0302,
    SubFloatImm = 0x0303,
    MulFloat = 0x0304,
    MulFloatImm = 0x0305,
    DivFloat = 0x0306,
    DivFloatImm = 0x0307,
    NegFloat = 0x0308,

    // --- Transcendental math (float lanes only) -------------------------
    ExpFloat = 0x0400,
    LogFloat = 0x0401,
    SinFloat = 0x0402,
    CosFloat = 0x0403,
    PowFloat = 0x0404,
    HypotFloat = 0x0405,
    Atan2Float = 0x0406,

    // --- Conversion ------------------------------------------------------
    /// `k -> s`: `1.0`/`0.0` per active bit.
    MaskToFloat = 0x0500,
    /// `k -> s`: `1`/`0` per active bit.
    MaskToInt = 0x0501,
    IntToFloat = 0x0502,
    FloatToInt = 0x0503,
    RoundFloat = 0x0504,
    TruncFloat = 0x0505,
    CeilFloat = 0x0506,
    FloorFloat = 0x0507,
    /// Render an int scalar as a decimal string value-reference, boxing
    /// into scratch.
    IntToString = 0x0508,

    // --- Comparison --------------------------------------------------
    /// `out[i] = a[i] == b[i]`, writes a mask. Every comparison opcode
    /// declares an inverse (`CmpNeInt` for `CmpEqInt`, etc.) so the SSA
    /// compiler can flip an operator instead of emitting `not`.
    CmpEqInt = 0x0600,
    CmpNeInt = 0x0601,
    CmpLtInt = 0x0602,
    CmpLeInt = 0x0603,
    CmpGtInt = 0x0604,
    CmpGeInt = 0x0605,
    CmpEqFloat = 0x0606,
    CmpNeFloat = 0x0607,
    CmpLtFloat = 0x0608,
    CmpLeFloat = 0x0609,
    CmpGtFloat = 0x060a,
    CmpGeFloat = 0x060b,
    /// Polymorphic, ion-typed value comparison: compares two
    /// value-reference lanes by dereferencing and comparing their TLV
    /// payloads byte-for-byte after type-aware normalization (symbol vs.
    /// inline string, int vs. float). See `SPEC_FULL.md`'s open-question
    /// decision on symbol-aware comparison.
    CmpEqValue = 0x060c,
    CmpNeValue = 0x060d,

    // --- Type test -------------------------------------------------------
    IsNull = 0x0700,
    IsTrue = 0x0701,
    IsFalse = 0x0702,
    /// Tests a value's type-LV byte against a 16-bit bitmask of type codes.
    TagTest = 0x0703,

    // --- Hashing -----------------------------------------------------
    /// 128-bit keyed siphash over a value-reference lane, written to an
    /// `h[i]` register.
    HashValue = 0x0800,
    /// Chain an additional value into an existing hash register, for
    /// composite group keys.
    HashExtend = 0x0801,

    // --- Radix-tree lookups -----------------------------------------
    /// Membership test against the shared radix tree.
    HashMember = 0x0900,
    /// Lookup a bucket index for a fingerprint; raises `NeedRadix` on miss.
    HashLookup = 0x0901,
    /// Resolve a fingerprint to its aggregation-buffer bucket index,
    /// inserting nothing; used by slot-indexed aggregate opcodes. Raises
    /// `NeedRadix` on miss so the operator can insert and retry.
    AggBucket = 0x0902,

    // --- Boxing --------------------------------------------------------
    /// Append a scalar's TLV encoding to scratch and produce a
    /// value-reference to it. Raises `MoreScratch` if scratch is full.
    Box = 0x0a00,

    // --- Find-symbol -----------------------------------------------------
    /// Given a struct value-reference and a symbol ID, produce the value
    /// reference bound to that field (or set the mask bit off if absent).
    /// An optional "starting-after" reference restricts the scan to fields
    /// following a previous match, for ordered multi-field lookups.
    FindSymbol = 0x0b00,

    // --- Scalar aggregate accumulators ---------------------------------
    AggSum = 0x0c00,
    AggMin = 0x0c01,
    AggMax = 0x0c02,
    AggAndInt = 0x0c03,
    AggOrInt = 0x0c04,
    AggXorInt = 0x0c05,
    AggAndBool = 0x0c06,
    AggOrBool = 0x0c07,
    AggCount = 0x0c08,
    /// Slot-indexed sum: like `AggSum` but writes into the bucket named by
    /// an `l[i]` register produced by `AggBucket`, enabling per-group
    /// accumulation.
    AggSumSlot = 0x0c09,
    AggMinSlot = 0x0c0a,
    AggMaxSlot = 0x0c0b,
    AggAndIntSlot = 0x0c0c,
    AggOrIntSlot = 0x0c0d,
    AggXorIntSlot = 0x0c0e,
    AggAndBoolSlot = 0x0c0f,
    AggOrBoolSlot = 0x0c10,
    AggCountSlot = 0x0c11,

    // --- String operations ------------------------------------------
    StrLower = 0x0d00,
    StrUpper = 0x0d01,
    StrTrim = 0x0d02,
    StrSubstring = 0x0d03,
    StrSplit = 0x0d04,
    /// Case/width mode carried as an immediate flag byte: bit 0 selects
    /// case-insensitive, bit 1 selects full-Unicode folding instead of
    /// byte/ASCII.
    StrStartsWith = 0x0d05,
    StrEndsWith = 0x0d06,
    StrContains = 0x0d07,
    /// Match against a precompiled dictionary of string patterns
    /// (`IN (...)` over string literals), returning a mask.
    StrDictMatch = 0x0d08,

    // --- DFA match over UTF-8 strings ------------------------------
    /// 6-bit-state DFA (covers dictionaries up to 64 states).
    DfaMatch6 = 0x0e00,
    /// 7-bit-state DFA.
    DfaMatch7 = 0x0e01,
    /// 8-bit-state DFA.
    DfaMatch8 = 0x0e02,
    /// Unbounded-state DFA (state stored as a full scalar).
    DfaMatchUnbounded = 0x0e03,
}

impl Opcode {
    /// The comparison opcode that tests the negated condition, for
    /// algebraic simplifications like rewriting `is-not-null(x)` into the
    /// inverse of `is-null`.
    pub const fn inverse(&self) -> Option<Self> {
        use Opcode::*;
        Some(match self {
            CmpEqInt => CmpNeInt,
            CmpNeInt => CmpEqInt,
            CmpLtInt => CmpGeInt,
            CmpLeInt => CmpGtInt,
            CmpGtInt => CmpLeInt,
            CmpGeInt => CmpLtInt,
            CmpEqFloat => CmpNeFloat,
            CmpNeFloat => CmpEqFloat,
            CmpLtFloat => CmpGeFloat,
            CmpLeFloat => CmpGtFloat,
            CmpGtFloat => CmpLeFloat,
            CmpGeFloat => CmpLtFloat,
            CmpEqValue => CmpNeValue,
            CmpNeValue => CmpEqValue,
            IsTrue => IsFalse,
            IsFalse => IsTrue,
            _ => return None,
        })
    }

    /// Whether this opcode may raise `NeedRadix`/`MoreScratch` and must
    /// therefore be re-run from the top of the program on a recoverable
    /// fault rather than simply abandoned.
    pub const fn is_retryable_site(&self) -> bool {
        matches!(self, Self::Box | Self::HashLookup | Self::AggBucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn inverse_is_involutive() {
        for op in Opcode::iter() {
            if let Some(inv) = op.inverse() {
                assert_eq!(inv.inverse(), Some(op), "{op:?}");
            }
        }
    }

    #[test]
    fn discriminants_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for op in Opcode::iter() {
            assert!(seen.insert(op as u16), "duplicate discriminant for {op:?}");
        }
    }
}
