use core::fmt;

use smallvec::SmallVec;

use crate::Opcode;

/// An index into the per-program virtual stack of typed slots, assigned by
/// the SSA compiler's slot allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotId(u16);

impl SlotId {
    /// Construct a slot ID from its raw index.
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// The raw index.
    pub const fn index(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// One operand of an instruction: either a slot reference or an immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Arg {
    /// A typed stack slot.
    Slot(SlotId),
    /// A 64-bit immediate, reinterpreted as `i64`/`f64`/a symbol ID/a type
    /// bitmask depending on the opcode that reads it.
    Imm(i64),
}

impl Arg {
    /// The slot this argument names, if it is a slot.
    pub const fn as_slot(&self) -> Option<SlotId> {
        match self {
            Arg::Slot(s) => Some(*s),
            Arg::Imm(_) => None,
        }
    }

    /// The immediate value this argument carries, if it is an immediate.
    pub const fn as_imm(&self) -> Option<i64> {
        match self {
            Arg::Imm(v) => Some(*v),
            Arg::Slot(_) => None,
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Slot(s) => write!(f, "{s}"),
            Arg::Imm(v) => write!(f, "#{v}"),
        }
    }
}

/// One compiled bytecode instruction: an opcode plus its output, input, and
/// (for a handful of opcodes, e.g. `StrDictMatch`) variadic argument lists.
///
/// Most opcodes have 0-1 outputs and 1-3 inputs; `SmallVec` avoids a heap
/// allocation for the common case while still allowing the rare variadic
/// instruction (e.g. a `CASE` arm table lowered as chained `SelectScalar`s
/// does not need this, but `StrDictMatch`'s pattern list does).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction {
    /// The opcode being executed.
    pub op: Opcode,
    /// Slots written by this instruction.
    pub outputs: SmallVec<[Arg; 2]>,
    /// Slots or immediates read by this instruction.
    pub inputs: SmallVec<[Arg; 4]>,
    /// Optional trailing variadic block (e.g. a literal pattern table).
    pub variadic: SmallVec<[Arg; 0]>,
}

impl Instruction {
    /// Construct an instruction with no variadic block.
    pub fn new(op: Opcode, outputs: &[Arg], inputs: &[Arg]) -> Self {
        Self {
            op,
            outputs: SmallVec::from_slice(outputs),
            inputs: SmallVec::from_slice(inputs),
            variadic: SmallVec::new(),
        }
    }

    /// Construct a bare control instruction with no operands (`ret`).
    pub fn bare(op: Opcode) -> Self {
        Self::new(op, &[], &[])
    }

    /// Attach a variadic trailing block.
    #[must_use]
    pub fn with_variadic(mut self, variadic: &[Arg]) -> Self {
        self.variadic = SmallVec::from_slice(variadic);
        self
    }

    /// The single output slot, for the overwhelmingly common case of
    /// instructions with exactly one output.
    pub fn output_slot(&self) -> Option<SlotId> {
        self.outputs.first().and_then(Arg::as_slot)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, o) in self.outputs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{o}")?;
        }
        if !self.outputs.is_empty() {
            write!(f, " = ")?;
        }
        write!(f, "{}", self.op)?;
        for i in &self.inputs {
            write!(f, " {i}")?;
        }
        if !self.variadic.is_empty() {
            write!(f, " [")?;
            for (i, v) in self.variadic.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{v}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_textual_asm_shape() {
        let ins = Instruction::new(
            Opcode::AddInt,
            &[Arg::Slot(SlotId::new(2))],
            &[Arg::Slot(SlotId::new(0)), Arg::Slot(SlotId::new(1))],
        );
        assert_eq!(format!("{ins}"), "%2 = AddInt %0 %1");
    }

    #[test]
    fn bare_ret_has_no_operands() {
        let ins = Instruction::bare(Opcode::Ret);
        assert!(ins.outputs.is_empty());
        assert!(ins.inputs.is_empty());
    }
}
