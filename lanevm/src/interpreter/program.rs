//! The lowered, directly-executable form of a compiled expression (spec
//! §4.3, §4.4).

use lanevm_asm::{Instruction, SlotId};

/// A compiled program: the instruction sequence plus the resources the
/// interpreter must provision before running it.
#[derive(Debug, Clone)]
pub struct BytecodeProgram {
    pub instructions: Vec<Instruction>,
    /// Number of distinct `SlotId`s the program addresses; the
    /// interpreter pre-sizes its slot table to this.
    pub stack_slot_count: u16,
    /// Bytes of scratch (boxed value storage) this program is expected to
    /// need; a `MoreScratch` fault means this estimate was too low and
    /// the caller should re-run with a larger reservation.
    pub scratch_reservation: u32,
    /// The symbol-table epoch this program was compiled against (spec
    /// §4.4); stale programs must be recompiled, never executed.
    pub symtab_epoch: u64,
    /// Slot holding the expression's final value, for callers (e.g.
    /// `project`) that need the computed value rather than the mask
    /// `Ret` hands back. Predicate-only programs (filters) still reach
    /// this slot — it's simply the same one the `Ret` mask came from.
    pub output_slot: SlotId,
    /// Slot the interpreter must pre-seed with the caller-supplied valid
    /// lane mask before running (spec's `valid-lanes` SSA root).
    pub valid_lanes_slot: SlotId,
    /// Slot the interpreter must pre-seed with the current batch's row
    /// references before running (spec's `init-mem` SSA root — the row
    /// each lane is being evaluated against).
    pub init_mem_slot: SlotId,
}

impl BytecodeProgram {
    pub fn new(
        instructions: Vec<Instruction>,
        stack_slot_count: u16,
        symtab_epoch: u64,
        output_slot: SlotId,
        valid_lanes_slot: SlotId,
        init_mem_slot: SlotId,
    ) -> Self {
        Self {
            instructions,
            stack_slot_count,
            scratch_reservation: 0,
            symtab_epoch,
            output_slot,
            valid_lanes_slot,
            init_mem_slot,
        }
    }

    #[must_use]
    pub fn with_scratch_reservation(mut self, bytes: u32) -> Self {
        self.scratch_reservation = bytes;
        self
    }

    pub fn is_stale(&self, current_epoch: u64) -> bool {
        self.symtab_epoch != current_epoch
    }
}
