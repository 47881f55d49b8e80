//! Topological lowering from an optimized [`super::SsaGraph`] to a
//! [`crate::interpreter::BytecodeProgram`] (spec §4.3, §4.4).

use lanevm_asm::{Arg, Instruction, Opcode, SlotId};

use super::{SsaGraph, SsaOp};
use crate::interpreter::BytecodeProgram;

/// Lower `graph` (already CSE'd/folded/DCE'd by [`super::passes::optimize`])
/// into a linear instruction sequence. The graph's node order is already
/// topological by construction, so lowering is a single forward pass that
/// assigns each live node the next `SlotId` and rewrites its args in
/// terms of those slots.
pub fn lower(graph: &SsaGraph, symtab_epoch: u64) -> BytecodeProgram {
    let mut instructions = Vec::with_capacity(graph.nodes.len() + 1);
    let mut slot_of: Vec<SlotId> = Vec::with_capacity(graph.nodes.len());

    for (idx, node) in graph.nodes.iter().enumerate() {
        let slot = SlotId::new(idx as u16);
        slot_of.push(slot);

        match &node.op {
            SsaOp::InitMem | SsaOp::ValidLanes => {
                // The interpreter pre-seeds whichever slots end up holding
                // `InitMem`/`ValidLanes` (see `init_mem_slot`/
                // `valid_lanes_slot` below), so neither seed needs an
                // emitted instruction.
            }
            SsaOp::Const => {
                // Int and float literals are already carried bit-for-bit
                // in `immediate` (floats via `to_bits`), so the same
                // `LoadScalarImm` covers both regardless of `node.ty`.
                let value = node.immediate.expect("Const node without an immediate");
                instructions.push(Instruction::new(Opcode::LoadScalarImm, &[Arg::Slot(slot)], &[Arg::Imm(value)]));
            }
            SsaOp::Op(opcode) => {
                let mut inputs: Vec<Arg> = node.args.iter().map(|&a| Arg::Slot(slot_of[a])).collect();
                if let Some(imm) = node.immediate {
                    inputs.push(Arg::Imm(imm));
                }
                instructions.push(Instruction::new(*opcode, &[Arg::Slot(slot)], &inputs));
            }
        }
    }

    let output_slot = graph.ret.map(|r| slot_of[r]).unwrap_or_else(|| SlotId::new(0));
    let valid_lanes_slot = slot_of[graph.valid_lanes];
    let init_mem_slot = slot_of[graph.init_mem];
    // `Ret`'s own input is always the valid-lanes mask (it's what
    // `run_program` hands back to the caller) — the actual return value
    // lives in `output_slot`, a separate field the caller reads directly.
    instructions.push(Instruction::new(Opcode::Ret, &[], &[Arg::Slot(valid_lanes_slot)]));

    let stack_slot_count = slot_of.len() as u16;
    BytecodeProgram::new(
        instructions,
        stack_slot_count,
        symtab_epoch,
        output_slot,
        valid_lanes_slot,
        init_mem_slot,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssa::{SsaGraph, SsaType};

    #[test]
    fn constant_expression_lowers_to_load_and_ret() {
        let mut graph = SsaGraph::new();
        let c = graph.const_int(5);
        graph.set_return(c);
        let program = lower(&graph, 0);
        assert!(matches!(program.instructions[0].op, Opcode::LoadScalarImm));
        assert!(matches!(program.instructions.last().unwrap().op, Opcode::Ret));
    }

    #[test]
    fn binary_op_references_operand_slots() {
        let mut graph = SsaGraph::new();
        let a = graph.const_int(1);
        let b = graph.const_int(2);
        let sum = graph.op(Opcode::AddInt, SsaType::Int, vec![graph.valid_lanes, a, b]);
        graph.set_return(sum);
        let program = lower(&graph, 3);
        assert_eq!(program.symtab_epoch, 3);
        let add_instr = program
            .instructions
            .iter()
            .find(|i| i.op == Opcode::AddInt)
            .unwrap();
        assert_eq!(add_instr.inputs.len(), 3);
    }

    #[test]
    fn opcode_with_immediate_appends_a_trailing_imm_arg() {
        let mut graph = SsaGraph::new();
        let scalar = graph.const_int(7);
        let boxed = graph.op_with_immediate(
            Opcode::Box,
            SsaType::Value,
            vec![graph.valid_lanes, scalar],
            crate::value::TypeTag::Int.code() as i64,
        );
        graph.set_return(boxed);
        let program = lower(&graph, 0);
        let box_instr = program.instructions.iter().find(|i| i.op == Opcode::Box).unwrap();
        assert_eq!(box_instr.inputs.len(), 3);
        assert_eq!(box_instr.inputs[2], Arg::Imm(crate::value::TypeTag::Int.code() as i64));
    }
}
