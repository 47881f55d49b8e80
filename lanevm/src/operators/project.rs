//! The column-computing operator (spec §5): evaluates one compiled
//! expression per output field and re-encodes the results as a fresh
//! struct row.

use lanevm_types::{LaneMask, Ref, SymbolId};
use lanevm_vmm::Vmm;

use crate::error::PipelineError;
use crate::interpreter::{BytecodeProgram, ExecContext, Interpreter};
use crate::radix::RadixTree;
use crate::ssa::{self, SsaGraph};
use crate::symtab::SymbolTable;
use crate::tlv;

use super::{run_program, AuxParams, RowConsumer, Writer};

/// One output field: its name and the compiled expression that produces
/// it. Per spec §4.8, the expression's program always ends by boxing its
/// result (directly, or via a trailing `Box` the SSA lowering pass
/// inserts for a bare scalar) — `output_slot` is therefore always a value
/// register, and `Project` never needs to know or care what TLV type it
/// holds: it copies the boxed bytes verbatim.
pub struct ProjectedColumn {
    pub field: SymbolId,
    pub program: BytecodeProgram,
}

impl ProjectedColumn {
    /// Build a column from a compiled expression graph (rather than a
    /// hand-built program) — the planner's usual path (spec §4.4). The
    /// graph must end in a value-typed node (a real `Box`, or an opcode
    /// the lowering pass already boxes), same requirement as `program`.
    pub fn from_ssa(field: SymbolId, graph: SsaGraph, symtab_epoch: u64) -> Self {
        Self { field, program: ssa::compile(graph, symtab_epoch) }
    }

    /// A column whose program never reads `init-mem` is constant across
    /// every row in a segment (spec's "constant-projection fast path") —
    /// lowering already DCE's such programs down to a handful of
    /// instructions, so the cheap check is simply "does nothing in this
    /// program touch the row-reference slot".
    fn is_constant(&self) -> bool {
        !self
            .program
            .instructions
            .iter()
            .any(|instr| instr.inputs.iter().any(|a| a.as_slot() == Some(self.program.init_mem_slot)))
    }
}

/// Computes every projected column for each incoming batch and emits one
/// new struct-encoded row per input row.
pub struct Project {
    columns: Vec<ProjectedColumn>,
    constant_cache: Vec<Option<Vec<u8>>>,
    interpreter: Interpreter,
    out: Vec<Ref>,
}

impl Project {
    pub fn new(columns: Vec<ProjectedColumn>) -> Self {
        let len = columns.len();
        Self {
            columns,
            constant_cache: vec![None; len],
            interpreter: Interpreter::new(),
            out: Vec::new(),
        }
    }

    /// Reset the constant-projection cache; called whenever the symbol
    /// table (and therefore potentially the compiled programs) changes.
    pub fn invalidate_constants(&mut self) {
        self.constant_cache.iter_mut().for_each(|c| *c = None);
    }

    /// Copy a lane's boxed output verbatim: `output_slot` holds one `Ref`
    /// per lane into VMM scratch, already TLV-framed by the program's
    /// trailing `Box`, so there's nothing left to interpret here.
    fn read_output(&self, vmm: &Vmm, lane: usize, output_slot: lanevm_asm::SlotId) -> Result<Vec<u8>, PipelineError> {
        let r = self.interpreter.slots().get(output_slot).as_value()[lane];
        vmm.read_ref(r).map_err(PipelineError::from)
    }

    /// Evaluate every column against `rows`, producing one new row per
    /// input row.
    pub fn project(
        &mut self,
        rows: &[Ref],
        vmm: &Vmm,
        symtab: &SymbolTable,
        trees: &mut [RadixTree],
    ) -> Result<Vec<Ref>, PipelineError> {
        let valid = LaneMask::valid_prefix(rows.len());
        let mut per_row_fields: Vec<Vec<(SymbolId, Vec<u8>)>> = (0..rows.len()).map(|_| Vec::new()).collect();

        for (col_idx, column) in self.columns.iter().enumerate() {
            if column.is_constant() {
                if self.constant_cache[col_idx].is_none() {
                    let mut ctx = ExecContext { vmm, symtab, trees };
                    run_program(&mut self.interpreter, &column.program, LaneMask::valid_prefix(1), &[], &mut ctx, "project")?;
                    self.constant_cache[col_idx] = Some(self.read_output(vmm, 0, column.program.output_slot)?);
                }
                let value = self.constant_cache[col_idx].clone().unwrap();
                for fields in &mut per_row_fields {
                    fields.push((column.field, value.clone()));
                }
                continue;
            }

            let mut ctx = ExecContext { vmm, symtab, trees };
            run_program(&mut self.interpreter, &column.program, valid, rows, &mut ctx, "project")?;
            for (lane, fields) in per_row_fields.iter_mut().enumerate() {
                let value = self.read_output(vmm, lane, column.program.output_slot)?;
                fields.push((column.field, value));
            }
        }

        per_row_fields
            .into_iter()
            .map(|mut fields| {
                fields.sort_by_key(|(symbol, _)| *symbol);
                tlv::materialize(vmm, &tlv::encode_struct(&fields)).map_err(PipelineError::from)
            })
            .collect()
    }
}

impl RowConsumer for Project {
    fn symbolize(&mut self, _symtab: &SymbolTable, _aux: &AuxParams) {
        self.invalidate_constants();
    }

    fn write_rows(&mut self, rows: &[Ref], _aux: &AuxParams) {
        // See `Filter::write_rows`: the push protocol alone can't supply
        // the `Vmm`/`SymbolTable` `project` needs, so a pipeline wires
        // `project` by calling `project()` directly from its upstream
        // stage.
        self.out.extend_from_slice(rows);
    }
}

impl Writer for Project {
    fn next(&mut self) -> Option<Vec<Ref>> {
        if self.out.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanevm_asm::{Arg, Instruction, Opcode, SlotId};
    use lanevm_vmm::VmmConfig;

    fn constant_int_column(field: SymbolId, value: i64) -> ProjectedColumn {
        // slot 1 = valid-lanes mask (set by `run`), slot 2 = raw scalar,
        // slot 3 = boxed value the program reports as its output.
        let load = Instruction::new(Opcode::LoadScalarImm, &[Arg::Slot(SlotId::new(2))], &[Arg::Imm(value)]);
        let boxed = Instruction::new(
            Opcode::Box,
            &[Arg::Slot(SlotId::new(3))],
            &[Arg::Slot(SlotId::new(1)), Arg::Slot(SlotId::new(2)), Arg::Imm(crate::value::TypeTag::Int.code() as i64)],
        );
        let ret = Instruction::new(Opcode::Ret, &[], &[Arg::Slot(SlotId::new(1))]);
        let program = BytecodeProgram::new(vec![load, boxed, ret], 4, 0, SlotId::new(3), SlotId::new(1), SlotId::new(0));
        ProjectedColumn { field, program }
    }

    fn ssa_constant_int_column(field: SymbolId, value: i64) -> ProjectedColumn {
        use crate::ssa::SsaType;
        let mut graph = SsaGraph::new();
        let valid_lanes = graph.valid_lanes;
        let scalar = graph.const_int(value);
        let boxed = graph.op_with_immediate(Opcode::Box, SsaType::Value, vec![valid_lanes, scalar], crate::value::TypeTag::Int.code() as i64);
        graph.set_return(boxed);
        ProjectedColumn::from_ssa(field, graph, 0)
    }

    #[test]
    fn column_compiled_from_an_ssa_graph_boxes_the_same_way_as_hand_built_bytecode() {
        let vmm = Vmm::new(VmmConfig::default());
        let symtab = SymbolTable::new();
        let field = SymbolId::new(21);
        let mut project = Project::new(vec![ssa_constant_int_column(field, 9)]);
        let rows = vec![Ref::new(0, 1)];
        let mut trees: [RadixTree; 0] = [];
        let out = project.project(&rows, &vmm, &symtab, &mut trees).unwrap();
        assert_eq!(out.len(), 1);
        let bytes = vmm.read_ref(out[0]).unwrap();
        let header = tlv::decode_header(&bytes).unwrap();
        assert!(matches!(header.tag, crate::value::TypeTag::Struct));
    }

    #[test]
    fn constant_column_is_computed_once_and_reused() {
        let vmm = Vmm::new(VmmConfig::default());
        let symtab = SymbolTable::new();
        let field = SymbolId::new(20);
        let mut project = Project::new(vec![constant_int_column(field, 7)]);
        let rows = vec![Ref::new(0, 1), Ref::new(0, 1), Ref::new(0, 1)];
        let mut trees: [RadixTree; 0] = [];
        let out = project.project(&rows, &vmm, &symtab, &mut trees).unwrap();
        assert_eq!(out.len(), 3);
        for r in out {
            let bytes = vmm.read_ref(r).unwrap();
            let header = tlv::decode_header(&bytes).unwrap();
            assert!(matches!(header.tag, crate::value::TypeTag::Struct));
        }
    }
}
