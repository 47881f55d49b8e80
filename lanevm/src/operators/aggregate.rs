//! The scalar (non-grouped) aggregation sink (spec §5, §6): a single row
//! of fixed-width accumulator slots fed by a compiled expression per
//! aggregate column, with no group-by key.

use lanevm_types::{LaneMask, Ref, SymbolId};
use lanevm_vmm::Vmm;

use crate::aggregate::{self, AggKind};
use crate::error::PipelineError;
use crate::interpreter::{BytecodeProgram, ExecContext, Interpreter};
use crate::radix::RadixTree;
use crate::symtab::SymbolTable;

use super::{run_program, AuxParams, RowConsumer, Sink};

/// Which register kind an aggregate input's compiled program produces, so
/// `write_rows` knows whether to read it back as an `i64` or an `f64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Int,
    Float,
}

/// One output aggregate: which accumulation it performs, its offset in
/// the single accumulator row, the compiled expression that feeds it, and
/// the output field name it's emitted under.
pub struct AggregateColumn {
    pub kind: AggKind,
    pub offset: usize,
    pub width: usize,
    pub input: BytecodeProgram,
    pub input_kind: InputKind,
    pub output_field: SymbolId,
}

/// A terminal aggregation stage with exactly one output row (no `GROUP
/// BY`). Every incoming batch feeds every column's accumulator directly;
/// `close` reads the final values back out.
pub struct ScalarAggregate {
    columns: Vec<AggregateColumn>,
    row: Vec<u8>,
    interpreter: Interpreter,
}

impl ScalarAggregate {
    pub fn new(columns: Vec<AggregateColumn>) -> Self {
        let row_width = columns.iter().map(|c| c.offset + c.width).max().unwrap_or(0);
        let mut row = vec![0u8; row_width];
        for column in &columns {
            column.kind.init(&mut row[column.offset..column.offset + column.width]);
        }
        Self {
            columns,
            row,
            interpreter: Interpreter::new(),
        }
    }

    /// Accumulate one batch of rows into every column.
    pub fn accumulate(
        &mut self,
        rows: &[Ref],
        vmm: &Vmm,
        symtab: &SymbolTable,
        trees: &mut [RadixTree],
    ) -> Result<(), PipelineError> {
        let valid = LaneMask::valid_prefix(rows.len());
        for column in &self.columns {
            let mut ctx = ExecContext { vmm, symtab, trees };
            let mask = run_program(&mut self.interpreter, &column.input, valid, rows, &mut ctx, "aggregate")?;
            let slice = &mut self.row[column.offset..column.offset + column.width];
            for lane in 0..rows.len() {
                if !mask.test(lane) {
                    continue;
                }
                let raw = self.interpreter.slots().get(column.input.output_slot).as_scalar()[lane];
                match column.input_kind {
                    InputKind::Int => aggregate::accumulate_int(column.kind, slice, raw as i64),
                    InputKind::Float => aggregate::accumulate_float(column.kind, slice, f64::from_bits(raw)),
                }
            }
        }
        Ok(())
    }

    /// Read one column's final value as an integer. Panics if the column
    /// wasn't an integer-producing kind.
    pub fn read_int(&self, column: &AggregateColumn) -> i64 {
        i64::from_le_bytes(self.row[column.offset..column.offset + 8].try_into().unwrap())
    }

    /// Read one column's final value as a float, using the Neumaier
    /// compensated total for `SumFloat`.
    pub fn read_float(&self, column: &AggregateColumn) -> f64 {
        match column.kind {
            AggKind::SumFloat => aggregate::read_compensated_sum(&self.row[column.offset..column.offset + column.width]),
            _ => f64::from_le_bytes(self.row[column.offset..column.offset + 8].try_into().unwrap()),
        }
    }

    pub fn columns(&self) -> &[AggregateColumn] {
        &self.columns
    }
}

impl RowConsumer for ScalarAggregate {
    fn symbolize(&mut self, _symtab: &SymbolTable, _aux: &AuxParams) {}

    fn write_rows(&mut self, _rows: &[Ref], _aux: &AuxParams) {
        // See `Filter::write_rows`: accumulation needs a `Vmm`/
        // `SymbolTable`, so pipelines call `accumulate` directly.
    }
}

impl Sink for ScalarAggregate {
    fn open(&mut self) -> Result<(), PipelineError> {
        tracing::debug!(columns = self.columns.len(), "scalar-aggregate: open");
        Ok(())
    }

    fn close(&mut self) -> Result<(), PipelineError> {
        tracing::debug!("scalar-aggregate: close");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanevm_asm::{Arg, Instruction, Opcode, SlotId};
    use lanevm_vmm::VmmConfig;

    fn count_column() -> AggregateColumn {
        let load = Instruction::new(Opcode::LoadScalarImm, &[Arg::Slot(SlotId::new(2))], &[Arg::Imm(1)]);
        let ret = Instruction::new(Opcode::Ret, &[], &[Arg::Slot(SlotId::new(1))]);
        let program = BytecodeProgram::new(vec![load, ret], 3, 0, SlotId::new(2), SlotId::new(1), SlotId::new(0));
        AggregateColumn {
            kind: AggKind::Count,
            offset: 0,
            width: 8,
            input: program,
            input_kind: InputKind::Int,
            output_field: SymbolId::new(20),
        }
    }

    #[test]
    fn count_accumulates_across_batches() {
        let vmm = Vmm::new(VmmConfig::default());
        let symtab = SymbolTable::new();
        let mut agg = ScalarAggregate::new(vec![count_column()]);
        let rows = vec![Ref::new(0, 1), Ref::new(0, 1), Ref::new(0, 1)];
        let mut trees: [RadixTree; 0] = [];
        agg.accumulate(&rows, &vmm, &symtab, &mut trees).unwrap();
        agg.accumulate(&rows[..1], &vmm, &symtab, &mut trees).unwrap();
        assert_eq!(agg.read_int(&agg.columns()[0]), 4);
    }
}
