//! `DISTINCT` (a supplemented feature): a thin wrapper over
//! [`HashAggregate`](super::hash_aggregate::HashAggregate) with zero
//! aggregate columns — a row's presence in the radix tree at all is the
//! only fact tracked, so grouping alone gives deduplication.

use lanevm_types::{Ref, SymbolId};
use lanevm_vmm::Vmm;

use crate::error::PipelineError;
use crate::interpreter::BytecodeProgram;
use crate::radix::RadixTree;
use crate::symtab::SymbolTable;

use super::hash_aggregate::{EmitOrder, HashAggregate, KeyColumn};
use super::{AuxParams, RowConsumer, Sink};

/// Deduplicates rows by a compiled composite-key expression, same as
/// `GROUP BY` with no aggregates. `emit` yields one representative row
/// per distinct key.
pub struct Distinct {
    inner: HashAggregate,
}

impl Distinct {
    pub fn new(key_program: BytecodeProgram, group_keys: Vec<KeyColumn>, limit: Option<usize>) -> Self {
        Self {
            inner: HashAggregate::new(key_program, Vec::new(), group_keys, limit, EmitOrder::Fingerprint),
        }
    }

    pub fn accumulate(
        &mut self,
        rows: &[Ref],
        vmm: &Vmm,
        symtab: &SymbolTable,
        trees: &mut [RadixTree],
    ) -> Result<(), PipelineError> {
        self.inner.accumulate(rows, vmm, symtab, trees)
    }

    pub fn emit(&self, vmm: &Vmm) -> Result<Vec<Ref>, PipelineError> {
        self.inner.emit(vmm)
    }

    pub fn group_count(&self) -> usize {
        self.inner.group_count()
    }
}

impl RowConsumer for Distinct {
    fn symbolize(&mut self, symtab: &SymbolTable, aux: &AuxParams) {
        self.inner.symbolize(symtab, aux);
    }

    fn write_rows(&mut self, rows: &[Ref], aux: &AuxParams) {
        self.inner.write_rows(rows, aux);
    }
}

impl Sink for Distinct {
    fn open(&mut self) -> Result<(), PipelineError> {
        tracing::debug!("distinct: open");
        Ok(())
    }

    fn close(&mut self) -> Result<(), PipelineError> {
        tracing::debug!(groups = self.inner.group_count(), "distinct: close");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanevm_asm::{Arg, Instruction, Opcode, SlotId};
    use lanevm_vmm::VmmConfig;
    use crate::tlv;

    fn hash_whole_row() -> BytecodeProgram {
        let hash = Instruction::new(Opcode::HashValue, &[Arg::Slot(SlotId::new(2))], &[Arg::Slot(SlotId::new(0))]);
        let ret = Instruction::new(Opcode::Ret, &[], &[Arg::Slot(SlotId::new(1))]);
        BytecodeProgram::new(vec![hash, ret], 3, 0, SlotId::new(2), SlotId::new(1), SlotId::new(0))
    }

    #[test]
    fn repeated_rows_collapse_to_one_group() {
        let vmm = Vmm::new(VmmConfig::default());
        let symtab = SymbolTable::new();
        let mut trees: [RadixTree; 0] = [];
        let mut distinct = Distinct::new(hash_whole_row(), vec![], None);

        let a = tlv::materialize(&vmm, &tlv::encode_struct(&[(SymbolId::new(1), tlv::encode_int(5))])).unwrap();
        let b = tlv::materialize(&vmm, &tlv::encode_struct(&[(SymbolId::new(1), tlv::encode_int(5))])).unwrap();
        let c = tlv::materialize(&vmm, &tlv::encode_struct(&[(SymbolId::new(1), tlv::encode_int(6))])).unwrap();

        distinct.accumulate(&[a, b, c], &vmm, &symtab, &mut trees).unwrap();
        assert_eq!(distinct.group_count(), 2);

        let out = distinct.emit(&vmm).unwrap();
        assert_eq!(out.len(), 2);
    }
}
