//! Hash join (a supplemented feature beyond the core pipeline: equi-join
//! two row streams on a compiled key expression each, build side indexed
//! by fingerprint the same way `GROUP BY` indexes its groups).

use lanevm_types::{LaneMask, Ref, SymbolId};
use lanevm_vmm::Vmm;

use crate::error::PipelineError;
use crate::interpreter::{BytecodeProgram, ExecContext, Interpreter};
use crate::radix::RadixTree;
use crate::ssa::{self, SsaGraph};
use crate::symtab::SymbolTable;
use crate::tlv;

use super::{run_program, AuxParams, RowConsumer, Writer};

/// The build side: every row seen is keyed by `key_program` and filed
/// into a radix tree. Since a key can match more than one row, the tree's
/// fixed-width leaf buffer holds an 8-byte index into `rows_by_bucket`
/// rather than the rows themselves.
pub struct HashJoinBuild {
    key_program: BytecodeProgram,
    index: RadixTree,
    rows_by_bucket: Vec<Vec<Ref>>,
    interpreter: Interpreter,
}

impl HashJoinBuild {
    pub fn new(key_program: BytecodeProgram) -> Self {
        Self {
            key_program,
            index: RadixTree::new(8),
            rows_by_bucket: Vec::new(),
            interpreter: Interpreter::new(),
        }
    }

    /// Build the build side from a compiled key expression graph rather
    /// than a hand-built program — the planner's usual path (spec §4.4).
    pub fn from_ssa(graph: SsaGraph, symtab_epoch: u64) -> Self {
        Self::new(ssa::compile(graph, symtab_epoch))
    }

    /// Key and file one batch of build-side rows.
    pub fn build(
        &mut self,
        rows: &[Ref],
        vmm: &Vmm,
        symtab: &SymbolTable,
        trees: &mut [RadixTree],
    ) -> Result<(), PipelineError> {
        let valid = LaneMask::valid_prefix(rows.len());
        let mut ctx = ExecContext { vmm, symtab, trees };
        let mask = run_program(&mut self.interpreter, &self.key_program, valid, rows, &mut ctx, "hash-join-build")?;
        let keys = *self.interpreter.slots().get(self.key_program.output_slot).as_hash();
        for (lane, &row) in rows.iter().enumerate() {
            if !mask.test(lane) {
                continue;
            }
            let entry = self.index.entry(keys[lane]);
            if entry.is_new {
                let bucket_idx = self.rows_by_bucket.len() as u64;
                entry.buffer.copy_from_slice(&bucket_idx.to_le_bytes());
                self.rows_by_bucket.push(vec![row]);
            } else {
                let bucket_idx = u64::from_le_bytes(entry.buffer.try_into().unwrap());
                self.rows_by_bucket[bucket_idx as usize].push(row);
            }
        }
        Ok(())
    }

    fn matches(&self, key: u128) -> &[Ref] {
        match self.index.find(key) {
            Some(buffer) => {
                let bucket_idx = u64::from_le_bytes(buffer.try_into().unwrap());
                &self.rows_by_bucket[bucket_idx as usize]
            }
            None => &[],
        }
    }
}

/// The probe side: streams rows past a built `HashJoinBuild`, emitting one
/// combined row per matching pair. Unmatched probe rows are dropped (inner
/// join only — spec's outer-join variants are a front-end concern that
/// would compile a different probe program, not something this operator
/// needs to special-case).
pub struct HashJoinProbe {
    key_program: BytecodeProgram,
    interpreter: Interpreter,
    out: Vec<Ref>,
}

impl HashJoinProbe {
    pub fn new(key_program: BytecodeProgram) -> Self {
        Self {
            key_program,
            interpreter: Interpreter::new(),
            out: Vec::new(),
        }
    }

    /// Build the probe side from a compiled key expression graph rather
    /// than a hand-built program — the planner's usual path (spec §4.4).
    pub fn from_ssa(graph: SsaGraph, symtab_epoch: u64) -> Self {
        Self::new(ssa::compile(graph, symtab_epoch))
    }

    /// Probe one batch of rows against `build`, emitting a struct row per
    /// match that concatenates the probe row's fields with the matched
    /// build row's fields (build-side fields win on a name collision,
    /// matching the common "right side shadows left" join convention).
    pub fn probe(
        &mut self,
        rows: &[Ref],
        build: &HashJoinBuild,
        vmm: &Vmm,
        symtab: &SymbolTable,
        trees: &mut [RadixTree],
    ) -> Result<Vec<Ref>, PipelineError> {
        let valid = LaneMask::valid_prefix(rows.len());
        let mut ctx = ExecContext { vmm, symtab, trees };
        let mask = run_program(&mut self.interpreter, &self.key_program, valid, rows, &mut ctx, "hash-join-probe")?;
        let keys = *self.interpreter.slots().get(self.key_program.output_slot).as_hash();

        let mut out = Vec::new();
        for (lane, &probe_row) in rows.iter().enumerate() {
            if !mask.test(lane) {
                continue;
            }
            for &build_row in build.matches(keys[lane]) {
                out.push(self.combine(probe_row, build_row, vmm)?);
            }
        }
        Ok(out)
    }

    fn combine(&self, probe_row: Ref, build_row: Ref, vmm: &Vmm) -> Result<Ref, PipelineError> {
        let probe_bytes = vmm.read_ref(probe_row).map_err(PipelineError::OutOfMemory)?;
        let build_bytes = vmm.read_ref(build_row).map_err(PipelineError::OutOfMemory)?;
        let probe_header = tlv::decode_header(&probe_bytes)?;
        let build_header = tlv::decode_header(&build_bytes)?;

        let mut merged: Vec<(SymbolId, Vec<u8>)> = Vec::new();
        for (id, start, end) in tlv::struct_fields(&probe_bytes, &probe_header)? {
            merged.push((id, probe_bytes[start..end].to_vec()));
        }
        for (id, start, end) in tlv::struct_fields(&build_bytes, &build_header)? {
            if let Some(slot) = merged.iter_mut().find(|(existing, _)| *existing == id) {
                slot.1 = build_bytes[start..end].to_vec();
            } else {
                merged.push((id, build_bytes[start..end].to_vec()));
            }
        }
        tlv::materialize(vmm, &tlv::encode_struct(&merged)).map_err(PipelineError::from)
    }
}

impl RowConsumer for HashJoinProbe {
    fn symbolize(&mut self, _symtab: &SymbolTable, _aux: &AuxParams) {}

    fn write_rows(&mut self, rows: &[Ref], _aux: &AuxParams) {
        // See `Filter::write_rows`: probing needs the build side and a
        // `Vmm`, so pipelines call `probe` directly.
        self.out.extend_from_slice(rows);
    }
}

impl Writer for HashJoinProbe {
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

    /// A key program that hashes the whole current row (`init_mem`
    /// directly) — the build/probe side's key expression in real
    /// compiled queries hashes a single field instead, but the operator
    /// itself is indifferent to what produced the `Value` it hashes.
    fn hash_whole_row() -> BytecodeProgram {
        let hash = Instruction::new(Opcode::HashValue, &[Arg::Slot(SlotId::new(2))], &[Arg::Slot(SlotId::new(0))]);
        let ret = Instruction::new(Opcode::Ret, &[], &[Arg::Slot(SlotId::new(1))]);
        BytecodeProgram::new(vec![hash, ret], 3, 0, SlotId::new(2), SlotId::new(1), SlotId::new(0))
    }

    #[test]
    fn matching_keys_produce_one_combined_row_per_pair() {
        let vmm = Vmm::new(VmmConfig::default());
        let symtab = SymbolTable::new();
        let mut trees: [RadixTree; 0] = [];

        // Same content on both sides so hashing the whole row matches.
        let left = tlv::materialize(&vmm, &tlv::encode_struct(&[(SymbolId::new(10), tlv::encode_int(7))])).unwrap();
        let right = tlv::materialize(&vmm, &tlv::encode_struct(&[(SymbolId::new(10), tlv::encode_int(7))])).unwrap();

        let mut build = HashJoinBuild::new(hash_whole_row());
        build.build(&[left], &vmm, &symtab, &mut trees).unwrap();
        assert_eq!(build.rows_by_bucket.len(), 1);

        let mut probe = HashJoinProbe::new(hash_whole_row());
        let out = probe.probe(&[right], &build, &vmm, &symtab, &mut trees).unwrap();
        assert_eq!(out.len(), 1);

        let bytes = vmm.read_ref(out[0]).unwrap();
        let header = tlv::decode_header(&bytes).unwrap();
        let fields = tlv::struct_fields(&bytes, &header).unwrap();
        assert_eq!(fields.len(), 1);
    }

    fn hash_whole_row_via_ssa() -> SsaGraph {
        use crate::ssa::SsaType;
        let mut graph = SsaGraph::new();
        let init_mem = graph.init_mem;
        let hash = graph.op(Opcode::HashValue, SsaType::Hash, vec![init_mem]);
        graph.set_return(hash);
        graph
    }

    #[test]
    fn build_and_probe_key_programs_compiled_from_ssa_still_match() {
        let vmm = Vmm::new(VmmConfig::default());
        let symtab = SymbolTable::new();
        let mut trees: [RadixTree; 0] = [];

        let left = tlv::materialize(&vmm, &tlv::encode_struct(&[(SymbolId::new(10), tlv::encode_int(7))])).unwrap();
        let right = tlv::materialize(&vmm, &tlv::encode_struct(&[(SymbolId::new(10), tlv::encode_int(7))])).unwrap();

        let mut build = HashJoinBuild::from_ssa(hash_whole_row_via_ssa(), 0);
        build.build(&[left], &vmm, &symtab, &mut trees).unwrap();

        let mut probe = HashJoinProbe::from_ssa(hash_whole_row_via_ssa(), 0);
        let out = probe.probe(&[right], &build, &vmm, &symtab, &mut trees).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn non_matching_keys_produce_nothing() {
        let vmm = Vmm::new(VmmConfig::default());
        let symtab = SymbolTable::new();
        let mut trees: [RadixTree; 0] = [];

        let left = tlv::materialize(&vmm, &tlv::encode_struct(&[(SymbolId::new(10), tlv::encode_int(7))])).unwrap();
        let right = tlv::materialize(&vmm, &tlv::encode_struct(&[(SymbolId::new(10), tlv::encode_int(8))])).unwrap();

        let mut build = HashJoinBuild::new(hash_whole_row());
        build.build(&[left], &vmm, &symtab, &mut trees).unwrap();

        let mut probe = HashJoinProbe::new(hash_whole_row());
        let out = probe.probe(&[right], &build, &vmm, &symtab, &mut trees).unwrap();
        assert!(out.is_empty());
    }
}
