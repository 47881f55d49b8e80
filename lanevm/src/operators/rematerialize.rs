//! The compaction operator (spec §5): copies rows out of scratch pages
//! that are about to be reclaimed into pages this operator owns, so a
//! downstream stage (a sort buffer, a `Tee` branch that outlives the
//! current segment) can hold onto them past `end_segment`.

use lanevm_types::Ref;
use lanevm_vmm::Vmm;

use crate::error::PipelineError;
use crate::symtab::SymbolTable;
use crate::tlv;

use super::{AuxParams, RowConsumer, Writer};

/// Copies each row it's given into a page this operator owns, handing
/// back a fresh `Ref` that remains valid after the operator that produced
/// the original page calls `end_segment`.
pub struct Rematerialize {
    owned_pages: Vec<Ref>,
    out: Vec<Ref>,
}

impl Default for Rematerialize {
    fn default() -> Self {
        Self::new()
    }
}

impl Rematerialize {
    pub fn new() -> Self {
        Self {
            owned_pages: Vec::new(),
            out: Vec::new(),
        }
    }

    /// Copy `rows` into freshly owned pages, returning the new references.
    pub fn copy(&mut self, rows: &[Ref], vmm: &Vmm) -> Result<Vec<Ref>, PipelineError> {
        let mut out = Vec::with_capacity(rows.len());
        for &row in rows {
            let bytes = vmm.read_ref(row).map_err(crate::error::PipelineError::OutOfMemory)?;
            let copied = tlv::materialize(vmm, &bytes)?;
            self.owned_pages.push(copied);
            out.push(copied);
        }
        Ok(out)
    }

    /// Release every page this operator has accumulated ownership of.
    /// Callers are responsible for calling this only once downstream has
    /// finished reading (`rematerialize` itself has no notion of when
    /// that is — it's a building block, not a buffering policy).
    pub fn release(&mut self, vmm: &Vmm) {
        // `tlv::materialize` allocates one whole page per call, so each
        // owned reference already starts at a page boundary; `free` wants
        // the full page-sized span back, not the record's own length.
        for page in self.owned_pages.drain(..) {
            vmm.free(Ref::new(page.offset(), lanevm_types::PAGE_SIZE));
        }
    }
}

impl RowConsumer for Rematerialize {
    fn symbolize(&mut self, _symtab: &SymbolTable, _aux: &AuxParams) {}

    fn write_rows(&mut self, rows: &[Ref], _aux: &AuxParams) {
        // As with `filter`/`project`, the push-protocol entry point lacks
        // the `Vmm` this operator needs; real pipelines call `copy`
        // directly from the upstream stage.
        self.out.extend_from_slice(rows);
    }
}

impl Writer for Rematerialize {
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
    use lanevm_vmm::VmmConfig;

    #[test]
    fn copied_rows_survive_the_source_page_being_freed() {
        let vmm = Vmm::new(VmmConfig::default());
        let page = vmm.alloc().unwrap();
        vmm.write(page.offset(), b"hello").unwrap();
        let original = Ref::new(page.offset(), 5);

        let mut remat = Rematerialize::new();
        let copies = remat.copy(&[original], &vmm).unwrap();
        vmm.free(page);

        assert_eq!(vmm.read_ref(copies[0]).unwrap(), b"hello");
        remat.release(&vmm);
    }
}
