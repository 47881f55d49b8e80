//! The array-splat operator (spec §5): turns one row carrying a `List`
//! value into one output row per element.

use lanevm_types::Ref;
use lanevm_vmm::Vmm;

use crate::error::PipelineError;
use crate::symtab::SymbolTable;
use crate::tlv;
use crate::value::TypeTag;

use super::{AuxParams, RowConsumer, Writer};

/// Splats each input row's `List` value into one row per element, in list
/// order. A row whose value isn't a `List` passes through unchanged
/// (spec's "Non-goals" leave `UNNEST` on a non-array value to the compiler
/// front end to reject; this operator treats it as a one-element list).
#[derive(Default)]
pub struct Unnest {
    out: Vec<Ref>,
}

impl Unnest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expand `rows`, each holding a whole `List`-encoded value, into
    /// individually-addressable element references. Element bytes are
    /// sliced directly out of the source page — no copy, since a list
    /// element is already a self-contained TLV value inside its parent's
    /// byte range.
    pub fn expand(&mut self, rows: &[Ref], vmm: &Vmm) -> Result<Vec<Ref>, PipelineError> {
        let mut out = Vec::new();
        for &row in rows {
            let bytes = vmm.read_ref(row).map_err(PipelineError::OutOfMemory)?;
            let header = tlv::decode_header(&bytes)?;
            if header.tag != TypeTag::List {
                out.push(row);
                continue;
            }
            let mut cursor = header.body_start;
            while cursor < header.total_len() {
                let elem_header = tlv::decode_header(&bytes[cursor..])?;
                let elem_len = elem_header.total_len();
                out.push(Ref::new(row.offset() + cursor as u32, elem_len as u32));
                cursor += elem_len;
            }
        }
        Ok(out)
    }
}

impl RowConsumer for Unnest {
    fn symbolize(&mut self, _symtab: &SymbolTable, _aux: &AuxParams) {}

    fn write_rows(&mut self, rows: &[Ref], _aux: &AuxParams) {
        self.out.extend_from_slice(rows);
    }
}

impl Writer for Unnest {
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
    fn list_expands_into_one_row_per_element() {
        let vmm = Vmm::new(VmmConfig::default());
        let mut body = Vec::new();
        body.extend(tlv::encode_int(1));
        body.extend(tlv::encode_int(2));
        body.extend(tlv::encode_int(3));
        let mut list = Vec::new();
        list.push((TypeTag::List.code() << 4) | 14);
        tlv::encode_varuint(body.len() as u64, &mut list);
        list.extend(body);

        let row = tlv::materialize(&vmm, &list).unwrap();
        let mut unnest = Unnest::new();
        let elements = unnest.expand(&[row], &vmm).unwrap();
        assert_eq!(elements.len(), 3);
        for (i, elem) in elements.iter().enumerate() {
            let bytes = vmm.read_ref(*elem).unwrap();
            let header = tlv::decode_header(&bytes).unwrap();
            assert_eq!(tlv::decode_int(&bytes, &header), i as i64 + 1);
        }
    }

    #[test]
    fn non_list_value_passes_through() {
        let vmm = Vmm::new(VmmConfig::default());
        let row = tlv::materialize(&vmm, &tlv::encode_int(5)).unwrap();
        let mut unnest = Unnest::new();
        let out = unnest.expand(&[row], &vmm).unwrap();
        assert_eq!(out, vec![row]);
    }
}
