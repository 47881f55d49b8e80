//! `SYSTEM_DATASHAPE` (a supplemented feature): a diagnostic sink that
//! profiles every top-level struct field it sees — which TLV types
//! turned up under that field name and how often — capped at a fixed
//! number of distinct field paths so a pathological schema-less stream
//! can't grow this sink without bound.

use hashbrown::HashMap;

use lanevm_types::{Ref, SymbolId};
use lanevm_vmm::Vmm;

use crate::error::PipelineError;
use crate::symtab::SymbolTable;
use crate::tlv;
use crate::value::TypeTag;

use super::{AuxParams, RowConsumer, Sink};

const TYPE_COUNT: usize = 13;

/// Per-field type/count histogram: how many times each of the 13 TLV
/// type tags appeared under this field, plus a null count folded into
/// `counts[TypeTag::Null]` like any other tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldShape {
    pub counts: [u64; TYPE_COUNT],
}

impl FieldShape {
    fn record(&mut self, tag: TypeTag) {
        self.counts[tag.code() as usize] += 1;
    }

    fn merge(&mut self, other: &FieldShape) {
        for i in 0..TYPE_COUNT {
            self.counts[i] += other.counts[i];
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Profiles struct-valued rows field by field. Non-struct rows are
/// counted under the reserved field id 0 (`SymbolId::new(0)`), which no
/// real schema field ever binds to.
pub struct DataShape {
    fields: HashMap<SymbolId, FieldShape>,
    field_cap: usize,
    dropped: u64,
}

const NON_STRUCT_FIELD: SymbolId = SymbolId::new(0);

impl DataShape {
    pub fn new(field_cap: usize) -> Self {
        Self {
            fields: HashMap::new(),
            field_cap,
            dropped: 0,
        }
    }

    /// Profile one batch of rows.
    pub fn observe(&mut self, rows: &[Ref], vmm: &Vmm) -> Result<(), PipelineError> {
        for &row in rows {
            let bytes = vmm.read_ref(row).map_err(PipelineError::OutOfMemory)?;
            let header = tlv::decode_header(&bytes)?;
            if header.tag != TypeTag::Struct {
                self.bump(NON_STRUCT_FIELD, header.tag);
                continue;
            }
            for (field_id, start, end) in tlv::struct_fields(&bytes, &header)? {
                let value_header = tlv::decode_header(&bytes[start..end])?;
                self.bump(field_id, value_header.tag);
            }
        }
        Ok(())
    }

    fn bump(&mut self, field: SymbolId, tag: TypeTag) {
        if !self.fields.contains_key(&field) && self.fields.len() >= self.field_cap {
            self.dropped += 1;
            return;
        }
        self.fields.entry(field).or_default().record(tag);
    }

    /// Merge another worker's partial shape into this one (spec's
    /// cross-worker aggregation pattern, same as `GROUP BY`'s merge).
    pub fn merge_from(&mut self, other: &DataShape) {
        for (field, shape) in &other.fields {
            if !self.fields.contains_key(field) && self.fields.len() >= self.field_cap {
                self.dropped += 1;
                continue;
            }
            self.fields.entry(*field).or_default().merge(shape);
        }
        self.dropped += other.dropped;
    }

    /// Every tracked field's shape, plus how many additional distinct
    /// field paths were dropped once the cap was reached.
    pub fn fields(&self) -> &HashMap<SymbolId, FieldShape> {
        &self.fields
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl RowConsumer for DataShape {
    fn symbolize(&mut self, _symtab: &SymbolTable, _aux: &AuxParams) {}

    fn write_rows(&mut self, _rows: &[Ref], _aux: &AuxParams) {
        // See `Filter::write_rows`: profiling needs a `Vmm`, so pipelines
        // call `observe` directly.
    }
}

impl Sink for DataShape {
    fn open(&mut self) -> Result<(), PipelineError> {
        tracing::debug!(field_cap = self.field_cap, "datashape: open");
        Ok(())
    }

    fn close(&mut self) -> Result<(), PipelineError> {
        tracing::debug!(fields = self.fields.len(), dropped = self.dropped, "datashape: close");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanevm_vmm::VmmConfig;

    #[test]
    fn field_types_are_tallied_across_rows() {
        let vmm = Vmm::new(VmmConfig::default());
        let mut shape = DataShape::new(4096);

        let a = tlv::materialize(&vmm, &tlv::encode_struct(&[(SymbolId::new(1), tlv::encode_int(1))])).unwrap();
        let b = tlv::materialize(&vmm, &tlv::encode_struct(&[(SymbolId::new(1), tlv::encode_string("x"))])).unwrap();
        shape.observe(&[a, b], &vmm).unwrap();

        let field = shape.fields().get(&SymbolId::new(1)).unwrap();
        assert_eq!(field.counts[TypeTag::Int.code() as usize], 1);
        assert_eq!(field.counts[TypeTag::String.code() as usize], 1);
        assert_eq!(field.total(), 2);
    }

    #[test]
    fn field_cap_drops_new_fields_once_reached() {
        let vmm = Vmm::new(VmmConfig::default());
        let mut shape = DataShape::new(1);

        let a = tlv::materialize(&vmm, &tlv::encode_struct(&[(SymbolId::new(1), tlv::encode_int(1))])).unwrap();
        let b = tlv::materialize(&vmm, &tlv::encode_struct(&[(SymbolId::new(2), tlv::encode_int(1))])).unwrap();
        shape.observe(&[a, b], &vmm).unwrap();

        assert_eq!(shape.fields().len(), 1);
        assert_eq!(shape.dropped(), 1);
    }

    #[test]
    fn merging_combines_matching_field_histograms() {
        let vmm = Vmm::new(VmmConfig::default());
        let mut a = DataShape::new(4096);
        let mut b = DataShape::new(4096);

        let row = tlv::materialize(&vmm, &tlv::encode_struct(&[(SymbolId::new(1), tlv::encode_int(1))])).unwrap();
        a.observe(&[row], &vmm).unwrap();
        b.observe(&[row], &vmm).unwrap();

        a.merge_from(&b);
        let field = a.fields().get(&SymbolId::new(1)).unwrap();
        assert_eq!(field.total(), 2);
    }
}
