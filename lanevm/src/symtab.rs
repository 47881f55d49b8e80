//! The per-chunk symbol table (spec §3): an ordered mapping from symbol
//! IDs to field names, rebuilt whenever a stream marker is observed.

use hashbrown::HashMap;

use lanevm_types::{SymbolId, RESERVED_SYMBOL_COUNT};
use lanevm_vmm::Vmm;

use crate::error::DecodeError;
use crate::tlv;

/// System-reserved symbol names, assigned IDs `0..RESERVED_SYMBOL_COUNT`
/// regardless of what a particular stream's table declares. ID 1 is the
/// field name the row splitter looks for inside a symbol-table fragment's
/// wrapped struct (spec §6: "a struct containing a list of strings").
pub const RESERVED_NAMES: [&str; RESERVED_SYMBOL_COUNT as usize] = [
    "$0", "symbols", "name", "version", "imports", "max_id", "$ion", "$ion_1_0", "_", "$1",
];

/// Field name, inside a symbol-table fragment's wrapped struct, that
/// carries the list of interned strings.
pub const SYMBOLS_FIELD: SymbolId = SymbolId::new(1);

/// An ordered symbol table plus a monotonic epoch counter. Every
/// stream-level reset produces a table with a higher epoch; scratch
/// offsets and compiled SSA programs are tagged with the epoch they were
/// built against so staleness is a simple integer comparison (spec §4.4,
/// §5).
#[derive(Debug, Clone)]
pub struct SymbolTable {
    names: Vec<String>,
    ids: HashMap<String, SymbolId>,
    epoch: u64,
    /// Pre-encoded TLV string values for each symbol, materialized lazily
    /// into VMM so bytecode can reference a symbol's text without
    /// re-encoding it (spec §3).
    encoded: Vec<Option<lanevm_types::Ref>>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// An empty table seeded with only the reserved names, epoch 0.
    pub fn new() -> Self {
        let names: Vec<String> = RESERVED_NAMES.iter().map(|s| s.to_string()).collect();
        let mut ids = HashMap::new();
        for (i, name) in names.iter().enumerate() {
            ids.insert(name.clone(), SymbolId::new(i as u32));
        }
        let encoded = vec![None; names.len()];
        Self {
            names,
            ids,
            epoch: 0,
            encoded,
        }
    }

    /// Replace the table's contents with a fresh set of interned names,
    /// bumping the epoch. Reserved names keep their fixed IDs.
    pub fn rebuild(&mut self, interned: Vec<String>) {
        tracing::debug!(epoch = self.epoch + 1, count = interned.len(), "symtab: rebuilding");
        let mut names: Vec<String> = RESERVED_NAMES.iter().map(|s| s.to_string()).collect();
        names.extend(interned);
        let mut ids = HashMap::new();
        for (i, name) in names.iter().enumerate() {
            ids.insert(name.clone(), SymbolId::new(i as u32));
        }
        self.encoded = vec![None; names.len()];
        self.names = names;
        self.ids = ids;
        self.epoch += 1;
    }

    /// Intern a new name, assigning it the next available ID. Used outside
    /// of stream-marker rebuilds (e.g. operator-synthesized output fields).
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = SymbolId::new(self.names.len() as u32);
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        self.encoded.push(None);
        id
    }

    /// The current epoch; bumped on every `rebuild`.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Look up a name by ID.
    pub fn name(&self, id: SymbolId) -> Option<&str> {
        self.names.get(id.as_u32() as usize).map(String::as_str)
    }

    /// Look up an ID by name.
    pub fn id(&self, name: &str) -> Option<SymbolId> {
        self.ids.get(name).copied()
    }

    /// Number of interned symbols, including reserved ones.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether only the reserved names are present.
    pub fn is_empty(&self) -> bool {
        self.names.len() <= RESERVED_SYMBOL_COUNT as usize
    }

    /// Materialize (and cache) the TLV string encoding of a symbol's name
    /// inside the VMM, returning a reference bytecode can use directly.
    pub fn encode_into_vmm(&mut self, id: SymbolId, vmm: &Vmm) -> Result<lanevm_types::Ref, DecodeError> {
        let idx = id.as_u32() as usize;
        if let Some(Some(r)) = self.encoded.get(idx) {
            return Ok(*r);
        }
        let name = self
            .name(id)
            .ok_or(DecodeError::UnknownSymbol(id.as_u32()))?
            .to_string();
        let bytes = tlv::encode_string(&name);
        let page = vmm.alloc().map_err(|_| DecodeError::CorruptHeader { offset: 0 })?;
        vmm.write(page.offset(), &bytes)
            .map_err(|_| DecodeError::CorruptHeader { offset: 0 })?;
        let r = lanevm_types::Ref::new(page.offset(), bytes.len() as u32);
        if idx >= self.encoded.len() {
            self.encoded.resize(idx + 1, None);
        }
        self.encoded[idx] = Some(r);
        Ok(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_names_keep_fixed_ids() {
        let mut table = SymbolTable::new();
        table.rebuild(vec!["x".into(), "y".into()]);
        assert_eq!(table.id("symbols"), Some(SymbolId::new(1)));
        assert_eq!(table.id("x"), Some(SymbolId::new(RESERVED_SYMBOL_COUNT)));
    }

    #[test]
    fn rebuild_bumps_epoch_and_invalidates_old_names() {
        let mut table = SymbolTable::new();
        table.rebuild(vec!["a".into()]);
        let epoch1 = table.epoch();
        table.rebuild(vec!["b".into()]);
        assert!(table.epoch() > epoch1);
        assert_eq!(table.id("a"), None);
    }

    #[test]
    fn intern_is_idempotent() {
        let mut table = SymbolTable::new();
        let a = table.intern("total");
        let b = table.intern("total");
        assert_eq!(a, b);
    }
}
