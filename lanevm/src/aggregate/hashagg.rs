//! Grouped aggregation on top of the radix tree (spec §6).

use parking_lot::Mutex;

use lanevm_types::SymbolId;

use super::AggKind;
use crate::radix::RadixTree;

/// One aggregate column: which accumulation it performs and its byte
/// offset within a group's row (offsets are compile-determined, spec
/// §6: "fixed-width per-group buffers at compile-determined offsets").
#[derive(Debug, Clone, Copy)]
pub struct AggregateSlot {
    pub kind: AggKind,
    pub offset: usize,
    pub width: usize,
}

/// A group-by aggregation over a set of keyed fingerprints, each group
/// carrying one row of fixed-width accumulator slots.
pub struct HashAggregateEngine {
    tree: RadixTree,
    slots: Vec<AggregateSlot>,
    /// Output field order (spec's "sorted+limited ordered emission in
    /// symbol-ID field order").
    output_fields: Vec<SymbolId>,
}

impl HashAggregateEngine {
    /// Build an engine whose group row is the concatenation of `slots`,
    /// each initialized per its kind's sentinel.
    pub fn new(slots: Vec<AggregateSlot>, output_fields: Vec<SymbolId>) -> Self {
        let row_width = slots.iter().map(|s| s.offset + s.width).max().unwrap_or(0);
        Self {
            tree: RadixTree::new(row_width),
            slots,
            output_fields,
        }
    }

    /// Accumulate one row's integer inputs into its group, creating the
    /// group (with sentinel-initialized slots) on first sight.
    pub fn accumulate_int(&mut self, key: u128, inputs: &[(usize, i64)]) {
        let entry = self.tree.entry(key);
        if entry.is_new {
            for slot in &self.slots {
                slot.kind.init(&mut entry.buffer[slot.offset..slot.offset + slot.width]);
            }
        }
        for &(slot_idx, value) in inputs {
            let slot = self.slots[slot_idx];
            super::accumulate_int(slot.kind, &mut entry.buffer[slot.offset..slot.offset + slot.width], value);
        }
    }

    /// Accumulate one row's float inputs into its group.
    pub fn accumulate_float(&mut self, key: u128, inputs: &[(usize, f64)]) {
        let entry = self.tree.entry(key);
        if entry.is_new {
            for slot in &self.slots {
                slot.kind.init(&mut entry.buffer[slot.offset..slot.offset + slot.width]);
            }
        }
        for &(slot_idx, value) in inputs {
            let slot = self.slots[slot_idx];
            super::accumulate_float(slot.kind, &mut entry.buffer[slot.offset..slot.offset + slot.width], value);
        }
    }

    /// Number of distinct groups seen so far.
    pub fn group_count(&self) -> usize {
        self.tree.len()
    }

    /// Merge another worker's partial engine into this one. The two must
    /// share the same slot layout.
    pub fn merge_from(&mut self, other: &HashAggregateEngine) {
        for (key, src) in other.tree.iter() {
            let entry = self.tree.entry(key);
            if entry.is_new {
                entry.buffer.copy_from_slice(src);
            } else {
                for slot in &self.slots {
                    super::merge(
                        slot.kind,
                        &mut entry.buffer[slot.offset..slot.offset + slot.width],
                        &src[slot.offset..slot.offset + slot.width],
                    );
                }
            }
        }
    }

    /// Emit every group's raw accumulator row, in trie (not sorted) order.
    /// Callers that need symbol-ID field order sort by `output_fields`
    /// externally, since the engine itself has no row-materialization
    /// concern.
    pub fn groups(&self) -> impl Iterator<Item = (u128, &[u8])> {
        self.tree.iter()
    }

    pub fn output_fields(&self) -> &[SymbolId] {
        &self.output_fields
    }

    pub fn slots(&self) -> &[AggregateSlot] {
        &self.slots
    }
}

/// A cross-worker merge point: each worker accumulates into its own
/// engine, then merges into the shared one under a lock at segment end
/// (spec §5's "per-group buffers ... merge across workers").
pub struct SharedHashAggregate(Mutex<HashAggregateEngine>);

impl SharedHashAggregate {
    pub fn new(slots: Vec<AggregateSlot>, output_fields: Vec<SymbolId>) -> Self {
        Self(Mutex::new(HashAggregateEngine::new(slots, output_fields)))
    }

    pub fn merge_from(&self, worker: &HashAggregateEngine) {
        self.0.lock().merge_from(worker);
    }

    pub fn into_inner(self) -> HashAggregateEngine {
        self.0.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots() -> Vec<AggregateSlot> {
        vec![
            AggregateSlot { kind: AggKind::SumInt, offset: 0, width: 8 },
            AggregateSlot { kind: AggKind::Count, offset: 8, width: 8 },
        ]
    }

    #[test]
    fn groups_accumulate_independently() {
        let mut engine = HashAggregateEngine::new(slots(), vec![]);
        engine.accumulate_int(1, &[(0, 10), (1, 1)]);
        engine.accumulate_int(1, &[(0, 5), (1, 1)]);
        engine.accumulate_int(2, &[(0, 100), (1, 1)]);
        assert_eq!(engine.group_count(), 2);
        let group1 = engine.groups().find(|(k, _)| *k == 1).unwrap().1;
        assert_eq!(i64::from_le_bytes(group1[0..8].try_into().unwrap()), 15);
        assert_eq!(i64::from_le_bytes(group1[8..16].try_into().unwrap()), 2);
    }

    #[test]
    fn merging_combines_matching_groups() {
        let mut a = HashAggregateEngine::new(slots(), vec![]);
        a.accumulate_int(1, &[(0, 10), (1, 1)]);
        let mut b = HashAggregateEngine::new(slots(), vec![]);
        b.accumulate_int(1, &[(0, 20), (1, 1)]);
        b.accumulate_int(2, &[(0, 1), (1, 1)]);
        a.merge_from(&b);
        assert_eq!(a.group_count(), 2);
        let group1 = a.groups().find(|(k, _)| *k == 1).unwrap().1;
        assert_eq!(i64::from_le_bytes(group1[0..8].try_into().unwrap()), 30);
    }
}
