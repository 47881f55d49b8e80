//! The row-count operator (spec §5): passes rows through until a shared
//! counter reaches a target, then suppresses the rest for the remainder
//! of the query.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lanevm_types::Ref;

use crate::symtab::SymbolTable;

use super::{AuxParams, RowConsumer, Writer};

/// A counter shared across every worker feeding the same `LIMIT` clause,
/// so a fan-in pipeline stops emitting as soon as any worker's share of
/// the limit is exhausted rather than each worker independently emitting
/// up to the full limit.
#[derive(Debug, Default)]
pub struct SharedLimitCounter(AtomicU64);

impl SharedLimitCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Reserve up to `want` more slots, returning how many were actually
    /// granted (fewer than `want` once the limit is nearly exhausted,
    /// zero once it's hit).
    fn reserve(&self, target: u64, want: u64) -> u64 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let remaining = target.saturating_sub(current);
            let grant = remaining.min(want);
            if grant == 0 {
                return 0;
            }
            match self.0.compare_exchange_weak(
                current,
                current + grant,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return grant,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Truncates the row stream to `target` rows total, coordinating with
/// sibling `Limit` instances over the same [`SharedLimitCounter`] when a
/// query fans the same `LIMIT` clause across workers.
pub struct Limit {
    target: u64,
    counter: Arc<SharedLimitCounter>,
    out: Vec<Ref>,
    exhausted: bool,
}

impl Limit {
    pub fn new(target: u64, counter: Arc<SharedLimitCounter>) -> Self {
        Self {
            target,
            counter,
            out: Vec::new(),
            exhausted: false,
        }
    }
}

impl RowConsumer for Limit {
    fn symbolize(&mut self, _symtab: &SymbolTable, _aux: &AuxParams) {}

    fn write_rows(&mut self, rows: &[Ref], _aux: &AuxParams) {
        if self.exhausted {
            return;
        }
        let granted = self.counter.reserve(self.target, rows.len() as u64) as usize;
        if granted == 0 {
            self.exhausted = true;
            return;
        }
        self.out.extend_from_slice(&rows[..granted]);
        if granted < rows.len() {
            self.exhausted = true;
        }
    }
}

impl Writer for Limit {
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

    #[test]
    fn stops_once_target_reached() {
        let counter = Arc::new(SharedLimitCounter::new());
        let mut limit = Limit::new(5, counter);
        let rows: Vec<Ref> = (0..10).map(|i| Ref::new(i, 1)).collect();
        limit.write_rows(&rows, &AuxParams::empty());
        assert_eq!(limit.next().unwrap().len(), 5);
        assert!(limit.next().is_none());
        limit.write_rows(&rows, &AuxParams::empty());
        assert!(limit.next().is_none());
    }

    #[test]
    fn shared_counter_is_respected_across_instances() {
        let counter = Arc::new(SharedLimitCounter::new());
        let mut a = Limit::new(3, counter.clone());
        let mut b = Limit::new(3, counter);
        let rows: Vec<Ref> = (0..2).map(|i| Ref::new(i, 1)).collect();
        a.write_rows(&rows, &AuxParams::empty());
        b.write_rows(&rows, &AuxParams::empty());
        let a_emitted = a.next().map(|v| v.len()).unwrap_or(0);
        let b_emitted = b.next().map(|v| v.len()).unwrap_or(0);
        assert_eq!(a_emitted + b_emitted, 3);
    }
}
