//! The fan-out operator (spec §5): replicates every batch to more than
//! one downstream consumer, e.g. feeding both a `LIMIT`-ed result stream
//! and a `SYSTEM_DATASHAPE` sink off the same scan.

use lanevm_types::Ref;

use crate::symtab::SymbolTable;

use super::{AuxParams, RowConsumer};

/// Forwards every call to each of its branches in order. A branch that
/// panics takes the whole pipeline down with it, same as any other
/// operator — `Tee` adds no isolation of its own.
pub struct Tee {
    branches: Vec<Box<dyn RowConsumer + Send>>,
}

impl Tee {
    pub fn new(branches: Vec<Box<dyn RowConsumer + Send>>) -> Self {
        Self { branches }
    }
}

impl RowConsumer for Tee {
    fn symbolize(&mut self, symtab: &SymbolTable, aux: &AuxParams) {
        for branch in &mut self.branches {
            branch.symbolize(symtab, aux);
        }
    }

    fn write_rows(&mut self, rows: &[Ref], aux: &AuxParams) {
        for branch in &mut self.branches {
            branch.write_rows(rows, aux);
        }
    }

    fn end_segment(&mut self) {
        for branch in &mut self.branches {
            branch.end_segment();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    struct CountingBranch(Arc<AtomicUsize>);

    impl RowConsumer for CountingBranch {
        fn symbolize(&mut self, _symtab: &SymbolTable, _aux: &AuxParams) {}

        fn write_rows(&mut self, rows: &[Ref], _aux: &AuxParams) {
            self.0.fetch_add(rows.len(), Ordering::Relaxed);
        }
    }

    #[test]
    fn every_branch_receives_every_batch() {
        let a_count = Arc::new(AtomicUsize::new(0));
        let b_count = Arc::new(AtomicUsize::new(0));
        let mut tee = Tee::new(vec![
            Box::new(CountingBranch(a_count.clone())),
            Box::new(CountingBranch(b_count.clone())),
        ]);
        let rows = vec![Ref::new(0, 1), Ref::new(1, 1)];
        tee.write_rows(&rows, &AuxParams::empty());
        tee.write_rows(&rows, &AuxParams::empty());
        assert_eq!(a_count.load(Ordering::Relaxed), 4);
        assert_eq!(b_count.load(Ordering::Relaxed), 4);
    }
}
