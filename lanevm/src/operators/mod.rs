//! The streaming row-consumer protocol (spec §5) and the operator
//! implementations built on top of it.
//!
//! Every stage in a pipeline is either a [`Writer`] (produces rows, pulled
//! by its downstream consumer) or a [`Sink`] (terminal, consumes rows and
//! has no downstream). Both sides of a stage implement [`RowConsumer`],
//! the push interface the row splitter and upstream operators drive.

use lanevm_types::{LaneMask, Ref};

use crate::error::{EngineError, PipelineError, RuntimeError};
use crate::interpreter::{BytecodeProgram, ExecContext, Interpreter};
use crate::symtab::SymbolTable;

pub mod aggregate;
pub mod datashape;
pub mod distinct;
pub mod filter;
pub mod hash_aggregate;
pub mod join;
pub mod limit;
pub mod project;
pub mod rematerialize;
pub mod tee;
pub mod unnest;

/// Per-call parameters threaded alongside a batch of rows: the query's
/// compiled programs, a handle to the active VMM, and (during
/// `write_rows`) which lanes are currently valid. Kept as a single bag so
/// adding a new cross-cutting parameter doesn't change every operator's
/// signature (spec §5).
#[derive(Debug, Default, Clone, Copy)]
pub struct AuxParams {
    /// The epoch of the symbol table this batch was produced under.
    pub symtab_epoch: u64,
}

impl AuxParams {
    /// Parameters carrying no cross-cutting state, for operators and tests
    /// that don't need one.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// The push side of the pipeline protocol: something upstream hands rows
/// (or a fresh symbol table) to.
pub trait RowConsumer {
    /// Called once per stream-marker segment, before any `write_rows`
    /// referencing the new table.
    fn symbolize(&mut self, symtab: &SymbolTable, aux: &AuxParams);

    /// Called with a batch of up to 16 row references. `aux.symtab_epoch`
    /// identifies which symbol table the rows were encoded against.
    fn write_rows(&mut self, rows: &[Ref], aux: &AuxParams);

    /// Called at the end of a segment, before scratch is reclaimed. Most
    /// operators do nothing; stateful ones (hash-aggregate, data-shape)
    /// use it to flush.
    fn end_segment(&mut self) {}
}

/// A non-terminal stage: open/close bracket a query's lifetime, and
/// `RowConsumer` methods receive input. A `Writer` additionally exposes a
/// `next()` so operators such as `limit` and `rematerialize` can pull
/// already-produced output without re-deriving it from `write_rows`.
pub trait Writer: RowConsumer {
    /// Pull the next batch of output rows this operator has produced, or
    /// `None` once exhausted for the current segment.
    fn next(&mut self) -> Option<Vec<Ref>>;
}

/// A terminal stage with no downstream: opens once, consumes rows for the
/// life of the query, and closes to finalize (emit aggregates, flush
/// buffers) or report a fatal error.
pub trait Sink: RowConsumer {
    /// Prepare the sink to receive rows (allocate output buffers, reset
    /// counters).
    fn open(&mut self) -> Result<(), PipelineError>;

    /// Finalize the sink. Returns once all rows for the query have been
    /// consumed via `write_rows`.
    fn close(&mut self) -> Result<(), PipelineError>;
}

/// A `RowConsumer` that discards everything it's given, recording only
/// batch sizes. Used in tests that exercise the row splitter without a
/// real downstream operator.
#[derive(Debug, Default)]
pub struct NullConsumer {
    /// Sizes of every batch passed to `write_rows`, in arrival order.
    pub batch_sizes: Vec<usize>,
    /// Number of times `symbolize` was invoked.
    pub symbolize_calls: usize,
}

/// Run `program` over one batch, retrying a bounded number of times when
/// the interpreter raises a recoverable fault (spec §4's "fault-and-retry"
/// loop — `NeedRadix`/`MoreScratch` are resolved by the calling operator
/// growing whatever resource was missing; a plain row consumer has
/// nothing to grow, so the retry budget here just absorbs faults that
/// clear themselves, e.g. a tree split another lane's `entry()` call
/// already performed).
pub(crate) fn run_program(
    interpreter: &mut Interpreter,
    program: &BytecodeProgram,
    valid: LaneMask,
    rows: &[Ref],
    ctx: &mut ExecContext<'_>,
    operator: &'static str,
) -> Result<LaneMask, PipelineError> {
    const MAX_RETRIES: u32 = 4;
    let mut attempt = 0;
    loop {
        match interpreter.run(program, valid, rows, ctx) {
            Ok(mask) => return Ok(mask),
            Err(RuntimeError::Recoverable(reason)) => {
                attempt += 1;
                if attempt > MAX_RETRIES {
                    return Err(PipelineError::Engine(EngineError { operator, opcode_offset: 0, reason }));
                }
                tracing::debug!(?reason, operator, attempt, "retrying after recoverable fault");
            }
            Err(RuntimeError::Fatal(reason)) => {
                return Err(PipelineError::Engine(EngineError { operator, opcode_offset: 0, reason }));
            }
        }
    }
}

impl RowConsumer for NullConsumer {
    fn symbolize(&mut self, _symtab: &SymbolTable, _aux: &AuxParams) {
        self.symbolize_calls += 1;
    }

    fn write_rows(&mut self, rows: &[Ref], _aux: &AuxParams) {
        self.batch_sizes.push(rows.len());
    }
}
