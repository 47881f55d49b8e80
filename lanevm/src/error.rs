//! Error taxonomy (spec §7), split the way `fuel_vm::error` splits
//! `RuntimeError`/`InterpreterError`: a small recoverable/fatal runtime
//! error that an operator may swallow and retry from, and a fatal,
//! context-wrapped error that propagates out through `close()`.

use core::fmt;

use lanevm_asm::FaultReason;

/// The result of one interpreter dispatch: either the program ran to
/// completion, or it halted on a fault that the calling operator must
/// classify as recoverable or fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum RuntimeError {
    /// A fault the issuing operator can resolve by growing a resource
    /// (`MoreScratch`) or inserting a tree entry (`NeedRadix`) and
    /// re-running the program from the top.
    #[display(fmt = "recoverable fault: {_0}")]
    Recoverable(FaultReason),
    /// A fault with no recovery path; the query must abort.
    #[display(fmt = "fatal fault: {_0}")]
    Fatal(FaultReason),
}

impl RuntimeError {
    /// Classify a raw fault code by whether its operator can recover from
    /// it without aborting the query.
    pub fn from_fault(reason: FaultReason) -> Self {
        if reason.is_recoverable() {
            Self::Recoverable(reason)
        } else {
            Self::Fatal(reason)
        }
    }

    /// The underlying fault code, regardless of recoverability.
    pub const fn reason(&self) -> FaultReason {
        match self {
            Self::Recoverable(r) | Self::Fatal(r) => *r,
        }
    }
}

impl std::error::Error for RuntimeError {}

/// A fatal error wrapped with enough context to diagnose without a
/// debugger: which operator raised it and where in its compiled program.
#[derive(Debug, derive_more::Display)]
#[display(fmt = "{operator}@{opcode_offset}: {reason}")]
pub struct EngineError {
    /// Name of the operator that raised the error (`"filter"`,
    /// `"hash-aggregate"`, ...).
    pub operator: &'static str,
    /// Byte offset of the opcode that faulted within its compiled
    /// program, for correlating against a bytecode dump.
    pub opcode_offset: usize,
    /// The underlying fault.
    pub reason: FaultReason,
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// Wrap a fatal `RuntimeError` with operator context. Panics (a
    /// programmer error, not a data error) if given a recoverable fault —
    /// those must be handled by the operator before they reach this point.
    pub fn from_fatal(operator: &'static str, opcode_offset: usize, error: RuntimeError) -> Self {
        match error {
            RuntimeError::Fatal(reason) => Self {
                operator,
                opcode_offset,
                reason,
            },
            RuntimeError::Recoverable(reason) => {
                unreachable!("recoverable fault {reason:?} escaped operator retry logic")
            }
        }
    }
}

/// Errors raised while parsing the TLV record stream, before a query is
/// even on the bytecode fault path (spec §7's "Input shape" category).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// A TLV header declared a length that runs past the end of its
    /// enclosing buffer, or an unknown type code.
    #[error("corrupt TLV header at byte {offset}")]
    CorruptHeader {
        /// Byte offset of the offending header.
        offset: usize,
    },
    /// The first segment of a stream had no leading stream marker (spec
    /// §9's "robust version should reject" open-question decision).
    #[error("stream did not begin with a stream marker")]
    MissingStreamMarker,
    /// A single record's encoded length exceeds one VMM page.
    #[error("record of {len} bytes exceeds the {page_size}-byte page granule")]
    RecordTooLarge {
        /// The record's encoded length.
        len: usize,
        /// The page size it was measured against.
        page_size: u32,
    },
    /// A symbol ID was dereferenced before any symbol table was built.
    #[error("no symbol table has been established yet")]
    SymbolTableNotBuilt,
    /// A symbol ID was dereferenced that the active symbol table doesn't
    /// contain.
    #[error("symbol id {0:?} not present in the active symbol table")]
    UnknownSymbol(u32),
}

/// The top-level error returned from `close()` on any sink in the
/// pipeline: fail-closed-per-query (spec §7) means this is the only error
/// type a caller of the pipeline needs to handle.
#[derive(derive_more::Display)]
pub enum PipelineError {
    /// A fatal interpreter fault.
    #[display(fmt = "{_0}")]
    Engine(EngineError),
    /// A malformed input stream.
    #[display(fmt = "{_0}")]
    Decode(DecodeError),
    /// The VMM arena ran out of pages.
    #[display(fmt = "out of VMM pages: {_0}")]
    OutOfMemory(lanevm_vmm::AllocError),
}

impl std::error::Error for PipelineError {}

impl From<EngineError> for PipelineError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl From<DecodeError> for PipelineError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<lanevm_vmm::AllocError> for PipelineError {
    fn from(e: lanevm_vmm::AllocError) -> Self {
        Self::OutOfMemory(e)
    }
}

impl fmt::Debug for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Engine(e) => write!(f, "PipelineError::Engine({e:?})"),
            Self::Decode(e) => write!(f, "PipelineError::Decode({e:?})"),
            Self::OutOfMemory(e) => write!(f, "PipelineError::OutOfMemory({e:?})"),
        }
    }
}
