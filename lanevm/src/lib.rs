//! `lanevm`: the execution substrate for a vectorized, 16-lane analytical
//! query engine.
//!
//! This crate owns everything below the query compiler's front end:
//!
//! - [`value`] — the TLV type tag space every record is encoded in.
//! - [`tlv`] — the self-describing record format and the row splitter
//!   that scans a byte stream into batches of VMM references.
//! - [`symtab`] — the per-chunk symbol table, rebuilt on every stream
//!   marker.
//! - [`hash`] / [`radix`] — 128-bit fingerprinting and the 16-way radix
//!   trie group-by index built on top of it.
//! - [`dfa`] — precompiled DFA tables the `DfaMatch*` opcodes walk.
//! - [`aggregate`] — fixed-width per-group accumulator buffers, the
//!   scalar accumulation primitives, HyperLogLog, and t-digest.
//! - [`ssa`] — the typed SSA graph expressions compile through before
//!   lowering to bytecode.
//! - [`interpreter`] — the 16-lane bytecode virtual machine.
//! - [`operators`] — the streaming row-consumer protocol and the
//!   concrete pipeline stages built on it.
//! - [`config`] — engine-wide tunables.
//! - [`error`] — the fail-closed-per-query error taxonomy.
//!
//! [`lanevm_vmm`] (the reserved page arena) and [`lanevm_asm`] (bytecode
//! instruction encoding) are separate crates this one depends on, the
//! same way `fuel_vm` splits its ISA crate (`fuel-asm`) and its storage
//! crate (`fuel-storage`) out from the interpreter crate that ties them
//! together.

pub mod aggregate;
pub mod config;
pub mod dfa;
pub mod error;
pub mod hash;
pub mod interpreter;
pub mod operators;
pub mod radix;
pub mod ssa;
pub mod symtab;
pub mod tlv;
pub mod value;

pub use config::EngineConfig;
pub use error::{DecodeError, EngineError, PipelineError, RuntimeError};
pub use tlv::RowSplitter;
