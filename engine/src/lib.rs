//! Deterministic time-travel core for rollback-based guest synchronization.
//!
//! A guest module runs inside a host-controlled VM with linear memory and
//! typed globals. The binary rewriter (an external collaborator, reached via
//! [`rewriter`]) instruments the guest so every persistent-state mutation
//! first calls back into the host; those callbacks journal undo records.
//! The engine keeps an ordered timeline of submitted invocations and folds
//! late arrivals into the past by rewinding the journal, executing the new
//! invocation, and replaying the tail. This is the mechanism behind
//! optimistic lockstep synchronization.
//!
//! # Architecture
//!
//! - **Timestamps** ([`Timestamp`]): total order over `(time, player,
//!   offset)` so every peer derives the same timeline.
//! - **Journal** ([`Journal`], [`UndoRecord`]): append-only undo log,
//!   truncatable from either end.
//! - **Call log** ([`CallLog`]): the timeline itself; each entry records the
//!   journal length at which it began.
//! - **Guest seam** ([`GuestModule`] / [`GuestInstance`] / [`GuestView`]):
//!   traits the embedder's VM implements.
//! - **Host imports** ([`HostImports`], [`JournalingImports`]): the callback
//!   surface the instrumented guest requires.
//! - **Engine** ([`Engine`]): rewind/insert/replay scheduling, transient
//!   calls, the recurring-tick driver, snapshot reset, and history
//!   compaction.
//!
//! # Usage
//!
//! ```ignore
//! use mulligan_engine::{Engine, EngineConfig, Timestamp, Value};
//!
//! let mut engine = Engine::setup(module, EngineConfig::default())?;
//! engine.call_at(Timestamp::new(1, 0, 0), "step", &[Value::I32(7)])?;
//! // A late arrival from another peer lands in the past and is folded in:
//! engine.call_at(Timestamp::new(0, 1, 2), "step", &[Value::I32(3)])?;
//! ```
//!
//! The guest must be deterministic: identical state and arguments must
//! produce identical journal output, or replay diverges.

pub mod call_log;
pub mod clock;
pub mod engine;
pub mod guest;
pub mod imports;
pub mod journal;
pub mod rewind;
pub mod rewriter;
pub mod timestamp;
pub mod value;

pub use call_log::{CallLog, CallLogEntry};
pub use clock::{EngineConfig, LogicalClock, TickConfig};
pub use engine::{Engine, EngineError};
pub use guest::{
    GuestFault, GuestInstance, GuestModule, GuestView, InstantiateError, StateError, PAGE_SIZE,
};
pub use imports::{HostImports, JournalingImports, NoopImports};
pub use journal::{Journal, UndoRecord};
pub use rewind::RewindError;
pub use rewriter::{gzip_decode, gzip_encode, hash128, instrument, RewriteError, RewriterService};
pub use timestamp::Timestamp;
pub use value::{Value, ValueType};
