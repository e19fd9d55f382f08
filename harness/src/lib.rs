//! Deterministic test harness for the rollback engine.
//!
//! Provides a scripted stand-in guest runtime that honors the
//! instrumentation contract (every mutation calls its host import first),
//! a seeded RNG for randomized-but-replayable workloads, and 128-bit state
//! digests for bitwise comparison of guest states.
//!
//! Embedders can use the scripted runtime to test their integration without
//! a real module pipeline; the engine's behavioral and property suites run
//! on it too.

pub mod digest;
pub mod rng;
pub mod script;

pub use digest::{engine_digest, state_digest};
pub use rng::SimRng;
pub use script::{Op, ScriptedInstance, ScriptedModule};
