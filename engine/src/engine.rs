//! The engine: guest instance, journal, call log, and clock under one owner.
//!
//! All operations run on the single owning task. After any `call_at` returns,
//! guest state is exactly what executing every logged invocation in ascending
//! timestamp order from the initial state would produce; late arrivals are
//! folded in by rewinding journaled mutations, executing, and replaying the
//! tail of the log.

use std::collections::BTreeMap;

use tracing::{debug, info, trace, warn};

use crate::call_log::{CallLog, CallLogEntry};
use crate::clock::{EngineConfig, LogicalClock, TickConfig};
use crate::guest::{
    GuestFault, GuestInstance, GuestModule, GuestView, InstantiateError, StateError, PAGE_SIZE,
};
use crate::imports::JournalingImports;
use crate::journal::Journal;
use crate::rewind::{rewind_to, RewindError};
use crate::timestamp::Timestamp;
use crate::value::Value;

/// Errors from engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An earlier rewind failed fatally; the engine must be discarded.
    #[error("engine is poisoned by an earlier fatal rewind failure")]
    Poisoned,
    /// The guest could not be instantiated.
    #[error("guest setup failed: {0}")]
    Setup(#[from] InstantiateError),
    /// A rewind failed; the engine is now poisoned.
    #[error("fatal rewind failure: {0}")]
    Rewind(#[from] RewindError),
    /// A direct state operation during reset failed.
    #[error("state reset failed: {0}")]
    Reset(#[from] StateError),
    /// A guest export reported a fault.
    #[error("guest export {name:?} failed: {fault}")]
    Guest {
        /// The export that was invoked.
        name: String,
        /// What the guest reported.
        fault: GuestFault,
    },
    /// A peer reused or decreased its offset within one time tick.
    #[error("out-of-order submission {timestamp}: player already submitted offset {max_offset} in this tick")]
    OutOfOrder {
        /// The rejected timestamp.
        timestamp: Timestamp,
        /// The peer's largest accepted offset for this `(time, player)`.
        max_offset: u32,
    },
    /// The exact timestamp is already occupied on the timeline.
    #[error("timestamp {timestamp} already occupied")]
    DuplicateTimestamp {
        /// The rejected timestamp.
        timestamp: Timestamp,
    },
}

/// The deterministic time-travel core.
///
/// Owns one instrumented guest instance plus the journal and call log that
/// make its history reversible. Single-threaded by design: every invocation,
/// rewind, and replay happens under `&mut self`.
///
/// Callers must not retain guest handles across operations that may rewind;
/// a memory-grow undo replaces the instance outright.
pub struct Engine {
    module: Box<dyn GuestModule>,
    instance: Box<dyn GuestInstance>,
    journal: Journal,
    log: CallLog,
    clock: LogicalClock,
    ticks: TickConfig,
    /// Largest accepted offset per `(time, player)`, for rejecting
    /// out-of-order per-peer inserts.
    high_water: BTreeMap<(i64, u32), u32>,
    poisoned: bool,
}

impl Engine {
    /// Instantiate the guest and build an engine around it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Setup`] if instantiation fails; no engine is
    /// constructed.
    pub fn setup(module: Box<dyn GuestModule>, config: EngineConfig) -> Result<Self, EngineError> {
        let instance = module.instantiate(None)?;
        Ok(Self {
            module,
            instance,
            journal: Journal::new(),
            log: CallLog::new(),
            clock: LogicalClock {
                time: config.start_time,
                offset: 0,
            },
            ticks: config.ticks,
            high_water: BTreeMap::new(),
            poisoned: false,
        })
    }

    /// Submit an invocation at an arbitrary past or present timeline
    /// position.
    ///
    /// Rewinds to the insertion point, executes the export (journaling its
    /// mutations), inserts the log entry, and replays every later entry.
    ///
    /// # Errors
    ///
    /// - [`EngineError::OutOfOrder`] / [`EngineError::DuplicateTimestamp`]:
    ///   rejected before any state is touched.
    /// - [`EngineError::Guest`] with [`GuestFault::MissingExport`]: nothing
    ///   was journaled and no entry is inserted; the tail is replayed back
    ///   into place.
    /// - [`EngineError::Guest`] with [`GuestFault::Trap`]: the invocation's
    ///   partial effects are rewound and the entry is inserted anyway. A
    ///   deterministic guest traps identically on every replay, so the entry
    ///   is a stable no-op and late arrivals still converge.
    /// - [`EngineError::Rewind`]: fatal; the engine is poisoned.
    pub fn call_at(&mut self, ts: Timestamp, name: &str, args: &[Value]) -> Result<(), EngineError> {
        self.submit(ts, name, args, true)
    }

    /// Shared submission path.
    ///
    /// The recurring-tick driver disables offset-order enforcement: a tick's
    /// reserved `offset = 0` may fire after a user call already took
    /// `offset >= 1` in the same tick, and still lands before it on the
    /// timeline.
    fn submit(
        &mut self,
        ts: Timestamp,
        name: &str,
        args: &[Value],
        enforce_offset_order: bool,
    ) -> Result<(), EngineError> {
        self.ensure_live()?;
        let i = self.log.insertion_index(ts);
        if i > 0 && self.log.get(i - 1).expect("index in range").timestamp == ts {
            return Err(EngineError::DuplicateTimestamp { timestamp: ts });
        }
        if enforce_offset_order {
            if let Some(max_offset) = self.high_water.get(&(ts.time, ts.player)).copied() {
                if ts.offset <= max_offset {
                    return Err(EngineError::OutOfOrder {
                        timestamp: ts,
                        max_offset,
                    });
                }
            }
        }

        let target = match self.log.get(i) {
            Some(later) => later.journal_len_before,
            None => self.journal.len(),
        };
        debug!(
            target: "engine",
            %ts,
            name,
            position = i,
            rewound = self.journal.len() - target,
            replayed = self.log.len() - i,
            "insert"
        );
        self.rewind(target)?;
        let journal_len_before = self.journal.len();

        match self.invoke_journaled(name, args) {
            Ok(_) => {
                self.insert_entry(i, ts, name, args, journal_len_before);
                self.replay_from(i + 1)
            }
            Err(fault @ GuestFault::MissingExport { .. }) => {
                let primary = EngineError::Guest {
                    name: name.to_string(),
                    fault,
                };
                match self.replay_from(i) {
                    Err(fatal @ EngineError::Rewind(_)) => Err(fatal),
                    _ => Err(primary),
                }
            }
            Err(fault) => {
                self.rewind(journal_len_before)?;
                self.insert_entry(i, ts, name, args, journal_len_before);
                let primary = EngineError::Guest {
                    name: name.to_string(),
                    fault,
                };
                match self.replay_from(i + 1) {
                    Err(fatal @ EngineError::Rewind(_)) => Err(fatal),
                    _ => Err(primary),
                }
            }
        }
    }

    /// Invoke an export and immediately revert its mutations.
    ///
    /// The call log is untouched and the journal ends at its pre-call
    /// length, so queries (rendering, UI state reads) see current state
    /// without polluting the timeline. Reverts on trap as well.
    ///
    /// # Errors
    ///
    /// [`EngineError::Guest`] if the export is missing or traps (state is
    /// reverted first); [`EngineError::Rewind`] if the revert itself fails.
    pub fn call_and_revert(
        &mut self,
        name: &str,
        args: &[Value],
    ) -> Result<Option<Value>, EngineError> {
        self.ensure_live()?;
        let snapshot = self.journal.len();
        let result = self.invoke_journaled(name, args);
        self.rewind(snapshot)?;
        result.map_err(|fault| EngineError::Guest {
            name: name.to_string(),
            fault,
        })
    }

    /// Advance logical time and fire any recurring ticks that came due.
    ///
    /// No-op when `delta <= 0` or the tick interval is 0. Each tick is
    /// submitted through [`Engine::call_at`] at
    /// `(next_fire_time, offset 0, player 0)`; the first failing tick aborts
    /// the sweep.
    ///
    /// # Errors
    ///
    /// Whatever the underlying `call_at` reports.
    pub fn advance_time(&mut self, delta: i64) -> Result<(), EngineError> {
        self.ensure_live()?;
        if delta <= 0 || self.ticks.interval == 0 {
            return Ok(());
        }
        self.clock.time += delta;
        self.clock.offset = 0;
        let function = self.ticks.function.clone();
        while self.clock.time - self.ticks.next_fire_time > self.ticks.interval {
            self.ticks.next_fire_time += self.ticks.interval;
            let ts = Timestamp::new(self.ticks.next_fire_time, 0, 0);
            self.clock.offset += 1;
            self.submit(ts, &function, &[], false)?;
        }
        Ok(())
    }

    /// Stamp a locally submitted call at the current logical time.
    ///
    /// Bumps the per-tick offset counter, so local submissions never collide
    /// with the tick driver's reserved `offset = 0`.
    pub fn next_timestamp(&mut self, player: u32) -> Timestamp {
        self.clock.offset += 1;
        Timestamp::new(self.clock.time, self.clock.offset, player)
    }

    /// Adopt a peer snapshot: replace memory bitwise with `image`, clear all
    /// history, and restart the clock.
    ///
    /// Memory grows if the image is larger; a smaller image reinstantiates
    /// the guest around a fresh right-sized memory. Globals are untouched
    /// either way. The journal, call log, and per-player marks are cleared;
    /// the per-tick offset resets to 0.
    ///
    /// # Errors
    ///
    /// [`EngineError::Reset`] or [`EngineError::Setup`]; the engine is left
    /// unpoisoned and the old state intact if reinstantiation fails.
    pub fn reset(&mut self, image: &[u8], time: i64, next_fire_time: i64) -> Result<(), EngineError> {
        self.ensure_live()?;
        let current_len = self.instance.memory().len();
        if image.len() <= current_len {
            if image.len() < current_len {
                let mut sized = image.to_vec();
                sized.resize(page_aligned(image.len()), 0);
                let mut globals = Vec::new();
                let mut index = 0u32;
                while let Some(value) = self.instance.global(index) {
                    globals.push(value);
                    index += 1;
                }
                let mut fresh = self.module.instantiate(Some(&sized))?;
                for (index, value) in globals.into_iter().enumerate() {
                    fresh.set_global(index as u32, value)?;
                }
                self.instance = fresh;
            } else {
                self.instance.write_memory(0, image)?;
            }
        } else {
            let needed_pages = page_aligned(image.len()) / PAGE_SIZE;
            let additional = needed_pages.saturating_sub(self.instance.page_count() as usize);
            self.instance.grow_memory(additional as u32)?;
            self.instance.write_memory(0, image)?;
            // Fresh pages past the image stay zero; make the overwritten
            // prefix of the old tail zero too.
            let total = self.instance.memory().len();
            if total > image.len() {
                self.instance
                    .write_memory(image.len() as u32, &vec![0u8; total - image.len()])?;
            }
        }
        self.journal.clear();
        self.log.clear();
        self.high_water.clear();
        self.clock = LogicalClock { time, offset: 0 };
        self.ticks.next_fire_time = next_fire_time;
        info!(target: "engine", time, next_fire_time, image_len = image.len(), "reset");
        Ok(())
    }

    /// Drop every log entry older than `horizon` and the journal records
    /// only they could reach. Returns the number of entries removed.
    ///
    /// Surviving entries are rebased so the first survivor's journal length
    /// is 0. The embedder must choose `horizon` so no later insert targets a
    /// position below it.
    ///
    /// # Errors
    ///
    /// [`EngineError::Poisoned`] only.
    pub fn forget_before(&mut self, horizon: Timestamp) -> Result<usize, EngineError> {
        self.ensure_live()?;
        let k = self
            .log
            .iter()
            .position(|e| e.timestamp >= horizon)
            .unwrap_or(self.log.len());
        if k == 0 {
            return Ok(0);
        }
        if k == self.log.len() {
            self.log.clear();
            self.journal.clear();
        } else {
            let base = self
                .log
                .get(k)
                .expect("index in range")
                .journal_len_before;
            self.log.remove_prefix(k);
            self.journal.truncate_head(base);
            self.log.rebase_journal_lens(base);
        }
        self.high_water.retain(|&(time, _), _| time >= horizon.time);
        debug!(target: "engine", %horizon, removed = k, "forget");
        Ok(k)
    }

    /// The guest's linear memory.
    #[must_use]
    pub fn memory(&self) -> &[u8] {
        self.instance.memory()
    }

    /// The guest's linear-memory size in pages.
    #[must_use]
    pub fn page_count(&self) -> u32 {
        self.instance.page_count()
    }

    /// Current value of a guest global.
    #[must_use]
    pub fn global(&self, index: u32) -> Option<Value> {
        self.instance.global(index)
    }

    /// Live journal length.
    #[must_use]
    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    /// The timeline, for inspection.
    #[must_use]
    pub fn call_log(&self) -> &CallLog {
        &self.log
    }

    /// Current logical time.
    #[must_use]
    pub fn current_time(&self) -> i64 {
        self.clock.time
    }

    /// When the next recurring tick fires.
    #[must_use]
    pub fn next_fire_time(&self) -> i64 {
        self.ticks.next_fire_time
    }

    /// Whether a fatal rewind has poisoned the engine.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn ensure_live(&self) -> Result<(), EngineError> {
        if self.poisoned {
            Err(EngineError::Poisoned)
        } else {
            Ok(())
        }
    }

    fn insert_entry(
        &mut self,
        i: usize,
        ts: Timestamp,
        name: &str,
        args: &[Value],
        journal_len_before: usize,
    ) {
        self.log.insert_at(
            i,
            CallLogEntry {
                name: name.to_string(),
                args: args.to_vec(),
                journal_len_before,
                timestamp: ts,
            },
        );
        let mark = self.high_water.entry((ts.time, ts.player)).or_insert(0);
        *mark = (*mark).max(ts.offset);
    }

    fn invoke_journaled(&mut self, name: &str, args: &[Value]) -> Result<Option<Value>, GuestFault> {
        let mut imports = JournalingImports::new(&mut self.journal);
        self.instance.invoke(name, args, &mut imports)
    }

    /// Re-execute every entry from `start` to the end of the log.
    ///
    /// A trapped replay is rewound to its own pre-call journal length and
    /// retained; the first fault is surfaced after the sweep completes.
    fn replay_from(&mut self, start: usize) -> Result<(), EngineError> {
        let mut first_fault: Option<EngineError> = None;
        for j in start..self.log.len() {
            let (name, args) = {
                let entry = self.log.get_mut(j).expect("index in range");
                entry.journal_len_before = self.journal.len();
                (entry.name.clone(), entry.args.clone())
            };
            trace!(target: "engine", index = j, name = %name, "replay");
            if let Err(fault) = self.invoke_journaled(&name, &args) {
                warn!(target: "engine", name = %name, %fault, "replayed call faulted");
                let len_before = self.log.get(j).expect("index in range").journal_len_before;
                self.rewind(len_before)?;
                if first_fault.is_none() {
                    first_fault = Some(EngineError::Guest { name, fault });
                }
            }
        }
        match first_fault {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    fn rewind(&mut self, target: usize) -> Result<(), EngineError> {
        match rewind_to(
            &mut self.journal,
            &mut self.instance,
            self.module.as_ref(),
            target,
        ) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.poisoned = true;
                Err(EngineError::Rewind(e))
            }
        }
    }
}

impl GuestView for Engine {
    fn memory(&self) -> &[u8] {
        self.instance.memory()
    }

    fn page_count(&self) -> u32 {
        self.instance.page_count()
    }

    fn global(&self, index: u32) -> Option<Value> {
        self.instance.global(index)
    }
}

/// Round `len` up to a whole number of pages (at least one).
fn page_aligned(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE).max(1) * PAGE_SIZE
}
