//! Ordered log of submitted guest invocations.

use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;
use crate::value::Value;

/// One submitted invocation on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallLogEntry {
    /// Name of the guest export.
    pub name: String,
    /// Arguments passed to the export.
    pub args: Vec<Value>,
    /// Journal length observed immediately before this invocation executed.
    pub journal_len_before: usize,
    /// Timeline position.
    pub timestamp: Timestamp,
}

/// The timeline: invocations sorted strictly ascending by timestamp.
///
/// `journal_len_before` values are non-decreasing along the log and equal the
/// cumulative count of undo records produced by all earlier entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallLog {
    entries: Vec<CallLogEntry>,
}

impl CallLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Smallest index whose entry's timestamp is strictly greater than `ts`,
    /// or `len()` if none.
    ///
    /// The log is dense and inserts cluster near the tail, so this scans
    /// backwards from the end rather than binary-searching.
    #[must_use]
    pub fn insertion_index(&self, ts: Timestamp) -> usize {
        let mut i = self.entries.len();
        while i > 0 && self.entries[i - 1].timestamp > ts {
            i -= 1;
        }
        i
    }

    /// Insert `entry` at position `i`, shifting later entries right.
    pub fn insert_at(&mut self, i: usize, entry: CallLogEntry) {
        self.entries.insert(i, entry);
    }

    /// Drop the first `k` entries.
    pub fn remove_prefix(&mut self, k: usize) {
        self.entries.drain(..k.min(self.entries.len()));
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entry at `i`.
    #[must_use]
    pub fn get(&self, i: usize) -> Option<&CallLogEntry> {
        self.entries.get(i)
    }

    /// Mutable entry at `i`.
    pub fn get_mut(&mut self, i: usize) -> Option<&mut CallLogEntry> {
        self.entries.get_mut(i)
    }

    /// Iterate entries in timeline order.
    pub fn iter(&self) -> impl Iterator<Item = &CallLogEntry> {
        self.entries.iter()
    }

    /// Timestamps in timeline order, for inspection and assertions.
    #[must_use]
    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.entries.iter().map(|e| e.timestamp).collect()
    }

    /// Subtract `base` from every entry's `journal_len_before`.
    ///
    /// Used by history compaction after the journal head is truncated, so
    /// surviving entries keep addressing the journal by its live indices.
    pub fn rebase_journal_lens(&mut self, base: usize) {
        for entry in &mut self.entries {
            debug_assert!(entry.journal_len_before >= base);
            entry.journal_len_before -= base;
        }
    }
}
