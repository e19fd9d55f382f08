//! Total-ordering key for timeline entries.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Totally ordered timeline position for a submitted invocation.
///
/// `time` is the embedder's logical clock (arbitrary unit, monotonically
/// non-decreasing). `offset` distinguishes multiple submissions by the same
/// peer within one `time` tick. `player` identifies the submitting peer.
///
/// The recurring tick driver owns `player = 0, offset = 0`; user submissions
/// for the same `(time, player)` take `offset >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Logical time of submission.
    pub time: i64,
    /// Per-tick submission counter for one peer.
    pub offset: u32,
    /// Submitting peer id.
    pub player: u32,
}

impl Timestamp {
    /// Build a timestamp from its three components.
    #[must_use]
    pub fn new(time: i64, offset: u32, player: u32) -> Self {
        Self {
            time,
            offset,
            player,
        }
    }
}

impl Ord for Timestamp {
    /// Strict lexicographic order over `(time, player, offset)`.
    ///
    /// `player` compares before `offset`: two peers submitting concurrently
    /// at the same tick interleave by peer id, so every host derives the same
    /// total order regardless of arrival sequence.
    fn cmp(&self, other: &Self) -> Ordering {
        (self.time, self.player, self.offset).cmp(&(other.time, other.player, other.offset))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}@p{}", self.time, self.offset, self.player)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_dominates() {
        assert!(Timestamp::new(1, 9, 9) < Timestamp::new(2, 0, 0));
    }

    #[test]
    fn player_compares_before_offset() {
        // Same tick: all of player 0's submissions sort before player 1's,
        // even when player 0's offset is larger.
        assert!(Timestamp::new(5, 7, 0) < Timestamp::new(5, 0, 1));
    }

    #[test]
    fn offset_breaks_same_peer_ties() {
        assert!(Timestamp::new(5, 0, 3) < Timestamp::new(5, 1, 3));
    }

    #[test]
    fn equal_triples_are_equal() {
        let ts = Timestamp::new(4, 2, 1);
        assert_eq!(ts.cmp(&ts), Ordering::Equal);
    }
}
