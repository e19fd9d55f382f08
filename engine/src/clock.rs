//! Logical clock and recurring-tick configuration.

use serde::{Deserialize, Serialize};

/// The engine's logical clock.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LogicalClock {
    /// Current logical time (arbitrary unit, chosen by the embedder).
    pub time: i64,
    /// Submissions stamped in the current time tick. Reset to 0 whenever
    /// time advances.
    pub offset: u32,
}

/// Recurring-tick driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickConfig {
    /// Logical time between synthesized ticks. 0 disables the driver.
    pub interval: i64,
    /// Logical time the next tick fires at.
    pub next_fire_time: i64,
    /// Guest export invoked by each tick.
    pub function: String,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval: 0,
            next_fire_time: 0,
            function: "tick".to_string(),
        }
    }
}

/// Engine construction parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Recurring-tick driver settings.
    pub ticks: TickConfig,
    /// Logical time the engine starts at.
    pub start_time: i64,
}
