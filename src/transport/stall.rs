//! Stall detection by polling
//!
//! The turn loop never blocks, so "waiting for a unit to reach its ship" is
//! expressed as a watch: remember when and where the entity was last seen
//! making progress, and compare on later turns.

use serde::{Deserialize, Serialize};

use crate::core::types::{GameTime, Position};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressWatch {
    pub since: GameTime,
    pub position: Option<Position>,
}

impl ProgressWatch {
    pub fn start(time: GameTime, position: Option<Position>) -> Self {
        Self { since: time, position }
    }

    pub fn elapsed(&self, now: GameTime) -> GameTime {
        now - self.since
    }

    /// More than `interval` seconds since the last reset
    pub fn is_due(&self, now: GameTime, interval: GameTime) -> bool {
        self.elapsed(now) > interval
    }

    /// The entity has not moved since the last reset
    pub fn has_not_moved(&self, current: Option<Position>) -> bool {
        match (self.position, current) {
            (Some(old), Some(new)) => old == new,
            _ => false,
        }
    }

    pub fn reset(&mut self, now: GameTime, position: Option<Position>) {
        self.since = now;
        self.position = position;
    }
}

/// Bounded retry counter
///
/// `bump` returns true once the count exceeds `limit`, then starts over.
pub fn bump_retry(counter: &mut u32, limit: u32) -> bool {
    *counter += 1;
    if *counter > limit {
        *counter = 0;
        true
    } else {
        false
    }
}
