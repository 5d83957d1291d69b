//! Identifier and time types shared across the forwarder.
//!
//! All expiry and lifetime bookkeeping runs on a logical clock: a `Tick` is
//! the number of timer-wheel advances since process start. Wire-format
//! millisecond fields are converted to ticks at the edge and never leave the
//! forwarder as raw durations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic logical time unit. Tick zero is process start.
pub type Tick = u64;

/// Default number of milliseconds per tick.
pub const DEFAULT_TICK_MS: u64 = 10;

/// Default maximum number of entries in the PIT.
pub const DEFAULT_PIT_CAPACITY: usize = 65_536;

/// Default number of objects held by the content store.
pub const DEFAULT_CS_CAPACITY: usize = 16_384;

/// Interest lifetime applied when the packet carries none, in milliseconds.
pub const DEFAULT_INTEREST_LIFETIME_MS: u64 = 4_000;

/// Upper bound on any single Interest lifetime, in milliseconds.
pub const MAX_INTEREST_LIFETIME_MS: u64 = 60_000;

/// Unique identifier for a connection in the connection table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnId(pub u32);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Converts a wire-format millisecond duration to ticks, rounding up so a
/// nonzero duration never collapses to zero ticks.
pub fn ms_to_ticks(ms: u64, tick_ms: u64) -> u64 {
    ms.div_ceil(tick_ms.max(1))
}
