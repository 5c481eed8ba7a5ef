// Values handed across the ring boundary: drain results, slot views, stats

use std::fmt;

/// Bytes a consumer copied out of the ring in one lock acquisition.
///
/// Covers every slot between the consumer's old cursor and the producer
/// cursor, concatenated in ring order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainBatch {
    pub bytes: Vec<u8>,
    /// Messages across all drained slots.
    pub messages: u64,
    /// Slots drained, empty ones included.
    pub slots: u64,
}

impl DrainBatch {
    /// True when every drained slot was an empty, deadline-rotated one.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Result of offering a message to the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Stored. `rotated` tells whether a full slot was retired first.
    Appended { rotated: bool },
    /// The active slot is full and the next one is still owed to a consumer.
    Overflow,
}

/// Snapshot of one slot, for tests and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Unused,
    /// The producer's current write target.
    Active { messages: u32, bytes: usize, owed: i32 },
    /// Retired and waiting for `owed` consumers to drain it.
    Pending { messages: u32, bytes: usize, owed: i32 },
}

/// Per-consumer part of a [`StatsSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsumerStats {
    /// Slots between this consumer's cursor and the producer cursor.
    pub lag: usize,
    pub bytes_written: u64,
    pub slots_drained: u64,
    pub messages_drained: u64,
    pub degraded: bool,
}

/// Best-effort view of the run counters, read without the ring lock.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub bytes_in: u64,
    pub dropped: u64,
    pub oversized: u64,
    pub overflows: u64,
    pub rotations: u64,
    pub reclaimed: u64,
    pub producer_cursor: usize,
    pub consumers: Vec<ConsumerStats>,
}

impl StatsSnapshot {
    /// Largest lag across all consumers.
    pub fn max_lag(&self) -> usize {
        self.consumers.iter().map(|c| c.lag).max().unwrap_or(0)
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} bytes_in={} dropped={} oversized={} rotations={} slot={} lag=[",
            self.processed,
            self.bytes_in,
            self.dropped,
            self.oversized,
            self.rotations,
            self.producer_cursor
        )?;
        for (i, consumer) in self.consumers.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", consumer.lag)?;
            if consumer.degraded {
                f.write_str("!")?;
            }
        }
        f.write_str("]")
    }
}
