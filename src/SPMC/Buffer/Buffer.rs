// This is the shared slotted ring for SPMC - one producer, many draining consumers

use super::layout::CursorBoard;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32};
use std::time::Instant;

/// Extra bytes reserved on top of the incoming message whenever a slot
/// buffer has to grow. Amortizes reallocation across small messages.
pub const GROWTH_SLACK: usize = 1024;

/// Upper bound on the buffer a freshly activated slot starts with.
pub const INITIAL_SLOT_CAPACITY: usize = 4096;

/// Reference count of a slot that holds no buffer.
pub const SLOT_UNUSED: i32 = -1;

/// One segment of the ring.
///
/// A slot collects whole messages while it is the producer's write target.
/// Once the producer rotates away it is immutable and every consumer drains
/// it exactly once; the consumer that releases the last reference frees the
/// buffer and returns the slot to the unused state.
///
/// `content` is `Some` exactly when `ref_count >= 0`.
pub struct RingSlot {
    /// Concatenated message bytes, absent while the slot is unused.
    pub(crate) content: Option<Vec<u8>>,

    /// Number of whole messages appended. Zero for a slot retired by the
    /// deadline without traffic.
    pub(crate) message_count: u32,

    /// `-1` unused, otherwise the number of consumers that still owe a drain.
    /// Set to the consumer count when the slot becomes the write target.
    pub(crate) ref_count: i32,

    /// When the slot became the write target. Drives deadline rotation.
    pub(crate) created_at: Option<Instant>,
}

/// Everything the single ring lock protects.
pub(crate) struct RingState {
    pub(crate) slots: Box<[RingSlot]>,

    /// Index of the slot currently accepting writes.
    pub(crate) producer: usize,

    /// Per-consumer index of the next slot that consumer must drain.
    pub(crate) consumers: Box<[usize]>,
}

/// Fixed-size ring of [`RingSlot`]s shared by one producer and N consumers.
///
/// ### Concurrency Design:
/// - **Lock**: all slot contents, the producer cursor, every consumer cursor
///   and every reference count sit behind one `parking_lot::Mutex`. Critical
///   sections are memory copies only; sink I/O happens after the lock is
///   released.
/// - **Board**: cursors and counters are mirrored into cache-padded atomics
///   so reporting never touches the lock. Those reads are approximate.
/// - **Signal**: a futex word bumped after each rotation so idle consumers
///   sleep until there is something to drain.
pub struct SlotRing {
    pub(crate) state: Mutex<RingState>,

    /// Lock-free mirror of cursors and counters.
    pub(crate) board: CursorBoard,

    /// Rotation epoch. Consumers wait on it, the producer wakes them.
    pub(crate) signal: AtomicU32,

    /// The producer sealed its last slot; nothing more will arrive.
    pub(crate) finished: AtomicBool,

    /// A fatal error occurred somewhere; every thread bails out.
    pub(crate) aborted: AtomicBool,

    /// Graceful stop requested from outside (signal handler, embedding code).
    pub(crate) stop_requested: AtomicBool,

    /// Number of slots.
    pub(crate) capacity: usize,

    /// Number of consumers; the reference count every new slot starts with.
    pub(crate) num_consumers: usize,

    /// Messages a slot takes before the producer rotates.
    pub(crate) slot_messages: u32,

    /// Buffer size a slot starts with after activation.
    pub(crate) initial_slot_capacity: usize,

    /// Worst-case bytes a single slot buffer can grow to.
    pub(crate) slot_ceiling: usize,
}
