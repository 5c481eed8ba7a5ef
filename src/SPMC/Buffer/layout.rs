use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Per-consumer slice of the cursor board.
///
/// Aligned to 128 bytes so neighbouring consumers advancing their cursors do
/// not share a cache line.
#[repr(C, align(128))]
pub struct ConsumerEntry {
    /// Mirror of the consumer's cursor. Written under the ring lock, read
    /// without it.
    pub cursor: AtomicUsize,

    /// Bytes successfully written to the sink.
    pub bytes_written: AtomicU64,

    /// Slots drained, including empty ones.
    pub slots_drained: AtomicU64,

    /// Messages drained.
    pub messages_drained: AtomicU64,

    /// The sink failed and the consumer now discards what it drains.
    pub degraded: AtomicBool,
}

impl ConsumerEntry {
    fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
            bytes_written: AtomicU64::new(0),
            slots_drained: AtomicU64::new(0),
            messages_drained: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
        }
    }
}

/// Lock-free mirror of the ring's cursors plus the run counters.
///
/// Everything here is best-effort: counters are monotonic but two counters
/// read one after the other are not a consistent pair.
pub struct CursorBoard {
    /// Mirror of the producer cursor.
    pub producer: CachePadded<AtomicUsize>,

    pub consumers: Box<[ConsumerEntry]>,

    /// Messages stored into a slot.
    pub processed: CachePadded<AtomicU64>,

    /// Bytes stored into a slot.
    pub bytes_in: AtomicU64,

    /// Messages thrown away because the ring was full.
    pub dropped: AtomicU64,

    /// Messages rejected for exceeding the size limit.
    pub oversized: AtomicU64,

    /// Messages that found the ring full at least once.
    pub overflows: AtomicU64,

    /// Successful rotations, capacity and deadline triggered alike.
    pub rotations: AtomicU64,

    /// Slots freed by their last consumer.
    pub reclaimed: AtomicU64,
}

impl CursorBoard {
    pub fn new(consumers: usize) -> Self {
        Self {
            producer: CachePadded::new(AtomicUsize::new(0)),
            consumers: (0..consumers).map(|_| ConsumerEntry::new()).collect(),
            processed: CachePadded::new(AtomicU64::new(0)),
            bytes_in: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            oversized: AtomicU64::new(0),
            overflows: AtomicU64::new(0),
            rotations: AtomicU64::new(0),
            reclaimed: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_processed(&self, bytes: usize) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Forward distance from the consumer's cursor to the producer cursor.
    /// Approximate: the two cursors are loaded separately.
    pub fn lag(&self, consumer: usize, capacity: usize) -> usize {
        let producer = self.producer.load(Ordering::Relaxed);
        let cursor = self.consumers[consumer].cursor.load(Ordering::Relaxed);
        (producer + capacity - cursor) % capacity
    }
}
