use std::fmt;
use std::sync::atomic::Ordering;
use crate::Core::sink::Sink;
use crate::SPMC::Buffer::{RingSlot, SlotRing};

/// Debug function for SlotRing
///
/// Reads the lock-free board only, so it is safe to call while another
/// thread holds the ring lock. Shows:
/// - Ring geometry
/// - Producer cursor (approximate)
/// - Lifecycle flags
pub fn debug_slot_ring(ring: &SlotRing, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SlotRing")
        .field("capacity", &ring.capacity)
        .field("consumers", &ring.num_consumers)
        .field("slot_messages", &ring.slot_messages)
        .field("producer_cursor", &ring.board.producer.load(Ordering::Relaxed))
        .field("finished", &ring.finished.load(Ordering::Relaxed))
        .field("aborted", &ring.aborted.load(Ordering::Relaxed))
        .finish_non_exhaustive()
}

/// Debug function for RingSlot
///
/// Payload bytes are never printed, only their size.
pub fn debug_ring_slot(slot: &RingSlot, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RingSlot")
        .field("messages", &slot.message_count)
        .field("bytes", &slot.byte_len())
        .field("ref_count", &slot.ref_count)
        .field("allocated", &slot.allocated())
        .finish()
}

/// Debug function for Sink
pub fn debug_sink(sink: &Sink, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Sink")
        .field("name", &sink.name())
        .field("writer", &"<opaque>")
        .finish()
}

// Debug proxy implementations that call the standalone debug functions
impl fmt::Debug for SlotRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_slot_ring(self, f)
    }
}

impl fmt::Debug for RingSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_ring_slot(self, f)
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_sink(self, f)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::TeeConfig;
    use crate::SPMC::Buffer::SlotRing;

    #[test]
    fn ring_debug_does_not_dump_payload() {
        let ring = SlotRing::new(&TeeConfig::default(), 2).unwrap();
        ring.try_append(b"secret-payload").unwrap();

        let out = format!("{:?}", ring);
        assert!(out.contains("capacity: 64"));
        assert!(out.contains("consumers: 2"));
        assert!(!out.contains("secret-payload"));
    }
}
