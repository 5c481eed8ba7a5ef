use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use super::layout::CursorBoard;
use super::Buffer::{RingSlot, RingState, SlotRing, GROWTH_SLACK, INITIAL_SLOT_CAPACITY, SLOT_UNUSED};
use crate::config::TeeConfig;
use crate::error::TeeError;
use crate::SPMC::Structs::Buffer_Structs::{
    AppendOutcome, ConsumerStats, DrainBatch, SlotState, StatsSnapshot,
};
use crate::Core::futex;

impl RingSlot {
    pub(crate) const fn unused() -> Self {
        Self {
            content: None,
            message_count: 0,
            ref_count: SLOT_UNUSED,
            created_at: None,
        }
    }

    /// Bytes currently occupied.
    pub fn byte_len(&self) -> usize {
        self.content.as_ref().map_or(0, Vec::len)
    }

    pub fn message_count(&self) -> u32 {
        self.message_count
    }

    pub fn ref_count(&self) -> i32 {
        self.ref_count
    }

    pub fn is_unused(&self) -> bool {
        self.ref_count == SLOT_UNUSED
    }

    /// Bytes reserved by the slot buffer, occupied or not.
    pub fn allocated(&self) -> usize {
        self.content.as_ref().map_or(0, Vec::capacity)
    }

    /// Turn an unused slot into the producer's write target.
    fn activate(&mut self, refs: i32, initial_capacity: usize, now: Instant) {
        self.content = Some(Vec::with_capacity(initial_capacity));
        self.message_count = 0;
        self.ref_count = refs;
        self.created_at = Some(now);
    }

    /// Append one whole message. Returns false if the slot has no buffer.
    fn append(&mut self, bytes: &[u8]) -> bool {
        let Some(content) = self.content.as_mut() else {
            return false;
        };
        if content.capacity() - content.len() < bytes.len() {
            content.reserve_exact(bytes.len() + GROWTH_SLACK);
        }
        content.extend_from_slice(bytes);
        self.message_count += 1;
        true
    }

    /// Drop one reference. The caller whose release reaches zero frees the
    /// buffer; returns true for that caller only.
    fn release(&mut self) -> bool {
        self.ref_count -= 1;
        if self.ref_count == 0 {
            self.reset();
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.content = None;
        self.message_count = 0;
        self.ref_count = SLOT_UNUSED;
        self.created_at = None;
    }
}

impl RingState {
    fn new(capacity: usize, consumers: usize, initial_capacity: usize) -> Self {
        let mut slots: Box<[RingSlot]> = (0..capacity).map(|_| RingSlot::unused()).collect();
        slots[0].activate(consumers as i32, initial_capacity, Instant::now());
        Self {
            slots,
            producer: 0,
            consumers: vec![0; consumers].into_boxed_slice(),
        }
    }

    #[inline]
    fn next_index(&self) -> usize {
        (self.producer + 1) % self.slots.len()
    }

    /// False when `next` is the next slot some consumer still has to drain.
    /// Moving the producer there would make that consumer look caught up and
    /// lose a whole ring of data.
    pub(crate) fn can_rotate(&self, next: usize) -> bool {
        !self.consumers.contains(&next)
    }

    /// Retire the active slot and activate the next one.
    /// Caller must have checked [`RingState::can_rotate`].
    fn rotate(
        &mut self,
        num_consumers: usize,
        initial_capacity: usize,
        now: Instant,
    ) -> Result<usize, TeeError> {
        let next = self.next_index();
        let slot = &mut self.slots[next];
        if !slot.is_unused() {
            return Err(TeeError::ProtocolViolation {
                slot: next,
                ref_count: slot.ref_count,
                context: "rotating onto a slot that was never reclaimed",
            });
        }
        slot.activate(num_consumers as i32, initial_capacity, now);
        self.producer = next;
        Ok(next)
    }

    fn append_at(&mut self, index: usize, bytes: &[u8]) -> Result<(), TeeError> {
        let slot = &mut self.slots[index];
        if slot.append(bytes) {
            Ok(())
        } else {
            Err(TeeError::ProtocolViolation {
                slot: index,
                ref_count: slot.ref_count,
                context: "appending to a slot without a buffer",
            })
        }
    }
}

impl SlotRing {
    /// Build a ring for `consumers` consumers with the geometry in `config`.
    /// The first slot starts out as the active write target.
    pub fn new(config: &TeeConfig, consumers: usize) -> Result<Self, TeeError> {
        config.validate(consumers)?;

        let slot_ceiling = config.slot_ceiling();
        let initial_slot_capacity = INITIAL_SLOT_CAPACITY.min(slot_ceiling);

        Ok(Self {
            state: Mutex::new(RingState::new(
                config.slots,
                consumers,
                initial_slot_capacity,
            )),
            board: CursorBoard::new(consumers),
            signal: std::sync::atomic::AtomicU32::new(0),
            finished: std::sync::atomic::AtomicBool::new(false),
            aborted: std::sync::atomic::AtomicBool::new(false),
            stop_requested: std::sync::atomic::AtomicBool::new(false),
            capacity: config.slots,
            num_consumers: consumers,
            slot_messages: config.slot_messages,
            initial_slot_capacity,
            slot_ceiling,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn num_consumers(&self) -> usize {
        self.num_consumers
    }

    pub fn board(&self) -> &CursorBoard {
        &self.board
    }

    /// Worst-case bytes the slot buffers can hold together.
    pub fn memory_ceiling(&self) -> usize {
        self.capacity * self.slot_ceiling
    }

    /// Append a message to the active slot. A full slot is rotated first;
    /// if that rotation would overwrite an undrained slot nothing is stored
    /// and `Overflow` is returned.
    pub fn try_append(&self, bytes: &[u8]) -> Result<AppendOutcome, TeeError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let mut rotated = false;
        if state.slots[state.producer].message_count >= self.slot_messages {
            if !state.can_rotate(state.next_index()) {
                return Ok(AppendOutcome::Overflow);
            }
            self.rotate_locked(state)?;
            rotated = true;
        }
        state.append_at(state.producer, bytes)?;
        drop(guard);

        if rotated {
            self.notify();
        }
        Ok(AppendOutcome::Appended { rotated })
    }

    /// Retire the active slot whatever it holds. Returns false, leaving the
    /// ring untouched, when the next slot is still owed to a consumer.
    pub fn try_rotate(&self) -> Result<bool, TeeError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if !state.can_rotate(state.next_index()) {
            return Ok(false);
        }
        self.rotate_locked(state)?;
        drop(guard);

        self.notify();
        Ok(true)
    }

    fn rotate_locked(&self, state: &mut RingState) -> Result<(), TeeError> {
        let index = state.rotate(self.num_consumers, self.initial_slot_capacity, Instant::now())?;
        self.board.producer.store(index, Release);
        self.board.rotations.fetch_add(1, Relaxed);
        trace!(slot = index, "rotated");
        Ok(())
    }

    /// Copy out every slot the consumer owes, in ring order, releasing its
    /// reference on each. Returns `None` when the consumer is caught up.
    pub fn drain(&self, consumer: usize) -> Result<Option<DrainBatch>, TeeError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let mut cursor = state.consumers[consumer];
        if cursor == state.producer {
            return Ok(None);
        }

        let mut batch = DrainBatch::default();
        let mut reclaimed = 0;
        while cursor != state.producer {
            let slot = &mut state.slots[cursor];
            if slot.ref_count <= 0 {
                return Err(TeeError::ProtocolViolation {
                    slot: cursor,
                    ref_count: slot.ref_count,
                    context: "consumer reached a slot it does not owe",
                });
            }
            if let Some(content) = slot.content.as_ref() {
                batch.bytes.extend_from_slice(content);
            }
            batch.messages += slot.message_count as u64;
            batch.slots += 1;
            if slot.release() {
                reclaimed += 1;
            }
            cursor = (cursor + 1) % self.capacity;
        }
        state.consumers[consumer] = cursor;

        let entry = &self.board.consumers[consumer];
        entry.cursor.store(cursor, Release);
        drop(guard);

        entry.slots_drained.fetch_add(batch.slots, Relaxed);
        entry.messages_drained.fetch_add(batch.messages, Relaxed);
        if reclaimed > 0 {
            self.board.reclaimed.fetch_add(reclaimed, Relaxed);
        }
        Ok(Some(batch))
    }

    /// Slots the consumer still owes, read under the lock.
    pub fn lag(&self, consumer: usize) -> usize {
        let state = self.state.lock();
        (state.producer + self.capacity - state.consumers[consumer]) % self.capacity
    }

    /// Index of the active slot.
    pub fn producer_cursor(&self) -> usize {
        self.state.lock().producer
    }

    pub fn consumer_cursor(&self, consumer: usize) -> usize {
        self.state.lock().consumers[consumer]
    }

    pub fn slot_state(&self, index: usize) -> SlotState {
        let state = self.state.lock();
        let slot = &state.slots[index];
        if slot.is_unused() {
            SlotState::Unused
        } else if index == state.producer {
            SlotState::Active {
                messages: slot.message_count,
                bytes: slot.byte_len(),
                owed: slot.ref_count,
            }
        } else {
            SlotState::Pending {
                messages: slot.message_count,
                bytes: slot.byte_len(),
                owed: slot.ref_count,
            }
        }
    }

    /// Bytes currently reserved by all slot buffers.
    pub fn allocated_bytes(&self) -> usize {
        let state = self.state.lock();
        state.slots.iter().map(RingSlot::allocated).sum()
    }

    /// How long the active slot has been the write target.
    pub fn active_age(&self) -> Duration {
        let state = self.state.lock();
        state.slots[state.producer]
            .created_at
            .map_or(Duration::ZERO, |t| t.elapsed())
    }

    pub fn active_message_count(&self) -> u32 {
        let state = self.state.lock();
        state.slots[state.producer].message_count
    }

    /// Current rotation epoch. Read it before [`SlotRing::drain`] and pass it
    /// to [`SlotRing::wait_for_rotation`] so a rotation in between is not
    /// slept through.
    pub fn signal_epoch(&self) -> u32 {
        self.signal.load(Acquire)
    }

    /// Park until the epoch moves past `seen` or `timeout` passes.
    pub fn wait_for_rotation(&self, seen: u32, timeout: Duration) {
        futex::futex_wait(&self.signal, seen, Some(timeout));
    }

    /// Wake every parked consumer.
    pub fn notify(&self) {
        self.signal.fetch_add(1, Release);
        futex::futex_wake_all(&self.signal);
    }

    /// No more slots will be produced.
    pub fn finish(&self) {
        self.finished.store(true, Release);
        self.notify();
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Acquire)
    }

    /// Tell every thread to stop now, without draining.
    pub fn abort(&self) {
        self.aborted.store(true, Release);
        self.notify();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Acquire)
    }

    /// Ask the producer to treat the input as ended. Returns whether a stop
    /// had already been requested.
    pub fn request_stop(&self) -> bool {
        self.stop_requested.swap(true, AcqRel)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Acquire)
    }

    /// Counters and lags from the board, without taking the lock.
    pub fn snapshot(&self) -> StatsSnapshot {
        let board = &self.board;
        StatsSnapshot {
            processed: board.processed.load(Relaxed),
            bytes_in: board.bytes_in.load(Relaxed),
            dropped: board.dropped.load(Relaxed),
            oversized: board.oversized.load(Relaxed),
            overflows: board.overflows.load(Relaxed),
            rotations: board.rotations.load(Relaxed),
            reclaimed: board.reclaimed.load(Relaxed),
            producer_cursor: board.producer.load(Relaxed),
            consumers: board
                .consumers
                .iter()
                .enumerate()
                .map(|(i, entry)| ConsumerStats {
                    lag: board.lag(i, self.capacity),
                    bytes_written: entry.bytes_written.load(Relaxed),
                    slots_drained: entry.slots_drained.load(Relaxed),
                    messages_drained: entry.messages_drained.load(Relaxed),
                    degraded: entry.degraded.load(Relaxed),
                })
                .collect(),
        }
    }

    /// Overwrite a slot's reference count. Lets tests stage corruption.
    #[cfg(test)]
    pub(crate) fn force_ref_count(&self, index: usize, ref_count: i32) {
        self.state.lock().slots[index].ref_count = ref_count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(slots: usize, slot_messages: u32, consumers: usize) -> SlotRing {
        let config = TeeConfig {
            slots,
            slot_messages,
            max_message_size: 64,
            ..TeeConfig::default()
        };
        SlotRing::new(&config, consumers).unwrap()
    }

    #[test]
    fn first_slot_starts_active() {
        let rb = ring(4, 3, 2);
        assert_eq!(
            rb.slot_state(0),
            SlotState::Active {
                messages: 0,
                bytes: 0,
                owed: 2
            }
        );
        assert_eq!(rb.slot_state(1), SlotState::Unused);
        assert_eq!(rb.drain(0).unwrap(), None);
    }

    #[test]
    fn active_slot_is_not_drained_until_rotated() {
        let rb = ring(4, 3, 1);
        rb.try_append(b"abc").unwrap();
        assert_eq!(rb.drain(0).unwrap(), None);

        assert!(rb.try_rotate().unwrap());
        let batch = rb.drain(0).unwrap().unwrap();
        assert_eq!(batch.bytes, b"abc");
        assert_eq!(batch.messages, 1);
        assert_eq!(batch.slots, 1);
    }

    #[test]
    fn last_consumer_frees_the_slot() {
        let rb = ring(4, 1, 2);
        rb.try_append(b"x").unwrap();
        rb.try_rotate().unwrap();

        rb.drain(0).unwrap().unwrap();
        assert!(matches!(rb.slot_state(0), SlotState::Pending { owed: 1, .. }));
        assert_eq!(rb.board().reclaimed.load(Relaxed), 0);

        rb.drain(1).unwrap().unwrap();
        assert_eq!(rb.slot_state(0), SlotState::Unused);
        assert_eq!(rb.board().reclaimed.load(Relaxed), 1);

        // Nobody owes it any more; draining again yields nothing.
        assert_eq!(rb.drain(0).unwrap(), None);
        assert_eq!(rb.drain(1).unwrap(), None);
        assert_eq!(rb.board().reclaimed.load(Relaxed), 1);
    }

    #[test]
    fn capacity_rotation_happens_on_the_append_after_full() {
        let rb = ring(4, 3, 2);
        for msg in [b"m1", b"m2", b"m3"] {
            assert_eq!(
                rb.try_append(msg).unwrap(),
                AppendOutcome::Appended { rotated: false }
            );
        }
        assert_eq!(rb.producer_cursor(), 0);
        assert_eq!(
            rb.try_append(b"m4").unwrap(),
            AppendOutcome::Appended { rotated: true }
        );
        assert_eq!(rb.producer_cursor(), 1);
        assert_eq!(rb.active_message_count(), 1);
    }

    #[test]
    fn frozen_consumer_blocks_rotation_at_capacity_minus_one() {
        const CAPACITY: usize = 8;
        let rb = ring(CAPACITY, 1, 2);

        for attempt in 0..CAPACITY - 1 {
            assert!(rb.try_rotate().unwrap(), "attempt {} should rotate", attempt);
            // Consumer 1 keeps up, consumer 0 never moves.
            rb.drain(1).unwrap();
        }
        assert!(!rb.try_rotate().unwrap());
        assert_eq!(rb.lag(0), CAPACITY - 1);
        assert_eq!(rb.consumer_cursor(0), 0);
        assert!(matches!(rb.slot_state(0), SlotState::Pending { owed: 1, .. }));

        // Appending into a full active slot hits the same wall.
        rb.try_append(b"a").unwrap();
        assert_eq!(rb.try_append(b"b").unwrap(), AppendOutcome::Overflow);
    }

    #[test]
    fn protocol_violation_on_corrupted_refcount() {
        let rb = ring(4, 1, 1);
        rb.try_append(b"x").unwrap();
        rb.try_rotate().unwrap();
        rb.force_ref_count(0, 0);

        let err = rb.drain(0).unwrap_err();
        assert!(matches!(
            err,
            TeeError::ProtocolViolation {
                slot: 0,
                ref_count: 0,
                ..
            }
        ));
    }

    #[test]
    fn rotating_onto_unreclaimed_slot_is_a_violation() {
        let rb = ring(2, 1, 1);
        // Slot 1 claims to still be owed although no consumer points at it.
        rb.force_ref_count(1, 1);
        assert!(matches!(
            rb.try_rotate(),
            Err(TeeError::ProtocolViolation { slot: 1, .. })
        ));
    }

    #[test]
    fn empty_rotation_is_drained_without_bytes() {
        let rb = ring(4, 3, 1);
        assert!(rb.try_rotate().unwrap());
        let batch = rb.drain(0).unwrap().unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.messages, 0);
        assert_eq!(batch.slots, 1);
    }

    #[test]
    fn allocation_stays_under_ceiling() {
        let rb = ring(4, 5, 1);
        let big = [7u8; 64];
        for _ in 0..4 * 5 * 3 {
            match rb.try_append(&big).unwrap() {
                AppendOutcome::Appended { .. } => {}
                AppendOutcome::Overflow => {
                    rb.drain(0).unwrap();
                }
            }
            assert!(rb.allocated_bytes() <= rb.memory_ceiling());
        }
    }

    #[test]
    fn snapshot_reports_lag_without_lock() {
        let rb = ring(4, 1, 2);
        rb.try_rotate().unwrap();
        rb.try_rotate().unwrap();
        rb.drain(1).unwrap();

        let snap = rb.snapshot();
        assert_eq!(snap.producer_cursor, 2);
        assert_eq!(snap.consumers[0].lag, 2);
        assert_eq!(snap.consumers[1].lag, 0);
        assert_eq!(snap.rotations, 2);
    }
}
