// In src/SPMC/producer.rs
use crate::config::{OverflowPolicy, TeeConfig};
use crate::error::TeeError;
use crate::Core::source::{MessageSource, Recv};
use crate::SPMC::Buffer::SlotRing;
use crate::SPMC::Structs::AppendOutcome;
use crossbeam_utils::Backoff;
use std::cell::Cell;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Sleep between rotation retries once spinning is no longer worth it.
const RETRY_SLEEP: Duration = Duration::from_millis(10);

/// The single writer of the ring.
///
/// Pulls messages off the source, packs them into the active slot and
/// rotates when the slot is full or older than the deadline.
pub(crate) struct Producer<S: MessageSource> {
    ring: Arc<SlotRing>,
    source: S,
    config: TeeConfig,
    buf: Vec<u8>,
    /// Inside a run of overflowing messages; logged once per run.
    overflowing: Cell<bool>,
}

impl<S: MessageSource> Producer<S> {
    pub(crate) fn new(ring: Arc<SlotRing>, source: S, config: TeeConfig) -> Self {
        let buf = vec![0u8; config.max_message_size];
        Self {
            ring,
            source,
            config,
            buf,
            overflowing: Cell::new(false),
        }
    }

    /// Run until end of input, a stop request, or an abort.
    pub(crate) fn run(mut self) -> Result<(), TeeError> {
        info!(source = self.source.label(), "producer started");

        loop {
            if self.ring.is_aborted() {
                return Ok(());
            }
            if self.ring.stop_requested() {
                info!("stop requested, sealing input");
                break;
            }

            self.check_deadline()?;

            let timeout = self.wait_budget();
            match self.source.recv(&mut self.buf, timeout) {
                Ok(Recv::Message(n)) => self.publish(&self.buf[..n])?,
                Ok(Recv::Oversized(len)) => {
                    self.ring.board.oversized.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        len,
                        max = self.config.max_message_size,
                        "rejecting oversized message"
                    );
                }
                Ok(Recv::Idle) => {}
                Ok(Recv::Eof) => {
                    info!("end of input");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "input read failed, treating as end of input");
                    break;
                }
            }
        }

        self.seal()
    }

    /// Rotate the active slot if it outlived the deadline, full or not.
    fn check_deadline(&self) -> Result<(), TeeError> {
        if self.ring.active_age() < self.config.deadline {
            return Ok(());
        }
        if self.ring.try_rotate()? {
            debug!("deadline rotation");
        } else {
            // Not a drop: the slot stays active and keeps collecting.
            debug!("deadline rotation refused, ring full");
        }
        Ok(())
    }

    /// How long the next receive may block: up to the poll interval, but no
    /// later than the active slot's deadline.
    fn wait_budget(&self) -> Duration {
        let until_deadline = self.config.deadline.saturating_sub(self.ring.active_age());
        until_deadline
            .min(self.config.poll_interval)
            .max(self.config.consumer_backoff)
    }

    fn publish(&self, message: &[u8]) -> Result<(), TeeError> {
        if let AppendOutcome::Appended { rotated } = self.ring.try_append(message)? {
            self.stored(message.len(), rotated);
            return Ok(());
        }

        self.ring.board.overflows.fetch_add(1, Ordering::Relaxed);
        if !self.overflowing.replace(true) {
            warn!(
                policy = ?self.config.overflow,
                "ring full, a consumer is lagging a whole ring behind"
            );
        }

        match self.config.overflow {
            OverflowPolicy::Drop => {
                self.dropped(message.len());
                Ok(())
            }
            OverflowPolicy::Block { max_wait } => self.publish_blocking(message, max_wait),
        }
    }

    /// Retry until the lagging consumer frees a slot. Falls back to a drop
    /// after `max_wait`.
    fn publish_blocking(&self, message: &[u8], max_wait: Option<Duration>) -> Result<(), TeeError> {
        let started = Instant::now();
        let backoff = Backoff::new();

        loop {
            if self.ring.is_aborted() {
                return Ok(());
            }
            // Stopping: give up on this message and go seal what is stored.
            if self.ring.stop_requested() {
                self.dropped(message.len());
                return Ok(());
            }
            if backoff.is_completed() {
                thread::sleep(RETRY_SLEEP);
            } else {
                backoff.snooze();
            }

            if let AppendOutcome::Appended { rotated } = self.ring.try_append(message)? {
                self.stored(message.len(), rotated);
                return Ok(());
            }
            if max_wait.is_some_and(|limit| started.elapsed() >= limit) {
                self.dropped(message.len());
                return Ok(());
            }
        }
    }

    fn stored(&self, len: usize, rotated: bool) {
        self.ring.board.record_processed(len);
        if self.overflowing.replace(false) {
            info!("ring has room again");
        }
        if rotated {
            debug!(slot = self.ring.board.producer.load(Ordering::Relaxed), "capacity rotation");
        }
    }

    fn dropped(&self, len: usize) {
        self.ring.board.record_dropped();
        debug!(len, "dropped message, ring full");
    }

    /// Retire the last slot so consumers can drain it, then mark the ring
    /// finished. Waits for room as long as it takes; only an abort (e.g. a
    /// second stop request) cuts it short.
    fn seal(&self) -> Result<(), TeeError> {
        if self.ring.active_message_count() > 0 {
            let backoff = Backoff::new();
            let mut warned = false;
            while !self.ring.try_rotate()? {
                if self.ring.is_aborted() {
                    return Ok(());
                }
                if !warned {
                    warn!("waiting for lagging consumers before sealing the last slot");
                    warned = true;
                }
                if backoff.is_completed() {
                    thread::sleep(RETRY_SLEEP);
                } else {
                    backoff.snooze();
                }
            }
        }

        self.ring.finish();
        let stats = self.ring.snapshot();
        info!(
            processed = stats.processed,
            dropped = stats.dropped,
            "producer finished"
        );
        Ok(())
    }
}
