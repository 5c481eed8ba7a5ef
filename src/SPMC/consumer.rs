// src/SPMC/consumer.rs

use crate::config::SinkFailurePolicy;
use crate::error::TeeError;
use crate::Core::sink::Sink;
use crate::SPMC::Buffer::SlotRing;
use crate::SPMC::Structs::DrainBatch;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Drains the ring on behalf of one sink.
///
/// Each consumer owns exactly one cursor. It copies pending slots out under
/// the ring lock and writes them after releasing it, so a slow sink only
/// delays itself.
pub(crate) struct Consumer {
    id: usize,
    ring: Arc<SlotRing>,
    sink: Sink,
    policy: SinkFailurePolicy,
    backoff: Duration,
    degraded: bool,
}

impl Consumer {
    pub(crate) fn new(
        id: usize,
        ring: Arc<SlotRing>,
        sink: Sink,
        policy: SinkFailurePolicy,
        backoff: Duration,
    ) -> Self {
        Self {
            id,
            ring,
            sink,
            policy,
            backoff,
            degraded: false,
        }
    }

    /// Drain until the producer has finished and nothing is left, or until
    /// the run is aborted.
    pub(crate) fn run(mut self) -> Result<(), TeeError> {
        info!(consumer = self.id, sink = self.sink.name(), "consumer started");

        loop {
            if self.ring.is_aborted() {
                return Ok(());
            }

            // Both read before draining: a rotation or the final seal that
            // lands after this point shows up in the next iteration.
            let finished = self.ring.is_finished();
            let epoch = self.ring.signal_epoch();

            match self.ring.drain(self.id)? {
                Some(batch) => self.deliver(batch)?,
                None if finished => break,
                None => self.ring.wait_for_rotation(epoch, self.backoff),
            }
        }

        let entry = &self.ring.board.consumers[self.id];
        info!(
            consumer = self.id,
            sink = self.sink.name(),
            bytes = entry.bytes_written.load(Ordering::Relaxed),
            degraded = self.degraded,
            "sink drained"
        );
        Ok(())
    }

    fn deliver(&mut self, batch: DrainBatch) -> Result<(), TeeError> {
        // Empty slots from deadline rotations: consumed, nothing to write.
        if batch.is_empty() || self.degraded {
            return Ok(());
        }

        match self.sink.write_batch(&batch.bytes) {
            Ok(()) => {
                self.ring.board.consumers[self.id]
                    .bytes_written
                    .fetch_add(batch.bytes.len() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(source) => match self.policy {
                SinkFailurePolicy::Abort => Err(TeeError::SinkWrite {
                    consumer: self.id,
                    sink: self.sink.name().to_string(),
                    source,
                }),
                SinkFailurePolicy::Isolate => {
                    error!(
                        consumer = self.id,
                        sink = self.sink.name(),
                        error = %source,
                        "sink write failed, discarding its data from now on"
                    );
                    self.degraded = true;
                    self.ring.board.consumers[self.id]
                        .degraded
                        .store(true, Ordering::Relaxed);
                    Ok(())
                }
            },
        }
    }
}
