use super::consumer::Consumer;
use super::monitor::Monitor;
use super::producer::Producer;
use crate::config::{OverflowPolicy, SinkFailurePolicy, TeeConfig};
use crate::error::TeeError;
use crate::Core::sink::Sink;
use crate::Core::source::MessageSource;
use crate::SPMC::Buffer::SlotRing;
use crate::SPMC::Structs::StatsSnapshot;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

type WorkerExit = (String, Result<(), TeeError>);

pub struct TeeBuilder {
    config: TeeConfig,
}

impl Default for TeeBuilder {
    fn default() -> Self {
        Self {
            config: TeeConfig::default(),
        }
    }
}

impl TeeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: TeeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_slots(mut self, slots: usize) -> Self {
        self.config.slots = slots;
        self
    }

    pub fn with_slot_messages(mut self, messages: u32) -> Self {
        self.config.slot_messages = messages;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.config.deadline = deadline;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn with_consumer_backoff(mut self, backoff: Duration) -> Self {
        self.config.consumer_backoff = backoff;
        self
    }

    /// `None` disables the periodic report.
    pub fn with_stats_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.stats_interval = interval;
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.config.overflow = policy;
        self
    }

    pub fn with_sink_failure_policy(mut self, policy: SinkFailurePolicy) -> Self {
        self.config.on_sink_error = policy;
        self
    }

    pub fn config(&self) -> &TeeConfig {
        &self.config
    }

    /// Start one producer reading `source` and one consumer per sink.
    ///
    /// Nothing is started if the configuration is invalid.
    pub fn spawn<S>(self, source: S, sinks: Vec<Sink>) -> Result<TeeHandle, TeeError>
    where
        S: MessageSource + 'static,
    {
        let config = self.config;
        let ring = Arc::new(SlotRing::new(&config, sinks.len())?);
        let (tx, exits) = mpsc::channel();

        info!(
            slots = config.slots,
            slot_messages = config.slot_messages,
            sinks = sinks.len(),
            memory_ceiling = ring.memory_ceiling(),
            "starting fan-out"
        );

        let mut handle = TeeHandle {
            ring: Arc::clone(&ring),
            workers: Vec::with_capacity(sinks.len()),
            producer: None,
            exits,
            monitor: None,
            started: Instant::now(),
        };

        for (id, sink) in sinks.into_iter().enumerate() {
            let consumer = Consumer::new(
                id,
                Arc::clone(&ring),
                sink,
                config.on_sink_error,
                config.consumer_backoff,
            );
            let worker = spawn_worker(format!("tee-consumer-{}", id), &ring, &tx, move || {
                consumer.run()
            })?;
            handle.workers.push(worker);
        }

        let producer = Producer::new(Arc::clone(&ring), source, config.clone());
        let worker = spawn_worker("tee-producer".to_string(), &ring, &tx, move || producer.run())?;
        handle.producer = Some(worker);

        if let Some(interval) = config.stats_interval {
            let monitor = Monitor::spawn(Arc::clone(&ring), interval).map_err(|source| {
                ring.abort();
                TeeError::Spawn {
                    name: "tee-monitor".to_string(),
                    source,
                }
            })?;
            handle.monitor = Some(monitor);
        }

        Ok(handle)
    }
}

/// Run `work` on a named thread and report how it ended. Any failure,
/// panics included, aborts the whole ring.
fn spawn_worker<F>(
    name: String,
    ring: &Arc<SlotRing>,
    tx: &Sender<WorkerExit>,
    work: F,
) -> Result<JoinHandle<()>, TeeError>
where
    F: FnOnce() -> Result<(), TeeError> + Send + 'static,
{
    let thread_ring = Arc::clone(ring);
    let tx = tx.clone();
    let thread_name = name.clone();

    thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(work))
                .unwrap_or_else(|_| Err(TeeError::ThreadPanicked(thread_name.clone())));
            let failed = outcome.is_err();
            // Report before aborting: whoever sees the abort also finds the error.
            let _ = tx.send((thread_name, outcome));
            if failed {
                thread_ring.abort();
            }
        })
        .map_err(|source| {
            // Threads already running must not wait for input forever.
            ring.abort();
            TeeError::Spawn { name, source }
        })
}

/// Final numbers of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub stats: StatsSnapshot,
    pub elapsed: Duration,
}

/// Requests a graceful stop from anywhere, e.g. a signal handler.
#[derive(Clone)]
pub struct StopHandle {
    ring: Arc<SlotRing>,
}

impl StopHandle {
    /// The producer seals what it has and the consumers drain it, exactly as
    /// on end of input. A second request aborts the run without draining.
    pub fn request_stop(&self) {
        stop_or_abort(&self.ring);
    }
}

fn stop_or_abort(ring: &SlotRing) {
    if ring.request_stop() {
        warn!("second stop request, aborting without draining");
        ring.abort();
    }
}

/// How often [`TeeHandle::wait`] looks for an abort nobody reported.
const WAIT_TICK: Duration = Duration::from_millis(100);

/// A running fan-out.
pub struct TeeHandle {
    ring: Arc<SlotRing>,
    workers: Vec<JoinHandle<()>>,
    producer: Option<JoinHandle<()>>,
    exits: Receiver<WorkerExit>,
    monitor: Option<Monitor>,
    started: Instant,
}

impl TeeHandle {
    /// Current counters, read without the ring lock.
    pub fn stats(&self) -> StatsSnapshot {
        self.ring.snapshot()
    }

    pub fn ring(&self) -> &Arc<SlotRing> {
        &self.ring
    }

    /// Treat the input as ended. Calling it twice aborts.
    pub fn shutdown(&self) {
        stop_or_abort(&self.ring);
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            ring: Arc::clone(&self.ring),
        }
    }

    /// Wait for the run to end.
    ///
    /// Returns as soon as any worker fails, with that worker's error, or
    /// once the run is aborted by a second stop request. Consumers are then
    /// not joined, since one may be stuck in a sink write; the producer is,
    /// so its source is restored before the caller exits.
    pub fn wait(mut self) -> Result<RunReport, TeeError> {
        let mut remaining = self.workers.len() + usize::from(self.producer.is_some());
        while remaining > 0 {
            match self.exits.recv_timeout(WAIT_TICK) {
                Ok((_, Ok(()))) => remaining -= 1,
                Ok((name, Err(e))) => {
                    error!(thread = %name, error = %e, "fatal error, aborting");
                    return Err(self.abandon(e));
                }
                Err(RecvTimeoutError::Timeout) if self.ring.is_aborted() => {
                    // A failed worker reports before it aborts.
                    while let Ok((name, outcome)) = self.exits.try_recv() {
                        if let Err(e) = outcome {
                            error!(thread = %name, error = %e, "fatal error, aborting");
                            return Err(self.abandon(e));
                        }
                    }
                    return Err(self.abandon(TeeError::Aborted));
                }
                Err(RecvTimeoutError::Timeout) => {}
                // Every sender gone means every worker reported.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if let Some(producer) = self.producer.take() {
            let _ = producer.join();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }

        let report = RunReport {
            stats: self.ring.snapshot(),
            elapsed: self.started.elapsed(),
        };
        info!(target: "dmxp_tee::stats", "final: {}", report.stats);
        Ok(report)
    }

    /// Abort the run and wait for the producer only.
    fn abandon(&mut self, err: TeeError) -> TeeError {
        self.ring.abort();
        if let Some(producer) = self.producer.take() {
            let _ = producer.join();
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }
        err
    }
}
