use crate::SPMC::Buffer::SlotRing;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::info;

#[derive(Default)]
struct StopFlag {
    stopped: Mutex<bool>,
    cond: Condvar,
}

/// Periodic statistics reporter. Reads only the lock-free cursor board.
pub(crate) struct Monitor {
    stop: Arc<StopFlag>,
    thread: Option<JoinHandle<()>>,
}

impl Monitor {
    pub(crate) fn spawn(ring: Arc<SlotRing>, interval: Duration) -> std::io::Result<Self> {
        let stop = Arc::new(StopFlag::default());
        let thread_stop = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("tee-monitor".to_string())
            .spawn(move || {
                let mut stopped = thread_stop.stopped.lock();
                while !*stopped {
                    let timed_out = thread_stop.cond.wait_for(&mut stopped, interval).timed_out();
                    if timed_out && !*stopped {
                        info!(target: "dmxp_tee::stats", "{}", ring.snapshot());
                    }
                }
            })?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Stop reporting and wait for the thread.
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        *self.stop.stopped.lock() = true;
        self.stop.cond.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
