// Tunables for the ring, the producer and the consumers

use crate::error::TeeError;
use crate::SPMC::Buffer::GROWTH_SLACK;
use std::time::Duration;

/// Amount of slots in the ring.
pub const DEFAULT_SLOTS: usize = 64;

/// Upper bound for the ring size.
pub const MAX_SLOTS: usize = 64 * 1024;

/// Messages a slot holds before the producer rotates.
pub const DEFAULT_SLOT_MESSAGES: u32 = 50;

/// Maximum number of sinks.
pub const MAX_SINKS: usize = 64;

/// Largest message accepted from the input. Bigger datagrams are rejected;
/// stream input is read in chunks of at most this size.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// Upper bound for `max_message_size`, the largest datagram a socket carries
/// in practice.
pub const MAX_MESSAGE_SIZE_LIMIT: usize = 64 * 1024;

/// A slot older than this is rotated even if it is not full.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// Interval between statistics reports.
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Longest the producer waits on the input before re-checking the deadline.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Longest an idle consumer sleeps before re-checking the ring.
pub const DEFAULT_CONSUMER_BACKOFF: Duration = Duration::from_millis(10);

/// What the producer does when rotating would overwrite a slot some
/// consumer has not drained yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Discard the message that did not fit and count it.
    #[default]
    Drop,
    /// Wait for the slowest consumer. With `max_wait` set, give up after that
    /// long and drop the message.
    Block { max_wait: Option<Duration> },
}

/// What a consumer does when its sink write fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkFailurePolicy {
    /// Fail the whole run.
    #[default]
    Abort,
    /// Mark the sink degraded and keep draining so nobody else stalls.
    Isolate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeeConfig {
    pub slots: usize,
    pub slot_messages: u32,
    pub max_message_size: usize,
    pub deadline: Duration,
    pub poll_interval: Duration,
    pub consumer_backoff: Duration,
    /// `None` disables the periodic report.
    pub stats_interval: Option<Duration>,
    pub overflow: OverflowPolicy,
    pub on_sink_error: SinkFailurePolicy,
}

impl Default for TeeConfig {
    fn default() -> Self {
        Self {
            slots: DEFAULT_SLOTS,
            slot_messages: DEFAULT_SLOT_MESSAGES,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            deadline: DEFAULT_DEADLINE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            consumer_backoff: DEFAULT_CONSUMER_BACKOFF,
            stats_interval: Some(DEFAULT_STATS_INTERVAL),
            overflow: OverflowPolicy::default(),
            on_sink_error: SinkFailurePolicy::default(),
        }
    }
}

impl TeeConfig {
    /// Check the configuration for a run with `sinks` consumers.
    pub fn validate(&self, sinks: usize) -> Result<(), TeeError> {
        if sinks == 0 || sinks > MAX_SINKS {
            return Err(TeeError::Usage(format!(
                "expected 1 to {} sinks, got {}",
                MAX_SINKS, sinks
            )));
        }
        if self.slots < 2 || self.slots > MAX_SLOTS {
            return Err(TeeError::Config(format!(
                "the ring needs 2 to {} slots, got {}",
                MAX_SLOTS, self.slots
            )));
        }
        if self.slot_messages == 0 {
            return Err(TeeError::Config("slots must hold at least one message".into()));
        }
        if self.max_message_size == 0 || self.max_message_size > MAX_MESSAGE_SIZE_LIMIT {
            return Err(TeeError::Config(format!(
                "maximum message size must be between 1 and {} bytes, got {}",
                MAX_MESSAGE_SIZE_LIMIT, self.max_message_size
            )));
        }
        if self.checked_memory_ceiling().is_none() {
            return Err(TeeError::Config(format!(
                "{} slots of {} messages do not fit in memory",
                self.slots, self.slot_messages
            )));
        }
        if self.deadline.is_zero() || self.poll_interval.is_zero() || self.consumer_backoff.is_zero()
        {
            return Err(TeeError::Config(
                "deadline, poll interval and consumer backoff must be positive".into(),
            ));
        }
        if self.stats_interval.is_some_and(|i| i.is_zero()) {
            return Err(TeeError::Config(
                "stats interval must be positive (use None to disable)".into(),
            ));
        }
        Ok(())
    }

    /// Worst-case size of one slot buffer. Saturates for configurations
    /// [`TeeConfig::validate`] rejects.
    pub fn slot_ceiling(&self) -> usize {
        self.checked_slot_ceiling().unwrap_or(usize::MAX)
    }

    /// Worst-case bytes held by slot buffers across the whole ring.
    pub fn memory_ceiling(&self) -> usize {
        self.checked_memory_ceiling().unwrap_or(usize::MAX)
    }

    fn checked_slot_ceiling(&self) -> Option<usize> {
        (self.slot_messages as usize)
            .checked_mul(self.max_message_size)?
            .checked_add(GROWTH_SLACK)
    }

    fn checked_memory_ceiling(&self) -> Option<usize> {
        self.slots.checked_mul(self.checked_slot_ceiling()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = TeeConfig::default();
        assert!(config.validate(1).is_ok());
        assert!(config.validate(MAX_SINKS).is_ok());
    }

    #[test]
    fn sink_count_outside_bounds_is_usage_error() {
        let config = TeeConfig::default();
        assert!(matches!(config.validate(0), Err(TeeError::Usage(_))));
        assert!(matches!(config.validate(MAX_SINKS + 1), Err(TeeError::Usage(_))));
    }

    #[test]
    fn degenerate_ring_is_rejected() {
        let config = TeeConfig {
            slots: 1,
            ..TeeConfig::default()
        };
        assert!(matches!(config.validate(1), Err(TeeError::Config(_))));

        let config = TeeConfig {
            stats_interval: Some(Duration::ZERO),
            ..TeeConfig::default()
        };
        assert!(matches!(config.validate(1), Err(TeeError::Config(_))));
    }

    #[test]
    fn oversized_geometry_is_rejected() {
        let config = TeeConfig {
            slot_messages: 4,
            max_message_size: usize::MAX / 2,
            ..TeeConfig::default()
        };
        assert!(matches!(config.validate(1), Err(TeeError::Config(_))));

        let config = TeeConfig {
            max_message_size: MAX_MESSAGE_SIZE_LIMIT + 1,
            ..TeeConfig::default()
        };
        assert!(matches!(config.validate(1), Err(TeeError::Config(_))));

        let config = TeeConfig {
            slots: MAX_SLOTS + 1,
            ..TeeConfig::default()
        };
        assert!(matches!(config.validate(1), Err(TeeError::Config(_))));

        let config = TeeConfig {
            slots: usize::MAX / 2,
            slot_messages: u32::MAX,
            max_message_size: MAX_MESSAGE_SIZE_LIMIT,
            ..TeeConfig::default()
        };
        assert!(matches!(config.validate(1), Err(TeeError::Config(_))));
        assert_eq!(config.memory_ceiling(), usize::MAX);

        let config = TeeConfig {
            max_message_size: MAX_MESSAGE_SIZE_LIMIT,
            ..TeeConfig::default()
        };
        assert!(config.validate(1).is_ok());
    }

    #[test]
    fn memory_ceiling_follows_geometry() {
        let config = TeeConfig {
            slots: 4,
            slot_messages: 10,
            max_message_size: 100,
            ..TeeConfig::default()
        };
        assert_eq!(config.slot_ceiling(), 1000 + GROWTH_SLACK);
        assert_eq!(config.memory_ceiling(), 4 * (1000 + GROWTH_SLACK));
    }
}
