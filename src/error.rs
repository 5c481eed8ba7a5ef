use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Input ended and every sink drained its backlog.
pub const EXIT_OK: i32 = 0;
/// Bad arguments or configuration.
pub const EXIT_USAGE: i32 = 3;
/// A sink or the input could not be set up; no thread was started.
pub const EXIT_SETUP: i32 = 4;
/// Protocol violation, aborting sink failure, a panicked worker or a forced
/// stop.
pub const EXIT_FATAL: i32 = 5;

#[derive(Error, Debug)]
pub enum TeeError {
    #[error("usage: {0}")]
    Usage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed opening sink {}: {source}", path.display())]
    SinkOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed setting up input: {0}")]
    Source(#[source] io::Error),

    #[error("failed spawning {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Cursor or reference count corruption. Never retried.
    #[error("protocol violation on slot {slot}: reference count {ref_count} ({context})")]
    ProtocolViolation {
        slot: usize,
        ref_count: i32,
        context: &'static str,
    },

    #[error("consumer {consumer} failed writing to {sink}: {source}")]
    SinkWrite {
        consumer: usize,
        sink: String,
        #[source]
        source: io::Error,
    },

    #[error("{0} thread panicked")]
    ThreadPanicked(String),

    /// Stopped twice; sinks may not have received everything.
    #[error("run aborted before every sink was drained")]
    Aborted,
}

impl TeeError {
    /// Process exit code for this error category.
    pub fn exit_code(&self) -> i32 {
        match self {
            TeeError::Usage(_) | TeeError::Config(_) => EXIT_USAGE,
            TeeError::SinkOpen { .. } | TeeError::Source(_) | TeeError::Spawn { .. } => EXIT_SETUP,
            TeeError::ProtocolViolation { .. }
            | TeeError::SinkWrite { .. }
            | TeeError::ThreadPanicked(_)
            | TeeError::Aborted => EXIT_FATAL,
        }
    }

    /// Whether the error happened after worker threads were running.
    pub fn is_fatal_runtime(&self) -> bool {
        self.exit_code() == EXIT_FATAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_category() {
        let usage = TeeError::Usage("no sinks".into());
        let setup = TeeError::SinkOpen {
            path: PathBuf::from("/nonexistent/out"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        let fatal = TeeError::ProtocolViolation {
            slot: 3,
            ref_count: 0,
            context: "drain",
        };

        assert_eq!(usage.exit_code(), EXIT_USAGE);
        assert_eq!(setup.exit_code(), EXIT_SETUP);
        assert_eq!(fatal.exit_code(), EXIT_FATAL);
        assert!(fatal.is_fatal_runtime());
        assert!(!setup.is_fatal_runtime());
    }

    #[test]
    fn sink_open_message_names_the_path() {
        let err = TeeError::SinkOpen {
            path: PathBuf::from("/nonexistent/out"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(err.to_string().contains("/nonexistent/out"));
    }
}
