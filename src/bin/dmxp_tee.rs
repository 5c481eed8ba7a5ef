//! dmxp-tee: copy every message from standard input (or a unix datagram
//! socket) to each of the given files, one writer thread per file.
//!
//! # Usage
//!
//! ```bash
//! # Fan stdin out to three files
//! producer | dmxp-tee a.log b.log c.log
//!
//! # Read datagrams from a socket, wait for slow writers instead of dropping
//! dmxp-tee --socket /run/feed.sock --overflow block out1 out2
//! ```

use clap::{Parser, ValueEnum};
use dmxp_tee::config::{
    DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_SLOTS, DEFAULT_SLOT_MESSAGES,
};
use dmxp_tee::error::{EXIT_OK, EXIT_USAGE};
use dmxp_tee::{
    open_sinks, FdSource, OverflowPolicy, RunReport, SinkFailurePolicy, TeeBuilder, TeeError,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dmxp-tee")]
#[command(about = "Threaded tee: fan one message stream out to many files")]
#[command(version)]
struct Args {
    /// Output files (1 to 64)
    #[arg(required = true)]
    sinks: Vec<PathBuf>,

    /// Bind a unix datagram socket at this path and read from it instead of stdin
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Slots in the ring buffer
    #[arg(long, default_value_t = DEFAULT_SLOTS)]
    slots: usize,

    /// Messages per slot before it is handed to the writers
    #[arg(long, default_value_t = DEFAULT_SLOT_MESSAGES)]
    slot_messages: u32,

    /// Largest accepted message in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    max_message_size: usize,

    /// Seconds after which a partially filled slot is written anyway
    #[arg(long, default_value = "5")]
    deadline: u64,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long, default_value = "5")]
    stats_interval: u64,

    /// What to do when a writer falls a whole ring behind
    #[arg(long, value_enum, default_value_t = OverflowMode::Drop)]
    overflow: OverflowMode,

    /// With --overflow block: give up and drop after this many milliseconds
    #[arg(long)]
    block_timeout_ms: Option<u64>,

    /// What to do when writing to a file fails
    #[arg(long, value_enum, default_value_t = SinkErrorMode::Abort)]
    on_sink_error: SinkErrorMode,

    /// Truncate output files when opening them
    #[arg(long)]
    truncate: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OverflowMode {
    Drop,
    Block,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SinkErrorMode {
    Abort,
    Isolate,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { EXIT_USAGE } else { EXIT_OK };
        }
    };

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match tee(args) {
        Ok(report) => {
            info!(
                elapsed_ms = report.elapsed.as_millis() as u64,
                processed = report.stats.processed,
                dropped = report.stats.dropped,
                "done"
            );
            EXIT_OK
        }
        Err(e) => {
            error!(error = %e, "dmxp-tee failed");
            e.exit_code()
        }
    }
}

fn build(args: &Args) -> TeeBuilder {
    let overflow = match args.overflow {
        OverflowMode::Drop => OverflowPolicy::Drop,
        OverflowMode::Block => OverflowPolicy::Block {
            max_wait: args.block_timeout_ms.map(Duration::from_millis),
        },
    };
    let on_sink_error = match args.on_sink_error {
        SinkErrorMode::Abort => SinkFailurePolicy::Abort,
        SinkErrorMode::Isolate => SinkFailurePolicy::Isolate,
    };
    let stats_interval = match args.stats_interval {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    TeeBuilder::new()
        .with_slots(args.slots)
        .with_slot_messages(args.slot_messages)
        .with_max_message_size(args.max_message_size)
        .with_deadline(Duration::from_secs(args.deadline))
        .with_stats_interval(stats_interval)
        .with_overflow_policy(overflow)
        .with_sink_failure_policy(on_sink_error)
}

fn tee(args: Args) -> Result<RunReport, TeeError> {
    let builder = build(&args);

    // Usage problems surface before any file is touched.
    builder.config().validate(args.sinks.len())?;
    let sinks = open_sinks(&args.sinks, args.truncate)?;

    let handle = match &args.socket {
        Some(path) => {
            let source = FdSource::bind_unix_datagram(path).map_err(TeeError::Source)?;
            builder.spawn(source, sinks)?
        }
        None => {
            let source = FdSource::stdin().map_err(TeeError::Source)?;
            builder.spawn(source, sinks)?
        }
    };

    let stop = handle.stop_handle();
    if let Err(e) = ctrlc::set_handler(move || stop.request_stop()) {
        warn!(error = %e, "could not install signal handler");
    }

    handle.wait()
}
