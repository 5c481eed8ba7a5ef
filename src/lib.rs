// Module naming follows project convention (SPMC = Single-Producer Multi-Consumer)
#![allow(non_snake_case)]

//! DMXP-Tee: a threaded `tee`.
//!
//! One producer thread reads discrete messages from a source and packs them
//! into a fixed ring of slots. Every sink gets its own consumer thread that
//! drains the ring at its own pace. A slot is freed by whichever consumer
//! drains it last.

pub mod config;
pub mod error;
pub mod Core;
pub mod SPMC;
pub mod Debug {
    pub mod StructDebug;
}

pub use config::{OverflowPolicy, SinkFailurePolicy, TeeConfig};
pub use error::TeeError;
pub use Core::{open_sinks, ChannelSource, FdSource, MessageSource, Sink};
pub use SPMC::{RunReport, StopHandle, TeeBuilder, TeeHandle};
