pub mod futex;
pub mod sink;
pub mod source;

pub use sink::{open_sink, open_sinks, Sink};
pub use source::{ChannelSource, FdSource, MessageSource, Recv};
