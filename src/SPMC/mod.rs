mod builder;
mod consumer;
mod monitor;
mod producer;

pub use builder::{RunReport, StopHandle, TeeBuilder, TeeHandle};

pub mod Buffer {
    pub mod Buffer;
    pub mod Buffer_impl;
    pub mod layout;
    pub use Buffer::{RingSlot, SlotRing, GROWTH_SLACK, INITIAL_SLOT_CAPACITY, SLOT_UNUSED}; // re-export for stable path
    pub use layout::{ConsumerEntry, CursorBoard};
}

pub mod Structs {
    pub mod Buffer_Structs;
    pub use Buffer_Structs::{AppendOutcome, ConsumerStats, DrainBatch, SlotState, StatsSnapshot}; // re-export for stable path
}
