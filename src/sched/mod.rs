// Scheduling layer: weighted virtual-time fair queueing over one sink.
// Numan Thabit 2026

pub mod fairq;
pub mod vtime;

pub use fairq::{FairQueue, FairQueueConfig, FlowId};
pub use vtime::VirtualClock;
