//! telemetry/mod.rs
//! Counters, stage timers and immutable snapshots for channel runs.
//!
//! Counters are mutated by the host side only; workers report progress
//! through the segment header, never through these types.

pub mod counters;
pub mod timers;
pub mod snapshot;

pub use counters::*;
pub use timers::*;
pub use snapshot::*;
