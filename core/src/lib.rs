//! channel-core
//!
//! Data plane between a host process and isolated crypto workers: block
//! framing, in-process rings, shared-memory segments, the readiness
//! handshake and the dispatch arithmetic that spreads a file over workers.

#![deny(unsafe_code)]

// Shared and top level
pub mod config;
pub mod constants;
pub mod types;

// Buffers
pub mod block;
pub mod ring;
pub mod shm;

// Topologies and the worker side
pub mod channel;
pub mod worker;

pub mod telemetry;

// -----------------------------------------------------------------------------
// Prelude (Rust users)
// -----------------------------------------------------------------------------
pub mod prelude {
    pub use crate::channel::{
        ByteChannel, Channel, ChannelBuilder, DispatchContext, DispatchPlan, Topology,
    };
    pub use crate::config::ChannelConfig;
    pub use crate::telemetry::TelemetrySnapshot;
    pub use crate::types::{ChannelError, CipherMode, ReadOutcome};
    pub use crate::worker::{
        BlockTransform, KeystreamXor, Passthrough, ProcessLauncher, ThreadLauncher, WorkerLauncher,
    };
}
