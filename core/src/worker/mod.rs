//! Worker side of the protocol and the ways the host starts workers.
//!
//! The `channel-worker` binary and in-process thread workers run the same
//! `WorkerRuntime`; only the launcher differs.

pub mod args;
pub mod launch;
pub mod runtime;
pub mod transform;

pub use args::WorkerInvocation;
pub use launch::{LaunchError, ProcessLauncher, ThreadLauncher, WorkerHandle, WorkerLauncher};
pub use runtime::{RunReport, WorkerRuntime, WorkerSource};
pub use transform::{BlockTransform, KeystreamXor, Passthrough};
