//! Starting workers: as external processes, or as threads in this process.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use thiserror::Error;

use crate::constants::{SHM_DIR_ENV, SHM_PREFIX_ENV, WORKER_KEY_ENV};
use crate::shm::{SegmentNamespace, WaitPolicy};
use crate::types::ChannelError;
use crate::worker::args::WorkerInvocation;
use crate::worker::runtime::{WorkerRuntime, WorkerSource};
use crate::worker::transform::{BlockTransform, KeystreamXor};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to launch worker {slot}: {reason}")]
    WorkerLaunchFailed { slot: usize, reason: String },

    #[error("worker {slot} exited with status {code:?}")]
    WorkerExited { slot: usize, code: Option<i32> },

    #[error("worker {slot} failed: {reason}")]
    WorkerFailed { slot: usize, reason: String },

    #[error("invalid worker arguments: {0}")]
    InvalidArgs(String),
}

/// A running worker the host must eventually reap.
pub trait WorkerHandle: Send {
    fn slot(&self) -> usize;

    /// Non-blocking check whether the worker has exited.
    fn is_finished(&mut self) -> bool;

    /// Wait for exit and report how the worker ended.
    fn join(self: Box<Self>) -> Result<(), LaunchError>;
}

pub trait WorkerLauncher: Send + Sync {
    fn launch(
        &self,
        invocation: &WorkerInvocation,
        namespace: &SegmentNamespace,
    ) -> Result<Box<dyn WorkerHandle>, LaunchError>;
}

// ---------------------------------------------------------------------------
// External process
// ---------------------------------------------------------------------------

/// Spawns the worker executable with the positional launch contract.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    key: Option<KeystreamXor>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), key: None }
    }

    /// Pass a keystream key to the worker through the environment.
    pub fn with_key(mut self, key: KeystreamXor) -> Self {
        self.key = Some(key);
        self
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(
        &self,
        invocation: &WorkerInvocation,
        namespace: &SegmentNamespace,
    ) -> Result<Box<dyn WorkerHandle>, LaunchError> {
        let slot = invocation.slot_index;
        let mut cmd = Command::new(&self.program);
        cmd.args(invocation.to_args())
            .env(SHM_DIR_ENV, namespace.dir())
            .env(SHM_PREFIX_ENV, namespace.prefix())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        if let Some(key) = &self.key {
            cmd.env(WORKER_KEY_ENV, key.to_hex());
        }

        let child = cmd.spawn().map_err(|e| LaunchError::WorkerLaunchFailed {
            slot,
            reason: format!("{}: {e}", self.program.display()),
        })?;

        tracing::info!(slot, pid = child.id(), program = %self.program.display(), "worker process launched");
        Ok(Box::new(ProcessHandle { slot, child }))
    }
}

struct ProcessHandle {
    slot: usize,
    child: Child,
}

impl WorkerHandle for ProcessHandle {
    fn slot(&self) -> usize {
        self.slot
    }

    fn is_finished(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    fn join(mut self: Box<Self>) -> Result<(), LaunchError> {
        let slot = self.slot;
        let status = self.child.wait().map_err(|e| LaunchError::WorkerFailed {
            slot,
            reason: e.to_string(),
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(LaunchError::WorkerExited { slot, code: status.code() })
        }
    }
}

// ---------------------------------------------------------------------------
// In-process thread
// ---------------------------------------------------------------------------

/// Runs the worker runtime on a thread against the same segments a process would use.
#[derive(Clone)]
pub struct ThreadLauncher {
    transform: Arc<dyn BlockTransform>,
    source: Option<Bytes>,
    policy: WaitPolicy,
}

impl ThreadLauncher {
    pub fn new(transform: Arc<dyn BlockTransform>, policy: WaitPolicy) -> Self {
        Self { transform, source: None, policy }
    }

    /// Serve input from memory instead of the invocation's file path.
    pub fn with_source(mut self, source: Bytes) -> Self {
        self.source = Some(source);
        self
    }
}

impl WorkerLauncher for ThreadLauncher {
    fn launch(
        &self,
        invocation: &WorkerInvocation,
        namespace: &SegmentNamespace,
    ) -> Result<Box<dyn WorkerHandle>, LaunchError> {
        let slot = invocation.slot_index;
        let inv = invocation.clone();
        let ns = namespace.clone();
        let transform = self.transform.clone();
        let policy = self.policy;
        let source = match (&self.source, &inv.file_path) {
            (Some(bytes), _) => Some(WorkerSource::Memory(bytes.clone())),
            (None, Some(path)) => Some(WorkerSource::File(path.clone())),
            (None, None) => None,
        };

        let handle = thread::Builder::new()
            .name(format!("channel-worker-{slot}"))
            .spawn(move || -> Result<(), ChannelError> {
                let runtime = WorkerRuntime::attach(&ns, &inv, policy)?;
                runtime.run(source, transform.as_ref())?;
                Ok(())
            })
            .map_err(|e| LaunchError::WorkerLaunchFailed { slot, reason: e.to_string() })?;

        tracing::debug!(slot, "worker thread launched");
        Ok(Box::new(ThreadHandle { slot, handle }))
    }
}

struct ThreadHandle {
    slot: usize,
    handle: JoinHandle<Result<(), ChannelError>>,
}

impl WorkerHandle for ThreadHandle {
    fn slot(&self) -> usize {
        self.slot
    }

    fn is_finished(&mut self) -> bool {
        self.handle.is_finished()
    }

    fn join(self: Box<Self>) -> Result<(), LaunchError> {
        let slot = self.slot;
        match self.handle.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(LaunchError::WorkerFailed { slot, reason: e.to_string() }),
            Err(_) => Err(LaunchError::WorkerFailed { slot, reason: "worker thread panicked".into() }),
        }
    }
}
