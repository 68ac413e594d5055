use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::channel::plan::DispatchPlan;
use crate::types::CipherMode;

/// Job-wide facts every channel of a job needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchContext {
    /// Total bytes the stream will carry.
    pub payload_len: u64,
    pub requested_workers: usize,
    pub mode: CipherMode,
    /// Input file for topologies whose workers read it themselves.
    pub source_path: Option<PathBuf>,
    /// Opaque engine identifier passed through to workers.
    pub engine_sequence: Option<String>,
}

impl DispatchContext {
    pub fn new(payload_len: u64, requested_workers: usize, mode: CipherMode) -> Self {
        Self {
            payload_len,
            requested_workers,
            mode,
            source_path: None,
            engine_sequence: None,
        }
    }

    /// Context sized to the host's cores.
    pub fn dynamic(payload_len: u64, mode: CipherMode) -> Self {
        Self::new(payload_len, DispatchPlan::dynamic_workers(), mode)
    }

    pub fn with_source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn with_engine_sequence(mut self, seq: impl Into<String>) -> Self {
        self.engine_sequence = Some(seq.into());
        self
    }

    pub fn plan(&self) -> DispatchPlan {
        DispatchPlan::new(self.payload_len, self.requested_workers)
    }

    /// Plan with an explicit worker count, for topologies with a fixed one.
    pub fn plan_with_workers(&self, workers: usize) -> DispatchPlan {
        DispatchPlan::new(self.payload_len, workers)
    }
}
