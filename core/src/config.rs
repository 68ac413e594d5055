//! Runtime knobs for channels, loadable from JSON.
//!
//! Protocol constants (block size, header layout) live in `constants`; only
//! values an operator may reasonably tune live here.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BASE_KEY, DEFAULT_DONE_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_US, DEFAULT_READY_TIMEOUT_MS,
    DEFAULT_RING_CAPACITY, DEFAULT_SHM_PREFIX, MAX_WORKERS,
};
use crate::shm::{SegmentNamespace, WaitPolicy};
use crate::types::ChannelError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Directory holding segment files. `/dev/shm` when present.
    pub shm_dir: PathBuf,
    pub shm_prefix: String,
    /// Key of single-segment topologies; per-worker segments use `base_key + slot`.
    pub base_key: u32,
    /// Per-ring capacity in bytes for the in-process topologies.
    pub ring_capacity: usize,
    pub ready_timeout_ms: u64,
    pub done_timeout_ms: u64,
    pub poll_interval_us: u64,
    /// Whether `close()` blocks until every worker reports `Done`.
    pub wait_on_close: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            shm_dir: default_shm_dir(),
            shm_prefix: DEFAULT_SHM_PREFIX.to_string(),
            base_key: DEFAULT_BASE_KEY,
            ring_capacity: DEFAULT_RING_CAPACITY,
            ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
            done_timeout_ms: DEFAULT_DONE_TIMEOUT_MS,
            poll_interval_us: DEFAULT_POLL_INTERVAL_US,
            wait_on_close: true,
        }
    }
}

fn default_shm_dir() -> PathBuf {
    let dev_shm = Path::new("/dev/shm");
    if dev_shm.is_dir() {
        dev_shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

impl ChannelConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ChannelError> {
        let cfg: Self = serde_json::from_str(s)
            .map_err(|e| ChannelError::Config(format!("invalid channel config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ChannelError> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn to_json(&self) -> Result<String, ChannelError> {
        serde_json::to_string_pretty(self).map_err(|e| ChannelError::Config(e.to_string()))
    }

    /// Same config with segments placed under `dir`.
    pub fn with_shm_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shm_dir = dir.into();
        self
    }

    pub fn validate(&self) -> Result<(), ChannelError> {
        let fail = |msg: &str| Err(ChannelError::Config(msg.to_string()));

        if self.ring_capacity == 0 {
            return fail("ring_capacity must be non-zero");
        }
        if self.ready_timeout_ms == 0 || self.done_timeout_ms == 0 {
            return fail("timeouts must be non-zero");
        }
        if self.poll_interval_us == 0 {
            return fail("poll_interval_us must be non-zero");
        }
        if self.shm_prefix.is_empty() || self.shm_prefix.contains(['/', '\\']) {
            return fail("shm_prefix must be a non-empty file name fragment");
        }
        if self.base_key.checked_add(MAX_WORKERS as u32).is_none() {
            return fail("base_key leaves no room for per-worker keys");
        }
        Ok(())
    }

    pub fn namespace(&self) -> SegmentNamespace {
        SegmentNamespace::new(self.shm_dir.clone(), self.shm_prefix.clone())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn ready_policy(&self) -> WaitPolicy {
        WaitPolicy::new(Duration::from_millis(self.ready_timeout_ms), self.poll_interval())
    }

    pub fn done_policy(&self) -> WaitPolicy {
        WaitPolicy::new(Duration::from_millis(self.done_timeout_ms), self.poll_interval())
    }
}
