//! telemetry/counters.rs
//! Mutable counters collected while a channel is open.
//!
//! Converted into an immutable `TelemetrySnapshot` on demand.
use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

/// Deterministic counters collected during one channel's lifetime.
#[derive(Default, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCounters {
    pub blocks_written: u64,
    pub blocks_read: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub segments_created: u64,
    pub segments_destroyed: u64,
    pub workers_launched: u64,
}

impl ChannelCounters {
    /// Record a block handed to a worker (host write side).
    pub fn add_block_written(&mut self, payload_len: usize) {
        self.blocks_written += 1;
        self.bytes_written += payload_len as u64;
    }

    /// Record a block fully delivered to the host reader.
    pub fn add_block_read(&mut self, payload_len: usize) {
        self.blocks_read += 1;
        self.bytes_read += payload_len as u64;
    }

    /// Record bytes that reached the reader without block framing (ring topologies).
    pub fn add_bytes_read(&mut self, n: usize) {
        self.bytes_read += n as u64;
    }

    pub fn add_segment_created(&mut self) {
        self.segments_created += 1;
    }

    pub fn add_segment_destroyed(&mut self) {
        self.segments_destroyed += 1;
    }

    pub fn add_worker_launched(&mut self) {
        self.workers_launched += 1;
    }

    /// Segments still owned by the host.
    pub fn segments_live(&self) -> u64 {
        self.segments_created.saturating_sub(self.segments_destroyed)
    }

    pub fn merge(&mut self, other: &ChannelCounters) {
        *self += other.clone();
    }
}

impl AddAssign for ChannelCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.blocks_written     += rhs.blocks_written;
        self.blocks_read        += rhs.blocks_read;
        self.bytes_written      += rhs.bytes_written;
        self.bytes_read         += rhs.bytes_read;
        self.segments_created   += rhs.segments_created;
        self.segments_destroyed += rhs.segments_destroyed;
        self.workers_launched   += rhs.workers_launched;
    }
}
