//! telemetry/snapshot.rs
//!
//! Immutable view of a channel's counters and stage timings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::Topology;
use crate::telemetry::counters::ChannelCounters;
use crate::telemetry::timers::{StageTimes, TelemetryTimer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub topology: Topology,
    pub worker_count: usize,
    pub counters: ChannelCounters,
    pub throughput_bytes_per_sec: f64,
    pub elapsed: Duration,
    pub stage_times: StageTimes,
}

impl TelemetrySnapshot {
    pub fn from(
        topology: Topology,
        worker_count: usize,
        counters: &ChannelCounters,
        timer: &TelemetryTimer,
    ) -> Self {
        let elapsed = timer.elapsed();
        let moved = counters.bytes_read.max(counters.bytes_written);

        let throughput = if elapsed.as_secs_f64() > 0.0 {
            moved as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        Self {
            topology,
            worker_count,
            counters: counters.clone(),
            throughput_bytes_per_sec: throughput,
            elapsed,
            stage_times: timer.stage_times.clone(),
        }
    }

    pub fn total_stage_time(&self) -> Duration {
        self.stage_times.total()
    }

    /// Every created segment was destroyed and stage time fits the wall clock.
    pub fn sanity_check(&self) -> bool {
        self.counters.segments_live() == 0 && self.total_stage_time() <= self.elapsed
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
