use std::sync::Arc;

use crate::constants::BLOCK_SIZE;
use crate::channel::Topology;
use crate::ring::producer::{ProducerThread, RangeProducer};
use crate::telemetry::{ChannelCounters, TelemetrySnapshot, TelemetryTimer};
use crate::types::{ChannelError, ReadOutcome};

/// Block-aligned midpoint of a payload: the first half gets the extra block.
pub fn split_point(payload_len: u64) -> u64 {
    let block = BLOCK_SIZE as u64;
    let total_blocks = payload_len.div_ceil(block);
    let mid_blocks = total_blocks.div_ceil(2);
    (mid_blocks * block).min(payload_len)
}

/// Two half-file rings fed by two producer threads, read as one stream.
///
/// The reader drains the first half to its end-of-stream before switching
/// to the second, so output order equals input order.
pub struct SplitThreadBuffer {
    halves: [ProducerThread; 2],
    current: usize,
    counters: ChannelCounters,
    timer: TelemetryTimer,
    closed: bool,
}

impl SplitThreadBuffer {
    pub fn spawn(
        payload_len: u64,
        producer: Arc<dyn RangeProducer>,
        capacity: usize,
    ) -> Result<Self, ChannelError> {
        let mid = split_point(payload_len);
        let half_capacity = |len: u64| (len as usize).clamp(1, capacity.max(1));

        tracing::info!(payload_len, mid, "split buffer starting two producers");
        let first = ProducerThread::spawn(
            "split-producer-0".into(),
            producer.clone(),
            0..mid,
            half_capacity(mid),
        )?;
        let second = ProducerThread::spawn(
            "split-producer-1".into(),
            producer,
            mid..payload_len,
            half_capacity(payload_len - mid),
        )?;

        Ok(Self {
            halves: [first, second],
            current: 0,
            counters: ChannelCounters::default(),
            timer: TelemetryTimer::new(),
            closed: false,
        })
    }

    /// Index of the half currently being served.
    pub fn current_half(&self) -> usize {
        self.current
    }

    pub fn counters(&self) -> &ChannelCounters {
        &self.counters
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        TelemetrySnapshot::from(Topology::SplitTwo, 2, &self.counters, &self.timer)
    }

    pub fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome, ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }

        loop {
            let out = self.halves[self.current].ring().read(dst);
            self.counters.add_bytes_read(out.bytes);
            if !out.eof {
                return Ok(out);
            }

            self.halves[self.current].join()?;
            if self.current == 1 {
                return Ok(out);
            }

            tracing::debug!("first half drained, switching to second half");
            self.current = 1;
            if out.bytes > 0 {
                return Ok(ReadOutcome::more(out.bytes));
            }
        }
    }

    /// Stop both rings and join both producers. Idempotent.
    pub fn close(&mut self) -> Result<(), ChannelError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.timer.finish();

        let first = self.halves[0].shutdown();
        let second = self.halves[1].shutdown();
        first.and(second)
    }
}
