use std::sync::Arc;

use crate::channel::Topology;
use crate::ring::{ProducerThread, RangeProducer};
use crate::telemetry::{ChannelCounters, TelemetrySnapshot, TelemetryTimer};
use crate::types::{ChannelError, ReadOutcome};

/// `SingleRing`: one producer thread streams the whole payload through one ring.
pub struct RingChannel {
    producer: ProducerThread,
    counters: ChannelCounters,
    timer: TelemetryTimer,
    closed: bool,
}

impl RingChannel {
    pub fn spawn(
        payload_len: u64,
        producer: Arc<dyn RangeProducer>,
        capacity: usize,
    ) -> Result<Self, ChannelError> {
        tracing::info!(payload_len, capacity, "single ring starting producer");
        let producer = ProducerThread::spawn("ring-producer".into(), producer, 0..payload_len, capacity)?;
        Ok(Self {
            producer,
            counters: ChannelCounters::default(),
            timer: TelemetryTimer::new(),
            closed: false,
        })
    }

    pub fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome, ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        let out = self.producer.ring().read(dst);
        self.counters.add_bytes_read(out.bytes);
        if out.eof {
            // Surface a producer failure instead of a silent short stream.
            self.producer.join()?;
        }
        Ok(out)
    }

    pub fn close(&mut self) -> Result<(), ChannelError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.timer.finish();
        self.producer.shutdown()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        TelemetrySnapshot::from(Topology::SingleRing, 1, &self.counters, &self.timer)
    }
}
