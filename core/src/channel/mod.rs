//! The five channel topologies behind one stream interface.
//!
//! | topology     | memory           | producer of output          | host writes |
//! |--------------|------------------|-----------------------------|-------------|
//! | `SingleRing` | one ring         | one producer thread         | no          |
//! | `SplitTwo`   | two rings        | two half-file threads       | no          |
//! | `FixedTwo`   | one segment      | two workers, halves         | no          |
//! | `CrossReadN` | one segment      | N workers, round-robin      | no          |
//! | `DispatchN`  | N segments       | N workers, in place         | yes         |

pub mod block_table;
pub mod context;
pub mod dispatch;
pub mod plan;
pub mod ring;
pub(crate) mod session;

use std::fmt;
use std::io;
use std::sync::Arc;

use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};

pub use block_table::BlockTableChannel;
pub use context::DispatchContext;
pub use dispatch::DispatchChannel;
pub use plan::{Assignment, DispatchPlan};
pub use ring::RingChannel;

use crate::config::ChannelConfig;
use crate::ring::{RangeProducer, SplitThreadBuffer};
use crate::telemetry::TelemetrySnapshot;
use crate::types::{ChannelError, ReadOutcome};
use crate::worker::WorkerLauncher;

/// Stored in every segment header as a `u32` tag.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, Serialize, Deserialize)]
pub enum Topology {
    SingleRing = 1,
    SplitTwo   = 2,
    FixedTwo   = 3,
    CrossReadN = 4,
    DispatchN  = 5,
}

impl Topology {
    pub const ALL: [Topology; 5] = [
        Topology::SingleRing,
        Topology::SplitTwo,
        Topology::FixedTwo,
        Topology::CrossReadN,
        Topology::DispatchN,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Topology::SingleRing => "single-ring",
            Topology::SplitTwo   => "split-two",
            Topology::FixedTwo   => "fixed-two",
            Topology::CrossReadN => "cross-read",
            Topology::DispatchN  => "dispatch",
        }
    }

    /// Accepts host writes.
    pub fn is_writable(self) -> bool {
        self == Topology::DispatchN
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stream interface shared by every topology.
pub trait ByteChannel {
    /// Read into `dst`. `eof` may arrive together with the last bytes.
    fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome, ChannelError>;

    /// Write `src`; read-only topologies return `Unsupported`.
    fn write(&mut self, src: &[u8]) -> Result<usize, ChannelError>;

    /// Release the channel. Calling it again is a no-op.
    fn close(&mut self) -> Result<(), ChannelError>;

    fn topology(&self) -> Topology;

    fn telemetry(&self) -> TelemetrySnapshot;
}

fn read_only(topology: Topology) -> ChannelError {
    ChannelError::Unsupported { op: "write", topology: topology.name() }
}

impl ByteChannel for RingChannel {
    fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome, ChannelError> {
        RingChannel::read(self, dst)
    }
    fn write(&mut self, _src: &[u8]) -> Result<usize, ChannelError> {
        Err(read_only(Topology::SingleRing))
    }
    fn close(&mut self) -> Result<(), ChannelError> {
        RingChannel::close(self)
    }
    fn topology(&self) -> Topology {
        Topology::SingleRing
    }
    fn telemetry(&self) -> TelemetrySnapshot {
        RingChannel::telemetry(self)
    }
}

impl ByteChannel for SplitThreadBuffer {
    fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome, ChannelError> {
        SplitThreadBuffer::read(self, dst)
    }
    fn write(&mut self, _src: &[u8]) -> Result<usize, ChannelError> {
        Err(read_only(Topology::SplitTwo))
    }
    fn close(&mut self) -> Result<(), ChannelError> {
        SplitThreadBuffer::close(self)
    }
    fn topology(&self) -> Topology {
        Topology::SplitTwo
    }
    fn telemetry(&self) -> TelemetrySnapshot {
        SplitThreadBuffer::telemetry(self)
    }
}

impl ByteChannel for BlockTableChannel {
    fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome, ChannelError> {
        BlockTableChannel::read(self, dst)
    }
    fn write(&mut self, src: &[u8]) -> Result<usize, ChannelError> {
        BlockTableChannel::write(self, src)
    }
    fn close(&mut self) -> Result<(), ChannelError> {
        BlockTableChannel::close(self)
    }
    fn topology(&self) -> Topology {
        BlockTableChannel::topology(self)
    }
    fn telemetry(&self) -> TelemetrySnapshot {
        BlockTableChannel::telemetry(self)
    }
}

impl ByteChannel for DispatchChannel {
    fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome, ChannelError> {
        DispatchChannel::read(self, dst)
    }
    fn write(&mut self, src: &[u8]) -> Result<usize, ChannelError> {
        DispatchChannel::write(self, src)
    }
    fn close(&mut self) -> Result<(), ChannelError> {
        DispatchChannel::close(self)
    }
    fn topology(&self) -> Topology {
        Topology::DispatchN
    }
    fn telemetry(&self) -> TelemetrySnapshot {
        DispatchChannel::telemetry(self)
    }
}

/// Any topology, chosen at runtime.
pub enum Channel {
    SingleRing(RingChannel),
    SplitTwo(SplitThreadBuffer),
    BlockTable(BlockTableChannel),
    Dispatch(DispatchChannel),
}

impl Channel {
    fn inner(&mut self) -> &mut dyn ByteChannel {
        match self {
            Channel::SingleRing(c) => c,
            Channel::SplitTwo(c) => c,
            Channel::BlockTable(c) => c,
            Channel::Dispatch(c) => c,
        }
    }

    fn inner_ref(&self) -> &dyn ByteChannel {
        match self {
            Channel::SingleRing(c) => c,
            Channel::SplitTwo(c) => c,
            Channel::BlockTable(c) => c,
            Channel::Dispatch(c) => c,
        }
    }

    /// End the input stream of a writable topology.
    pub fn finish(&mut self) -> Result<(), ChannelError> {
        match self {
            Channel::Dispatch(c) => c.finish(),
            other => Err(ChannelError::Unsupported { op: "finish", topology: other.topology().name() }),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Channel::SingleRing(c) => c.is_closed(),
            Channel::SplitTwo(c) => c.is_closed(),
            Channel::BlockTable(c) => c.is_closed(),
            Channel::Dispatch(c) => c.is_closed(),
        }
    }
}

impl ByteChannel for Channel {
    fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome, ChannelError> {
        self.inner().read(dst)
    }
    fn write(&mut self, src: &[u8]) -> Result<usize, ChannelError> {
        self.inner().write(src)
    }
    fn close(&mut self) -> Result<(), ChannelError> {
        self.inner().close()
    }
    fn topology(&self) -> Topology {
        self.inner_ref().topology()
    }
    fn telemetry(&self) -> TelemetrySnapshot {
        self.inner_ref().telemetry()
    }
}

fn to_io(e: ChannelError) -> io::Error {
    match e {
        ChannelError::Io(e) => e,
        other => io::Error::other(other),
    }
}

impl io::Read for Channel {
    /// `WouldBlock` when no bytes are available yet but the stream is not over.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let out = ByteChannel::read(self, buf).map_err(to_io)?;
        if out.bytes == 0 && !out.eof && !buf.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        Ok(out.bytes)
    }
}

impl io::Write for Channel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ByteChannel::write(self, buf).map_err(to_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Assembles a channel of any topology.
pub struct ChannelBuilder {
    topology: Topology,
    context: DispatchContext,
    config: ChannelConfig,
    producer: Option<Arc<dyn RangeProducer>>,
    launcher: Option<Arc<dyn WorkerLauncher>>,
}

impl ChannelBuilder {
    pub fn new(topology: Topology, context: DispatchContext) -> Self {
        Self {
            topology,
            context,
            config: ChannelConfig::default(),
            producer: None,
            launcher: None,
        }
    }

    pub fn config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    /// Output source for the in-process topologies.
    pub fn producer(mut self, producer: Arc<dyn RangeProducer>) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Worker launcher for the shared-memory topologies.
    pub fn launcher(mut self, launcher: Arc<dyn WorkerLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn build(self) -> Result<Channel, ChannelError> {
        self.config.validate()?;
        let topology = self.topology;
        let missing = |what: &str| ChannelError::Config(format!("{topology} channel requires a {what}"));

        let channel = match topology {
            Topology::SingleRing => {
                let producer = self.producer.ok_or_else(|| missing("producer"))?;
                Channel::SingleRing(RingChannel::spawn(
                    self.context.payload_len,
                    producer,
                    self.config.ring_capacity,
                )?)
            }
            Topology::SplitTwo => {
                let producer = self.producer.ok_or_else(|| missing("producer"))?;
                Channel::SplitTwo(SplitThreadBuffer::spawn(
                    self.context.payload_len,
                    producer,
                    self.config.ring_capacity,
                )?)
            }
            Topology::FixedTwo | Topology::CrossReadN => {
                let launcher = self.launcher.ok_or_else(|| missing("worker launcher"))?;
                Channel::BlockTable(BlockTableChannel::open(&self.config, topology, &self.context, launcher)?)
            }
            Topology::DispatchN => {
                let launcher = self.launcher.ok_or_else(|| missing("worker launcher"))?;
                Channel::Dispatch(DispatchChannel::open(&self.config, &self.context, launcher)?)
            }
        };
        Ok(channel)
    }
}
