use std::io;
use std::time::Duration;

use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::block::BlockError;
use crate::ring::RingError;
use crate::shm::{HandshakeError, SegmentError};
use crate::worker::LaunchError;

/// Unified channel error covering every layer of the data plane.
/// - `From<T>` impls let `?` cross layer boundaries.
/// - `EndOfStream` is deliberately absent: it is a read outcome, not an error.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("block error: {0}")]
    Block(#[from] BlockError),

    #[error("ring buffer error: {0}")]
    Ring(#[from] RingError),

    #[error("segment error: {0}")]
    Segment(#[from] SegmentError),

    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{op} is not supported by the {topology} topology")]
    Unsupported {
        op: &'static str,
        topology: &'static str,
    },

    #[error("write of {attempted} bytes overflows the planned stream of {planned} bytes")]
    Overflow { planned: u64, attempted: u64 },

    #[error("stream ended after {actual} of {expected} bytes")]
    Truncated { expected: u64, actual: u64 },

    #[error("worker slot {slot} finished without producing block {index}")]
    MissingBlock { slot: usize, index: u64 },

    #[error("worker slot {slot} waited {waited:?} for block {index} from the host")]
    BlockTimeout { slot: usize, index: u64, waited: Duration },

    #[error("producer failed: {0}")]
    Producer(String),

    #[error("channel is closed")]
    Closed,
}

/// Result of one stream read.
///
/// `bytes` may be non-zero together with `eof`; the final bytes and the
/// end-of-stream signal can arrive in the same call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    pub bytes: usize,
    pub eof: bool,
}

impl ReadOutcome {
    #[inline]
    pub const fn more(bytes: usize) -> Self {
        Self { bytes, eof: false }
    }

    #[inline]
    pub const fn end(bytes: usize) -> Self {
        Self { bytes, eof: true }
    }
}

/// Direction of the transform a worker applies; travels as the first launch argument.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, Serialize, Deserialize)]
pub enum CipherMode {
    Decrypt = 0,
    Encrypt = 1,
}

impl CipherMode {
    pub fn as_flag(self) -> &'static str {
        match self {
            CipherMode::Decrypt => "0",
            CipherMode::Encrypt => "1",
        }
    }

    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "0" => Some(CipherMode::Decrypt),
            "1" => Some(CipherMode::Encrypt),
            _ => None,
        }
    }
}
