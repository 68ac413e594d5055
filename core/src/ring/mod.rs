//! In-process byte rings between producer threads and the host reader.
//!
//! A producer thread stands in front of one worker and pushes its output
//! into a `RingBuffer`; the host drains it through the channel `read` API.

pub mod ring_buffer;
pub mod producer;
pub mod split;

pub use ring_buffer::{RingBuffer, RingError};
pub use producer::{FileProducer, ProducerThread, RangeProducer, SourceProducer};
pub use split::{split_point, SplitThreadBuffer};
