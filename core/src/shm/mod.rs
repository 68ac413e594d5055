//! Cross-process shared memory: segment lifecycle, typed header/block views
//! and the readiness handshake.
//!
//! The host creates and destroys segments; workers only attach, write their
//! blocks and advance their own slot state.

pub mod segment;
pub mod layout;
pub mod handshake;

pub use segment::{SegmentError, SegmentNamespace, SegmentRole, SharedMemorySegment};
pub use layout::{BlockTable, HeaderInit, HeaderView, SegmentFlags};
pub use handshake::{Handshake, HandshakeError, ReadinessState, SlotRef, WaitPolicy};
