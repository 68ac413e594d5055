//! Block framing shared by every buffer variant.
//!
//! Responsibilities:
//! - Define the `[len (4)][payload]` block layout
//! - Encode blocks into a caller-provided buffer
//! - Decode blocks with strict bounds checks
//!
//! Non-responsibilities:
//! - Shared memory
//! - Ordering across workers
//! - Integrity (no checksum; callers bound reads by the declared block count)

pub mod types;
pub mod encode;
pub mod decode;

pub use types::{
    BlockError,
    BlockFlags,
    BlockView,
    block_word,
    split_block_word,
};

pub use encode::write_block;
pub use decode::{read_block, BlockIter};
