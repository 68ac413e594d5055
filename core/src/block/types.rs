use thiserror::Error;

use crate::constants::BLOCK_SIZE;

bitflags::bitflags! {
    /// High bits of a block length word.
    ///
    /// Only the block-table topologies set `WRITTEN`; it lets a legitimately
    /// empty block be told apart from a slot nobody has written yet.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockFlags: u32 {
        const WRITTEN = 0x8000_0000;
    }
}

/// Bits of the length word that carry the payload length.
pub const BLOCK_LEN_MASK: u32 = !BlockFlags::WRITTEN.bits();

/// Compose a length word from a payload length and flags.
#[inline(always)]
pub const fn block_word(len: u32, flags: BlockFlags) -> u32 {
    (len & BLOCK_LEN_MASK) | flags.bits()
}

/// Split a length word into payload length and flags.
#[inline(always)]
pub const fn split_block_word(word: u32) -> (u32, BlockFlags) {
    (word & BLOCK_LEN_MASK, BlockFlags::from_bits_truncate(word))
}

/// Borrowed view of one decoded block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockView<'a> {
    pub payload: &'a [u8],
    /// Prefix plus payload.
    pub consumed: usize,
}

impl BlockView<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("block payload of {len} bytes exceeds capacity {max}", max = BLOCK_SIZE)]
    CapacityExceeded { len: usize },

    #[error("no block at offset {offset}")]
    EndOfBlocks { offset: usize },

    #[error("truncated block at offset {offset}: need {needed} bytes, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("block index {index} out of range (count {count})")]
    IndexOutOfRange { index: usize, count: usize },
}
