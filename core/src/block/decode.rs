use byteorder::{ByteOrder, LittleEndian};

use crate::block::types::{split_block_word, BlockError, BlockView};
use crate::constants::{BLOCK_PREFIX_LEN, BLOCK_SIZE};

/// Decode the block starting at `offset`.
///
/// A zero length word means nothing was written there; that is reported as
/// `EndOfBlocks`, never as an empty block.
pub fn read_block(buf: &[u8], offset: usize) -> Result<BlockView<'_>, BlockError> {
    let available = buf.len().saturating_sub(offset);
    if available < BLOCK_PREFIX_LEN {
        return Err(BlockError::Truncated {
            offset,
            needed: BLOCK_PREFIX_LEN,
            available,
        });
    }

    let word = LittleEndian::read_u32(&buf[offset..offset + BLOCK_PREFIX_LEN]);
    if word == 0 {
        return Err(BlockError::EndOfBlocks { offset });
    }

    let (len, _flags) = split_block_word(word);
    let len = len as usize;
    if len > BLOCK_SIZE {
        return Err(BlockError::CapacityExceeded { len });
    }

    let needed = BLOCK_PREFIX_LEN + len;
    if available < needed {
        return Err(BlockError::Truncated { offset, needed, available });
    }

    Ok(BlockView {
        payload: &buf[offset + BLOCK_PREFIX_LEN..offset + needed],
        consumed: needed,
    })
}

/// Iterate at most `count` consecutive blocks of a packed buffer.
///
/// Stops early at the first unwritten slot.
#[derive(Debug)]
pub struct BlockIter<'a> {
    buf: &'a [u8],
    offset: usize,
    remaining: usize,
}

impl<'a> BlockIter<'a> {
    pub fn new(buf: &'a [u8], offset: usize, count: usize) -> Self {
        Self { buf, offset, remaining: count }
    }
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = Result<BlockView<'a>, BlockError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        match read_block(self.buf, self.offset) {
            Ok(view) => {
                self.offset += view.consumed;
                Some(Ok(view))
            }
            Err(BlockError::EndOfBlocks { .. }) => {
                self.remaining = 0;
                None
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}
