use byteorder::{ByteOrder, LittleEndian};

use crate::block::types::BlockError;
use crate::constants::{BLOCK_PREFIX_LEN, BLOCK_SIZE};

/// Write one block at `offset` in `buf`.
///
/// Layout:
///
/// ```text
/// [ len (4, LE) ]
/// [ payload (len) ]
/// ```
///
/// Returns the number of bytes written, prefix included. Oversized payloads
/// are rejected before anything touches `buf`.
pub fn write_block(buf: &mut [u8], offset: usize, payload: &[u8]) -> Result<usize, BlockError> {
    if payload.len() > BLOCK_SIZE {
        return Err(BlockError::CapacityExceeded { len: payload.len() });
    }

    let needed = BLOCK_PREFIX_LEN + payload.len();
    let available = buf.len().saturating_sub(offset);
    if available < needed {
        return Err(BlockError::Truncated { offset, needed, available });
    }

    LittleEndian::write_u32(&mut buf[offset..offset + BLOCK_PREFIX_LEN], payload.len() as u32);
    buf[offset + BLOCK_PREFIX_LEN..offset + needed].copy_from_slice(payload);

    Ok(needed)
}
