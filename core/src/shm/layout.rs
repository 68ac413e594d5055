//! Typed views over a segment: the fixed header and the block table behind it.
//!
//! Layout:
//!
//! ```text
//! [ header (256) ]
//!   0  magic "SCH1"        4  version        8  topology     12 mode
//!   16 block_count         20 worker_count   24 flags        28 slot_index
//!   32 payload_len (u64)   40 segment_len (u64)
//!   64 + 16*i  slot i: [ state (4) ][ cursor (4) ][ reserved (8) ]
//! [ block 0: len (4) | payload ]
//! [ block 1: len (4) | payload ]
//! ...
//! ```
//!
//! Every block slot is `4 + 262144` bytes except the last, which may be cut
//! short to the residual length of the job.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::block::{block_word, split_block_word, BlockError, BlockFlags};
use crate::channel::Topology;
use crate::constants::{
    header_offsets as off, BLOCK_PREFIX_LEN, BLOCK_SIZE, BLOCK_SLOT_LEN, HEADER_VERSION, MAGIC_SCH1,
    MAX_WORKERS, SEGMENT_HEADER_LEN, SLOT_RECORD_LEN, SLOT_TABLE_OFFSET,
};
use crate::shm::segment::{SegmentError, SharedMemorySegment};
use crate::types::{ChannelError, CipherMode};

bitflags::bitflags! {
    /// Out-of-band header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        /// Host will publish no further blocks.
        const STREAM_ENDED = 0b0000_0001;
        /// Host aborted the job; workers should stop and report `Done`.
        const ABORTED      = 0b0000_0010;
    }
}

/// Values the creator stamps into a fresh header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInit {
    pub topology: Topology,
    pub mode: CipherMode,
    pub block_count: u32,
    pub worker_count: u32,
    /// Owning slot for per-worker segments; 0 for shared block tables.
    pub slot_index: u32,
    pub payload_len: u64,
}

/// Read/write accessors for the fixed header.
#[derive(Debug, Clone, Copy)]
pub struct HeaderView<'a> {
    seg: &'a SharedMemorySegment,
}

impl<'a> HeaderView<'a> {
    pub fn new(seg: &'a SharedMemorySegment) -> Self {
        Self { seg }
    }

    #[inline]
    fn u32_at(&self, offset: usize) -> Result<u32, SegmentError> {
        Ok(self.seg.atomic_u32(offset)?.load(Ordering::Acquire))
    }

    /// Stamp the header. The magic goes in last so a reader never sees a
    /// half-written header with a valid magic.
    pub fn init(&self, init: &HeaderInit) -> Result<(), SegmentError> {
        let store = |o: usize, v: u32| -> Result<(), SegmentError> {
            self.seg.atomic_u32(o)?.store(v, Ordering::Relaxed);
            Ok(())
        };

        store(off::VERSION, HEADER_VERSION)?;
        store(off::TOPOLOGY, init.topology as u32)?;
        store(off::MODE, init.mode as u32)?;
        store(off::BLOCK_COUNT, init.block_count)?;
        store(off::WORKER_COUNT, init.worker_count)?;
        store(off::FLAGS, 0)?;
        store(off::SLOT_INDEX, init.slot_index)?;
        self.seg.atomic_u64(off::PAYLOAD_LEN)?.store(init.payload_len, Ordering::Relaxed);
        self.seg.atomic_u64(off::SEGMENT_LEN)?.store(self.seg.len() as u64, Ordering::Relaxed);

        self.seg
            .atomic_u32(off::MAGIC)?
            .store(u32::from_le_bytes(MAGIC_SCH1), Ordering::Release);
        Ok(())
    }

    /// Check magic, version and recorded geometry against the mapping.
    pub fn validate(&self) -> Result<(), SegmentError> {
        let key = self.seg.key();
        let invalid = |reason: String| SegmentError::InvalidHeader { key, reason };

        let magic = self.u32_at(off::MAGIC)?.to_le_bytes();
        if magic != MAGIC_SCH1 {
            return Err(invalid(format!("bad magic {magic:?}")));
        }
        let version = self.u32_at(off::VERSION)?;
        if version != HEADER_VERSION {
            return Err(invalid(format!("unsupported version {version}")));
        }
        let recorded = self.seg.atomic_u64(off::SEGMENT_LEN)?.load(Ordering::Acquire);
        if recorded != self.seg.len() as u64 {
            return Err(invalid(format!("recorded length {recorded} != mapped {}", self.seg.len())));
        }
        let workers = self.worker_count()?;
        if workers == 0 || workers > MAX_WORKERS {
            return Err(invalid(format!("worker count {workers} outside 1..={MAX_WORKERS}")));
        }
        let slot = self.slot_index()?;
        if slot >= workers {
            return Err(invalid(format!("slot index {slot} >= worker count {workers}")));
        }
        self.topology()?;
        self.mode()?;
        Ok(())
    }

    pub fn topology(&self) -> Result<Topology, SegmentError> {
        let raw = self.u32_at(off::TOPOLOGY)?;
        Topology::try_from(raw).map_err(|_| SegmentError::InvalidHeader {
            key: self.seg.key(),
            reason: format!("unknown topology tag {raw}"),
        })
    }

    pub fn mode(&self) -> Result<CipherMode, SegmentError> {
        let raw = self.u32_at(off::MODE)?;
        CipherMode::try_from(raw).map_err(|_| SegmentError::InvalidHeader {
            key: self.seg.key(),
            reason: format!("unknown cipher mode {raw}"),
        })
    }

    pub fn block_count(&self) -> Result<usize, SegmentError> {
        Ok(self.u32_at(off::BLOCK_COUNT)? as usize)
    }

    pub fn worker_count(&self) -> Result<usize, SegmentError> {
        Ok(self.u32_at(off::WORKER_COUNT)? as usize)
    }

    pub fn slot_index(&self) -> Result<usize, SegmentError> {
        Ok(self.u32_at(off::SLOT_INDEX)? as usize)
    }

    pub fn payload_len(&self) -> Result<u64, SegmentError> {
        Ok(self.seg.atomic_u64(off::PAYLOAD_LEN)?.load(Ordering::Acquire))
    }

    pub fn flags(&self) -> Result<SegmentFlags, SegmentError> {
        Ok(SegmentFlags::from_bits_truncate(self.u32_at(off::FLAGS)?))
    }

    pub fn set_flags(&self, flags: SegmentFlags) -> Result<(), SegmentError> {
        self.seg.atomic_u32(off::FLAGS)?.fetch_or(flags.bits(), Ordering::AcqRel);
        Ok(())
    }

    fn slot_offset(&self, slot: usize) -> Result<usize, SegmentError> {
        if slot >= MAX_WORKERS {
            return Err(SegmentError::OutOfBounds {
                offset: SLOT_TABLE_OFFSET + slot * SLOT_RECORD_LEN,
                len: SLOT_RECORD_LEN,
                size: SEGMENT_HEADER_LEN,
            });
        }
        Ok(SLOT_TABLE_OFFSET + slot * SLOT_RECORD_LEN)
    }

    /// Raw readiness word of a worker slot.
    pub fn slot_state_word(&self, slot: usize) -> Result<&'a AtomicU32, SegmentError> {
        self.seg.atomic_u32(self.slot_offset(slot)?)
    }

    /// Blocks a worker slot has finished.
    pub fn slot_cursor(&self, slot: usize) -> Result<&'a AtomicU32, SegmentError> {
        self.seg.atomic_u32(self.slot_offset(slot)? + 4)
    }
}

/// Bounds-checked access to the block table of a segment.
#[derive(Debug, Clone, Copy)]
pub struct BlockTable<'a> {
    seg: &'a SharedMemorySegment,
    count: usize,
}

impl<'a> BlockTable<'a> {
    /// Build a view from the header's block count, checking the table fits.
    pub fn new(seg: &'a SharedMemorySegment) -> Result<Self, SegmentError> {
        let count = HeaderView::new(seg).block_count()?;
        if count > 0 {
            let last = SEGMENT_HEADER_LEN + (count - 1) * BLOCK_SLOT_LEN + BLOCK_PREFIX_LEN;
            if last > seg.len() {
                return Err(SegmentError::InvalidHeader {
                    key: seg.key(),
                    reason: format!("{count} blocks do not fit in {} bytes", seg.len()),
                });
            }
        }
        Ok(Self { seg, count })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn offset(&self, index: usize) -> Result<usize, BlockError> {
        if index >= self.count {
            return Err(BlockError::IndexOutOfRange { index, count: self.count });
        }
        Ok(SEGMENT_HEADER_LEN + index * BLOCK_SLOT_LEN)
    }

    /// Payload bytes slot `index` can hold.
    pub fn capacity(&self, index: usize) -> Result<usize, BlockError> {
        let off = self.offset(index)?;
        Ok((self.seg.len() - off - BLOCK_PREFIX_LEN).min(BLOCK_SIZE))
    }

    fn word(&self, index: usize) -> Result<&'a AtomicU32, ChannelError> {
        let off = self.offset(index)?;
        Ok(self.seg.atomic_u32(off)?)
    }

    /// Copy payload bytes into slot `index` at byte `at`. Not visible until `publish`.
    pub fn write_payload(&self, index: usize, at: usize, data: &[u8]) -> Result<(), ChannelError> {
        let cap = self.capacity(index)?;
        if at + data.len() > cap {
            return Err(BlockError::CapacityExceeded { len: at + data.len() }.into());
        }
        let off = self.offset(index)? + BLOCK_PREFIX_LEN + at;
        self.seg.copy_in(off, data)?;
        Ok(())
    }

    /// Make `len` payload bytes of slot `index` visible to other mappings.
    pub fn publish(&self, index: usize, len: usize, flags: BlockFlags) -> Result<(), ChannelError> {
        let cap = self.capacity(index)?;
        if len > cap {
            return Err(BlockError::CapacityExceeded { len }.into());
        }
        self.word(index)?
            .store(block_word(len as u32, flags).to_le(), Ordering::Release);
        Ok(())
    }

    /// Current length word of slot `index`: `(len, flags)`; `(0, empty)` when unwritten.
    pub fn load(&self, index: usize) -> Result<(usize, BlockFlags), ChannelError> {
        let raw = u32::from_le(self.word(index)?.load(Ordering::Acquire));
        let (len, flags) = split_block_word(raw);
        Ok((len as usize, flags))
    }

    /// Raw little-endian length word exactly as stored in the prefix.
    pub fn raw_word(&self, index: usize) -> Result<u32, ChannelError> {
        Ok(u32::from_le(self.word(index)?.load(Ordering::Acquire)))
    }

    /// Copy payload of slot `index` from byte `at` into `dst`; returns bytes copied.
    pub fn read_payload(&self, index: usize, at: usize, len: usize, dst: &mut [u8]) -> Result<usize, ChannelError> {
        if len > self.capacity(index)? {
            return Err(BlockError::CapacityExceeded { len }.into());
        }
        let n = len.saturating_sub(at).min(dst.len());
        let off = self.offset(index)? + BLOCK_PREFIX_LEN + at;
        self.seg.copy_out(off, &mut dst[..n])?;
        Ok(n)
    }
}
