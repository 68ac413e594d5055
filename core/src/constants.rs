/// Magic number at the start of every shared segment header.
/// "SCH1" = Shared Channel Header v1
pub const MAGIC_SCH1: [u8; 4] = *b"SCH1";
pub const HEADER_VERSION: u32 = 1;

/// Payload capacity of one block (256 KiB).
pub const BLOCK_SIZE: usize = 256 * 1024;
/// Length prefix in front of every block payload.
pub const BLOCK_PREFIX_LEN: usize = 4;
/// Full slot footprint of a full-size block.
pub const BLOCK_SLOT_LEN: usize = BLOCK_PREFIX_LEN + BLOCK_SIZE;

/// Upper bound on concurrently attached workers per job.
pub const MAX_WORKERS: usize = 10;

/// Fixed header in front of the block table of every segment.
pub const SEGMENT_HEADER_LEN: usize = 256;
/// Offset of the first worker slot record inside the header.
pub const SLOT_TABLE_OFFSET: usize = 64;
/// Size of one worker slot record: state (4) + cursor (4) + reserved (8).
pub const SLOT_RECORD_LEN: usize = 16;

/// Defaults when the config leaves a knob unset.
pub const DEFAULT_BASE_KEY: u32 = 0x5343_0000;
pub const DEFAULT_RING_CAPACITY: usize = 4 * BLOCK_SIZE;
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_DONE_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_POLL_INTERVAL_US: u64 = 200;
pub const DEFAULT_SHM_PREFIX: &str = "sch";

/// Environment variable carrying the segment namespace directory to workers.
pub const SHM_DIR_ENV: &str = "CHANNEL_SHM_DIR";
/// Environment variable carrying the segment file prefix to workers.
pub const SHM_PREFIX_ENV: &str = "CHANNEL_SHM_PREFIX";
/// Environment variable carrying the hex transform key to workers.
pub const WORKER_KEY_ENV: &str = "CHANNEL_WORKER_KEY";

/// Header field offsets (all little-endian u32 unless noted).
pub mod header_offsets {
    pub const MAGIC: usize = 0;
    pub const VERSION: usize = 4;
    pub const TOPOLOGY: usize = 8;
    pub const MODE: usize = 12;
    pub const BLOCK_COUNT: usize = 16;
    pub const WORKER_COUNT: usize = 20;
    pub const FLAGS: usize = 24;
    pub const SLOT_INDEX: usize = 28;
    /// u64
    pub const PAYLOAD_LEN: usize = 32;
    /// u64
    pub const SEGMENT_LEN: usize = 40;
}

const _: () = assert!(
    slot_table_fits(),
    "slot table must fit inside the segment header"
);

const fn slot_table_fits() -> bool {
    SLOT_TABLE_OFFSET + MAX_WORKERS * SLOT_RECORD_LEN <= SEGMENT_HEADER_LEN
}
