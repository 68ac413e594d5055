//! Length-preserving block transforms applied by workers.

use std::fmt;

use crate::constants::BLOCK_SIZE;
use crate::worker::launch::LaunchError;

/// In-place transform of one block.
///
/// `block_index` is the global index of the block in the job, so the same
/// transform yields the same bytes no matter which worker runs it.
pub trait BlockTransform: Send + Sync {
    fn apply(&self, block_index: u64, data: &mut [u8]);
}

/// Leaves the bytes untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl BlockTransform for Passthrough {
    fn apply(&self, _block_index: u64, _data: &mut [u8]) {}
}

/// XOR with a BLAKE3 keyed XOF stream, one stream per block index.
///
/// Applying it twice restores the input, so encrypt and decrypt are the
/// same operation.
#[derive(Clone)]
pub struct KeystreamXor {
    key: [u8; 32],
}

impl fmt::Debug for KeystreamXor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeystreamXor").finish_non_exhaustive()
    }
}

impl KeystreamXor {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Parse a 64-character hex key.
    pub fn from_hex(s: &str) -> Result<Self, LaunchError> {
        let raw = hex::decode(s.trim())
            .map_err(|e| LaunchError::InvalidArgs(format!("transform key is not hex: {e}")))?;
        let key: [u8; 32] = raw.try_into().map_err(|v: Vec<u8>| {
            LaunchError::InvalidArgs(format!("transform key must be 32 bytes, got {}", v.len()))
        })?;
        Ok(Self::new(key))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.key)
    }
}

impl BlockTransform for KeystreamXor {
    fn apply(&self, block_index: u64, data: &mut [u8]) {
        debug_assert!(data.len() <= BLOCK_SIZE);

        let mut hasher = blake3::Hasher::new_keyed(&self.key);
        hasher.update(&block_index.to_le_bytes());
        let mut stream = hasher.finalize_xof();

        let mut pad = [0u8; 4096];
        for chunk in data.chunks_mut(pad.len()) {
            let ks = &mut pad[..chunk.len()];
            stream.fill(ks);
            for (b, k) in chunk.iter_mut().zip(ks.iter()) {
                *b ^= k;
            }
        }
    }
}
