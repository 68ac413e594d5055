//! Dispatch arithmetic: how a payload is cut into blocks and which worker
//! owns which block.

use serde::{Deserialize, Serialize};

use crate::channel::Topology;
use crate::constants::{BLOCK_PREFIX_LEN, BLOCK_SIZE, MAX_WORKERS, SEGMENT_HEADER_LEN};

/// How blocks map to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Assignment {
    /// Block `k` goes to worker `k % W`.
    RoundRobin,
    /// Worker `w` owns one contiguous run; earlier workers take the extra blocks.
    Contiguous,
}

impl Assignment {
    pub fn for_topology(topology: Topology) -> Self {
        match topology {
            Topology::FixedTwo | Topology::SplitTwo => Assignment::Contiguous,
            _ => Assignment::RoundRobin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchPlan {
    pub block_size: usize,
    pub payload_len: u64,
    pub total_blocks: u64,
    pub worker_count: usize,
    pub blocks_per_worker: u64,
    pub remainder: u64,
}

impl DispatchPlan {
    pub fn new(payload_len: u64, requested_workers: usize) -> Self {
        let worker_count = Self::clamp_workers(requested_workers);
        let total_blocks = payload_len.div_ceil(BLOCK_SIZE as u64);
        let w = worker_count as u64;

        Self {
            block_size: BLOCK_SIZE,
            payload_len,
            total_blocks,
            worker_count,
            blocks_per_worker: total_blocks / w,
            remainder: total_blocks % w,
        }
    }

    pub fn clamp_workers(requested: usize) -> usize {
        requested.clamp(1, MAX_WORKERS)
    }

    /// Worker count from the host's cores, one left free for the host.
    pub fn dynamic_workers() -> usize {
        Self::clamp_workers(num_cpus::get().saturating_sub(1))
    }

    /// Payload length of block `k`; only the final block may be short.
    pub fn block_len(&self, k: u64) -> usize {
        debug_assert!(k < self.total_blocks);
        if k + 1 < self.total_blocks {
            BLOCK_SIZE
        } else {
            (self.payload_len - k * BLOCK_SIZE as u64) as usize
        }
    }

    /// Byte offset of block `k` in the payload.
    pub fn block_offset(&self, k: u64) -> u64 {
        k * BLOCK_SIZE as u64
    }

    pub fn worker_for(&self, k: u64) -> usize {
        (k % self.worker_count as u64) as usize
    }

    /// Slot of block `k` inside its worker's segment (round-robin).
    pub fn local_index(&self, k: u64) -> usize {
        (k / self.worker_count as u64) as usize
    }

    /// Inverse of `worker_for` / `local_index`.
    pub fn global_index(&self, worker: usize, local: usize) -> u64 {
        local as u64 * self.worker_count as u64 + worker as u64
    }

    pub fn blocks_for_worker(&self, worker: usize) -> u64 {
        self.blocks_per_worker + u64::from((worker as u64) < self.remainder)
    }

    fn contiguous_start(&self, worker: usize) -> u64 {
        let w = worker as u64;
        w * self.blocks_per_worker + w.min(self.remainder)
    }

    pub fn owner(&self, k: u64, assignment: Assignment) -> usize {
        match assignment {
            Assignment::RoundRobin => self.worker_for(k),
            Assignment::Contiguous => {
                let big = self.blocks_per_worker + 1;
                let head = self.remainder * big;
                if k < head {
                    (k / big) as usize
                } else {
                    (self.remainder + (k - head) / self.blocks_per_worker) as usize
                }
            }
        }
    }

    /// Global indices of the blocks `worker` owns, ascending.
    pub fn blocks_for(&self, worker: usize, assignment: Assignment) -> impl Iterator<Item = u64> + '_ {
        let count = if worker < self.worker_count { self.blocks_for_worker(worker) } else { 0 };
        let start = self.contiguous_start(worker);
        (0..count).map(move |j| match assignment {
            Assignment::RoundRobin => self.global_index(worker, j as usize),
            Assignment::Contiguous => start + j,
        })
    }

    /// Exact size of worker `worker`'s dispatch segment: header plus its blocks.
    pub fn segment_size(&self, worker: usize) -> usize {
        SEGMENT_HEADER_LEN
            + self
                .blocks_for(worker, Assignment::RoundRobin)
                .map(|k| BLOCK_PREFIX_LEN + self.block_len(k))
                .sum::<usize>()
    }

    /// Size of one segment holding the whole block table.
    pub fn shared_segment_size(&self) -> usize {
        SEGMENT_HEADER_LEN + self.total_blocks as usize * BLOCK_PREFIX_LEN + self.payload_len as usize
    }

    /// Total shared memory across all dispatch segments.
    pub fn total_segment_bytes(&self) -> usize {
        (0..self.worker_count).map(|w| self.segment_size(w)).sum()
    }
}
