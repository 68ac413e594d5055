//! Host side of `DispatchN`: the host streams the payload into per-worker
//! segments, workers transform each block in place, the host reads the
//! results back in block order.
//!
//! Block `k` lives in segment `k % W` at local slot `k / W`. Each segment is
//! sized to exactly the blocks it holds.

use std::sync::Arc;
use std::time::Instant;

use crate::block::BlockFlags;
use crate::channel::context::DispatchContext;
use crate::channel::plan::DispatchPlan;
use crate::channel::session::{SegmentSpec, WorkerSession};
use crate::channel::Topology;
use crate::config::ChannelConfig;
use crate::shm::{BlockTable, HeaderInit, ReadinessState, SegmentFlags};
use crate::telemetry::{Stage, TelemetrySnapshot};
use crate::types::{ChannelError, ReadOutcome};
use crate::worker::{WorkerInvocation, WorkerLauncher};

pub struct DispatchChannel {
    plan: DispatchPlan,
    session: WorkerSession,
    // write side
    written: u64,
    write_block: u64,
    bytes_in_block: usize,
    finished: bool,
    // read side
    read_block: u64,
    read_offset: usize,
}

impl DispatchChannel {
    pub fn open(
        config: &ChannelConfig,
        context: &DispatchContext,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Result<Self, ChannelError> {
        let plan = context.plan();
        let workers = plan.worker_count;

        let mut specs = Vec::with_capacity(workers);
        let mut invocations = Vec::with_capacity(workers);
        for slot in 0..workers {
            let key = config.base_key + slot as u32;
            let size = plan.segment_size(slot);
            let block_count = u32::try_from(plan.blocks_for_worker(slot))
                .map_err(|_| ChannelError::Config("too many blocks for one segment".into()))?;

            specs.push(SegmentSpec {
                key,
                size,
                header: HeaderInit {
                    topology: Topology::DispatchN,
                    mode: context.mode,
                    block_count,
                    worker_count: workers as u32,
                    slot_index: slot as u32,
                    payload_len: context.payload_len,
                },
            });
            invocations.push(WorkerInvocation {
                mode: context.mode,
                segment_key: key,
                segment_size: size,
                file_path: None,
                slot_index: slot,
                worker_count: workers,
                engine_sequence: context.engine_sequence.clone(),
            });
        }
        let slots = (0..workers).map(|slot| (slot, slot)).collect();

        tracing::info!(
            workers,
            blocks = plan.total_blocks,
            total_bytes = plan.total_segment_bytes(),
            "opening dispatch channel"
        );
        let session = WorkerSession::open(config, specs, slots, invocations, &launcher)?;

        Ok(Self {
            plan,
            session,
            written: 0,
            write_block: 0,
            bytes_in_block: 0,
            finished: false,
            read_block: 0,
            read_offset: 0,
        })
    }

    pub fn plan(&self) -> &DispatchPlan {
        &self.plan
    }

    fn table(&self, worker: usize) -> Result<BlockTable<'_>, ChannelError> {
        Ok(BlockTable::new(self.session.segment(worker))?)
    }

    /// Stream payload bytes into the block grid. Blocks are published to
    /// their worker the moment they are full.
    pub fn write(&mut self, src: &[u8]) -> Result<usize, ChannelError> {
        if self.session.is_closed() {
            return Err(ChannelError::Closed);
        }
        let attempted = self.written + src.len() as u64;
        if self.finished || attempted > self.plan.payload_len {
            return Err(ChannelError::Overflow { planned: self.plan.payload_len, attempted });
        }

        let started = Instant::now();
        let mut rest = src;
        while !rest.is_empty() {
            let k = self.write_block;
            let (worker, local) = (self.plan.worker_for(k), self.plan.local_index(k));
            let cap = self.plan.block_len(k);
            let take = (cap - self.bytes_in_block).min(rest.len());

            let filled = self.bytes_in_block + take;
            {
                let table = self.table(worker)?;
                table.write_payload(local, self.bytes_in_block, &rest[..take])?;
                if filled == cap {
                    table.publish(local, cap, BlockFlags::empty())?;
                }
            }
            self.bytes_in_block = filled;
            rest = &rest[take..];

            if filled == cap {
                self.session.counters.add_block_written(cap);
                tracing::debug!(block = k, worker, local, len = cap, "block published");
                self.write_block += 1;
                self.bytes_in_block = 0;
            }
        }
        self.written = attempted;
        self.session.timer.add_stage_time(Stage::Transfer, started.elapsed());
        Ok(src.len())
    }

    /// Declare the end of input. Fails with `Truncated` if fewer bytes than
    /// planned were written; workers are told to stop either way.
    pub fn finish(&mut self) -> Result<(), ChannelError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.session.set_flags(SegmentFlags::STREAM_ENDED)?;

        if self.written != self.plan.payload_len {
            return Err(ChannelError::Truncated {
                expected: self.plan.payload_len,
                actual: self.written,
            });
        }
        tracing::debug!(bytes = self.written, "input stream finished");
        Ok(())
    }

    /// Read transformed bytes back in block order.
    ///
    /// Returns `more(0)` without blocking while the next block has not been
    /// written by the host yet; once it has, waits for its worker.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome, ChannelError> {
        if self.session.is_closed() {
            return Err(ChannelError::Closed);
        }
        if self.read_block >= self.plan.total_blocks {
            return Ok(ReadOutcome::end(0));
        }
        if dst.is_empty() || self.read_block >= self.write_block {
            if self.finished && self.read_block >= self.write_block {
                return Err(ChannelError::Truncated {
                    expected: self.plan.payload_len,
                    actual: self.read_block * self.plan.block_size as u64,
                });
            }
            return Ok(ReadOutcome::more(0));
        }

        let started = Instant::now();
        let k = self.read_block;
        let (worker, local) = (self.plan.worker_for(k), self.plan.local_index(k));
        self.wait_transformed(worker, local)?;

        let len = self.plan.block_len(k);
        let n = self.table(worker)?.read_payload(local, self.read_offset, len, dst)?;
        self.read_offset += n;
        if self.read_offset >= len {
            self.session.counters.add_block_read(len);
            self.read_block += 1;
            self.read_offset = 0;
        }
        self.session.timer.add_stage_time(Stage::Drain, started.elapsed());

        if self.read_block == self.plan.total_blocks {
            Ok(ReadOutcome::end(n))
        } else {
            Ok(ReadOutcome::more(n))
        }
    }

    fn wait_transformed(&mut self, worker: usize, local: usize) -> Result<(), ChannelError> {
        let index = self.plan.global_index(worker, local);
        let policy = self.session.done_policy();

        self.session.wait_on_worker(worker, policy, |_, slot| -> Result<Option<()>, ChannelError> {
            if slot.cursor()? as usize > local {
                return Ok(Some(()));
            }
            if slot.state()? == ReadinessState::Done && slot.cursor()? as usize <= local {
                return Err(ChannelError::MissingBlock { slot: worker, index });
            }
            Ok(None)
        })
    }

    /// Close the channel. Idempotent.
    ///
    /// Ends the input stream if `finish` was never called, then tears the
    /// session down per the configured close policy.
    pub fn close(&mut self) -> Result<(), ChannelError> {
        if self.session.is_closed() {
            return Ok(());
        }
        self.finished = true;
        self.session.close_default()
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        TelemetrySnapshot::from(
            Topology::DispatchN,
            self.plan.worker_count,
            &self.session.counters,
            &self.session.timer,
        )
    }
}
