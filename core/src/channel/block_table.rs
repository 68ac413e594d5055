//! Host side of the single-segment topologies.
//!
//! One segment holds the whole block table. Workers fill their blocks
//! directly (`FixedTwo`: two contiguous halves, `CrossReadN`: round-robin)
//! and the host reads blocks strictly in index order, waiting on each
//! block's `WRITTEN` marker.

use std::sync::Arc;
use std::time::Instant;

use crate::block::BlockFlags;
use crate::channel::context::DispatchContext;
use crate::channel::plan::{Assignment, DispatchPlan};
use crate::channel::session::{SegmentSpec, WorkerSession};
use crate::channel::Topology;
use crate::config::ChannelConfig;
use crate::shm::{BlockTable, HeaderInit, ReadinessState};
use crate::telemetry::{Stage, TelemetrySnapshot};
use crate::types::{ChannelError, ReadOutcome};
use crate::worker::{WorkerInvocation, WorkerLauncher};

pub struct BlockTableChannel {
    topology: Topology,
    plan: DispatchPlan,
    assignment: Assignment,
    session: WorkerSession,
    next_block: u64,
    offset_in_block: usize,
}

impl BlockTableChannel {
    pub fn open(
        config: &ChannelConfig,
        topology: Topology,
        context: &DispatchContext,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Result<Self, ChannelError> {
        let plan = match topology {
            Topology::FixedTwo => context.plan_with_workers(2),
            Topology::CrossReadN => context.plan(),
            other => return Err(ChannelError::Unsupported { op: "block table", topology: other.name() }),
        };
        let workers = plan.worker_count;
        let block_count = u32::try_from(plan.total_blocks)
            .map_err(|_| ChannelError::Config(format!("{} blocks exceed the header", plan.total_blocks)))?;
        let size = plan.shared_segment_size();

        let spec = SegmentSpec {
            key: config.base_key,
            size,
            header: HeaderInit {
                topology,
                mode: context.mode,
                block_count,
                worker_count: workers as u32,
                slot_index: 0,
                payload_len: context.payload_len,
            },
        };
        let invocations = (0..workers)
            .map(|slot| WorkerInvocation {
                mode: context.mode,
                segment_key: config.base_key,
                segment_size: size,
                file_path: context.source_path.clone(),
                slot_index: slot,
                worker_count: workers,
                engine_sequence: context.engine_sequence.clone(),
            })
            .collect();
        let slots = (0..workers).map(|slot| (0, slot)).collect();

        tracing::info!(
            topology = topology.name(),
            workers,
            blocks = plan.total_blocks,
            size,
            "opening block-table channel"
        );
        let session = WorkerSession::open(config, vec![spec], slots, invocations, &launcher)?;

        Ok(Self {
            topology,
            plan,
            assignment: Assignment::for_topology(topology),
            session,
            next_block: 0,
            offset_in_block: 0,
        })
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn plan(&self) -> &DispatchPlan {
        &self.plan
    }

    /// Length of block `k` once its owner has written it.
    fn wait_written(&mut self, k: u64) -> Result<usize, ChannelError> {
        let owner = self.plan.owner(k, self.assignment);
        let index = k as usize;
        let policy = self.session.done_policy();

        self.session.wait_on_worker(owner, policy, |segment, slot| -> Result<Option<usize>, ChannelError> {
            let table = BlockTable::new(segment)?;
            let (len, flags) = table.load(index)?;
            if flags.contains(BlockFlags::WRITTEN) {
                return Ok(Some(len));
            }
            if slot.state()? == ReadinessState::Done {
                // Done is published after the block, so a second look is final.
                let (len, flags) = table.load(index)?;
                if flags.contains(BlockFlags::WRITTEN) {
                    return Ok(Some(len));
                }
                return Err(ChannelError::MissingBlock { slot: owner, index: k });
            }
            Ok(None)
        })
    }

    pub fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome, ChannelError> {
        if self.session.is_closed() {
            return Err(ChannelError::Closed);
        }
        if self.next_block >= self.plan.total_blocks {
            return Ok(ReadOutcome::end(0));
        }
        if dst.is_empty() {
            return Ok(ReadOutcome::more(0));
        }

        let started = Instant::now();
        let k = self.next_block;
        let len = self.wait_written(k)?;
        let table = BlockTable::new(self.session.segment(0))?;
        let n = table.read_payload(k as usize, self.offset_in_block, len, dst)?;

        self.offset_in_block += n;
        if self.offset_in_block >= len {
            self.session.counters.add_block_read(len);
            self.next_block += 1;
            self.offset_in_block = 0;
            tracing::debug!(block = k, len, "block drained");
        }
        self.session.timer.add_stage_time(Stage::Drain, started.elapsed());

        if self.next_block == self.plan.total_blocks {
            Ok(ReadOutcome::end(n))
        } else {
            Ok(ReadOutcome::more(n))
        }
    }

    pub fn write(&mut self, _src: &[u8]) -> Result<usize, ChannelError> {
        Err(ChannelError::Unsupported { op: "write", topology: self.topology.name() })
    }

    pub fn close(&mut self) -> Result<(), ChannelError> {
        self.session.close_default()
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        TelemetrySnapshot::from(
            self.topology,
            self.plan.worker_count,
            &self.session.counters,
            &self.session.timer,
        )
    }
}
