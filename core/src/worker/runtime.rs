//! What a worker does once launched: attach, report readiness, move blocks,
//! report `Done`.
//!
//! Block-table topologies (`FixedTwo`, `CrossReadN`) read their input from a
//! source and fill their assigned block slots. `DispatchN` workers wait for
//! the host to publish each block and transform it in place.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::PathBuf;

use bytes::Bytes;

use crate::block::{split_block_word, BlockFlags};
use crate::channel::plan::{Assignment, DispatchPlan};
use crate::channel::Topology;
use crate::constants::BLOCK_SIZE;
use crate::ring::producer::read_full;
use crate::shm::{
    BlockTable, HeaderView, ReadinessState, SegmentFlags, SegmentNamespace, SharedMemorySegment,
    SlotRef, WaitPolicy,
};
use crate::types::ChannelError;
use crate::worker::args::WorkerInvocation;
use crate::worker::launch::LaunchError;
use crate::worker::transform::BlockTransform;

/// Where a block-table worker reads its input.
#[derive(Debug, Clone)]
pub enum WorkerSource {
    Memory(Bytes),
    File(PathBuf),
}

enum SourceReader {
    Memory(Bytes),
    File(File),
}

impl WorkerSource {
    fn open(self) -> Result<SourceReader, ChannelError> {
        Ok(match self {
            WorkerSource::Memory(b) => SourceReader::Memory(b),
            WorkerSource::File(p) => SourceReader::File(File::open(p)?),
        })
    }
}

impl SourceReader {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, ChannelError> {
        match self {
            SourceReader::Memory(b) => {
                let start = (offset as usize).min(b.len());
                let n = buf.len().min(b.len() - start);
                buf[..n].copy_from_slice(&b[start..start + n]);
                Ok(n)
            }
            SourceReader::File(f) => {
                f.seek(SeekFrom::Start(offset))?;
                read_full(f, buf)
            }
        }
    }
}

/// Summary of one worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub blocks: u64,
    pub bytes: u64,
    /// Stopped early on `ABORTED` or an early end of stream.
    pub stopped_early: bool,
}

pub struct WorkerRuntime {
    segment: SharedMemorySegment,
    invocation: WorkerInvocation,
    topology: Topology,
    policy: WaitPolicy,
}

impl WorkerRuntime {
    /// Attach to the invocation's segment, check it matches the launch
    /// arguments and mark the slot `AttachedReady`.
    pub fn attach(
        namespace: &SegmentNamespace,
        invocation: &WorkerInvocation,
        policy: WaitPolicy,
    ) -> Result<Self, ChannelError> {
        let segment = namespace.attach(invocation.segment_key, invocation.segment_size)?;
        let header = HeaderView::new(&segment);
        header.validate()?;

        let topology = header.topology()?;
        let mismatch = |what: String| ChannelError::Launch(LaunchError::InvalidArgs(what));

        if header.worker_count()? != invocation.worker_count {
            return Err(mismatch(format!(
                "segment expects {} workers, launched with {}",
                header.worker_count()?,
                invocation.worker_count
            )));
        }
        if invocation.slot_index >= invocation.worker_count {
            return Err(mismatch(format!("slot {} out of range", invocation.slot_index)));
        }
        if topology == Topology::DispatchN && header.slot_index()? != invocation.slot_index {
            return Err(mismatch(format!(
                "segment {:#010x} belongs to slot {}, not {}",
                invocation.segment_key,
                header.slot_index()?,
                invocation.slot_index
            )));
        }
        if header.mode()? != invocation.mode {
            return Err(mismatch("cipher mode differs from the segment header".into()));
        }

        SlotRef::new(&segment, invocation.slot_index).advance(ReadinessState::AttachedReady)?;
        tracing::info!(
            slot = invocation.slot_index,
            key = format_args!("{:#010x}", invocation.segment_key),
            topology = topology.name(),
            "worker attached"
        );

        Ok(Self {
            segment,
            invocation: invocation.clone(),
            topology,
            policy,
        })
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    fn slot(&self) -> SlotRef<'_> {
        SlotRef::new(&self.segment, self.invocation.slot_index)
    }

    /// Process every block this slot owns, then mark the slot `Done`.
    ///
    /// `Done` is written even when processing fails, so the host never waits
    /// on a worker that has given up.
    pub fn run(
        &self,
        source: Option<WorkerSource>,
        transform: &dyn BlockTransform,
    ) -> Result<RunReport, ChannelError> {
        let result = match self.topology {
            Topology::FixedTwo | Topology::CrossReadN => self.fill_block_table(source, transform),
            Topology::DispatchN => self.transform_in_place(transform),
            other => Err(ChannelError::Unsupported { op: "worker run", topology: other.name() }),
        };

        let done = self.slot().advance(ReadinessState::Done);
        match &result {
            Ok(report) => tracing::info!(slot = self.invocation.slot_index, blocks = report.blocks, bytes = report.bytes, "worker done"),
            Err(e) => tracing::warn!(slot = self.invocation.slot_index, error = %e, "worker failed"),
        }
        let report = result?;
        done?;
        Ok(report)
    }

    fn fill_block_table(
        &self,
        source: Option<WorkerSource>,
        transform: &dyn BlockTransform,
    ) -> Result<RunReport, ChannelError> {
        let header = HeaderView::new(&self.segment);
        let table = BlockTable::new(&self.segment)?;
        let plan = DispatchPlan::new(header.payload_len()?, self.invocation.worker_count);
        if plan.total_blocks != table.len() as u64 {
            return Err(ChannelError::Config(format!(
                "segment holds {} blocks, payload needs {}",
                table.len(),
                plan.total_blocks
            )));
        }
        let assignment = Assignment::for_topology(self.topology);
        let mut reader = if plan.blocks_for_worker(self.invocation.slot_index) > 0 {
            let source = source
                .ok_or_else(|| ChannelError::Config("block-table worker needs an input source".into()))?;
            Some(source.open()?)
        } else {
            None
        };

        let slot = self.slot();
        slot.advance(ReadinessState::Processing)?;

        let mut report = RunReport::default();
        let mut buf = vec![0u8; BLOCK_SIZE];
        for (n, k) in plan.blocks_for(self.invocation.slot_index, assignment).enumerate() {
            if header.flags()?.contains(SegmentFlags::ABORTED) {
                report.stopped_early = true;
                break;
            }
            let Some(reader) = reader.as_mut() else { break };

            let len = plan.block_len(k);
            let start = plan.block_offset(k);
            let got = reader.read_at(start, &mut buf[..len])?;
            if got < len {
                return Err(ChannelError::Truncated {
                    expected: start + len as u64,
                    actual: start + got as u64,
                });
            }

            transform.apply(k, &mut buf[..len]);
            table.write_payload(k as usize, 0, &buf[..len])?;
            table.publish(k as usize, len, BlockFlags::WRITTEN)?;
            slot.set_cursor(n as u32 + 1)?;

            report.blocks += 1;
            report.bytes += len as u64;
            tracing::debug!(slot = self.invocation.slot_index, block = k, len, "block written");
        }
        Ok(report)
    }

    fn transform_in_place(&self, transform: &dyn BlockTransform) -> Result<RunReport, ChannelError> {
        let header = HeaderView::new(&self.segment);
        let table = BlockTable::new(&self.segment)?;
        let slot = self.slot();
        let workers = self.invocation.worker_count as u64;
        let me = self.invocation.slot_index as u64;

        let mut report = RunReport::default();
        let mut buf = vec![0u8; BLOCK_SIZE];
        for j in 0..table.len() {
            let Some(word) = self.wait_for_host(&header, &table, j)? else {
                report.stopped_early = true;
                break;
            };
            slot.advance(ReadinessState::Processing)?;

            let (len, _) = split_block_word(word);
            let len = len as usize;
            let got = table.read_payload(j, 0, len, &mut buf[..len])?;
            let global = j as u64 * workers + me;
            transform.apply(global, &mut buf[..got]);
            table.write_payload(j, 0, &buf[..got])?;
            slot.set_cursor(j as u32 + 1)?;

            report.blocks += 1;
            report.bytes += got as u64;
            tracing::debug!(slot = me, block = global, len = got, "block transformed");
        }
        Ok(report)
    }

    /// Wait for the host to publish local block `j`.
    ///
    /// `None` when the host ended or aborted the stream before publishing it.
    fn wait_for_host(
        &self,
        header: &HeaderView<'_>,
        table: &BlockTable<'_>,
        j: usize,
    ) -> Result<Option<u32>, ChannelError> {
        let waited = self.policy.wait_for(|| -> Result<Option<Option<u32>>, ChannelError> {
            let word = table.raw_word(j)?;
            if word != 0 {
                return Ok(Some(Some(word)));
            }
            let flags = header.flags()?;
            if flags.contains(SegmentFlags::ABORTED) {
                return Ok(Some(None));
            }
            if flags.contains(SegmentFlags::STREAM_ENDED) {
                // The publish precedes the flag, so one more look settles it.
                let word = table.raw_word(j)?;
                return Ok(Some((word != 0).then_some(word)));
            }
            Ok(None)
        })?;

        waited.map_err(|waited| ChannelError::BlockTimeout {
            slot: self.invocation.slot_index,
            index: j as u64 * self.invocation.worker_count as u64 + self.invocation.slot_index as u64,
            waited,
        })
    }
}
