//! Host-side ownership of a job's segments and workers.
//!
//! Both shared-memory channels open through here: create and stamp every
//! segment, launch one worker per slot, wait for readiness, and on close
//! wait for `Done` before destroying anything.
//!
//! Every wait also watches the worker handles, so a worker that dies is
//! reported as soon as it is gone rather than at the deadline.

use std::sync::Arc;
use std::time::Instant;

use crate::config::ChannelConfig;
use crate::shm::{
    Handshake, HandshakeError, HeaderInit, HeaderView, ReadinessState, SegmentFlags,
    SegmentNamespace, SharedMemorySegment, SlotRef, WaitPolicy,
};
use crate::telemetry::{ChannelCounters, Stage, TelemetryTimer};
use crate::types::ChannelError;
use crate::worker::{LaunchError, WorkerHandle, WorkerInvocation, WorkerLauncher};

/// One segment the session must create.
#[derive(Debug, Clone)]
pub(crate) struct SegmentSpec {
    pub key: u32,
    pub size: usize,
    pub header: HeaderInit,
}

pub(crate) struct WorkerSession {
    namespace: SegmentNamespace,
    segments: Vec<SharedMemorySegment>,
    /// `(segment index, slot index)` for every worker.
    slots: Vec<(usize, usize)>,
    /// One per launched worker; `None` once reaped.
    handles: Vec<Option<Box<dyn WorkerHandle>>>,
    ready: WaitPolicy,
    done: WaitPolicy,
    wait_on_close: bool,
    pub(crate) counters: ChannelCounters,
    pub(crate) timer: TelemetryTimer,
    closed: bool,
}

impl WorkerSession {
    /// Create segments, launch workers and wait until all are attached.
    ///
    /// On any failure the workers already started are told to stop and the
    /// segments are reclaimed when it is safe to do so.
    pub fn open(
        config: &ChannelConfig,
        specs: Vec<SegmentSpec>,
        slots: Vec<(usize, usize)>,
        invocations: Vec<WorkerInvocation>,
        launcher: &Arc<dyn WorkerLauncher>,
    ) -> Result<Self, ChannelError> {
        let mut session = Self {
            namespace: config.namespace(),
            segments: Vec::with_capacity(specs.len()),
            slots,
            handles: Vec::with_capacity(invocations.len()),
            ready: config.ready_policy(),
            done: config.done_policy(),
            wait_on_close: config.wait_on_close,
            counters: ChannelCounters::default(),
            timer: TelemetryTimer::new(),
            closed: false,
        };

        let started = Instant::now();
        for spec in &specs {
            if let Err(e) = session.create_segment(spec) {
                session.abort();
                return Err(e);
            }
        }
        session.timer.add_stage_time(Stage::Allocate, started.elapsed());

        for inv in &invocations {
            match launcher.launch(inv, &session.namespace) {
                Ok(handle) => {
                    session.handles.push(Some(handle));
                    session.counters.add_worker_launched();
                }
                Err(e) => {
                    tracing::warn!(slot = inv.slot_index, error = %e, "worker launch failed, aborting job");
                    session.abort();
                    return Err(e.into());
                }
            }
        }

        let started = Instant::now();
        let ready = session.wait_workers(ReadinessState::AttachedReady, session.ready);
        session.timer.add_stage_time(Stage::Handshake, started.elapsed());
        if let Err(e) = ready {
            session.abort();
            return Err(e);
        }

        tracing::info!(
            segments = session.segments.len(),
            workers = session.slots.len(),
            "all workers attached"
        );
        Ok(session)
    }

    fn create_segment(&mut self, spec: &SegmentSpec) -> Result<(), ChannelError> {
        let seg = self.namespace.create(spec.key, spec.size)?;
        self.counters.add_segment_created();
        let init = HeaderView::new(&seg).init(&spec.header);
        self.segments.push(seg);
        init?;
        Ok(())
    }

    pub fn segment(&self, index: usize) -> &SharedMemorySegment {
        &self.segments[index]
    }

    pub fn done_policy(&self) -> WaitPolicy {
        self.done
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Wait for every launched worker to reach `target`, one deadline for all.
    fn wait_workers(&mut self, target: ReadinessState, policy: WaitPolicy) -> Result<(), ChannelError> {
        let launched = self.handles.len().min(self.slots.len());
        let refs = self.slots[..launched]
            .iter()
            .map(|&(seg, slot)| SlotRef::new(&self.segments[seg], slot))
            .collect();
        let handles = &mut self.handles;
        let waited = Handshake::new(refs, policy).wait_all_unless(target, |i| worker_exited(&mut handles[i]));

        match waited {
            Ok(()) => Ok(()),
            Err(HandshakeError::WorkerExited { worker, .. }) => Err(exit_error(worker, &mut self.handles[worker])),
            Err(e) => Err(e.into()),
        }
    }

    /// Poll `check` against one worker's slot until it yields a value.
    ///
    /// Fails with the worker's exit error as soon as it is gone without
    /// satisfying `check`, and with `WorkerTimeout` once `policy` runs out.
    pub fn wait_on_worker<T>(
        &mut self,
        worker: usize,
        policy: WaitPolicy,
        mut check: impl FnMut(&SharedMemorySegment, SlotRef<'_>) -> Result<Option<T>, ChannelError>,
    ) -> Result<T, ChannelError> {
        let (seg, slot) = self.slots[worker];
        let segment = &self.segments[seg];
        let slot_ref = SlotRef::new(segment, slot);
        let handle = &mut self.handles[worker];

        let waited = policy.wait_for(|| -> Result<Option<T>, ChannelError> {
            if let Some(v) = check(segment, slot_ref)? {
                return Ok(Some(v));
            }
            if !worker_exited(handle) {
                return Ok(None);
            }
            // Anything published before the exit is visible by now.
            if let Some(v) = check(segment, slot_ref)? {
                return Ok(Some(v));
            }
            Err(exit_error(worker, handle))
        })?;

        match waited {
            Ok(v) => Ok(v),
            Err(waited) => Err(HandshakeError::WorkerTimeout {
                slot: worker,
                observed: slot_ref.state()?,
                expected: ReadinessState::Done,
                waited,
            }
            .into()),
        }
    }

    pub fn set_flags(&self, flags: SegmentFlags) -> Result<(), ChannelError> {
        for seg in &self.segments {
            HeaderView::new(seg).set_flags(flags)?;
        }
        Ok(())
    }

    /// Launched workers are `Done` or have exited.
    fn quiescent(&mut self) -> bool {
        for (i, handle) in self.handles.iter_mut().enumerate() {
            let (seg, slot) = self.slots[i];
            let done = SlotRef::new(&self.segments[seg], slot)
                .state()
                .map(|s| s == ReadinessState::Done)
                .unwrap_or(false);
            if !done && !worker_exited(handle) {
                return false;
            }
        }
        true
    }

    /// Give workers up to `policy.timeout` to finish or exit.
    fn settle(&mut self, policy: WaitPolicy) -> bool {
        let settled = policy.wait_for(|| -> Result<Option<()>, ChannelError> { Ok(self.quiescent().then_some(())) });
        matches!(settled, Ok(Ok(())))
    }

    /// Job failure path: stop workers, then reclaim what is safe to reclaim.
    fn abort(&mut self) {
        self.closed = true;
        if let Err(e) = self.set_flags(SegmentFlags::STREAM_ENDED | SegmentFlags::ABORTED) {
            tracing::warn!(error = %e, "could not flag segments as aborted");
        }
        if self.settle(self.done) {
            let _ = self.reap();
            self.destroy_segments();
        } else {
            self.leak();
        }
    }

    /// Close the session. Idempotent.
    ///
    /// With `wait` the call reports whether every worker reached `Done`.
    /// Either way workers get up to the done timeout to finish or exit, and
    /// segments are destroyed only once all of them have; otherwise they are
    /// left in place.
    pub fn close(&mut self, wait: bool) -> Result<(), ChannelError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(e) = self.set_flags(SegmentFlags::STREAM_ENDED) {
            tracing::warn!(error = %e, "could not flag end of stream");
        }

        let started = Instant::now();
        let waited = if wait { self.wait_workers(ReadinessState::Done, self.done) } else { Ok(()) };
        let settled = match &waited {
            // A worker that outlived the full wait gets no second one.
            Err(ChannelError::Handshake(HandshakeError::WorkerTimeout { .. })) => self.quiescent(),
            _ => self.settle(self.done),
        };

        let result = if settled {
            let reaped = self.reap();
            self.destroy_segments();
            waited.and(reaped)
        } else {
            self.leak();
            waited
        };

        self.timer.add_stage_time(Stage::Teardown, started.elapsed());
        self.timer.finish();
        result
    }

    pub fn close_default(&mut self) -> Result<(), ChannelError> {
        self.close(self.wait_on_close)
    }

    fn reap(&mut self) -> Result<(), ChannelError> {
        let mut first = Ok(());
        for handle in self.handles.drain(..).flatten() {
            let slot = handle.slot();
            if let Err(e) = handle.join() {
                tracing::warn!(slot, error = %e, "worker ended with an error");
                if first.is_ok() {
                    first = Err(e.into());
                }
            }
        }
        first
    }

    fn destroy_segments(&mut self) {
        for seg in self.segments.drain(..) {
            let (key, size) = (seg.key(), seg.len());
            self.namespace.detach(seg);
            match self.namespace.destroy(key, size) {
                Ok(()) => self.counters.add_segment_destroyed(),
                Err(e) => tracing::warn!(key = format_args!("{key:#010x}"), error = %e, "segment destroy failed"),
            }
        }
    }

    fn leak(&mut self) {
        for seg in &self.segments {
            tracing::warn!(
                key = format_args!("{:#010x}", seg.key()),
                path = %seg.path().display(),
                "workers not done, leaving segment in place"
            );
        }
        // Detach only; the handles are dropped without waiting.
        self.handles.clear();
        self.segments.clear();
    }
}

fn worker_exited(handle: &mut Option<Box<dyn WorkerHandle>>) -> bool {
    handle.as_mut().map_or(true, |h| h.is_finished())
}

/// Reap an exited worker and turn how it ended into an error.
fn exit_error(worker: usize, handle: &mut Option<Box<dyn WorkerHandle>>) -> ChannelError {
    let err = match handle.take() {
        Some(h) => match h.join() {
            Ok(()) => LaunchError::WorkerExited { slot: worker, code: Some(0) },
            Err(e) => e,
        },
        None => LaunchError::WorkerExited { slot: worker, code: None },
    };
    err.into()
}

impl Drop for WorkerSession {
    fn drop(&mut self) {
        if !self.closed {
            // Dropped without close: the job is abandoned.
            tracing::debug!("worker session dropped while open, aborting job");
            self.abort();
        }
    }
}
