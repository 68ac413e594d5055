//! Readiness handshake: per-slot state words in the segment header.
//!
//! Workers advance their own slot `Uninitialized -> AttachedReady ->
//! Processing -> Done`; the host observes. Waiting is a bounded backoff
//! (spin, then yield, then sleep) against a deadline, so an unresponsive
//! worker surfaces as `WorkerTimeout` instead of a pegged core.

use std::fmt;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::utils::Backoff;
use num_enum::TryFromPrimitive;
use thiserror::Error;

use crate::shm::layout::HeaderView;
use crate::shm::segment::{SegmentError, SharedMemorySegment};

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, TryFromPrimitive)]
pub enum ReadinessState {
    Uninitialized = 0,
    AttachedReady = 1,
    Processing    = 2,
    Done          = 3,
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadinessState::Uninitialized => "uninitialized",
            ReadinessState::AttachedReady => "attached-ready",
            ReadinessState::Processing    => "processing",
            ReadinessState::Done          => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("worker slot {slot} still {observed} after {waited:?}, expected {expected}")]
    WorkerTimeout {
        slot: usize,
        observed: ReadinessState,
        expected: ReadinessState,
        waited: Duration,
    },

    #[error("worker {worker} exited while {observed}, expected {expected}")]
    WorkerExited {
        worker: usize,
        observed: ReadinessState,
        expected: ReadinessState,
    },

    #[error("worker slot {slot} wrote invalid state word {raw}")]
    InvalidState { slot: usize, raw: u32 },

    #[error(transparent)]
    Segment(#[from] SegmentError),
}

/// How long and how patiently to wait on shared memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    /// Sleep between checks once spinning and yielding are exhausted.
    pub poll_interval: Duration,
}

impl WaitPolicy {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self { timeout, poll_interval }
    }

    /// Poll `ready` until it yields `Some`, or give up at the deadline.
    ///
    /// Returns the time spent waiting on failure.
    pub fn wait_for<T, E>(
        &self,
        mut ready: impl FnMut() -> Result<Option<T>, E>,
    ) -> Result<Result<T, Duration>, E> {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let backoff = Backoff::new();

        loop {
            if let Some(v) = ready()? {
                return Ok(Ok(v));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Err(now - start));
            }
            if backoff.is_completed() {
                thread::sleep(self.poll_interval.min(deadline - now));
            } else {
                backoff.snooze();
            }
        }
    }
}

/// A worker slot inside a specific segment.
#[derive(Debug, Clone, Copy)]
pub struct SlotRef<'a> {
    pub segment: &'a SharedMemorySegment,
    pub slot: usize,
}

impl<'a> SlotRef<'a> {
    pub fn new(segment: &'a SharedMemorySegment, slot: usize) -> Self {
        Self { segment, slot }
    }

    pub fn state(&self) -> Result<ReadinessState, HandshakeError> {
        let raw = HeaderView::new(self.segment)
            .slot_state_word(self.slot)?
            .load(Ordering::Acquire);
        ReadinessState::try_from(raw).map_err(|_| HandshakeError::InvalidState { slot: self.slot, raw })
    }

    /// Move the slot forward to `next`. States never go backwards; returns the previous one.
    pub fn advance(&self, next: ReadinessState) -> Result<ReadinessState, HandshakeError> {
        let prev = HeaderView::new(self.segment)
            .slot_state_word(self.slot)?
            .fetch_max(next as u32, Ordering::AcqRel);
        ReadinessState::try_from(prev).map_err(|_| HandshakeError::InvalidState { slot: self.slot, raw: prev })
    }

    pub fn cursor(&self) -> Result<u32, HandshakeError> {
        Ok(HeaderView::new(self.segment).slot_cursor(self.slot)?.load(Ordering::Acquire))
    }

    /// Publish that the slot has finished `done` blocks.
    pub fn set_cursor(&self, done: u32) -> Result<(), HandshakeError> {
        HeaderView::new(self.segment)
            .slot_cursor(self.slot)?
            .fetch_max(done, Ordering::AcqRel);
        Ok(())
    }
}

/// Host-side observer over every worker slot of a job.
#[derive(Debug)]
pub struct Handshake<'a> {
    slots: Vec<SlotRef<'a>>,
    policy: WaitPolicy,
}

impl<'a> Handshake<'a> {
    pub fn new(slots: Vec<SlotRef<'a>>, policy: WaitPolicy) -> Self {
        Self { slots, policy }
    }

    pub fn slots(&self) -> &[SlotRef<'a>] {
        &self.slots
    }

    pub fn states(&self) -> Result<Vec<ReadinessState>, HandshakeError> {
        self.slots.iter().map(SlotRef::state).collect()
    }

    /// True when every slot is at `target` or later.
    pub fn all_reached(&self, target: ReadinessState) -> Result<bool, HandshakeError> {
        for slot in &self.slots {
            if slot.state()? < target {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn wait_all_ready(&self) -> Result<(), HandshakeError> {
        self.wait_all(ReadinessState::AttachedReady)
    }

    pub fn wait_all_done(&self) -> Result<(), HandshakeError> {
        self.wait_all(ReadinessState::Done)
    }

    /// Wait until every slot reaches `target`, one deadline for the whole set.
    pub fn wait_all(&self, target: ReadinessState) -> Result<(), HandshakeError> {
        self.wait_all_unless(target, |_| false)
    }

    /// Like [`Handshake::wait_all`], but `exited(i)` reports whether the
    /// worker behind the `i`-th slot is gone. A gone worker that has not
    /// reached `target` fails the wait at once with `WorkerExited`.
    pub fn wait_all_unless(
        &self,
        target: ReadinessState,
        mut exited: impl FnMut(usize) -> bool,
    ) -> Result<(), HandshakeError> {
        let start = Instant::now();
        let deadline = start + self.policy.timeout;

        for (i, slot) in self.slots.iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let policy = WaitPolicy::new(remaining, self.policy.poll_interval);
            let waited = policy.wait_for(|| -> Result<Option<ReadinessState>, HandshakeError> {
                let state = slot.state()?;
                if state >= target {
                    return Ok(Some(state));
                }
                if !exited(i) {
                    return Ok(None);
                }
                // The state word may have landed just before the exit.
                let observed = slot.state()?;
                if observed >= target {
                    return Ok(Some(observed));
                }
                tracing::warn!(worker = i, %observed, expected = %target, "worker exited before reaching state");
                Err(HandshakeError::WorkerExited { worker: i, observed, expected: target })
            })?;

            if waited.is_err() {
                let observed = slot.state()?;
                tracing::warn!(slot = slot.slot, %observed, expected = %target, "worker did not reach state in time");
                return Err(HandshakeError::WorkerTimeout {
                    slot: slot.slot,
                    observed,
                    expected: target,
                    waited: start.elapsed(),
                });
            }
        }

        tracing::debug!(slots = self.slots.len(), state = %target, elapsed = ?start.elapsed(), "all worker slots reached state");
        Ok(())
    }
}
