use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::types::ReadOutcome;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    #[error("ring buffer is stopped")]
    Closed,

    #[error("ring buffer capacity must be non-zero")]
    ZeroCapacity,
}

#[derive(Debug)]
struct RingState {
    buf: Box<[u8]>,
    /// Total bytes ever written.
    head: u64,
    /// Total bytes ever read.
    tail: u64,
    running: bool,
    closed: bool,
}

impl RingState {
    #[inline]
    fn used(&self) -> usize {
        (self.head - self.tail) as usize
    }
}

/// Single-producer / single-consumer circular byte buffer.
///
/// Cursors advance monotonically; positions are taken modulo capacity, so
/// `head - tail` never exceeds the capacity. Writers wait for free space,
/// readers wait for data; `stop()` wakes both.
#[derive(Debug)]
pub struct RingBuffer {
    state: Mutex<RingState>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Result<Self, RingError> {
        if capacity == 0 {
            return Err(RingError::ZeroCapacity);
        }
        Ok(Self {
            state: Mutex::new(RingState {
                buf: vec![0u8; capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
                running: true,
                closed: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity,
        })
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Unread bytes currently buffered.
    pub fn len(&self) -> usize {
        self.lock().used()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Append all of `data`, waiting for the reader whenever the ring is full.
    ///
    /// Fails with `Closed` if the ring was stopped before or during the write;
    /// bytes already copied stay readable.
    pub fn write(&self, data: &[u8]) -> Result<usize, RingError> {
        let mut st = self.lock();
        if !st.running {
            return Err(RingError::Closed);
        }

        let mut written = 0;
        while written < data.len() {
            let free = self.capacity - st.used();
            if free == 0 {
                st = self.writable.wait(st).unwrap_or_else(PoisonError::into_inner);
                if !st.running {
                    return Err(RingError::Closed);
                }
                continue;
            }

            let n = free.min(data.len() - written);
            let pos = (st.head % self.capacity as u64) as usize;
            let first = n.min(self.capacity - pos);
            st.buf[pos..pos + first].copy_from_slice(&data[written..written + first]);
            if first < n {
                st.buf[..n - first].copy_from_slice(&data[written + first..written + n]);
            }

            st.head += n as u64;
            written += n;
            self.readable.notify_one();
        }

        Ok(written)
    }

    /// Read into `dst`, waiting until data arrives or the ring is stopped.
    pub fn read(&self, dst: &mut [u8]) -> ReadOutcome {
        let mut st = self.lock();
        loop {
            if st.used() > 0 || dst.is_empty() {
                return self.drain(&mut st, dst);
            }
            if !st.running {
                return ReadOutcome::end(0);
            }
            st = self.readable.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Non-blocking read; `ReadOutcome::more(0)` means "no data yet".
    pub fn try_read(&self, dst: &mut [u8]) -> ReadOutcome {
        let mut st = self.lock();
        self.drain(&mut st, dst)
    }

    fn drain(&self, st: &mut RingState, dst: &mut [u8]) -> ReadOutcome {
        let n = st.used().min(dst.len());
        if n > 0 {
            let pos = (st.tail % self.capacity as u64) as usize;
            let first = n.min(self.capacity - pos);
            dst[..first].copy_from_slice(&st.buf[pos..pos + first]);
            if first < n {
                dst[first..n].copy_from_slice(&st.buf[..n - first]);
            }
            st.tail += n as u64;
            self.writable.notify_one();
        }

        if !st.running && st.used() == 0 {
            ReadOutcome::end(n)
        } else {
            ReadOutcome::more(n)
        }
    }

    /// Mark the producer side finished. Readers drain what is left, then see EOF.
    pub fn stop(&self) {
        let mut st = self.lock();
        st.running = false;
        drop(st);
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Stop the ring once. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        let mut st = self.lock();
        if st.closed {
            return false;
        }
        st.closed = true;
        st.running = false;
        drop(st);
        self.readable.notify_all();
        self.writable.notify_all();
        true
    }
}
