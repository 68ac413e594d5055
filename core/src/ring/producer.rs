use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;

use crate::constants::BLOCK_SIZE;
use crate::ring::ring_buffer::{RingBuffer, RingError};
use crate::types::ChannelError;
use crate::worker::BlockTransform;

/// Fills a ring with the transformed bytes of one byte range of the job.
///
/// `range.start` is always block-aligned so the transform sees whole blocks
/// (the last one may be short).
pub trait RangeProducer: Send + Sync {
    fn produce(&self, range: Range<u64>, sink: &RingBuffer) -> Result<(), ChannelError>;
}

impl<F> RangeProducer for F
where
    F: Fn(Range<u64>, &RingBuffer) -> Result<(), ChannelError> + Send + Sync,
{
    fn produce(&self, range: Range<u64>, sink: &RingBuffer) -> Result<(), ChannelError> {
        self(range, sink)
    }
}

fn check_aligned(range: &Range<u64>) -> Result<(), ChannelError> {
    if range.start % BLOCK_SIZE as u64 != 0 {
        return Err(ChannelError::Config(format!(
            "producer range start {} is not block-aligned",
            range.start
        )));
    }
    Ok(())
}

/// Produces from an in-memory source.
pub struct SourceProducer {
    source: Bytes,
    transform: Arc<dyn BlockTransform>,
}

impl SourceProducer {
    pub fn new(source: Bytes, transform: Arc<dyn BlockTransform>) -> Self {
        Self { source, transform }
    }
}

impl RangeProducer for SourceProducer {
    fn produce(&self, range: Range<u64>, sink: &RingBuffer) -> Result<(), ChannelError> {
        check_aligned(&range)?;
        let end = range.end.min(self.source.len() as u64);

        let mut off = range.start;
        while off < end {
            let block_end = (off + BLOCK_SIZE as u64).min(end);
            let mut block = self.source.slice(off as usize..block_end as usize).to_vec();
            self.transform.apply(off / BLOCK_SIZE as u64, &mut block);
            sink.write(&block)?;
            off = block_end;
        }
        Ok(())
    }
}

/// Produces from a file on disk, one block per read.
pub struct FileProducer {
    path: PathBuf,
    transform: Arc<dyn BlockTransform>,
}

impl FileProducer {
    pub fn new(path: impl Into<PathBuf>, transform: Arc<dyn BlockTransform>) -> Self {
        Self { path: path.into(), transform }
    }
}

impl RangeProducer for FileProducer {
    fn produce(&self, range: Range<u64>, sink: &RingBuffer) -> Result<(), ChannelError> {
        check_aligned(&range)?;
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(range.start))?;

        let mut block = vec![0u8; BLOCK_SIZE];
        let mut off = range.start;
        while off < range.end {
            let want = ((range.end - off) as usize).min(BLOCK_SIZE);
            let got = read_full(&mut file, &mut block[..want])?;
            if got == 0 {
                break;
            }
            self.transform.apply(off / BLOCK_SIZE as u64, &mut block[..got]);
            sink.write(&block[..got])?;
            off += got as u64;
            if got < want {
                break;
            }
        }
        Ok(())
    }
}

/// Fill `buf` unless EOF comes first; returns the bytes read.
pub(crate) fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize, ChannelError> {
    let mut off = 0;
    while off < buf.len() {
        let n = r.read(&mut buf[off..])?;
        if n == 0 {
            break;
        }
        off += n;
    }
    Ok(off)
}

/// One producer thread bound to one ring and one byte range.
///
/// The ring is stopped when the producer returns, whatever the outcome, so
/// the reader always reaches end-of-stream.
pub struct ProducerThread {
    ring: Arc<RingBuffer>,
    range: Range<u64>,
    handle: Option<JoinHandle<Result<(), ChannelError>>>,
}

impl ProducerThread {
    pub fn spawn(
        name: String,
        producer: Arc<dyn RangeProducer>,
        range: Range<u64>,
        capacity: usize,
    ) -> Result<Self, ChannelError> {
        let ring = Arc::new(RingBuffer::new(capacity)?);
        let thread_ring = ring.clone();
        let thread_range = range.clone();

        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            tracing::debug!(producer = %name, start = thread_range.start, end = thread_range.end, "producer starting");
            let res = producer.produce(thread_range, &thread_ring);
            thread_ring.stop();
            tracing::debug!(producer = %name, ok = res.is_ok(), "producer finished");
            res
        })?;

        Ok(Self { ring, range, handle: Some(handle) })
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    pub fn range(&self) -> &Range<u64> {
        &self.range
    }

    /// Join the thread and surface its result. Later calls return `Ok(())`.
    pub fn join(&mut self) -> Result<(), ChannelError> {
        match self.handle.take() {
            None => Ok(()),
            Some(h) => h
                .join()
                .unwrap_or_else(|_| Err(ChannelError::Producer("producer thread panicked".into()))),
        }
    }

    /// Stop the ring and join, ignoring the `Closed` error the stop provokes.
    pub fn shutdown(&mut self) -> Result<(), ChannelError> {
        self.ring.close();
        match self.join() {
            Err(ChannelError::Ring(RingError::Closed)) => Ok(()),
            other => other,
        }
    }
}

impl Drop for ProducerThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.shutdown();
        }
    }
}
