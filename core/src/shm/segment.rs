//! File-backed shared memory segments addressed by `(key, size)`.
//!
//! Each segment is a file `<dir>/<prefix>-<key>.shm` mapped `MAP_SHARED`.
//! All access goes through bounds-checked accessors on
//! `SharedMemorySegment`; no caller ever sees the base pointer.
#![allow(unsafe_code)]

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64};

use memmap2::MmapMut;
use thiserror::Error;

use crate::constants::SEGMENT_HEADER_LEN;

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("allocation of segment {key:#010x} ({size} bytes) failed: {source}")]
    AllocationFailed {
        key: u32,
        size: usize,
        #[source]
        source: io::Error,
    },

    #[error("attach to segment {key:#010x} failed: {source}")]
    AttachFailed {
        key: u32,
        #[source]
        source: io::Error,
    },

    #[error("segment {key:#010x} does not exist")]
    NotFound { key: u32 },

    #[error("segment {key:#010x} size mismatch: expected {expected}, found {actual}")]
    SizeMismatch { key: u32, expected: usize, actual: usize },

    #[error("segment {key:#010x} has an invalid header: {reason}")]
    InvalidHeader { key: u32, reason: String },

    #[error("access at {offset}+{len} is outside segment of {size} bytes")]
    OutOfBounds { offset: usize, len: usize, size: usize },

    #[error("offset {offset} is not aligned to {align} bytes")]
    Misaligned { offset: usize, align: usize },

    #[error("destroy of segment {key:#010x} failed: {source}")]
    DestroyFailed {
        key: u32,
        #[source]
        source: io::Error,
    },
}

/// Whether this mapping created the identity or attached to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentRole {
    Creator,
    Attached,
}

/// Directory + file prefix under which segment keys live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentNamespace {
    dir: PathBuf,
    prefix: String,
}

impl SegmentNamespace {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self { dir: dir.into(), prefix: prefix.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn path_for(&self, key: u32) -> PathBuf {
        self.dir.join(format!("{}-{:08x}.shm", self.prefix, key))
    }

    pub fn exists(&self, key: u32) -> bool {
        self.path_for(key).exists()
    }

    /// Create a fresh, zero-filled segment. Fails if the identity already exists.
    pub fn create(&self, key: u32, size: usize) -> Result<SharedMemorySegment, SegmentError> {
        let alloc_err = |source| SegmentError::AllocationFailed { key, size, source };

        if size < SEGMENT_HEADER_LEN {
            return Err(alloc_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("size must be at least the {SEGMENT_HEADER_LEN}-byte header"),
            )));
        }

        let path = self.path_for(key);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(alloc_err)?;

        let mapped = file
            .set_len(size as u64)
            .and_then(|_| SharedMemorySegment::map(key, size, path.clone(), &file, SegmentRole::Creator));

        match mapped {
            Ok(seg) => {
                tracing::debug!(key = format_args!("{key:#010x}"), size, path = %path.display(), "segment created");
                Ok(seg)
            }
            Err(source) => {
                let _ = fs::remove_file(&path);
                Err(alloc_err(source))
            }
        }
    }

    /// Map an existing segment read/write. The size must match the creator's.
    pub fn attach(&self, key: u32, size: usize) -> Result<SharedMemorySegment, SegmentError> {
        let path = self.path_for(key);
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(SegmentError::NotFound { key }),
            Err(source) => return Err(SegmentError::AttachFailed { key, source }),
        };

        let actual = file
            .metadata()
            .map_err(|source| SegmentError::AttachFailed { key, source })?
            .len() as usize;
        if actual != size {
            return Err(SegmentError::SizeMismatch { key, expected: size, actual });
        }

        let seg = SharedMemorySegment::map(key, size, path, &file, SegmentRole::Attached)
            .map_err(|source| SegmentError::AttachFailed { key, source })?;
        tracing::debug!(key = format_args!("{key:#010x}"), size, "segment attached");
        Ok(seg)
    }

    /// Drop a mapping. The backing identity stays alive.
    pub fn detach(&self, segment: SharedMemorySegment) {
        tracing::debug!(key = format_args!("{:#010x}", segment.key()), role = ?segment.role(), "segment detached");
        drop(segment);
    }

    /// Remove the backing identity. Callers must have observed `Done` on every slot.
    pub fn destroy(&self, key: u32, size: usize) -> Result<(), SegmentError> {
        let path = self.path_for(key);
        let actual = match fs::metadata(&path) {
            Ok(m) => m.len() as usize,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(SegmentError::NotFound { key }),
            Err(source) => return Err(SegmentError::DestroyFailed { key, source }),
        };
        if actual != size {
            return Err(SegmentError::SizeMismatch { key, expected: size, actual });
        }

        fs::remove_file(&path).map_err(|source| SegmentError::DestroyFailed { key, source })?;
        tracing::debug!(key = format_args!("{key:#010x}"), size, "segment destroyed");
        Ok(())
    }
}

/// One mapping of a shared segment.
pub struct SharedMemorySegment {
    key: u32,
    len: usize,
    path: PathBuf,
    role: SegmentRole,
    base: NonNull<u8>,
    // Keeps the mapping alive; `base` points into it.
    _map: MmapMut,
}

// SAFETY: the mapping lives as long as the segment and every access goes
// through atomics or bounds-checked copies.
unsafe impl Send for SharedMemorySegment {}
unsafe impl Sync for SharedMemorySegment {}

impl std::fmt::Debug for SharedMemorySegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemorySegment")
            .field("key", &format_args!("{:#010x}", self.key))
            .field("len", &self.len)
            .field("role", &self.role)
            .field("path", &self.path)
            .finish()
    }
}

impl SharedMemorySegment {
    fn map(key: u32, len: usize, path: PathBuf, file: &File, role: SegmentRole) -> io::Result<Self> {
        // SAFETY: the file is sized to `len` by the creator and is only ever
        // modified through mappings that follow the header/block protocol.
        let mut map = unsafe { MmapMut::map_mut(file)? };
        if map.len() != len {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "mapping length differs from segment size"));
        }
        let base = NonNull::new(map.as_mut_ptr())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "null mapping"))?;
        Ok(Self { key, len, path, role, base, _map: map })
    }

    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn role(&self) -> SegmentRole {
        self.role
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    fn check(&self, offset: usize, len: usize) -> Result<(), SegmentError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(SegmentError::OutOfBounds { offset, len, size: self.len }),
        }
    }

    /// Atomic view of the aligned u32 at `offset`.
    pub fn atomic_u32(&self, offset: usize) -> Result<&AtomicU32, SegmentError> {
        self.check(offset, 4)?;
        if offset % 4 != 0 {
            return Err(SegmentError::Misaligned { offset, align: 4 });
        }
        // SAFETY: in bounds, 4-aligned (mapping base is page-aligned), and the
        // memory outlives `&self`.
        Ok(unsafe { &*(self.base.as_ptr().add(offset) as *const AtomicU32) })
    }

    /// Atomic view of the aligned u64 at `offset`.
    pub fn atomic_u64(&self, offset: usize) -> Result<&AtomicU64, SegmentError> {
        self.check(offset, 8)?;
        if offset % 8 != 0 {
            return Err(SegmentError::Misaligned { offset, align: 8 });
        }
        // SAFETY: as above, 8-aligned.
        Ok(unsafe { &*(self.base.as_ptr().add(offset) as *const AtomicU64) })
    }

    /// Copy `src` into the segment at `offset`.
    ///
    /// Publication happens separately through an atomic store with `Release`.
    pub(crate) fn copy_in(&self, offset: usize, src: &[u8]) -> Result<(), SegmentError> {
        self.check(offset, src.len())?;
        // SAFETY: in bounds; the protocol gives one writer per byte range
        // until the range is published.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.base.as_ptr().add(offset), src.len());
        }
        Ok(())
    }

    /// Copy `dst.len()` bytes out of the segment at `offset`.
    ///
    /// Callers acquire the publishing atomic first.
    pub(crate) fn copy_out(&self, offset: usize, dst: &mut [u8]) -> Result<(), SegmentError> {
        self.check(offset, dst.len())?;
        // SAFETY: in bounds; the range was published before this read.
        unsafe {
            std::ptr::copy_nonoverlapping(self.base.as_ptr().add(offset), dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }
}
