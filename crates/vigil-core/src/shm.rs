//! File-backed shared mapping connecting the two daemon processes.
//!
//! [`SharedRegion`] maps a file of exactly `size_of::<T>()` bytes read/write
//! and shared, so the file's bytes *are* the value. The agent creates the
//! file (truncation zero-fills it) and runs the one-time queue initializer;
//! the reader attaches to the existing file and must not re-initialize.
//!
//! `T` must be a position-independent `#[repr(C)]` value whose every bit
//! pattern produced by the peer process is valid - in this crate that is
//! [`crate::queue::RingQueue`], which synchronizes itself through atomics
//! inside the mapping.

use std::fs::OpenOptions;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use thiserror::Error;
use tracing::debug;

/// Errors raised while opening or mapping the shared file. All of these are
/// fatal to the owning process.
#[derive(Debug, Error)]
pub enum ShmError {
    /// The backing file could not be opened or created.
    #[error("failed to open shared file {path}: {source}")]
    Open {
        /// Path of the backing file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The backing file could not be grown to the mapped size.
    #[error("failed to size shared file {path} to {expected} bytes: {source}")]
    Truncate {
        /// Path of the backing file.
        path: PathBuf,
        /// Required file size in bytes.
        expected: u64,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An existing file does not match the compiled layout, which means the
    /// two processes were built with different queue parameters.
    #[error("shared file {path} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        /// Path of the backing file.
        path: PathBuf,
        /// Size found on disk.
        actual: u64,
        /// Size required by the compiled layout.
        expected: u64,
    },

    /// The mapping itself failed.
    #[error("failed to map shared file {path}: {source}")]
    Map {
        /// Path of the backing file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// A `T` living inside a shared file mapping.
///
/// Dropping the region unmaps and closes the file; the file itself is left
/// in place for the peer process.
pub struct SharedRegion<T> {
    mmap: MmapMut,
    path: PathBuf,
    _marker: PhantomData<T>,
}

impl<T> std::fmt::Debug for SharedRegion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("mmap", &self.mmap)
            .field("path", &self.path)
            .finish()
    }
}

impl<T> SharedRegion<T> {
    /// Creates (or re-opens) the backing file, sizes it to `size_of::<T>()`,
    /// and maps it. Producer-side entry point.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ShmError> {
        Self::map(path.as_ref(), true)
    }

    /// Maps an existing backing file, verifying its size matches the
    /// compiled layout. Consumer-side entry point; never resizes.
    pub fn attach(path: impl AsRef<Path>) -> Result<Self, ShmError> {
        Self::map(path.as_ref(), false)
    }

    fn map(path: &Path, create: bool) -> Result<Self, ShmError> {
        let expected = std::mem::size_of::<T>() as u64;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(path)
            .map_err(|source| ShmError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let actual = file
            .metadata()
            .map_err(|source| ShmError::Open {
                path: path.to_path_buf(),
                source,
            })?
            .len();

        if create {
            if actual != expected {
                file.set_len(expected).map_err(|source| ShmError::Truncate {
                    path: path.to_path_buf(),
                    expected,
                    source,
                })?;
            }
        } else if actual != expected {
            return Err(ShmError::SizeMismatch {
                path: path.to_path_buf(),
                actual,
                expected,
            });
        }

        // SAFETY: the mapping is exactly size_of::<T>() bytes, page-aligned
        // (which satisfies T's alignment), and stays valid until self.mmap
        // is dropped.
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|source| ShmError::Map {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), bytes = expected, create, "mapped shared region");

        Ok(Self {
            mmap,
            path: path.to_path_buf(),
            _marker: PhantomData,
        })
    }

    /// The value inside the mapping.
    #[must_use]
    pub fn get(&self) -> &T {
        // SAFETY: the mapping is sized and aligned for T (checked in map()),
        // and the constructors only admit T types for which any peer-written
        // bit pattern is valid.
        unsafe { &*self.mmap.as_ptr().cast::<T>() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
