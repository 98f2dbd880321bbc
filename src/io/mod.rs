//! Bounded and scoped I/O for PE image parsing.
//!
//! This module provides an `ImageReader` that owns the backing file for the
//! duration of one parse. It memory-maps the file, caches its size and exposes
//! a cursor with seek / exact-read primitives plus non-moving reads at an
//! absolute offset. Resource limits protect against hostile inputs that
//! declare enormous tables.

pub mod error;

use crate::io::error::{IoError, Result};
use bytes::Bytes;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Defines the resource limits for I/O operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IOLimits {
    /// The absolute maximum file size that can be opened.
    pub max_file_size: u64,
    /// The maximum total number of bytes that can be read from the file across all operations.
    pub max_read_bytes: u64,
}

impl Default for IOLimits {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024, // 100MB
            // Room for one full pass over the largest file plus re-reads of strings
            max_read_bytes: 200 * 1024 * 1024, // 200MB
        }
    }
}

enum Backing {
    // memmap cannot map empty files.
    Empty,
    Mapped(Mmap),
    Memory(Bytes),
}

impl Backing {
    fn as_slice(&self) -> &[u8] {
        match self {
            Backing::Empty => &[],
            Backing::Mapped(map) => &map[..],
            Backing::Memory(bytes) => bytes.as_ref(),
        }
    }

    fn slice(&self, start: usize, end: usize) -> Bytes {
        match self {
            Backing::Empty => Bytes::new(),
            Backing::Mapped(map) => Bytes::copy_from_slice(&map[start..end]),
            Backing::Memory(bytes) => bytes.slice(start..end),
        }
    }
}

/// A bounded, seekable reader over the bytes of one PE image.
///
/// The reader is the scoped handle of a parse: it is acquired once, passed by
/// `&mut` through every parsing stage and released when dropped, whichever
/// way the parse ends.
pub struct ImageReader {
    path: Arc<Path>,
    backing: Backing,
    limits: IOLimits,
    position: u64,
    bytes_read: u64,
    file_size: u64,
}

impl ImageReader {
    /// Opens a file, memory-maps it, and wraps it in an `ImageReader`.
    ///
    /// This function will fail if the file size exceeds `limits.max_file_size`.
    pub fn open<P: AsRef<Path>>(path: P, limits: IOLimits) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        debug!(
            path = %path.display(),
            size = file_size,
            limits.max_file_size = limits.max_file_size,
            "Opening image for parsing"
        );

        if file_size > limits.max_file_size {
            warn!(
                path = %path.display(),
                size = file_size,
                limit = limits.max_file_size,
                "File is too large"
            );
            return Err(IoError::FileTooLarge {
                limit: limits.max_file_size,
                found: file_size,
            });
        }

        let backing = if file_size == 0 {
            Backing::Empty
        } else {
            // Safety: read-only map of a regular file; the mapping outlives the `File`.
            Backing::Mapped(unsafe { Mmap::map(&file)? })
        };

        Ok(Self {
            path: Arc::from(path),
            backing,
            limits,
            position: 0,
            bytes_read: 0,
            file_size,
        })
    }

    /// Wraps an in-memory buffer. `label` stands in for the file path.
    pub fn from_bytes<P: AsRef<Path>>(
        label: P,
        data: impl Into<Bytes>,
        limits: IOLimits,
    ) -> Result<Self> {
        let data = data.into();
        let file_size = data.len() as u64;
        if file_size > limits.max_file_size {
            return Err(IoError::FileTooLarge {
                limit: limits.max_file_size,
                found: file_size,
            });
        }
        Ok(Self {
            path: Arc::from(label.as_ref()),
            backing: Backing::Memory(data),
            limits,
            position: 0,
            bytes_read: 0,
            file_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shared handle on the path, handed to sections.
    pub fn shared_path(&self) -> Arc<Path> {
        Arc::clone(&self.path)
    }

    /// Returns the total size of the underlying file in bytes.
    pub fn size(&self) -> u64 {
        self.file_size
    }

    /// Current cursor position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns the total number of bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Returns the `IOLimits` enforced by this reader.
    pub fn limits(&self) -> &IOLimits {
        &self.limits
    }

    /// Moves the cursor to an absolute offset.
    ///
    /// Seeking exactly to the end of the file is allowed (the next read is
    /// short); anything past it is unreachable.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if offset > self.file_size {
            return Err(IoError::OutOfBounds {
                offset,
                size: self.file_size,
            });
        }
        self.position = offset;
        Ok(())
    }

    /// Advances the cursor by `count` bytes.
    pub fn skip(&mut self, count: u64) -> Result<()> {
        self.seek(self.position.saturating_add(count))
    }

    fn ensure_budget(&self, requested: u64) -> Result<()> {
        if self.bytes_read.saturating_add(requested) > self.limits.max_read_bytes {
            warn!(
                path = %self.path.display(),
                current_read = self.bytes_read,
                requested = requested,
                limit = self.limits.max_read_bytes,
                "Read limit exceeded"
            );
            return Err(IoError::ReadLimitExceeded {
                limit: self.limits.max_read_bytes,
                current: self.bytes_read,
            });
        }
        Ok(())
    }

    /// Reads up to `len` bytes at `offset` without moving the cursor.
    ///
    /// The result is shorter than `len` when the read crosses the end of the
    /// file, and empty when it starts past it.
    pub fn read_at(&mut self, offset: u64, len: u64) -> Result<Bytes> {
        self.ensure_budget(len)?;

        if offset >= self.file_size {
            return Ok(Bytes::new());
        }

        let start = offset as usize;
        let available = self.file_size - offset;
        let end = start + len.min(available) as usize;
        let out = self.backing.slice(start, end);
        self.bytes_read += out.len() as u64;

        trace!(
            path = %self.path.display(),
            offset = offset,
            len = out.len(),
            total_read = self.bytes_read,
            "Performed read"
        );

        Ok(out)
    }

    /// Reads exactly `len` bytes at `offset` without moving the cursor.
    pub fn read_exact_at(&mut self, offset: u64, len: u64) -> Result<Bytes> {
        let out = self.read_at(offset, len)?;
        if (out.len() as u64) < len {
            return Err(IoError::ShortRead {
                offset,
                expected: len,
                found: out.len() as u64,
            });
        }
        Ok(out)
    }

    /// Reads up to `len` bytes at the cursor and advances past them.
    pub fn read_up_to(&mut self, len: u64) -> Result<Bytes> {
        let out = self.read_at(self.position, len)?;
        self.position += out.len() as u64;
        Ok(out)
    }

    /// Reads exactly `len` bytes at the cursor.
    ///
    /// On a short read the cursor still advances over what was available.
    pub fn read_exact(&mut self, len: u64) -> Result<Bytes> {
        let offset = self.position;
        let out = self.read_up_to(len)?;
        if (out.len() as u64) < len {
            return Err(IoError::ShortRead {
                offset,
                expected: len,
                found: out.len() as u64,
            });
        }
        Ok(out)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let raw = self.read_exact(2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let raw = self.read_exact(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let raw = self.read_exact(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&raw);
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads a NUL-terminated string at `offset` without moving the cursor.
    ///
    /// At most `max_len` bytes are scanned; a string cut by `max_len` or by the
    /// end of the file is returned as-is. Invalid UTF-8 is replaced lossily.
    pub fn read_cstring_at(&mut self, offset: u64, max_len: usize) -> Result<String> {
        if offset >= self.file_size {
            return Err(IoError::OutOfBounds {
                offset,
                size: self.file_size,
            });
        }

        let (text, consumed) = {
            let data = self.backing.as_slice();
            let start = offset as usize;
            let end = start.saturating_add(max_len).min(data.len());
            let window = &data[start..end];
            let len = memchr::memchr(0, window).unwrap_or(window.len());
            let consumed = (len + 1).min(window.len()) as u64;
            (String::from_utf8_lossy(&window[..len]).into_owned(), consumed)
        };

        self.ensure_budget(consumed)?;
        self.bytes_read += consumed;
        Ok(text)
    }
}
