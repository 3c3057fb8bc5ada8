//! Streaming reader over any location

use crate::backend::{BackendOps, ObjectOps};
use crate::buffer::ReadBuffer;
use crate::location::{ByteRange, StorageLocation};
use crate::{Error, Result};
use bytes::Bytes;
use std::io::{Read, Seek, SeekFrom};
use tracing::trace;

/// Default size of each range read
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Where chunks are fetched from
#[derive(Debug)]
enum ChunkSource<'a> {
    /// Object store data, size known up front, one GET per chunk
    Object {
        ops: ObjectOps,
        location: StorageLocation,
    },
    Backend(BackendOps<'a>),
}

/// `std::io::Read` + `Seek` adapter issuing range reads against one location
///
/// Reads bypass the read cache. S3 links are followed once, when the reader
/// is opened.
#[derive(Debug)]
pub struct RangeReader<'a> {
    source: ChunkSource<'a>,
    location: StorageLocation,
    position: u64,
    size: u64,
    chunk_size: u64,
    buffer: Option<ReadBuffer>,
}

impl<'a> RangeReader<'a> {
    /// Open `location`, failing with `NotFound` when it does not exist
    pub fn new(ops: BackendOps<'a>, location: StorageLocation, chunk_size: u64) -> Result<Self> {
        let not_found = || Error::NotFound(location.to_string());
        let (source, size) = match ops {
            BackendOps::S3(backend) => {
                let resolved = backend.resolve(&location)?.ok_or_else(not_found)?;
                let source = ChunkSource::Object {
                    ops: resolved.ops,
                    location: resolved.location,
                };
                (source, resolved.size)
            }
            BackendOps::Http(backend) => {
                let size = backend.size(&location)?.ok_or_else(not_found)?;
                let source = ChunkSource::Object {
                    ops: backend.ops().clone(),
                    location: location.clone(),
                };
                (source, size)
            }
            other => {
                let size = other.size(&location)?.ok_or_else(not_found)?;
                (ChunkSource::Backend(other), size)
            }
        };

        Ok(Self {
            source,
            location,
            position: 0,
            size,
            chunk_size: chunk_size.max(1),
            buffer: None,
        })
    }

    /// Object size, as known when the reader was opened
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    /// Next chunk from the current position, `None` at end of object
    pub fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.position >= self.size {
            return Ok(None);
        }

        if let Some(buffered) = self.buffer.take() {
            if let Some(rest) = buffered.from_position(self.position) {
                let data = Bytes::copy_from_slice(rest);
                self.position = buffered.end();
                return Ok(Some(data));
            }
        }

        let data = self.fetch(self.position)?;
        if data.is_empty() {
            // The object shrank after it was opened
            self.size = self.position;
            return Ok(None);
        }
        self.position += data.len() as u64;
        Ok(Some(data))
    }

    fn fetch(&self, start: u64) -> Result<Bytes> {
        let length = self.chunk_size.min(self.size - start);
        let range = ByteRange::new(start, length);
        trace!(location = %self.location, start, length, "Fetching chunk");
        match &self.source {
            ChunkSource::Object { ops, location } => ops.get_range(location, range, self.size),
            ChunkSource::Backend(ops) => ops.read(&self.location, Some(range)),
        }
    }

    fn ensure_buffer(&mut self) -> Result<()> {
        if let Some(buffer) = &self.buffer {
            if buffer.from_position(self.position).is_some() {
                return Ok(());
            }
        }

        let data = self.fetch(self.position)?;
        self.buffer = Some(ReadBuffer::new(data, self.position));
        Ok(())
    }
}

impl Read for RangeReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.position >= self.size || buf.is_empty() {
            return Ok(0);
        }

        self.ensure_buffer()?;

        let Some(available) = self
            .buffer
            .as_ref()
            .and_then(|buffer| buffer.from_position(self.position))
        else {
            return Ok(0);
        };

        let count = buf.len().min(available.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.position += count as u64;
        Ok(count)
    }
}

impl Seek for RangeReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(offset) => self.size.checked_add_signed(offset),
            SeekFrom::Current(offset) => self.position.checked_add_signed(offset),
        };

        match target {
            Some(position) if position <= self.size => {
                self.position = position;
                Ok(position)
            }
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek outside of the object",
            )),
        }
    }
}
