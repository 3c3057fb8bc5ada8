//! Buffers used by the streaming reader and writer

use bytes::{Bytes, BytesMut};

/// Window of an object already fetched by a reader
#[derive(Debug)]
pub(crate) struct ReadBuffer {
    data: Bytes,
    /// Offset of the first byte of `data` in the object
    start: u64,
}

impl ReadBuffer {
    pub fn new(data: Bytes, start: u64) -> Self {
        Self { data, start }
    }

    pub fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    /// Buffered bytes from `pos` to the end of the window
    pub fn from_position(&self, pos: u64) -> Option<&[u8]> {
        if pos < self.start || pos >= self.end() {
            return None;
        }
        Some(&self.data[(pos - self.start) as usize..])
    }
}

/// Bytes accumulated before they are sent as one part
#[derive(Debug)]
pub(crate) struct WriteBuffer {
    buffer: BytesMut,
    capacity: usize,
}

impl WriteBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    /// Append as much of `data` as fits, returning the count taken
    pub fn push(&mut self, data: &[u8]) -> usize {
        let room = self.capacity.saturating_sub(self.buffer.len());
        let taken = data.len().min(room);
        self.buffer.extend_from_slice(&data[..taken]);
        taken
    }

    /// Contents so far, leaving the buffer empty
    pub fn take(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }
}
