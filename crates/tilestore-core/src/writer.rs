//! Streaming writer over any writable location

use crate::backend::{BackendOps, CephBackend, ObjectOps};
use crate::backend::object::object_path;
use crate::buffer::WriteBuffer;
use crate::cache::ReadCache;
use crate::location::StorageLocation;
use crate::{Error, Result};
use object_store::path::Path as ObjectPath;
use object_store::{MultipartUpload, PutPayload};
use std::fs::File;
use std::io::Write;
use tracing::{debug, trace, warn};

/// Default size of a multipart upload part
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

enum Sink {
    File(File),
    Object {
        ops: ObjectOps,
        path: ObjectPath,
        buffer: WriteBuffer,
        upload: Option<Box<dyn MultipartUpload>>,
    },
    Rados {
        backend: CephBackend,
    },
}

/// `std::io::Write` adapter writing one location from start to end
///
/// Content is only guaranteed to be complete once [`LocationWriter::finish`]
/// returned. S3 objects are sent with a single PUT when they fit in one part,
/// and as a multipart upload otherwise. A writer dropped without `finish`
/// aborts a pending multipart upload; the other backends keep what was
/// already written.
pub struct LocationWriter<'a> {
    location: StorageLocation,
    sink: Option<Sink>,
    written: u64,
    cache: Option<&'a ReadCache>,
}

impl<'a> LocationWriter<'a> {
    /// Open `location` for writing through `ops`
    pub fn new(ops: BackendOps<'_>, location: StorageLocation, part_size: usize) -> Result<Self> {
        let sink = match ops {
            BackendOps::File(backend) => Sink::File(backend.create(&location)?),
            BackendOps::S3(backend) => Sink::Object {
                path: object_path(&location)?,
                ops: backend.ops().clone(),
                buffer: WriteBuffer::new(part_size),
                upload: None,
            },
            BackendOps::Ceph(backend) => Sink::Rados { backend },
            BackendOps::Http(_) => {
                return Err(Error::UnsupportedOperation(format!(
                    "cannot write {}: HTTP is read-only",
                    location
                )));
            }
        };

        debug!(location = %location, "Opened writer");
        Ok(Self {
            location,
            sink: Some(sink),
            written: 0,
            cache: None,
        })
    }

    /// Invalidate `cache` entries of the location when the writer closes
    pub(crate) fn with_cache(mut self, cache: &'a ReadCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    /// Bytes accepted so far
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Append `data` to the location
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        let location = &self.location;
        let offset = self.written;

        match self.sink.as_mut() {
            Some(Sink::File(file)) => file.write_all(data).map_err(|e| Error::from_io(e, location))?,
            Some(Sink::Object {
                ops,
                path,
                buffer,
                upload,
            }) => {
                let mut remaining = data;
                while !remaining.is_empty() {
                    let taken = buffer.push(remaining);
                    remaining = &remaining[taken..];
                    if buffer.is_full() {
                        send_part(ops, path, buffer, upload, location)?;
                    }
                }
            }
            Some(Sink::Rados { backend }) => backend.write_at(location, data, offset)?,
            None => {
                return Err(Error::storage(
                    self.location.backend(),
                    format!("writer for {} is already closed", self.location),
                ));
            }
        }

        self.written += data.len() as u64;
        Ok(())
    }

    /// Flush everything and close the location, returning the byte count
    pub fn finish(mut self) -> Result<u64> {
        let result = self.close();
        self.invalidate();
        result.map(|_| self.written)
    }

    fn close(&mut self) -> Result<()> {
        let location = &self.location;
        match self.sink.take() {
            Some(Sink::File(mut file)) => file.flush().map_err(|e| Error::from_io(e, location))?,
            Some(Sink::Object {
                ops,
                path,
                mut buffer,
                upload,
            }) => match upload {
                Some(mut upload) => {
                    if !buffer.is_empty() {
                        let part = buffer.take();
                        trace!(location = %location, bytes = part.len(), "Uploading last part");
                        ops.block_on(upload.put_part(PutPayload::from(part)))
                            .map_err(|e| crate::backend::object::classify(e, ops.backend(), location))?;
                    }
                    debug!(location = %location, "Completing multipart upload");
                    ops.block_on(upload.complete())
                        .map_err(|e| crate::backend::object::classify(e, ops.backend(), location))?;
                }
                None => ops.put(location, buffer.take())?,
            },
            Some(Sink::Rados { backend }) => {
                if self.written == 0 {
                    backend.write(location, &[])?;
                }
            }
            None => {}
        }
        Ok(())
    }

    fn invalidate(&self) {
        if let Some(cache) = self.cache {
            cache.invalidate(&self.location);
        }
    }
}

fn send_part(
    ops: &ObjectOps,
    path: &ObjectPath,
    buffer: &mut WriteBuffer,
    upload: &mut Option<Box<dyn MultipartUpload>>,
    location: &StorageLocation,
) -> Result<()> {
    use crate::backend::object::classify;

    if upload.is_none() {
        debug!(location = %location, "Starting multipart upload");
        let started = ops
            .block_on(ops.store().put_multipart(path))
            .map_err(|e| classify(e, ops.backend(), location))?;
        *upload = Some(started);
    }

    if let Some(upload) = upload.as_mut() {
        let part = buffer.take();
        trace!(location = %location, bytes = part.len(), "Uploading part");
        ops.block_on(upload.put_part(PutPayload::from(part)))
            .map_err(|e| classify(e, ops.backend(), location))?;
    }
    Ok(())
}

impl Write for LocationWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.write_chunk(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(Sink::File(file)) = self.sink.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

impl Drop for LocationWriter<'_> {
    fn drop(&mut self) {
        let Some(sink) = self.sink.take() else {
            return;
        };

        warn!(location = %self.location, written = self.written, "Writer dropped without finish");
        if let Sink::Object {
            ops,
            upload: Some(mut upload),
            ..
        } = sink
        {
            if let Err(e) = ops.block_on(upload.abort()) {
                warn!(location = %self.location, error = %e, "Failed to abort multipart upload");
            }
        }
        self.invalidate();
    }
}

impl std::fmt::Debug for LocationWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationWriter")
            .field("location", &self.location)
            .field("written", &self.written)
            .field("open", &self.sink.is_some())
            .finish()
    }
}
