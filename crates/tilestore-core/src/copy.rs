//! Copies between any two locations
//!
//! Strategy, in order of preference:
//! 1. server-side copy when source and destination share an S3 bucket;
//! 2. `std::fs::copy` between local files;
//! 3. one buffered read and write when the source is at most
//!    `stream_threshold` bytes;
//! 4. a range-read loop feeding a streaming writer otherwise.
//!
//! A failed copy is not rolled back: the destination may be left truncated.
//! Copying a location onto itself is refused before anything is written.

use crate::backend::{BackendOps, Backends};
use crate::config::CopyConfig;
use crate::location::{Backend, StorageLocation};
use crate::reader::RangeReader;
use crate::writer::LocationWriter;
use crate::{Error, Result};
use std::fs::File;
use std::io::Read;
use tracing::{debug, info};

#[derive(Debug)]
pub struct CopyOrchestrator<'a> {
    backends: &'a Backends,
    config: &'a CopyConfig,
}

impl<'a> CopyOrchestrator<'a> {
    pub fn new(backends: &'a Backends, config: &'a CopyConfig) -> Self {
        Self { backends, config }
    }

    /// Copy `from` to `to`, checking the MD5 of the copied bytes when given
    pub fn copy(&self, from: &StorageLocation, to: &StorageLocation, expected_md5: Option<&str>) -> Result<()> {
        if !to.backend().is_writable() {
            return Err(Error::UnsupportedOperation(format!(
                "cannot copy to {}: {} is read-only",
                to,
                to.backend()
            )));
        }

        if from == to {
            return Err(Error::storage(
                to.backend(),
                format!("cannot copy {} onto itself", to.qualified()),
            ));
        }

        let expected = expected_md5.map(|md5| md5.trim().to_ascii_lowercase());
        let expected = expected.as_deref();

        match (from.backend(), to.backend()) {
            (Backend::S3, Backend::S3) if from.same_cluster(to) && from.container() == to.container() => {
                self.server_side(from, to, expected)
            }
            (Backend::File, Backend::File) => self.local(from, to, expected),
            _ => self.transfer(from, to, expected),
        }
    }

    fn server_side(&self, from: &StorageLocation, to: &StorageLocation, expected: Option<&str>) -> Result<()> {
        info!(from = %from, to = %to, "Copying inside the bucket");
        let backend = self.backends.s3(from)?;
        backend.ops().copy(from, to)?;

        if let Some(expected) = expected {
            let meta = backend
                .ops()
                .head(to)?
                .ok_or_else(|| Error::NotFound(to.to_string()))?;
            let etag = meta.e_tag.unwrap_or_default();
            verify(expected, etag.trim_matches('"'), to)?;
        }
        Ok(())
    }

    fn local(&self, from: &StorageLocation, to: &StorageLocation, expected: Option<&str>) -> Result<()> {
        info!(from = %from, to = %to, "Copying local file");
        crate::backend::FileBackend.copy(from, to)?;

        if let Some(expected) = expected {
            let mut file = File::open(to.file_path()).map_err(|e| Error::from_io(e, to))?;
            let mut context = md5::Context::new();
            let mut block = vec![0u8; 64 * 1024];
            loop {
                let read = file.read(&mut block).map_err(|e| Error::from_io(e, to))?;
                if read == 0 {
                    break;
                }
                context.consume(&block[..read]);
            }
            verify(expected, &format!("{:x}", context.compute()), to)?;
        }
        Ok(())
    }

    fn transfer(&self, from: &StorageLocation, to: &StorageLocation, expected: Option<&str>) -> Result<()> {
        let source = self.backends.resolve(from)?;
        let size = source
            .size(from)?
            .ok_or_else(|| Error::NotFound(from.to_string()))?;
        let destination = self.backends.resolve(to)?;

        if size <= self.config.stream_threshold {
            info!(from = %from, to = %to, size, "Buffered copy");
            let data = source.read(from, None)?;
            if let Some(expected) = expected {
                verify(expected, &format!("{:x}", md5::compute(&data)), to)?;
            }
            return destination.write(to, data);
        }

        info!(from = %from, to = %to, size, "Streamed copy");
        self.stream(source, destination, from, to, expected)
    }

    fn stream(
        &self,
        source: BackendOps<'_>,
        destination: BackendOps<'_>,
        from: &StorageLocation,
        to: &StorageLocation,
        expected: Option<&str>,
    ) -> Result<()> {
        let mut reader = RangeReader::new(source, from.clone(), self.config.chunk_size)?;
        let mut writer = LocationWriter::new(destination, to.clone(), self.config.part_size as usize)?;
        let mut context = md5::Context::new();

        while let Some(chunk) = reader.next_chunk()? {
            context.consume(&chunk);
            writer.write_chunk(&chunk)?;
        }
        let written = writer.finish()?;
        debug!(to = %to, written, "Streamed copy finished");

        if let Some(expected) = expected {
            verify(expected, &format!("{:x}", context.compute()), to)?;
        }
        Ok(())
    }
}

fn verify(expected: &str, actual: &str, location: &StorageLocation) -> Result<()> {
    if expected.eq_ignore_ascii_case(actual) {
        Ok(())
    } else {
        Err(Error::storage(
            location.backend(),
            format!(
                "checksum mismatch on {}: expected {}, got {}",
                location, expected, actual
            ),
        ))
    }
}
