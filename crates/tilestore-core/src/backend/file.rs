//! Local filesystem backend

use crate::location::{Backend, ByteRange, StorageLocation};
use crate::{Error, Result};
use bytes::Bytes;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, Default)]
pub struct FileBackend;

impl FileBackend {
    pub fn read(&self, location: &StorageLocation, range: Option<ByteRange>) -> Result<Bytes> {
        let path = location.file_path();
        debug!(path = %path.display(), ?range, "Reading file");

        match range {
            None => fs::read(&path)
                .map(Bytes::from)
                .map_err(|e| Error::from_io(e, location)),
            Some(range) => read_range(&path, range).map_err(|e| Error::from_io(e, location)),
        }
    }

    pub fn size(&self, location: &StorageLocation) -> Result<Option<u64>> {
        match fs::metadata(location.file_path()) {
            Ok(metadata) if metadata.is_file() => Ok(Some(metadata.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::from_io(e, location)),
        }
    }

    /// Whether a regular file exists at `location`; directories do not count
    pub fn exists(&self, location: &StorageLocation) -> Result<bool> {
        Ok(self.size(location)?.is_some())
    }

    /// Overwrite the file, creating missing parent directories
    pub fn write(&self, location: &StorageLocation, data: &[u8]) -> Result<()> {
        let path = location.file_path();
        debug!(path = %path.display(), bytes = data.len(), "Writing file");

        let mut file = create(&path).map_err(|e| Error::from_io(e, location))?;
        file.write_all(data)
            .and_then(|_| file.flush())
            .map_err(|e| Error::from_io(e, location))
    }

    pub fn delete(&self, location: &StorageLocation) -> Result<()> {
        match fs::remove_file(location.file_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::from_io(e, location)),
        }
    }

    /// Copy between two local files
    ///
    /// Copying a file onto itself, under any spelling of its path, is an error.
    pub fn copy(&self, from: &StorageLocation, to: &StorageLocation) -> Result<u64> {
        let target = to.file_path();
        if let (Ok(source), Ok(destination)) =
            (fs::canonicalize(from.file_path()), fs::canonicalize(&target))
        {
            if source == destination {
                return Err(Error::storage(
                    Backend::File,
                    format!("{} and {} are the same file", from, to),
                ));
            }
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::from_io(e, to))?;
        }
        fs::copy(from.file_path(), &target).map_err(|e| Error::from_io(e, from))
    }

    /// Total size of the regular files below a directory
    pub fn prefix_size(&self, location: &StorageLocation) -> Result<u64> {
        let root = location.file_path();
        if !root.is_dir() {
            return Err(Error::NotFound(location.to_string()));
        }

        let mut total = 0;
        for entry in WalkDir::new(&root) {
            let entry = entry.map_err(|e| {
                Error::storage_with_source(Backend::File, location.to_string(), e)
            })?;
            if entry.file_type().is_file() {
                let metadata = entry.metadata().map_err(|e| {
                    Error::storage_with_source(Backend::File, location.to_string(), e)
                })?;
                total += metadata.len();
            }
        }
        Ok(total)
    }

    /// Open a file for streamed writing
    pub(crate) fn create(&self, location: &StorageLocation) -> Result<File> {
        create(&location.file_path()).map_err(|e| Error::from_io(e, location))
    }
}

fn create(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    File::create(path)
}

fn read_range(path: &Path, range: ByteRange) -> std::io::Result<Bytes> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(range.offset))?;

    let mut data = Vec::with_capacity(range.length.min(64 * 1024 * 1024) as usize);
    file.take(range.length).read_to_end(&mut data)?;
    Ok(Bytes::from(data))
}
