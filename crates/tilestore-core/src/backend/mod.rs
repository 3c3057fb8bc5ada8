//! Per-backend operations
//!
//! [`Backends::resolve`] turns a location into a [`BackendOps`] value bound to
//! the pooled client serving it. Dispatch happens by matching on the variant.

pub mod ceph;
pub mod file;
pub mod object;

use crate::location::{Backend, ByteRange, StorageLocation};
use crate::pool::{ClientKey, ClientPool};
use crate::{Error, Result};
use bytes::Bytes;

pub use ceph::{CephBackend, MemoryRados, RadosError, RadosPool};
pub use file::FileBackend;
pub use object::{HttpBackend, ObjectOps, ResolvedObject, S3Backend};

/// Operations available on one location
#[derive(Debug)]
pub enum BackendOps<'a> {
    File(FileBackend),
    S3(S3Backend<'a>),
    Ceph(CephBackend),
    Http(HttpBackend),
}

impl BackendOps<'_> {
    pub fn backend(&self) -> Backend {
        match self {
            BackendOps::File(_) => Backend::File,
            BackendOps::S3(_) => Backend::S3,
            BackendOps::Ceph(_) => Backend::Ceph,
            BackendOps::Http(_) => Backend::Http,
        }
    }

    /// Full content, or the bytes in `range`
    pub fn read(&self, location: &StorageLocation, range: Option<ByteRange>) -> Result<Bytes> {
        match self {
            BackendOps::File(b) => b.read(location, range),
            BackendOps::S3(b) => b.read(location, range),
            BackendOps::Ceph(b) => b.read(location, range),
            BackendOps::Http(b) => b.read(location, range),
        }
    }

    /// Like [`BackendOps::read`], also telling whether an S3 link was followed
    pub fn read_following(
        &self,
        location: &StorageLocation,
        range: Option<ByteRange>,
    ) -> Result<(Bytes, bool)> {
        match self {
            BackendOps::S3(b) => b.read_following(location, range),
            other => other.read(location, range).map(|data| (data, false)),
        }
    }

    /// Size in bytes, `None` when absent
    pub fn size(&self, location: &StorageLocation) -> Result<Option<u64>> {
        match self {
            BackendOps::File(b) => b.size(location),
            BackendOps::S3(b) => b.size(location),
            BackendOps::Ceph(b) => b.size(location),
            BackendOps::Http(b) => b.size(location),
        }
    }

    pub fn exists(&self, location: &StorageLocation) -> Result<bool> {
        match self {
            BackendOps::File(b) => b.exists(location),
            BackendOps::S3(b) => b.exists(location),
            BackendOps::Ceph(b) => b.exists(location),
            BackendOps::Http(b) => b.exists(location),
        }
    }

    /// Replace the content of `location`
    pub fn write(&self, location: &StorageLocation, data: Bytes) -> Result<()> {
        match self {
            BackendOps::File(b) => b.write(location, &data),
            BackendOps::S3(b) => b.write(location, data),
            BackendOps::Ceph(b) => b.write(location, &data),
            BackendOps::Http(_) => Err(read_only(location, "write")),
        }
    }

    /// Remove `location`; absent targets are not an error
    pub fn delete(&self, location: &StorageLocation) -> Result<()> {
        match self {
            BackendOps::File(b) => b.delete(location),
            BackendOps::S3(b) => b.delete(location),
            BackendOps::Ceph(b) => b.delete(location),
            BackendOps::Http(_) => Err(read_only(location, "delete")),
        }
    }

    /// Create `link` as a symbolic link to `target`
    pub fn symlink(&self, target: &StorageLocation, link: &StorageLocation) -> Result<()> {
        match self {
            BackendOps::S3(b) => b.symlink(target, link),
            other => Err(Error::UnsupportedOperation(format!(
                "symbolic links are not supported on {} ({})",
                other.backend(),
                link
            ))),
        }
    }

    /// Total size below a directory or key prefix
    pub fn prefix_size(&self, location: &StorageLocation) -> Result<u64> {
        match self {
            BackendOps::File(b) => b.prefix_size(location),
            BackendOps::S3(b) => b.ops().prefix_size(location),
            other => Err(Error::UnsupportedOperation(format!(
                "prefix size is not supported on {}",
                other.backend()
            ))),
        }
    }
}

fn read_only(location: &StorageLocation, operation: &str) -> Error {
    Error::UnsupportedOperation(format!("cannot {} {}: HTTP is read-only", operation, location))
}

/// Resolves locations to their operations
#[derive(Debug)]
pub struct Backends {
    pool: ClientPool,
}

impl Backends {
    pub fn new(pool: ClientPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &ClientPool {
        &self.pool
    }

    /// Operations for `location`, acquiring its client if needed
    pub fn resolve(&self, location: &StorageLocation) -> Result<BackendOps<'_>> {
        let Some(key) = ClientKey::for_location(location) else {
            return Ok(BackendOps::File(FileBackend));
        };

        match location.backend() {
            Backend::S3 => Ok(BackendOps::S3(self.s3(location)?)),
            Backend::Http => {
                let store = self.pool.object_store(&key)?;
                Ok(BackendOps::Http(HttpBackend::new(ObjectOps::new(store, Backend::Http)?)))
            }
            Backend::Ceph => Ok(BackendOps::Ceph(CephBackend::new(self.pool.rados_pool(&key)?))),
            Backend::File => Ok(BackendOps::File(FileBackend)),
        }
    }

    pub(crate) fn s3(&self, location: &StorageLocation) -> Result<S3Backend<'_>> {
        let key = ClientKey::for_location(location).ok_or_else(|| {
            Error::UnsupportedOperation(format!("{} is not an S3 location", location))
        })?;
        let store = self.pool.object_store(&key)?;
        Ok(S3Backend::new(ObjectOps::new(store, Backend::S3)?, self))
    }
}
