//! CEPH (RADOS) backend
//!
//! Objects are reached through a [`RadosPool`], one per pool name. The
//! production implementation wraps a librados I/O context and is only built
//! with the `ceph` feature; [`MemoryRados`] keeps objects in process memory.

use crate::location::{Backend, ByteRange, StorageLocation};
use crate::{Error, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Failure reported by a RADOS pool
#[derive(Debug, thiserror::Error)]
pub enum RadosError {
    #[error("object not found")]
    ObjectNotFound,
    #[error("{0}")]
    Io(String),
}

/// Object operations of one RADOS pool
pub trait RadosPool: Send + Sync + fmt::Debug {
    /// Object size in bytes
    fn stat(&self, object: &str) -> std::result::Result<u64, RadosError>;

    /// Up to `len` bytes starting at `offset`
    fn read(&self, object: &str, offset: u64, len: u64) -> std::result::Result<Vec<u8>, RadosError>;

    /// Replace the whole object
    fn write_full(&self, object: &str, data: &[u8]) -> std::result::Result<(), RadosError>;

    /// Write `data` at `offset`, extending the object if needed
    fn write(&self, object: &str, data: &[u8], offset: u64) -> std::result::Result<(), RadosError>;

    fn remove(&self, object: &str) -> std::result::Result<(), RadosError>;
}

/// In-process RADOS pool
#[derive(Debug, Default)]
pub struct MemoryRados {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    reads: AtomicUsize,
}

impl MemoryRados {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `read` calls served so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn object_names(&self) -> Vec<String> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = objects.keys().cloned().collect();
        names.sort();
        names
    }
}

impl RadosPool for MemoryRados {
    fn stat(&self, object: &str) -> std::result::Result<u64, RadosError> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects
            .get(object)
            .map(|data| data.len() as u64)
            .ok_or(RadosError::ObjectNotFound)
    }

    fn read(&self, object: &str, offset: u64, len: u64) -> std::result::Result<Vec<u8>, RadosError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        let data = objects.get(object).ok_or(RadosError::ObjectNotFound)?;
        let range = ByteRange::new(offset, len).clamp(data.len() as u64);
        Ok(data[range.start as usize..range.end as usize].to_vec())
    }

    fn write_full(&self, object: &str, data: &[u8]) -> std::result::Result<(), RadosError> {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.insert(object.to_string(), data.to_vec());
        Ok(())
    }

    fn write(&self, object: &str, data: &[u8], offset: u64) -> std::result::Result<(), RadosError> {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        let stored = objects.entry(object.to_string()).or_default();
        let start = offset as usize;
        let end = start + data.len();
        if stored.len() < end {
            stored.resize(end, 0);
        }
        stored[start..end].copy_from_slice(data);
        Ok(())
    }

    fn remove(&self, object: &str) -> std::result::Result<(), RadosError> {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects
            .remove(object)
            .map(|_| ())
            .ok_or(RadosError::ObjectNotFound)
    }
}

/// Operations on objects of one pool
#[derive(Debug, Clone)]
pub struct CephBackend {
    pool: Arc<dyn RadosPool>,
}

impl CephBackend {
    pub fn new(pool: Arc<dyn RadosPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<dyn RadosPool> {
        &self.pool
    }

    pub fn read(&self, location: &StorageLocation, range: Option<ByteRange>) -> Result<Bytes> {
        let object = location.key();
        debug!(location = %location, ?range, "Reading CEPH object");

        let (offset, len) = match range {
            Some(range) => (range.offset, range.length),
            None => {
                let size = self.pool.stat(object).map_err(|e| convert(e, location))?;
                (0, size)
            }
        };

        let data = self
            .pool
            .read(object, offset, len)
            .map_err(|e| convert(e, location))?;
        Ok(Bytes::from(data))
    }

    pub fn size(&self, location: &StorageLocation) -> Result<Option<u64>> {
        match self.pool.stat(location.key()) {
            Ok(size) => Ok(Some(size)),
            Err(RadosError::ObjectNotFound) => Ok(None),
            Err(e) => Err(convert(e, location)),
        }
    }

    pub fn exists(&self, location: &StorageLocation) -> Result<bool> {
        Ok(self.size(location)?.is_some())
    }

    pub fn write(&self, location: &StorageLocation, data: &[u8]) -> Result<()> {
        debug!(location = %location, bytes = data.len(), "Writing CEPH object");
        self.pool
            .write_full(location.key(), data)
            .map_err(|e| convert(e, location))
    }

    pub(crate) fn write_at(&self, location: &StorageLocation, data: &[u8], offset: u64) -> Result<()> {
        let result = if offset == 0 {
            self.pool.write_full(location.key(), data)
        } else {
            self.pool.write(location.key(), data, offset)
        };
        result.map_err(|e| convert(e, location))
    }

    pub fn delete(&self, location: &StorageLocation) -> Result<()> {
        match self.pool.remove(location.key()) {
            Ok(()) | Err(RadosError::ObjectNotFound) => Ok(()),
            Err(e) => Err(convert(e, location)),
        }
    }
}

fn convert(err: RadosError, location: &StorageLocation) -> Error {
    match err {
        RadosError::ObjectNotFound => Error::NotFound(location.to_string()),
        other => Error::storage_with_source(Backend::Ceph, location.to_string(), other),
    }
}

#[cfg(feature = "ceph")]
pub(crate) mod native {
    //! librados pools

    use super::{RadosError, RadosPool};
    use crate::config::CephConfig;
    use crate::location::Backend;
    use crate::{Error, Result};
    use ceph::ceph::{connect_to_ceph, IoCtx, Rados};
    use ceph::error::RadosError as NativeError;
    use std::fmt;
    use std::sync::Arc;
    use tracing::info;

    const READ_BLOCK: u64 = 4 * 1024 * 1024;

    /// Connect to the cluster described by `config`
    pub(crate) fn connect(config: &CephConfig) -> Result<Arc<Rados>> {
        info!(
            username = %config.username,
            cluster = %config.cluster_name,
            conf_file = %config.conf_file.display(),
            "Connecting to CEPH cluster"
        );
        let conf_file = config.conf_file.to_string_lossy();
        connect_to_ceph(&config.username, &conf_file)
            .map(Arc::new)
            .map_err(|e| Error::storage_with_source(Backend::Ceph, "cluster connection failed", e))
    }

    pub(crate) struct LibradosPool {
        ioctx: IoCtx,
        name: String,
        // The I/O context is only valid while the cluster handle lives
        _cluster: Arc<Rados>,
    }

    impl LibradosPool {
        pub(crate) fn open(cluster: Arc<Rados>, pool: &str) -> Result<Self> {
            let ioctx = cluster.get_rados_ioctx(pool).map_err(|e| {
                Error::storage_with_source(Backend::Ceph, format!("cannot open pool {}", pool), e)
            })?;
            Ok(Self {
                ioctx,
                name: pool.to_string(),
                _cluster: cluster,
            })
        }
    }

    impl fmt::Debug for LibradosPool {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("LibradosPool").field("name", &self.name).finish()
        }
    }

    fn convert(err: NativeError) -> RadosError {
        match err {
            NativeError::ApiError(errno) if errno as i32 == libc::ENOENT => RadosError::ObjectNotFound,
            other => RadosError::Io(other.to_string()),
        }
    }

    impl RadosPool for LibradosPool {
        fn stat(&self, object: &str) -> std::result::Result<u64, RadosError> {
            self.ioctx
                .rados_object_stat(object)
                .map(|(size, _mtime)| size)
                .map_err(convert)
        }

        fn read(&self, object: &str, offset: u64, len: u64) -> std::result::Result<Vec<u8>, RadosError> {
            let mut data = Vec::with_capacity(len as usize);
            let mut position = offset;
            let end = offset.saturating_add(len);

            while position < end {
                let mut block = Vec::with_capacity((end - position).min(READ_BLOCK) as usize);
                let read = self
                    .ioctx
                    .rados_object_read(object, &mut block, position)
                    .map_err(convert)?;
                if read <= 0 {
                    break;
                }
                position += read as u64;
                data.extend_from_slice(&block);
            }

            Ok(data)
        }

        fn write_full(&self, object: &str, data: &[u8]) -> std::result::Result<(), RadosError> {
            self.ioctx.rados_object_write_full(object, data).map_err(convert)
        }

        fn write(&self, object: &str, data: &[u8], offset: u64) -> std::result::Result<(), RadosError> {
            self.ioctx.rados_object_write(object, data, offset).map_err(convert)
        }

        fn remove(&self, object: &str) -> std::result::Result<(), RadosError> {
            self.ioctx.rados_object_remove(object).map_err(convert)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterRegistry;
    use crate::location::LocationParser;

    fn location(address: &str) -> StorageLocation {
        LocationParser::new(Arc::new(ClusterRegistry::empty()))
            .parse(address)
            .unwrap()
    }

    #[test]
    fn test_memory_rados_offset_writes() {
        let pool = MemoryRados::new();
        pool.write_full("obj", b"hello").unwrap();
        pool.write("obj", b" world", 5).unwrap();
        assert_eq!(pool.read("obj", 0, 64).unwrap(), b"hello world");
        assert_eq!(pool.read("obj", 6, 5).unwrap(), b"world");
        assert_eq!(pool.stat("obj").unwrap(), 11);
        assert_eq!(pool.reads(), 2);
    }

    #[test]
    fn test_backend_roundtrip_and_range() {
        let backend = CephBackend::new(Arc::new(MemoryRados::new()));
        let loc = location("ceph://pool/tiles/0_0.tif");

        backend.write(&loc, b"0123456789").unwrap();
        assert_eq!(backend.read(&loc, None).unwrap(), Bytes::from_static(b"0123456789"));
        assert_eq!(
            backend.read(&loc, Some(ByteRange::new(2, 3))).unwrap(),
            Bytes::from_static(b"234")
        );
        assert_eq!(backend.size(&loc).unwrap(), Some(10));
    }

    #[test]
    fn test_backend_absence() {
        let backend = CephBackend::new(Arc::new(MemoryRados::new()));
        let loc = location("ceph://pool/missing");

        assert!(backend.read(&loc, None).unwrap_err().is_not_found());
        assert!(!backend.exists(&loc).unwrap());
        assert_eq!(backend.size(&loc).unwrap(), None);
        backend.delete(&loc).unwrap();
    }
}
