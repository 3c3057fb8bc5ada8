//! S3 and HTTP backends, served through `object_store`
//!
//! Every call blocks on the shared I/O runtime. S3 objects may be
//! application-level symbolic links: a small object whose content is
//! `SYMLINK#<bucket>/<key>` redirects reads, sizes and existence checks to the
//! target object on the same cluster.

use super::Backends;
use crate::location::{Backend, ByteRange, StorageLocation, CLUSTER_SEPARATOR};
use crate::runtime::shared_runtime;
use crate::{Error, Result};
use bytes::Bytes;
use futures_util::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{DynObjectStore, ObjectMeta, PutPayload};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, trace};

/// Content prefix of a symbolic link object
pub const SYMLINK_SIGNATURE: &str = "SYMLINK#";

/// Objects larger than this are never inspected for a link signature
pub const SYMLINK_MAX_SIZE: u64 = 2048;

/// Longest chain of links followed before giving up
pub const MAX_SYMLINK_DEPTH: usize = 8;

/// Key of `location` inside its bucket or origin
pub(crate) fn object_path(location: &StorageLocation) -> Result<ObjectPath> {
    ObjectPath::parse(location.key())
        .map_err(|e| Error::InvalidAddress(format!("'{}': {}", location, e)))
}

/// Map an `object_store` failure onto the crate taxonomy
///
/// Absence is reported as a typed `NotFound` by some calls and only as a
/// `NoSuchKey` fault or a raw 404 status by others; both become `NotFound`.
pub(crate) fn classify(err: object_store::Error, backend: Backend, location: &StorageLocation) -> Error {
    if let object_store::Error::NotFound { .. } = err {
        return Error::NotFound(location.to_string());
    }

    let root: &(dyn std::error::Error + 'static) = &err;
    let mut cause = Some(root);
    while let Some(e) = cause {
        let text = e.to_string();
        if text.contains("NoSuchKey") || text.contains("404 Not Found") {
            return Error::NotFound(location.to_string());
        }
        cause = e.source();
    }

    Error::storage_with_source(backend, location.to_string(), err)
}

/// Blocking access to one bucket or HTTP origin
#[derive(Debug, Clone)]
pub struct ObjectOps {
    store: Arc<DynObjectStore>,
    backend: Backend,
    runtime: Arc<Runtime>,
}

impl ObjectOps {
    pub fn new(store: Arc<DynObjectStore>, backend: Backend) -> Result<Self> {
        Ok(Self {
            store,
            backend,
            runtime: shared_runtime()?,
        })
    }

    pub fn store(&self) -> &Arc<DynObjectStore> {
        &self.store
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub(crate) fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn get(&self, location: &StorageLocation) -> Result<Bytes> {
        let path = object_path(location)?;
        trace!(location = %location, "GET");
        self.block_on(async {
            let result = self.store.get(&path).await?;
            result.bytes().await
        })
        .map_err(|e| classify(e, self.backend, location))
    }

    /// Bytes in `range`, clamped to an object of `size` bytes
    pub fn get_range(&self, location: &StorageLocation, range: ByteRange, size: u64) -> Result<Bytes> {
        let window = range.clamp(size);
        if window.is_empty() {
            return Ok(Bytes::new());
        }

        let path = object_path(location)?;
        trace!(location = %location, start = window.start, end = window.end, "GET range");
        self.block_on(
            self.store
                .get_range(&path, window.start as usize..window.end as usize),
        )
        .map_err(|e| classify(e, self.backend, location))
    }

    /// Object metadata, `None` when absent
    pub fn head(&self, location: &StorageLocation) -> Result<Option<ObjectMeta>> {
        let path = object_path(location)?;
        trace!(location = %location, "HEAD");
        match self.block_on(self.store.head(&path)) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => match classify(e, self.backend, location) {
                Error::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    pub fn put(&self, location: &StorageLocation, data: Bytes) -> Result<()> {
        let path = object_path(location)?;
        trace!(location = %location, bytes = data.len(), "PUT");
        self.block_on(self.store.put(&path, PutPayload::from(data)))
            .map(|_| ())
            .map_err(|e| classify(e, self.backend, location))
    }

    pub fn delete(&self, location: &StorageLocation) -> Result<()> {
        let path = object_path(location)?;
        trace!(location = %location, "DELETE");
        match self.block_on(self.store.delete(&path)) {
            Ok(()) => Ok(()),
            Err(e) => match classify(e, self.backend, location) {
                Error::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    /// Server-side copy inside this bucket
    pub fn copy(&self, from: &StorageLocation, to: &StorageLocation) -> Result<()> {
        let source = object_path(from)?;
        let target = object_path(to)?;
        debug!(from = %from, to = %to, "Server-side copy");
        self.block_on(self.store.copy(&source, &target))
            .map_err(|e| classify(e, self.backend, from))
    }

    /// Sum of the sizes of every object below `location`
    pub fn prefix_size(&self, location: &StorageLocation) -> Result<u64> {
        let prefix = ObjectPath::parse(location.key().trim_end_matches('/'))
            .map_err(|e| Error::InvalidAddress(format!("'{}': {}", location, e)))?;
        self.block_on(
            self.store
                .list(Some(&prefix))
                .try_fold(0u64, |total, meta| async move { Ok(total + meta.size as u64) }),
        )
        .map_err(|e| classify(e, self.backend, location))
    }
}

/// Target named by a link object's content, if it is one
///
/// A cluster suffix written into the bucket part is ignored: links never
/// leave their cluster.
pub(crate) fn symlink_target(data: &[u8]) -> Option<(String, String)> {
    if data.len() as u64 > SYMLINK_MAX_SIZE {
        return None;
    }
    let text = std::str::from_utf8(data).ok()?;
    let target = text.strip_prefix(SYMLINK_SIGNATURE)?.trim();
    let (bucket, key) = target.split_once('/')?;
    let bucket = bucket
        .split_once(CLUSTER_SEPARATOR)
        .map_or(bucket, |(name, _)| name);
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket.to_string(), key.to_string()))
}

/// Object holding the bytes of a location once links are followed
#[derive(Debug, Clone)]
pub struct ResolvedObject {
    /// Client of the bucket holding the object
    pub ops: ObjectOps,
    /// The object itself, equal to the requested location when it is no link
    pub location: StorageLocation,
    pub size: u64,
    /// Content, when it was fetched while checking for a link
    pub data: Option<Bytes>,
}

impl ResolvedObject {
    /// Whether a link was followed to reach the object
    pub fn is_link_target(&self, requested: &StorageLocation) -> bool {
        &self.location != requested
    }
}

/// S3 bucket operations, following symbolic links
#[derive(Debug)]
pub struct S3Backend<'a> {
    ops: ObjectOps,
    backends: &'a Backends,
}

impl<'a> S3Backend<'a> {
    pub(crate) fn new(ops: ObjectOps, backends: &'a Backends) -> Self {
        Self { ops, backends }
    }

    pub fn ops(&self) -> &ObjectOps {
        &self.ops
    }

    pub fn read(&self, location: &StorageLocation, range: Option<ByteRange>) -> Result<Bytes> {
        self.read_following(location, range).map(|(data, _)| data)
    }

    /// Like [`S3Backend::read`], also telling whether a link was followed
    pub fn read_following(
        &self,
        location: &StorageLocation,
        range: Option<ByteRange>,
    ) -> Result<(Bytes, bool)> {
        debug!(location = %location, ?range, "Reading S3 object");

        let Some(range) = range else {
            let data = self.ops.get(location)?;
            if symlink_target(&data).is_none() {
                return Ok((data, false));
            }
            let resolved = self.resolve_existing(location)?;
            let data = match resolved.data {
                Some(data) => data,
                None => resolved.ops.get(&resolved.location)?,
            };
            return Ok((data, true));
        };

        let resolved = self.resolve_existing(location)?;
        let followed = resolved.is_link_target(location);
        let data = match &resolved.data {
            Some(data) => {
                let window = range.clamp(data.len() as u64);
                data.slice(window.start as usize..window.end as usize)
            }
            None => resolved
                .ops
                .get_range(&resolved.location, range, resolved.size)?,
        };
        Ok((data, followed))
    }

    pub fn size(&self, location: &StorageLocation) -> Result<Option<u64>> {
        Ok(self.resolve(location)?.map(|resolved| resolved.size))
    }

    pub fn exists(&self, location: &StorageLocation) -> Result<bool> {
        Ok(self.resolve(location)?.is_some())
    }

    pub fn write(&self, location: &StorageLocation, data: Bytes) -> Result<()> {
        debug!(location = %location, bytes = data.len(), "Writing S3 object");
        self.ops.put(location, data)
    }

    pub fn delete(&self, location: &StorageLocation) -> Result<()> {
        debug!(location = %location, "Deleting S3 object");
        self.ops.delete(location)
    }

    /// Write a link object at `link` pointing to `target`
    pub fn symlink(&self, target: &StorageLocation, link: &StorageLocation) -> Result<()> {
        if target.backend() != Backend::S3 || !target.same_cluster(link) {
            return Err(Error::UnsupportedOperation(format!(
                "cannot link {} to {}: links only work inside one S3 cluster",
                link.qualified(),
                target.qualified()
            )));
        }

        let content = format!("{}{}/{}", SYMLINK_SIGNATURE, target.container(), target.key());
        debug!(link = %link, target = %target, "Writing S3 symbolic link");
        self.ops.put(link, Bytes::from(content))
    }

    /// Follow links from `location` to the object holding its bytes
    ///
    /// `None` when the location, or the end of its link chain, does not exist.
    /// Chains longer than [`MAX_SYMLINK_DEPTH`] are a storage error.
    pub fn resolve(&self, location: &StorageLocation) -> Result<Option<ResolvedObject>> {
        let mut ops = self.ops.clone();
        let mut current = location.clone();
        let mut followed = 0;

        loop {
            let Some(meta) = ops.head(&current)? else {
                return Ok(None);
            };
            let size = meta.size as u64;
            if size > SYMLINK_MAX_SIZE {
                return Ok(Some(ResolvedObject {
                    ops,
                    location: current,
                    size,
                    data: None,
                }));
            }

            let data = match ops.get(&current) {
                Ok(data) => data,
                Err(Error::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e),
            };
            let Some((bucket, key)) = symlink_target(&data) else {
                return Ok(Some(ResolvedObject {
                    ops,
                    location: current,
                    size: data.len() as u64,
                    data: Some(data),
                }));
            };

            if followed == MAX_SYMLINK_DEPTH {
                return Err(Error::storage(
                    Backend::S3,
                    format!("too many levels of symbolic links at {}", location),
                ));
            }
            followed += 1;

            let target = current.with_key(&bucket, &key);
            trace!(link = %current, target = %target, "Following symbolic link");
            if target.container() != current.container() {
                ops = self.backends.s3(&target)?.ops;
            }
            current = target;
        }
    }

    fn resolve_existing(&self, location: &StorageLocation) -> Result<ResolvedObject> {
        self.resolve(location)?
            .ok_or_else(|| Error::NotFound(location.to_string()))
    }
}

/// Read-only HTTP(S) resources
#[derive(Debug, Clone)]
pub struct HttpBackend {
    ops: ObjectOps,
}

impl HttpBackend {
    pub(crate) fn new(ops: ObjectOps) -> Self {
        Self { ops }
    }

    pub fn ops(&self) -> &ObjectOps {
        &self.ops
    }

    pub fn read(&self, location: &StorageLocation, range: Option<ByteRange>) -> Result<Bytes> {
        debug!(location = %location, ?range, "Reading HTTP resource");
        match range {
            None => self.ops.get(location),
            Some(range) => {
                let size = self
                    .size(location)?
                    .ok_or_else(|| Error::NotFound(location.to_string()))?;
                self.ops.get_range(location, range, size)
            }
        }
    }

    pub fn size(&self, location: &StorageLocation) -> Result<Option<u64>> {
        Ok(self.ops.head(location)?.map(|meta| meta.size as u64))
    }

    pub fn exists(&self, location: &StorageLocation) -> Result<bool> {
        Ok(self.ops.head(location)?.is_some())
    }
}
