//! Storage facade
//!
//! One [`Storage`] owns the cluster registry, the client pool and the read
//! cache. Every operation takes an address string, parses it once and
//! dispatches to the backend serving it.

use crate::backend::Backends;
use crate::cache::{CacheKey, Clock, ReadCache, SystemClock};
use crate::cluster::ClusterRegistry;
use crate::config::{CopyConfig, StorageConfig};
use crate::copy::CopyOrchestrator;
use crate::location::{Backend, ByteRange, LocationParser, StorageLocation};
use crate::pool::{ClientPool, Connector, NativeConnector};
use crate::reader::RangeReader;
use crate::writer::LocationWriter;
use crate::{Error, Result};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Path under which an external raster or vector codec can open a location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecPath {
    /// Path to hand to the codec (`/vsis3/...`, `/vsicurl/...` or a local path)
    pub path: String,
    /// Configuration options the codec needs to reach the storage
    pub options: BTreeMap<String, String>,
}

/// Builder for [`Storage`]
#[derive(Debug)]
pub struct StorageBuilder {
    config: StorageConfig,
    connector: Option<Arc<dyn Connector>>,
    clock: Option<Arc<dyn Clock>>,
}

impl StorageBuilder {
    /// Use `connector` to create native clients
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Use `clock` for cache expiry
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Storage> {
        let registry = Arc::new(self.config.registry()?);
        let connector = self.connector.unwrap_or_else(|| {
            Arc::new(NativeConnector::new(self.config.ceph.clone())) as Arc<dyn Connector>
        });
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        if let Some(ceph) = &self.config.ceph {
            debug!(cluster = %ceph.cluster_name, "CEPH cluster configured");
        }
        debug!(
            clusters = registry.clusters().len(),
            cache_size = self.config.cache.size,
            cache_ttl = self.config.cache.ttl,
            "Storage ready"
        );

        Ok(Storage {
            parser: LocationParser::new(registry.clone()),
            cache: ReadCache::new(&self.config.cache, clock),
            backends: Backends::new(ClientPool::new(connector, registry)),
            copy: self.config.copy,
        })
    }
}

/// Uniform blocking access to files, S3 objects, RADOS objects and HTTP resources
///
/// All methods block the calling thread. Calling them from inside an async
/// runtime is not supported: use `spawn_blocking`.
#[derive(Debug)]
pub struct Storage {
    parser: LocationParser,
    cache: ReadCache,
    backends: Backends,
    copy: CopyConfig,
}

impl Storage {
    /// Storage using real network clients
    pub fn new(config: StorageConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: StorageConfig) -> StorageBuilder {
        StorageBuilder {
            config,
            connector: None,
            clock: None,
        }
    }

    /// Parse an address against the configured clusters
    pub fn parse(&self, address: &str) -> Result<StorageLocation> {
        self.parser.parse(address)
    }

    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        self.parser.registry()
    }

    pub fn cache(&self) -> &ReadCache {
        &self.cache
    }

    /// Content of `address`, or the bytes in `range`
    ///
    /// Full reads are served from the read cache when possible. Range reads
    /// are only cached when `cache_ranges` is enabled. Reads that went through
    /// an S3 symbolic link are never cached: writing the target would not
    /// invalidate them.
    pub fn get_binary(&self, address: &str, range: Option<ByteRange>) -> Result<Bytes> {
        let location = self.parse(address)?;

        let key = match range {
            None => Some(CacheKey::full(&location)),
            Some(range) if self.cache.caches_ranges() => Some(CacheKey::range(&location, range)),
            Some(_) => None,
        };

        if let Some(key) = &key {
            if let Some(data) = self.cache.get(key) {
                debug!(location = %location, "Read served from cache");
                return Ok(data);
            }
        }

        let generation = self.cache.generation();
        let (data, followed_link) = self
            .backends
            .resolve(&location)?
            .read_following(&location, range)?;
        if let Some(key) = key.filter(|_| !followed_link) {
            self.cache.put_if_unchanged(key, data.clone(), generation);
        }
        Ok(data)
    }

    /// Full content of `address` as UTF-8 text
    pub fn get_string(&self, address: &str) -> Result<String> {
        let data = self.get_binary(address, None)?;
        String::from_utf8(data.to_vec()).map_err(|e| {
            Error::storage_with_source(
                backend_of(&self.parser, address),
                format!("{} is not valid UTF-8", address),
                e,
            )
        })
    }

    /// Replace the content of `address`
    pub fn put_binary(&self, address: &str, data: impl Into<Bytes>) -> Result<()> {
        let location = self.parse(address)?;
        let result = self
            .backends
            .resolve(&location)
            .and_then(|ops| ops.write(&location, data.into()));
        self.cache.invalidate(&location);
        result
    }

    pub fn put_string(&self, address: &str, data: &str) -> Result<()> {
        self.put_binary(address, Bytes::copy_from_slice(data.as_bytes()))
    }

    /// Whether `address` exists; absence is never an error
    pub fn exists(&self, address: &str) -> Result<bool> {
        let location = self.parse(address)?;
        self.backends.resolve(&location)?.exists(&location)
    }

    /// Size in bytes of `address`, `None` when it does not exist
    pub fn size(&self, address: &str) -> Result<Option<u64>> {
        let location = self.parse(address)?;
        self.backends.resolve(&location)?.size(&location)
    }

    /// Remove `address`; removing something absent succeeds
    pub fn delete(&self, address: &str) -> Result<()> {
        let location = self.parse(address)?;
        let result = self
            .backends
            .resolve(&location)
            .and_then(|ops| ops.delete(&location));
        self.cache.invalidate(&location);
        result
    }

    pub fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.copy_inner(from, to, None)
    }

    /// Copy and check the MD5 (hex) of the copied bytes
    pub fn copy_checked(&self, from: &str, to: &str, expected_md5: &str) -> Result<()> {
        self.copy_inner(from, to, Some(expected_md5))
    }

    fn copy_inner(&self, from: &str, to: &str, expected_md5: Option<&str>) -> Result<()> {
        let source = self.parse(from)?;
        let destination = self.parse(to)?;

        let result =
            CopyOrchestrator::new(&self.backends, &self.copy).copy(&source, &destination, expected_md5);
        self.cache.invalidate(&destination);
        result
    }

    /// Create `link` as a symbolic link to `target`
    ///
    /// Only S3 locations on the same cluster can be linked.
    pub fn symlink(&self, target: &str, link: &str) -> Result<()> {
        let target = self.parse(target)?;
        let link = self.parse(link)?;

        if target.backend() != Backend::S3 || link.backend() != Backend::S3 {
            return Err(Error::UnsupportedOperation(format!(
                "cannot link {} to {}: only S3 objects can be linked",
                link, target
            )));
        }

        let result = self
            .backends
            .resolve(&link)
            .and_then(|ops| ops.symlink(&target, &link));
        self.cache.invalidate(&link);
        result
    }

    /// Total size of everything below a directory or key prefix
    pub fn prefix_size(&self, address: &str) -> Result<u64> {
        let location = self.parse(address)?;
        self.backends.resolve(&location)?.prefix_size(&location)
    }

    /// Path and options for an external codec to open `address` directly
    pub fn codec_path(&self, address: &str) -> Result<CodecPath> {
        let location = self.parse(address)?;

        match location.backend() {
            Backend::File => Ok(CodecPath {
                path: location.file_path().to_string_lossy().into_owned(),
                options: BTreeMap::new(),
            }),
            Backend::S3 => {
                let cluster = self.registry().resolve(location.cluster_host())?;
                let mut options = BTreeMap::new();
                options.insert("AWS_ACCESS_KEY_ID".to_string(), cluster.access_key.clone());
                options.insert("AWS_SECRET_ACCESS_KEY".to_string(), cluster.secret_key.clone());
                options.insert("AWS_S3_ENDPOINT".to_string(), cluster.host.clone());
                options.insert("AWS_VIRTUAL_HOSTING".to_string(), "FALSE".to_string());
                if cluster.is_plain_http() {
                    options.insert("AWS_HTTPS".to_string(), "NO".to_string());
                }
                if !cluster.verify_tls {
                    options.insert("GDAL_HTTP_UNSAFESSL".to_string(), "YES".to_string());
                }
                Ok(CodecPath {
                    path: format!("/vsis3/{}/{}", location.container(), location.key()),
                    options,
                })
            }
            Backend::Http => Ok(CodecPath {
                path: format!("/vsicurl/{}", location),
                options: BTreeMap::new(),
            }),
            Backend::Ceph => Err(Error::UnsupportedOperation(format!(
                "no codec path for CEPH object {}",
                location
            ))),
        }
    }

    /// Seekable reader over `address`; reads bypass the cache
    pub fn open_read(&self, address: &str) -> Result<RangeReader<'_>> {
        let location = self.parse(address)?;
        let ops = self.backends.resolve(&location)?;
        RangeReader::new(ops, location, self.copy.chunk_size)
    }

    /// Streaming writer replacing the content of `address`
    ///
    /// Cached reads of the location are dropped when the writer is opened and
    /// again when it is finished.
    pub fn open_write(&self, address: &str) -> Result<LocationWriter<'_>> {
        let location = self.parse(address)?;
        self.cache.invalidate(&location);
        let ops = self.backends.resolve(&location)?;
        Ok(LocationWriter::new(ops, location, self.copy.part_size as usize)?.with_cache(&self.cache))
    }
}

fn backend_of(parser: &LocationParser, address: &str) -> Backend {
    parser
        .parse(address)
        .map(|location| location.backend())
        .unwrap_or(Backend::File)
}
