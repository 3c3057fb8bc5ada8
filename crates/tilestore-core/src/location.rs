//! Address parsing
//!
//! Every storage operation starts by turning an opaque address string into a
//! [`StorageLocation`]. Four schemes are recognized:
//!
//! - `file:///absolute/path` (an address without scheme is a file path too)
//! - `s3://bucket[@cluster-host]/key`
//! - `ceph://pool/key`
//! - `http://host/path` and `https://host/path`
//!
//! Parsing performs no I/O. The only external input is the cluster registry,
//! used to fold the `@cluster-host` suffix (or the default cluster) into the
//! location.

use crate::cluster::ClusterRegistry;
use crate::{Error, Result};
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Separator between a bucket name and its cluster host
pub const CLUSTER_SEPARATOR: char = '@';

/// Storage media addressed by a location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Local (or mounted) filesystem
    File,
    /// One of the configured S3-compatible clusters
    S3,
    /// A RADOS pool of the configured CEPH cluster
    Ceph,
    /// Read-only HTTP(S) resource
    Http,
}

impl Backend {
    /// Address prefix of this backend
    pub fn scheme(&self) -> &'static str {
        match self {
            Backend::File => "file://",
            Backend::S3 => "s3://",
            Backend::Ceph => "ceph://",
            Backend::Http => "http://",
        }
    }

    /// Whether data can be written to this backend
    pub fn is_writable(&self) -> bool {
        !matches!(self, Backend::Http)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::File => "FILE",
            Backend::S3 => "S3",
            Backend::Ceph => "CEPH",
            Backend::Http => "HTTP",
        };
        f.write_str(name)
    }
}

/// Byte window `[offset, offset + length)` of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Exclusive end offset
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The window clamped to an object of `size` bytes
    pub fn clamp(&self, size: u64) -> Range<u64> {
        let start = self.offset.min(size);
        start..self.end().min(size)
    }

    pub(crate) fn as_usize(&self) -> Range<usize> {
        self.offset as usize..self.end() as usize
    }
}

/// Parsed, backend-tagged identifier of a single file or object
///
/// For S3 locations `container` is the bare bucket name: the cluster suffix is
/// always folded into `cluster_host`. For FILE locations `container` is the
/// parent directory and `key` the file name. For HTTP locations `container` is
/// the origin (`scheme://host[:port]`) and `key` the path without its leading
/// slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageLocation {
    backend: Backend,
    cluster_host: Option<String>,
    container: String,
    key: String,
}

impl StorageLocation {
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Resolved cluster host, S3 only
    pub fn cluster_host(&self) -> Option<&str> {
        self.cluster_host.as_deref()
    }

    /// Bucket, pool, parent directory or HTTP origin
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Object name, file name or HTTP path
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Local path of a FILE location
    pub fn file_path(&self) -> PathBuf {
        if self.container.is_empty() {
            PathBuf::from(&self.key)
        } else {
            Path::new(&self.container).join(&self.key)
        }
    }

    /// Full address including the `@cluster-host` suffix for S3
    pub fn qualified(&self) -> String {
        match (&self.backend, &self.cluster_host) {
            (Backend::S3, Some(host)) => {
                format!("s3://{}{}{}/{}", self.container, CLUSTER_SEPARATOR, host, self.key)
            }
            _ => self.to_string(),
        }
    }

    /// Location of `name` below this one
    ///
    /// `name` must be a single path segment: pyramid and tile names never
    /// embed a separator.
    pub fn child(&self, name: &str) -> Result<StorageLocation> {
        validate_segment(name)?;

        let mut child = self.clone();
        match self.backend {
            Backend::File => {
                child.container = self.file_path().to_string_lossy().into_owned();
                child.key = name.to_string();
            }
            _ => {
                child.key = if self.key.is_empty() {
                    name.to_string()
                } else {
                    format!("{}/{}", self.key.trim_end_matches('/'), name)
                };
            }
        }
        Ok(child)
    }

    /// Same cluster (S3) or same backend for the others
    pub fn same_cluster(&self, other: &StorageLocation) -> bool {
        self.backend == other.backend && self.cluster_host == other.cluster_host
    }

    pub(crate) fn with_key(&self, container: &str, key: &str) -> StorageLocation {
        StorageLocation {
            backend: self.backend,
            cluster_host: self.cluster_host.clone(),
            container: container.to_string(),
            key: key.to_string(),
        }
    }

    fn new(backend: Backend, cluster_host: Option<String>, container: &str, key: &str) -> Self {
        Self {
            backend,
            cluster_host,
            container: container.to_string(),
            key: key.to_string(),
        }
    }
}

/// Portable form: S3 locations are written without their cluster suffix
impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.backend {
            Backend::File => write!(f, "file://{}", self.file_path().display()),
            Backend::S3 => write!(f, "s3://{}/{}", self.container, self.key),
            Backend::Ceph => write!(f, "ceph://{}/{}", self.container, self.key),
            Backend::Http => write!(f, "{}/{}", self.container, self.key),
        }
    }
}

fn validate_segment(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(Error::InvalidAddress(format!(
            "'{}' is not a single-segment name",
            name
        )));
    }
    Ok(())
}

/// Turns address strings into locations
#[derive(Debug, Clone)]
pub struct LocationParser {
    registry: Arc<ClusterRegistry>,
}

impl LocationParser {
    pub fn new(registry: Arc<ClusterRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        &self.registry
    }

    /// Parse an address
    ///
    /// # Errors
    /// `InvalidAddress` for malformed addresses, `UnknownCluster` when an
    /// explicit S3 cluster host is not configured.
    pub fn parse(&self, address: &str) -> Result<StorageLocation> {
        let address = address.trim();

        if let Some(rest) = address.strip_prefix("s3://") {
            self.parse_s3(address, rest)
        } else if let Some(rest) = address.strip_prefix("ceph://") {
            parse_ceph(address, rest)
        } else if let Some(rest) = address.strip_prefix("file://") {
            parse_file(address, rest)
        } else if address.starts_with("http://") || address.starts_with("https://") {
            parse_http(address)
        } else if address.contains("://") {
            Err(Error::InvalidAddress(format!("unknown scheme in '{}'", address)))
        } else {
            parse_file(address, address)
        }
    }

    fn parse_s3(&self, address: &str, rest: &str) -> Result<StorageLocation> {
        let (tray, key) = split_container(address, rest)?;

        let (bucket, host) = match tray.split_once(CLUSTER_SEPARATOR) {
            Some((bucket, host)) => (bucket, Some(host)),
            None => (tray, None),
        };
        if bucket.is_empty() {
            return Err(Error::InvalidAddress(format!("empty bucket name in '{}'", address)));
        }
        if host.is_some_and(|h| h.is_empty() || h.contains(CLUSTER_SEPARATOR)) {
            return Err(Error::InvalidAddress(format!("bad cluster host in '{}'", address)));
        }

        let cluster = self.registry.resolve(host)?;
        Ok(StorageLocation::new(
            Backend::S3,
            Some(cluster.host.clone()),
            bucket,
            key,
        ))
    }
}

fn split_container<'a>(address: &str, rest: &'a str) -> Result<(&'a str, &'a str)> {
    let (container, key) = rest
        .split_once('/')
        .ok_or_else(|| Error::InvalidAddress(format!("missing object name in '{}'", address)))?;
    if container.is_empty() || key.is_empty() {
        return Err(Error::InvalidAddress(format!(
            "expected <container>/<object> in '{}'",
            address
        )));
    }
    Ok((container, key))
}

fn parse_ceph(address: &str, rest: &str) -> Result<StorageLocation> {
    let (pool, key) = split_container(address, rest)?;
    if pool.contains(CLUSTER_SEPARATOR) {
        return Err(Error::InvalidAddress(format!(
            "CEPH pools cannot name a cluster: '{}'",
            address
        )));
    }
    Ok(StorageLocation::new(Backend::Ceph, None, pool, key))
}

fn parse_file(address: &str, path: &str) -> Result<StorageLocation> {
    if path.is_empty() {
        return Err(Error::InvalidAddress(format!("empty path in '{}'", address)));
    }
    if path.contains(CLUSTER_SEPARATOR) {
        return Err(Error::InvalidAddress(format!(
            "file paths cannot contain '{}': '{}'",
            CLUSTER_SEPARATOR, address
        )));
    }

    let trimmed = if path.len() > 1 { path.trim_end_matches('/') } else { path };
    let path = Path::new(trimmed);
    let name = path
        .file_name()
        .ok_or_else(|| Error::InvalidAddress(format!("no file name in '{}'", address)))?;
    let parent = path.parent().map(|p| p.to_string_lossy()).unwrap_or_default();

    Ok(StorageLocation::new(
        Backend::File,
        None,
        &parent,
        &name.to_string_lossy(),
    ))
}

fn parse_http(address: &str) -> Result<StorageLocation> {
    let url = Url::parse(address)
        .map_err(|e| Error::InvalidAddress(format!("'{}': {}", address, e)))?;

    if url.host_str().is_none() {
        return Err(Error::InvalidAddress(format!("missing host in '{}'", address)));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(Error::InvalidAddress(format!(
            "query strings and fragments are not supported: '{}'",
            address
        )));
    }

    let key = url.path().trim_start_matches('/');
    if key.is_empty() {
        return Err(Error::InvalidAddress(format!("missing resource path in '{}'", address)));
    }

    Ok(StorageLocation::new(
        Backend::Http,
        None,
        &url.origin().ascii_serialization(),
        key,
    ))
}
