//! Tilestore - unified storage access for tile pyramids
//!
//! This library reads and writes files, S3 objects (on one or several
//! clusters), RADOS objects and read-only HTTP resources through one blocking
//! API addressed by strings:
//!
//! - `file:///absolute/path` (or a bare path)
//! - `s3://bucket[@cluster-host]/key`
//! - `ceph://pool/key`
//! - `http(s)://host/path`
//!
//! ```no_run
//! use tilestore_core::{Storage, StorageConfig};
//!
//! let storage = Storage::new(StorageConfig::from_env()?)?;
//! storage.put_string("s3://tiles/pyramid.json", "{}")?;
//! let descriptor = storage.get_string("s3://tiles/pyramid.json")?;
//! # Ok::<(), tilestore_core::Error>(())
//! ```
//!
//! All operations block the calling thread; async callers should go through
//! `tokio::task::spawn_blocking`.

pub mod backend;
mod buffer;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod copy;
pub mod error;
pub mod location;
pub mod pool;
pub mod reader;
mod runtime;
pub mod storage;
pub mod writer;

pub use error::{Error, Result};

// Re-export commonly used types
pub use backend::{MemoryRados, RadosError, RadosPool};
pub use cache::{Clock, SystemClock};
pub use cluster::{ClusterConfig, ClusterRegistry};
pub use config::{parse_size, CacheConfig, CephConfig, CopyConfig, S3ClusterSettings, StorageConfig};
pub use location::{Backend, ByteRange, LocationParser, StorageLocation};
pub use pool::{ClientKey, Connector, NativeConnector};
pub use reader::RangeReader;
pub use storage::{CodecPath, Storage, StorageBuilder};
pub use writer::LocationWriter;
