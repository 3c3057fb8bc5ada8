//! Native client pool
//!
//! Clients are built on first use and then shared for the lifetime of the
//! pool. An `object_store` client is bound to one bucket (or one HTTP
//! origin), so S3 clients are keyed by cluster and bucket, the same way a
//! RADOS I/O context is bound to one pool.

use crate::backend::ceph::RadosPool;
use crate::cluster::{ClusterConfig, ClusterRegistry};
use crate::config::CephConfig;
use crate::location::{Backend, StorageLocation};
use crate::{Error, Result};
use object_store::aws::AmazonS3Builder;
use object_store::http::HttpBuilder;
use object_store::{ClientOptions, DynObjectStore};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Identity of a pooled client
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub backend: Backend,
    /// Cluster host for S3
    pub cluster: Option<String>,
    /// Bucket, pool or HTTP origin
    pub container: String,
}

impl ClientKey {
    /// Key of the client serving `location`, `None` for local files
    pub fn for_location(location: &StorageLocation) -> Option<Self> {
        match location.backend() {
            Backend::File => None,
            backend => Some(Self {
                backend,
                cluster: location.cluster_host().map(str::to_string),
                container: location.container().to_string(),
            }),
        }
    }
}

/// A live native client
#[derive(Debug, Clone)]
pub enum PooledClient {
    /// S3 bucket or HTTP origin
    Object(Arc<DynObjectStore>),
    /// RADOS pool
    Rados(Arc<dyn RadosPool>),
}

/// Builds native clients
pub trait Connector: Send + Sync + fmt::Debug {
    /// Client for an S3 bucket (`cluster` is set) or an HTTP origin
    fn object_store(&self, key: &ClientKey, cluster: Option<&ClusterConfig>) -> Result<Arc<DynObjectStore>>;

    /// I/O context of a RADOS pool
    fn rados_pool(&self, pool: &str) -> Result<Arc<dyn RadosPool>>;
}

/// Connector opening real network sessions
pub struct NativeConnector {
    ceph: Option<CephConfig>,
    #[cfg(feature = "ceph")]
    cluster: std::sync::Mutex<Option<Arc<ceph::ceph::Rados>>>,
}

impl NativeConnector {
    pub fn new(ceph: Option<CephConfig>) -> Self {
        Self {
            ceph,
            #[cfg(feature = "ceph")]
            cluster: std::sync::Mutex::new(None),
        }
    }

    fn s3_store(&self, key: &ClientKey, cluster: &ClusterConfig) -> Result<Arc<DynObjectStore>> {
        let options = ClientOptions::new()
            .with_allow_http(cluster.is_plain_http())
            .with_allow_invalid_certificates(!cluster.verify_tls);

        let store = AmazonS3Builder::new()
            .with_endpoint(&cluster.endpoint)
            .with_bucket_name(&key.container)
            .with_access_key_id(&cluster.access_key)
            .with_secret_access_key(&cluster.secret_key)
            .with_region("us-east-1")
            .with_virtual_hosted_style_request(false)
            .with_client_options(options)
            .build()
            .map_err(|e| {
                Error::storage_with_source(
                    Backend::S3,
                    format!("cannot build client for bucket {}", key.container),
                    e,
                )
            })?;
        Ok(Arc::new(store))
    }

    fn http_store(&self, key: &ClientKey) -> Result<Arc<DynObjectStore>> {
        let store = HttpBuilder::new()
            .with_url(&key.container)
            .with_client_options(ClientOptions::new().with_allow_http(true))
            .build()
            .map_err(|e| {
                Error::storage_with_source(
                    Backend::Http,
                    format!("cannot build client for {}", key.container),
                    e,
                )
            })?;
        Ok(Arc::new(store))
    }
}

impl fmt::Debug for NativeConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeConnector").field("ceph", &self.ceph).finish()
    }
}

impl Connector for NativeConnector {
    fn object_store(&self, key: &ClientKey, cluster: Option<&ClusterConfig>) -> Result<Arc<DynObjectStore>> {
        match (key.backend, cluster) {
            (Backend::S3, Some(cluster)) => self.s3_store(key, cluster),
            (Backend::Http, _) => self.http_store(key),
            (backend, _) => Err(Error::UnsupportedOperation(format!(
                "no object store client for {} {}",
                backend, key.container
            ))),
        }
    }

    #[cfg(feature = "ceph")]
    fn rados_pool(&self, pool: &str) -> Result<Arc<dyn RadosPool>> {
        use crate::backend::ceph::native;

        let config = self
            .ceph
            .as_ref()
            .ok_or_else(|| Error::Config("no CEPH cluster is configured".to_string()))?;

        let cluster = {
            let mut guard = self.cluster.lock().unwrap_or_else(|e| e.into_inner());
            match guard.as_ref() {
                Some(cluster) => cluster.clone(),
                None => {
                    let cluster = native::connect(config)?;
                    *guard = Some(cluster.clone());
                    cluster
                }
            }
        };

        Ok(Arc::new(native::LibradosPool::open(cluster, pool)?))
    }

    #[cfg(not(feature = "ceph"))]
    fn rados_pool(&self, pool: &str) -> Result<Arc<dyn RadosPool>> {
        if self.ceph.is_none() {
            return Err(Error::Config("no CEPH cluster is configured".to_string()));
        }
        Err(Error::UnsupportedOperation(format!(
            "CEPH pool {} requires the `ceph` feature",
            pool
        )))
    }
}

/// Lazily populated map of live clients
pub struct ClientPool {
    connector: Arc<dyn Connector>,
    registry: Arc<ClusterRegistry>,
    clients: RwLock<HashMap<ClientKey, PooledClient>>,
}

impl ClientPool {
    pub fn new(connector: Arc<dyn Connector>, registry: Arc<ClusterRegistry>) -> Self {
        Self {
            connector,
            registry,
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        &self.registry
    }

    /// Client for `key`, built on first request
    ///
    /// Concurrent first requests for the same key build a single client.
    pub fn acquire(&self, key: &ClientKey) -> Result<PooledClient> {
        {
            let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
            if let Some(client) = clients.get(key) {
                return Ok(client.clone());
            }
        }

        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(key) {
            return Ok(client.clone());
        }

        let client = self.connect(key)?;
        clients.insert(key.clone(), client.clone());
        Ok(client)
    }

    /// Object store client for `key`
    pub fn object_store(&self, key: &ClientKey) -> Result<Arc<DynObjectStore>> {
        match self.acquire(key)? {
            PooledClient::Object(store) => Ok(store),
            PooledClient::Rados(_) => Err(Error::UnsupportedOperation(format!(
                "{} is not served by an object store",
                key.container
            ))),
        }
    }

    /// RADOS pool for `key`
    pub fn rados_pool(&self, key: &ClientKey) -> Result<Arc<dyn RadosPool>> {
        match self.acquire(key)? {
            PooledClient::Rados(pool) => Ok(pool),
            PooledClient::Object(_) => Err(Error::UnsupportedOperation(format!(
                "{} is not a RADOS pool",
                key.container
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.clients.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn connect(&self, key: &ClientKey) -> Result<PooledClient> {
        match key.backend {
            Backend::S3 => {
                let cluster = self.registry.resolve(key.cluster.as_deref())?;
                info!(cluster = %cluster.host, bucket = %key.container, "Creating S3 client");
                let store = self.connector.object_store(key, Some(cluster))?;
                Ok(PooledClient::Object(store))
            }
            Backend::Http => {
                info!(origin = %key.container, "Creating HTTP client");
                let store = self.connector.object_store(key, None)?;
                Ok(PooledClient::Object(store))
            }
            Backend::Ceph => {
                info!(pool = %key.container, "Opening CEPH pool");
                let pool = self.connector.rados_pool(&key.container)?;
                Ok(PooledClient::Rados(pool))
            }
            Backend::File => Err(Error::UnsupportedOperation(
                "local files need no client".to_string(),
            )),
        }
    }
}

impl fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientPool")
            .field("connector", &self.connector)
            .field("clients", &self.len())
            .finish()
    }
}
