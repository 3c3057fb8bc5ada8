//! In-process connector
//!
//! S3 buckets are `object_store` in-memory stores, one per cluster and bucket,
//! and CEPH pools are [`MemoryRados`] instances. HTTP goes through the real
//! connector so that it can reach a [`crate::TestHttpServer`].

use object_store::memory::InMemory;
use object_store::DynObjectStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tilestore_core::pool::ClientKey;
use tilestore_core::{
    Backend, ClusterConfig, Connector, Error, MemoryRados, NativeConnector, RadosPool, Result,
};

/// Credentials a client was built with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRequest {
    pub host: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

#[derive(Debug)]
pub struct MemoryConnector {
    buckets: Mutex<HashMap<(String, String), Arc<InMemory>>>,
    pools: Mutex<HashMap<String, Arc<MemoryRados>>>,
    requests: Mutex<Vec<ClusterRequest>>,
    http: NativeConnector,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            pools: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            http: NativeConnector::new(None),
        }
    }

    /// In-memory store backing `bucket` on cluster `host`
    pub fn bucket(&self, host: &str, bucket: &str) -> Arc<InMemory> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets
            .entry((host.to_string(), bucket.to_string()))
            .or_insert_with(|| Arc::new(InMemory::new()))
            .clone()
    }

    /// In-memory RADOS pool named `name`
    pub fn pool(&self, name: &str) -> Arc<MemoryRados> {
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        pools
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryRados::new()))
            .clone()
    }

    /// Every S3 client built so far, in order
    pub fn requests(&self) -> Vec<ClusterRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for MemoryConnector {
    fn object_store(&self, key: &ClientKey, cluster: Option<&ClusterConfig>) -> Result<Arc<DynObjectStore>> {
        match (key.backend, cluster) {
            (Backend::S3, Some(cluster)) => {
                self.requests
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(ClusterRequest {
                        host: cluster.host.clone(),
                        access_key: cluster.access_key.clone(),
                        secret_key: cluster.secret_key.clone(),
                        bucket: key.container.clone(),
                    });
                let store: Arc<DynObjectStore> = self.bucket(&cluster.host, &key.container);
                Ok(store)
            }
            (Backend::Http, _) => self.http.object_store(key, None),
            (backend, _) => Err(Error::UnsupportedOperation(format!(
                "no in-memory store for {} {}",
                backend, key.container
            ))),
        }
    }

    fn rados_pool(&self, pool: &str) -> Result<Arc<dyn RadosPool>> {
        let pool: Arc<dyn RadosPool> = self.pool(pool);
        Ok(pool)
    }
}
