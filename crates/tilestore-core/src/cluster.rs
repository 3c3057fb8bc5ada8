//! S3 cluster registry
//!
//! Several S3-compatible clusters can be configured at once. A bucket is
//! addressed on a given cluster with `bucket@host`; without a suffix the first
//! configured cluster is used.

use crate::{Error, Result};
use std::fmt;

/// Connection settings of one S3 cluster
#[derive(Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Endpoint host, without scheme (`s3.storage.fr`, `minio:9000`)
    pub host: String,
    /// Endpoint URL as configured (`https://s3.storage.fr`)
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    /// Verify the endpoint's TLS certificate
    pub verify_tls: bool,
}

impl ClusterConfig {
    /// Describe a cluster from its endpoint URL and credentials
    ///
    /// An endpoint given without scheme is taken as `https://`.
    pub fn new(
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        let endpoint = endpoint.into().trim().trim_end_matches('/').to_string();
        let (endpoint, host) = match strip_scheme(&endpoint) {
            Some(host) => (endpoint.clone(), host.to_string()),
            None => (format!("https://{}", endpoint), endpoint.clone()),
        };

        Self {
            host,
            endpoint,
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            verify_tls: true,
        }
    }

    pub fn with_verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    /// Plain HTTP endpoint (no TLS at all)
    pub fn is_plain_http(&self) -> bool {
        self.endpoint.starts_with("http://")
    }
}

fn strip_scheme(endpoint: &str) -> Option<&str> {
    endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"))
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("host", &self.host)
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("verify_tls", &self.verify_tls)
            .finish()
    }
}

/// Ordered set of known clusters, immutable once built
#[derive(Debug, Clone, Default)]
pub struct ClusterRegistry {
    clusters: Vec<ClusterConfig>,
}

impl ClusterRegistry {
    /// Register clusters; the first one becomes the default
    ///
    /// # Errors
    /// Returns a configuration error when the same host appears twice.
    pub fn new(configs: Vec<ClusterConfig>) -> Result<Self> {
        let mut clusters: Vec<ClusterConfig> = Vec::with_capacity(configs.len());
        for config in configs {
            if clusters.iter().any(|c| c.host == config.host) {
                return Err(Error::Config(format!(
                    "S3 cluster '{}' is defined twice",
                    config.host
                )));
            }
            clusters.push(config);
        }
        Ok(Self { clusters })
    }

    /// Registry without any S3 cluster
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a cluster by host, or the default one
    ///
    /// # Errors
    /// `UnknownCluster` when `explicit_host` is not configured, `Config` when
    /// no cluster is configured at all.
    pub fn resolve(&self, explicit_host: Option<&str>) -> Result<&ClusterConfig> {
        match explicit_host {
            Some(host) => self
                .clusters
                .iter()
                .find(|c| c.host == host)
                .ok_or_else(|| Error::UnknownCluster(host.to_string())),
            None => self
                .clusters
                .first()
                .ok_or_else(|| Error::Config("no S3 cluster is configured".to_string())),
        }
    }

    pub fn default_host(&self) -> Option<&str> {
        self.clusters.first().map(|c| c.host.as_str())
    }

    pub fn clusters(&self) -> &[ClusterConfig] {
        &self.clusters
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}
