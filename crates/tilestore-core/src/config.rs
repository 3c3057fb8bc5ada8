//! Configuration module
//!
//! The storage layer only consumes resolved values. They come either from a
//! TOML file:
//!
//! ```toml
//! [cache]
//! size = 64      # entries, 0 or negative for no bound
//! ttl = 300      # seconds, 0 or negative for no expiry
//!
//! [[s3]]
//! url = "https://s3.storage.fr"
//! key = "KEY1"
//! secret_key = "SKEY1"
//!
//! [ceph]
//! conf_file = "/etc/ceph/ceph.conf"
//! username = "client.admin"
//! cluster_name = "ceph"
//!
//! [copy]
//! stream_threshold = "64MiB"
//! ```
//!
//! or from `TILESTORE_*` environment variables (see [`StorageConfig::from_env`]).

use crate::cluster::{ClusterConfig, ClusterRegistry};
use crate::{Error, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const ENV_CACHE_SIZE: &str = "TILESTORE_READING_LRU_CACHE_SIZE";
pub const ENV_CACHE_TTL: &str = "TILESTORE_READING_LRU_CACHE_TTL";
pub const ENV_S3_URL: &str = "TILESTORE_S3_URL";
pub const ENV_S3_KEY: &str = "TILESTORE_S3_KEY";
pub const ENV_S3_SECRET_KEY: &str = "TILESTORE_S3_SECRETKEY";
pub const ENV_SSL_NO_VERIFY: &str = "TILESTORE_SSL_NO_VERIFY";
pub const ENV_CEPH_CONF_FILE: &str = "TILESTORE_CEPH_CONFFILE";
pub const ENV_CEPH_USERNAME: &str = "TILESTORE_CEPH_USERNAME";
pub const ENV_CEPH_CLUSTER_NAME: &str = "TILESTORE_CEPH_CLUSTERNAME";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Read cache settings
    #[serde(default)]
    pub cache: CacheConfig,
    /// S3 clusters, the first one is the default
    #[serde(default)]
    pub s3: Vec<S3ClusterSettings>,
    /// CEPH cluster, if any
    #[serde(default)]
    pub ceph: Option<CephConfig>,
    /// Copy tuning
    #[serde(default)]
    pub copy: CopyConfig,
}

/// Read cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached reads (<= 0 means unbounded)
    #[serde(default = "default_cache_size")]
    pub size: i64,
    /// Validity of a cached read in seconds (<= 0 means no expiry)
    #[serde(default = "default_cache_ttl")]
    pub ttl: i64,
    /// Also cache explicit range reads
    #[serde(default)]
    pub cache_ranges: bool,
}

fn default_cache_size() -> i64 {
    64
}

fn default_cache_ttl() -> i64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: default_cache_size(),
            ttl: default_cache_ttl(),
            cache_ranges: false,
        }
    }
}

impl CacheConfig {
    /// Smallest cache: one entry, kept for one second
    pub fn disabled() -> Self {
        Self {
            size: 1,
            ttl: 1,
            cache_ranges: false,
        }
    }

    /// Entry bound, `None` when unbounded
    pub fn capacity(&self) -> Option<NonZeroUsize> {
        if self.size <= 0 {
            None
        } else {
            NonZeroUsize::new(self.size as usize)
        }
    }

    /// Entry lifetime, `None` when entries never expire
    pub fn time_to_live(&self) -> Option<Duration> {
        if self.ttl <= 0 {
            None
        } else {
            Some(Duration::from_secs(self.ttl as u64))
        }
    }
}

/// One S3 cluster as written in configuration
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3ClusterSettings {
    /// Endpoint URL
    pub url: String,
    /// Access key
    pub key: String,
    /// Secret key
    pub secret_key: String,
    /// Verify TLS certificates
    #[serde(default = "default_true")]
    pub verify_tls: bool,
}

impl std::fmt::Debug for S3ClusterSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ClusterSettings")
            .field("url", &self.url)
            .field("key", &self.key)
            .field("secret_key", &"<redacted>")
            .field("verify_tls", &self.verify_tls)
            .finish()
    }
}

fn default_true() -> bool {
    true
}

impl From<&S3ClusterSettings> for ClusterConfig {
    fn from(settings: &S3ClusterSettings) -> Self {
        ClusterConfig::new(&settings.url, &settings.key, &settings.secret_key)
            .with_verify_tls(settings.verify_tls)
    }
}

/// CEPH cluster connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CephConfig {
    /// Path of the cluster configuration file
    pub conf_file: PathBuf,
    /// Client name (`client.admin`)
    pub username: String,
    /// Cluster name (`ceph`)
    pub cluster_name: String,
}

/// Copy tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyConfig {
    /// Sources larger than this are streamed instead of buffered
    #[serde(default = "default_stream_threshold", deserialize_with = "deserialize_size")]
    pub stream_threshold: u64,
    /// Size of each range read while streaming
    #[serde(default = "default_chunk_size", deserialize_with = "deserialize_size")]
    pub chunk_size: u64,
    /// Size of each multipart upload part while streaming to S3
    #[serde(default = "default_part_size", deserialize_with = "deserialize_size")]
    pub part_size: u64,
}

fn default_stream_threshold() -> u64 {
    64 * 1024 * 1024
}

fn default_chunk_size() -> u64 {
    8 * 1024 * 1024
}

fn default_part_size() -> u64 {
    8 * 1024 * 1024
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            stream_threshold: default_stream_threshold(),
            chunk_size: default_chunk_size(),
            part_size: default_part_size(),
        }
    }
}

/// Size given either as a byte count or as a string like "64MiB"
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Bytes(u64),
    Text(String),
}

fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Bytes(bytes) => Ok(bytes),
        SizeValue::Text(text) => parse_size(&text)
            .map_err(|e| D::Error::custom(format!("Failed to parse size: {}", e))),
    }
}

/// Parse size string like "100MiB" to bytes
pub fn parse_size(size_str: &str) -> Result<u64> {
    let size_str = size_str.trim();

    if let Ok(bytes) = size_str.parse::<u64>() {
        return Ok(bytes);
    }

    let split_pos = size_str
        .chars()
        .position(|c| !c.is_ascii_digit() && c != '.')
        .unwrap_or(size_str.len());

    if split_pos == 0 {
        return Err(Error::Config(format!("Invalid size format: {}", size_str)));
    }

    let (number_part, unit_part) = size_str.split_at(split_pos);
    let number: f64 = number_part
        .parse()
        .map_err(|_| Error::Config(format!("Invalid number in size: {}", number_part)))?;

    let multiplier: u64 = match unit_part.trim().to_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1_000,
        "m" | "mb" => 1_000_000,
        "g" | "gb" => 1_000_000_000,
        "ki" | "kib" => 1_024,
        "mi" | "mib" => 1_048_576,
        "gi" | "gib" => 1_073_741_824,
        _ => {
            return Err(Error::Config(format!("Unknown size unit: {}", unit_part)));
        }
    };

    Ok((number * multiplier as f64) as u64)
}

impl StorageConfig {
    /// Default location of the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| Error::Config("Unable to determine config directory".to_string()))?;
        Ok(config_dir.join("tilestore").join("config.toml"))
    }

    /// Parse TOML content
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Build configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build configuration from a variable lookup
    ///
    /// Cache values that do not parse as integers are ignored. S3 variables
    /// hold comma-separated lists that must have the same length. CEPH is
    /// configured only when its three variables are present.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(size) = parse_int_var(&lookup, ENV_CACHE_SIZE) {
            config.cache.size = size;
        }
        if let Some(ttl) = parse_int_var(&lookup, ENV_CACHE_TTL) {
            config.cache.ttl = ttl;
        }

        let verify_tls = lookup(ENV_SSL_NO_VERIFY).map_or(true, |v| v.is_empty());
        match (
            lookup(ENV_S3_URL),
            lookup(ENV_S3_KEY),
            lookup(ENV_S3_SECRET_KEY),
        ) {
            (Some(urls), Some(keys), Some(secret_keys)) => {
                let urls: Vec<&str> = urls.split(',').collect();
                let keys: Vec<&str> = keys.split(',').collect();
                let secret_keys: Vec<&str> = secret_keys.split(',').collect();

                if urls.len() != keys.len() || urls.len() != secret_keys.len() {
                    return Err(Error::Config(
                        "S3 variables must list the same number of elements".to_string(),
                    ));
                }

                config.s3 = urls
                    .iter()
                    .zip(keys.iter())
                    .zip(secret_keys.iter())
                    .map(|((url, key), secret_key)| S3ClusterSettings {
                        url: url.trim().to_string(),
                        key: key.trim().to_string(),
                        secret_key: secret_key.trim().to_string(),
                        verify_tls,
                    })
                    .collect();
            }
            (None, None, None) => {}
            _ => {
                return Err(Error::Config(format!(
                    "{}, {} and {} must be defined together",
                    ENV_S3_URL, ENV_S3_KEY, ENV_S3_SECRET_KEY
                )));
            }
        }

        if let (Some(conf_file), Some(username), Some(cluster_name)) = (
            lookup(ENV_CEPH_CONF_FILE),
            lookup(ENV_CEPH_USERNAME),
            lookup(ENV_CEPH_CLUSTER_NAME),
        ) {
            config.ceph = Some(CephConfig {
                conf_file: PathBuf::from(conf_file),
                username,
                cluster_name,
            });
        }

        Ok(config)
    }

    /// Cluster registry described by the `[[s3]]` entries
    pub fn registry(&self) -> Result<ClusterRegistry> {
        ClusterRegistry::new(self.s3.iter().map(ClusterConfig::from).collect())
    }
}

fn parse_int_var<F>(lookup: &F, name: &str) -> Option<i64>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(name)?;
    match value.trim().parse::<i64>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(variable = name, value = %value, "Ignoring non-integer value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = StorageConfig::default();
        assert_eq!(config.cache.size, 64);
        assert_eq!(config.cache.ttl, 300);
        assert!(config.s3.is_empty());
        assert!(config.ceph.is_none());
        assert_eq!(config.copy.stream_threshold, 64 * 1024 * 1024);
    }

    #[test]
    fn test_cache_bounds() {
        let unbounded = CacheConfig {
            size: 0,
            ttl: -1,
            cache_ranges: false,
        };
        assert_eq!(unbounded.capacity(), None);
        assert_eq!(unbounded.time_to_live(), None);

        let disabled = CacheConfig::disabled();
        assert_eq!(disabled.capacity(), NonZeroUsize::new(1));
        assert_eq!(disabled.time_to_live(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_from_vars_multi_cluster() {
        let config = StorageConfig::from_vars(vars(&[
            (ENV_S3_URL, "https://s3.storage.fr,https://s4.storage.fr"),
            (ENV_S3_KEY, "KEY1,KEY2"),
            (ENV_S3_SECRET_KEY, "SKEY1,SKEY2"),
            (ENV_SSL_NO_VERIFY, "1"),
            (ENV_CACHE_SIZE, "128"),
            (ENV_CACHE_TTL, "not-a-number"),
        ]))
        .unwrap();

        assert_eq!(config.s3.len(), 2);
        assert_eq!(config.s3[1].key, "KEY2");
        assert!(!config.s3[0].verify_tls);
        assert_eq!(config.cache.size, 128);
        assert_eq!(config.cache.ttl, 300);

        let registry = config.registry().unwrap();
        assert_eq!(registry.default_host(), Some("s3.storage.fr"));
    }

    #[test]
    fn test_from_vars_inconsistent_lists() {
        let result = StorageConfig::from_vars(vars(&[
            (ENV_S3_URL, "https://s3.storage.fr,https://s4.storage.fr"),
            (ENV_S3_KEY, "KEY1"),
            (ENV_S3_SECRET_KEY, "SKEY1,SKEY2"),
        ]));
        assert!(matches!(result, Err(Error::Config(_))));

        let result = StorageConfig::from_vars(vars(&[(ENV_S3_URL, "https://s3.storage.fr")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_vars_ceph() {
        let config = StorageConfig::from_vars(vars(&[
            (ENV_CEPH_CONF_FILE, "/etc/ceph/ceph.conf"),
            (ENV_CEPH_USERNAME, "client.admin"),
            (ENV_CEPH_CLUSTER_NAME, "ceph"),
        ]))
        .unwrap();
        let ceph = config.ceph.unwrap();
        assert_eq!(ceph.conf_file, PathBuf::from("/etc/ceph/ceph.conf"));
        assert_eq!(ceph.username, "client.admin");
    }

    #[test]
    fn test_toml_with_size_strings() {
        let config = StorageConfig::from_toml_str(
            r#"
            [cache]
            size = 0
            ttl = 60

            [[s3]]
            url = "http://localhost:9000"
            key = "minio"
            secret_key = "minio123"
            verify_tls = false

            [copy]
            stream_threshold = "16MiB"
            chunk_size = 65536
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.capacity(), None);
        assert_eq!(config.cache.ttl, 60);
        assert_eq!(config.s3[0].url, "http://localhost:9000");
        assert!(!config.s3[0].verify_tls);
        assert_eq!(config.copy.stream_threshold, 16 * 1024 * 1024);
        assert_eq!(config.copy.chunk_size, 65536);
        assert_eq!(config.copy.part_size, 8 * 1024 * 1024);
    }

    #[test]
    fn test_toml_roundtrip_keeps_clusters() {
        let mut config = StorageConfig::default();
        config.s3.push(S3ClusterSettings {
            url: "https://s3.storage.fr".to_string(),
            key: "KEY1".to_string(),
            secret_key: "SKEY1".to_string(),
            verify_tls: true,
        });
        let text = config.to_toml_string().unwrap();
        let parsed = StorageConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.s3, config.s3);
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("64KiB").unwrap(), 64 * 1024);
        assert_eq!(parse_size("1.5MiB").unwrap(), 1_572_864);
        assert_eq!(parse_size("2gb").unwrap(), 2_000_000_000);
        assert!(parse_size("MiB").is_err());
        assert!(parse_size("12 parsecs").is_err());
    }
}
