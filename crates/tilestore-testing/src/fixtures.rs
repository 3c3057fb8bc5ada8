//! Common test fixtures for tilestore testing

use crate::{ManualClock, MemoryConnector, TestDir};
use anyhow::Result;
use std::sync::Arc;
use tilestore_core::{CacheConfig, S3ClusterSettings, Storage, StorageConfig};

/// Default cluster of [`two_cluster_config`]
pub const HOST_A: &str = "s3.storage.fr";
/// Second cluster of [`two_cluster_config`]
pub const HOST_B: &str = "s4.storage.fr";

/// Deterministic, non-repeating-looking content of `len` bytes
pub fn tile_bytes(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x2545_f491;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state & 0xff) as u8
        })
        .collect()
}

/// Configuration with two S3 clusters, `HOST_A` first
pub fn two_cluster_config() -> StorageConfig {
    let mut config = StorageConfig::default();
    config.s3 = vec![
        S3ClusterSettings {
            url: format!("https://{}", HOST_A),
            key: "KEY1".to_string(),
            secret_key: "SKEY1".to_string(),
            verify_tls: true,
        },
        S3ClusterSettings {
            url: format!("https://{}", HOST_B),
            key: "KEY2".to_string(),
            secret_key: "SKEY2".to_string(),
            verify_tls: true,
        },
    ];
    config
}

/// Everything a facade test needs, wired to in-memory backends
pub struct MemoryStorage {
    pub storage: Storage,
    pub connector: Arc<MemoryConnector>,
    pub clock: Arc<ManualClock>,
}

/// Storage over [`two_cluster_config`] with the given cache settings
pub fn memory_storage(cache: CacheConfig) -> Result<MemoryStorage> {
    let mut config = two_cluster_config();
    config.cache = cache;
    memory_storage_with(config)
}

/// Storage over `config` backed by a [`MemoryConnector`] and a [`ManualClock`]
pub fn memory_storage_with(config: StorageConfig) -> Result<MemoryStorage> {
    let connector = Arc::new(MemoryConnector::new());
    let clock = Arc::new(ManualClock::new());
    let storage = Storage::builder(config)
        .connector(connector.clone())
        .clock(clock.clone())
        .build()?;

    Ok(MemoryStorage {
        storage,
        connector,
        clock,
    })
}

/// Creates a small pyramid layout on disk
pub fn create_pyramid_files(test_dir: &TestDir) -> Result<()> {
    test_dir.create_file("pyramid/ortho.json", br#"{"tile_matrix_set":"PM"}"#)?;
    test_dir.create_file("pyramid/ortho.list", b"0=file:///data\n")?;
    test_dir.create_file("pyramid/DATA/12/00/00.tif", &tile_bytes(4096))?;
    test_dir.create_file("pyramid/DATA/12/00/01.tif", &tile_bytes(1024))?;
    Ok(())
}
