//! Facade behaviour against in-memory S3 and CEPH backends and local files

use object_store::DynObjectStore;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{mpsc, Arc, Mutex};
use tilestore_core::{
    ByteRange, CacheConfig, ClientKey, ClusterConfig, Connector, Error, MemoryRados, RadosError, RadosPool, Storage,
    StorageConfig,
};
use tilestore_testing::assertions::{assert_not_found, assert_unsupported};
use tilestore_testing::fixtures::{memory_storage, tile_bytes, HOST_A, HOST_B};
use tilestore_testing::TestDir;

fn cache(size: i64, ttl: i64) -> CacheConfig {
    CacheConfig {
        size,
        ttl,
        cache_ranges: false,
    }
}

#[test]
fn test_roundtrip_on_every_writable_backend() {
    let env = memory_storage(CacheConfig::default()).unwrap();
    let test_dir = TestDir::new().unwrap();
    let content = tile_bytes(3000);

    for address in [
        test_dir.address("pyramid/0_0.tif"),
        "s3://tiles/pyramid/0_0.tif".to_string(),
        "ceph://pool/pyramid/0_0.tif".to_string(),
    ] {
        env.storage.put_binary(&address, content.clone()).unwrap();
        assert_eq!(env.storage.get_binary(&address, None).unwrap(), content, "{}", address);
        assert_eq!(env.storage.size(&address).unwrap(), Some(3000), "{}", address);
        assert!(env.storage.exists(&address).unwrap(), "{}", address);
    }
}

#[test]
fn test_string_roundtrip() {
    let env = memory_storage(CacheConfig::default()).unwrap();
    env.storage
        .put_string("s3://tiles/ortho.json", "{\"format\":\"TIFF_JPG_UINT8\"}")
        .unwrap();
    assert_eq!(
        env.storage.get_string("s3://tiles/ortho.json").unwrap(),
        "{\"format\":\"TIFF_JPG_UINT8\"}"
    );
}

#[test]
fn test_partial_reads_match_full_read() {
    let env = memory_storage(CacheConfig::default()).unwrap();
    let test_dir = TestDir::new().unwrap();
    let content = tile_bytes(5000);

    for address in [
        test_dir.address("data.bin"),
        "s3://tiles/data.bin".to_string(),
        "ceph://pool/data.bin".to_string(),
    ] {
        env.storage.put_binary(&address, content.clone()).unwrap();
        for (offset, length) in [(0, 1), (0, 5000), (17, 100), (2048, 2049), (4999, 1)] {
            let part = env
                .storage
                .get_binary(&address, Some(ByteRange::new(offset, length)))
                .unwrap();
            assert_eq!(
                &part[..],
                &content[offset as usize..(offset + length) as usize],
                "{} at {}+{}",
                address,
                offset,
                length
            );
        }
    }
}

#[test]
fn test_cache_hit_skips_backend() {
    let env = memory_storage(cache(16, 60)).unwrap();
    let pool = env.connector.pool("pool");

    env.storage.put_binary("ceph://pool/tile", tile_bytes(128)).unwrap();
    let first = env.storage.get_binary("ceph://pool/tile", None).unwrap();
    let second = env.storage.get_binary("ceph://pool/tile", None).unwrap();

    assert_eq!(first, second);
    assert_eq!(pool.reads(), 1);
}

#[test]
fn test_range_reads_bypass_cache() {
    let env = memory_storage(cache(16, 60)).unwrap();
    let pool = env.connector.pool("pool");

    env.storage.put_binary("ceph://pool/tile", tile_bytes(128)).unwrap();
    let range = Some(ByteRange::new(10, 10));
    env.storage.get_binary("ceph://pool/tile", range).unwrap();
    env.storage.get_binary("ceph://pool/tile", range).unwrap();

    assert_eq!(pool.reads(), 2);
    assert!(env.storage.cache().is_empty());
}

#[test]
fn test_range_reads_cached_when_enabled() {
    let env = memory_storage(CacheConfig {
        size: 16,
        ttl: 60,
        cache_ranges: true,
    })
    .unwrap();
    let pool = env.connector.pool("pool");

    env.storage.put_binary("ceph://pool/tile", tile_bytes(128)).unwrap();
    let range = Some(ByteRange::new(10, 10));
    let first = env.storage.get_binary("ceph://pool/tile", range).unwrap();
    let second = env.storage.get_binary("ceph://pool/tile", range).unwrap();

    assert_eq!(first, second);
    assert_eq!(pool.reads(), 1);
}

#[test]
fn test_cache_expiry_triggers_fresh_read() {
    let env = memory_storage(cache(16, 10)).unwrap();
    let pool = env.connector.pool("pool");

    env.storage.put_binary("ceph://pool/tile", tile_bytes(64)).unwrap();
    env.storage.get_binary("ceph://pool/tile", None).unwrap();

    env.clock.advance_secs(9);
    env.storage.get_binary("ceph://pool/tile", None).unwrap();
    assert_eq!(pool.reads(), 1);

    env.clock.advance_secs(1);
    env.storage.get_binary("ceph://pool/tile", None).unwrap();
    assert_eq!(pool.reads(), 2);
}

#[test]
fn test_disabled_cache_rereads_after_a_second() {
    let env = memory_storage(CacheConfig::disabled()).unwrap();
    let pool = env.connector.pool("pool");

    env.storage.put_binary("ceph://pool/tile", tile_bytes(64)).unwrap();
    env.storage.get_binary("ceph://pool/tile", None).unwrap();
    env.clock.advance_secs(1);
    env.storage.get_binary("ceph://pool/tile", None).unwrap();
    assert_eq!(pool.reads(), 2);
}

#[test]
fn test_cache_hides_external_changes_until_expiry() {
    let env = memory_storage(cache(16, 30)).unwrap();
    let test_dir = TestDir::new().unwrap();
    let path = test_dir.create_file("layer.json", b"v1").unwrap();
    let address = test_dir.address("layer.json");

    assert_eq!(env.storage.get_string(&address).unwrap(), "v1");
    std::fs::write(&path, b"v2").unwrap();
    assert_eq!(env.storage.get_string(&address).unwrap(), "v1");

    env.clock.advance_secs(31);
    assert_eq!(env.storage.get_string(&address).unwrap(), "v2");
}

#[test]
fn test_write_invalidates_cache() {
    let env = memory_storage(cache(16, 3600)).unwrap();
    let test_dir = TestDir::new().unwrap();

    for address in [
        test_dir.address("a.json"),
        "s3://tiles/a.json".to_string(),
        "ceph://pool/a.json".to_string(),
    ] {
        env.storage.put_string(&address, "b1").unwrap();
        assert_eq!(env.storage.get_string(&address).unwrap(), "b1");
        env.storage.put_string(&address, "b2").unwrap();
        assert_eq!(env.storage.get_string(&address).unwrap(), "b2", "{}", address);
    }
}

#[test]
fn test_delete_invalidates_cache_and_is_idempotent() {
    let env = memory_storage(cache(16, 3600)).unwrap();
    let test_dir = TestDir::new().unwrap();

    for address in [
        test_dir.address("a.json"),
        "s3://tiles/a.json".to_string(),
        "ceph://pool/a.json".to_string(),
    ] {
        env.storage.put_string(&address, "content").unwrap();
        env.storage.get_string(&address).unwrap();

        env.storage.delete(&address).unwrap();
        assert!(!env.storage.exists(&address).unwrap());
        assert_not_found(env.storage.get_binary(&address, None));

        env.storage.delete(&address).unwrap();
        assert!(!env.storage.exists(&address).unwrap());
    }
}

#[test]
fn test_absence_is_not_an_error_for_metadata() {
    let env = memory_storage(CacheConfig::default()).unwrap();
    let test_dir = TestDir::new().unwrap();

    for address in [
        test_dir.address("missing"),
        "s3://tiles/missing".to_string(),
        "ceph://pool/missing".to_string(),
    ] {
        assert!(!env.storage.exists(&address).unwrap());
        assert_eq!(env.storage.size(&address).unwrap(), None);
        assert_not_found(env.storage.get_binary(&address, None));
        assert_not_found(env.storage.get_binary(&address, Some(ByteRange::new(0, 10))));
    }
}

#[test]
fn test_explicit_cluster_uses_its_credentials() {
    let env = memory_storage(CacheConfig::default()).unwrap();
    let address = format!("s3://tiles@{}/b.json", HOST_B);

    env.storage.put_string(&address, "on B").unwrap();

    let requests = env.connector.requests();
    let last = requests.last().unwrap();
    assert_eq!(last.host, HOST_B);
    assert_eq!(last.access_key, "KEY2");
    assert_eq!(last.secret_key, "SKEY2");

    assert_eq!(env.storage.get_string(&address).unwrap(), "on B");
    // The same bucket on the default cluster is a different bucket
    assert!(!env.storage.exists("s3://tiles/b.json").unwrap());
    assert!(!env.storage.exists(&format!("s3://tiles@{}/b.json", HOST_A)).unwrap());
}

#[test]
fn test_default_cluster_equals_explicit_default() {
    let env = memory_storage(CacheConfig::default()).unwrap();
    env.storage.put_string("s3://tiles/a.json", "on A").unwrap();
    assert_eq!(
        env.storage
            .get_string(&format!("s3://tiles@{}/a.json", HOST_A))
            .unwrap(),
        "on A"
    );
    assert_eq!(env.connector.requests().len(), 1);
}

#[test]
fn test_unknown_cluster() {
    let env = memory_storage(CacheConfig::default()).unwrap();
    assert!(matches!(
        env.storage.get_binary("s3://tiles@s9.storage.fr/a", None),
        Err(Error::UnknownCluster(_))
    ));
}

#[test]
fn test_invalid_addresses() {
    let env = memory_storage(CacheConfig::default()).unwrap();
    for address in ["s3://tiles", "ceph://pool", "gs://bucket/key", "file:///data/a@b/c"] {
        assert!(
            matches!(env.storage.exists(address), Err(Error::InvalidAddress(_))),
            "{}",
            address
        );
    }
}

#[test]
fn test_symlink_resolution() {
    let env = memory_storage(cache(16, 60)).unwrap();
    let content = tile_bytes(4096);

    env.storage.put_binary("s3://tiles/DATA/0_0.tif", content.clone()).unwrap();
    env.storage
        .symlink("s3://tiles/DATA/0_0.tif", "s3://tiles/LINK/0_0.tif")
        .unwrap();

    assert_eq!(
        env.storage.get_binary("s3://tiles/LINK/0_0.tif", None).unwrap(),
        content
    );
    assert_eq!(env.storage.size("s3://tiles/LINK/0_0.tif").unwrap(), Some(4096));
    assert!(env.storage.exists("s3://tiles/LINK/0_0.tif").unwrap());

    let part = env
        .storage
        .get_binary("s3://tiles/LINK/0_0.tif", Some(ByteRange::new(3000, 96)))
        .unwrap();
    assert_eq!(&part[..], &content[3000..3096]);
}

#[test]
fn test_symlink_across_buckets_of_one_cluster() {
    let env = memory_storage(CacheConfig::default()).unwrap();
    let address = format!("s3://source@{}/tile", HOST_B);
    env.storage.put_binary(&address, tile_bytes(100)).unwrap();

    env.storage
        .symlink(&address, &format!("s3://links@{}/tile", HOST_B))
        .unwrap();
    assert_eq!(
        env.storage
            .get_binary(&format!("s3://links@{}/tile", HOST_B), None)
            .unwrap(),
        tile_bytes(100)
    );
}

#[test]
fn test_symlink_chain() {
    let env = memory_storage(CacheConfig::default()).unwrap();
    env.storage.put_string("s3://tiles/target", "payload").unwrap();
    env.storage.symlink("s3://tiles/target", "s3://tiles/l1").unwrap();
    env.storage.symlink("s3://tiles/l1", "s3://tiles/l2").unwrap();

    assert_eq!(env.storage.get_string("s3://tiles/l2").unwrap(), "payload");
}

#[test]
fn test_symlink_loop_is_an_error() {
    let env = memory_storage(CacheConfig::default()).unwrap();
    env.storage.symlink("s3://tiles/b", "s3://tiles/a").unwrap();
    env.storage.symlink("s3://tiles/a", "s3://tiles/b").unwrap();

    assert!(matches!(
        env.storage.get_binary("s3://tiles/a", None),
        Err(Error::Storage { .. })
    ));
}

#[test]
fn test_dangling_symlink() {
    let env = memory_storage(CacheConfig::default()).unwrap();
    env.storage.symlink("s3://tiles/nothing", "s3://tiles/link").unwrap();

    assert!(!env.storage.exists("s3://tiles/link").unwrap());
    assert_eq!(env.storage.size("s3://tiles/link").unwrap(), None);
    assert_not_found(env.storage.get_binary("s3://tiles/link", None));
}

#[test]
fn test_symlink_restrictions() {
    let env = memory_storage(CacheConfig::default()).unwrap();
    let test_dir = TestDir::new().unwrap();

    assert_unsupported(env.storage.symlink(
        &format!("s3://tiles@{}/a", HOST_B),
        &format!("s3://tiles@{}/link", HOST_A),
    ));
    assert_unsupported(env.storage.symlink("ceph://pool/a", "ceph://pool/link"));
    assert_unsupported(env.storage.symlink(&test_dir.address("a"), &test_dir.address("link")));
    assert_unsupported(env.storage.symlink("s3://tiles/a", "ceph://pool/link"));
}

#[test]
fn test_reads_through_links_follow_target_updates() {
    let env = memory_storage(cache(16, 3600)).unwrap();
    env.storage.put_string("s3://tiles/DATA/a.json", "v1").unwrap();
    env.storage
        .symlink("s3://tiles/DATA/a.json", "s3://tiles/LINK/a.json")
        .unwrap();
    assert_eq!(env.storage.get_string("s3://tiles/LINK/a.json").unwrap(), "v1");

    env.storage.put_string("s3://tiles/DATA/a.json", "v2").unwrap();
    assert_eq!(env.storage.get_string("s3://tiles/LINK/a.json").unwrap(), "v2");
}

#[test]
fn test_stream_through_symlink() {
    let mut config = tilestore_testing::fixtures::two_cluster_config();
    config.copy.chunk_size = 700;
    let env = tilestore_testing::fixtures::memory_storage_with(config).unwrap();
    let content = tile_bytes(4500);
    env.storage.put_binary("s3://tiles/target.bin", content.clone()).unwrap();
    env.storage
        .symlink("s3://tiles/target.bin", "s3://tiles/link.bin")
        .unwrap();

    let mut reader = env.storage.open_read("s3://tiles/link.bin").unwrap();
    assert_eq!(reader.size(), 4500);
    let mut read_back = Vec::new();
    reader.read_to_end(&mut read_back).unwrap();
    assert_eq!(read_back, content);
}

/// RADOS pool whose next read stops after fetching until it is released
#[derive(Debug, Default)]
struct PausingRados {
    inner: MemoryRados,
    pause: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
}

impl RadosPool for PausingRados {
    fn stat(&self, object: &str) -> Result<u64, RadosError> {
        self.inner.stat(object)
    }

    fn read(&self, object: &str, offset: u64, len: u64) -> Result<Vec<u8>, RadosError> {
        let data = self.inner.read(object, offset, len)?;
        let pause = self.pause.lock().unwrap().take();
        if let Some((fetched, resume)) = pause {
            fetched.send(()).unwrap();
            resume.recv().unwrap();
        }
        Ok(data)
    }

    fn write_full(&self, object: &str, data: &[u8]) -> Result<(), RadosError> {
        self.inner.write_full(object, data)
    }

    fn write(&self, object: &str, data: &[u8], offset: u64) -> Result<(), RadosError> {
        self.inner.write(object, data, offset)
    }

    fn remove(&self, object: &str) -> Result<(), RadosError> {
        self.inner.remove(object)
    }
}

#[derive(Debug)]
struct PausingConnector {
    pool: Arc<PausingRados>,
}

impl Connector for PausingConnector {
    fn object_store(
        &self,
        key: &ClientKey,
        _cluster: Option<&ClusterConfig>,
    ) -> tilestore_core::Result<Arc<DynObjectStore>> {
        Err(Error::UnsupportedOperation(format!("no object store for {:?}", key)))
    }

    fn rados_pool(&self, _pool: &str) -> tilestore_core::Result<Arc<dyn RadosPool>> {
        Ok(self.pool.clone())
    }
}

#[test]
fn test_write_during_uncached_read_is_not_masked() {
    let pool = Arc::new(PausingRados::default());
    let mut config = StorageConfig::default();
    config.cache = cache(16, 3600);
    let storage = Storage::builder(config)
        .connector(Arc::new(PausingConnector { pool: pool.clone() }))
        .build()
        .unwrap();
    storage.put_string("ceph://pool/obj", "v1").unwrap();

    let (fetched_tx, fetched_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel();
    *pool.pause.lock().unwrap() = Some((fetched_tx, resume_rx));

    std::thread::scope(|scope| {
        let reader = scope.spawn(|| storage.get_string("ceph://pool/obj").unwrap());
        fetched_rx.recv().unwrap();
        storage.put_string("ceph://pool/obj", "v2").unwrap();
        resume_tx.send(()).unwrap();
        assert_eq!(reader.join().unwrap(), "v1");
    });

    assert_eq!(storage.get_string("ceph://pool/obj").unwrap(), "v2");
}

#[test]
fn test_streaming_writer_and_reader() {
    let mut config = tilestore_testing::fixtures::two_cluster_config();
    config.copy.part_size = 1000;
    config.copy.chunk_size = 700;
    let env = tilestore_testing::fixtures::memory_storage_with(config).unwrap();
    let content = tile_bytes(4500);

    for address in ["s3://tiles/stream.bin", "ceph://pool/stream.bin"] {
        let mut writer = env.storage.open_write(address).unwrap();
        for chunk in content.chunks(333) {
            writer.write_all(chunk).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), 4500);

        let mut reader = env.storage.open_read(address).unwrap();
        assert_eq!(reader.size(), 4500);
        let mut read_back = Vec::new();
        reader.read_to_end(&mut read_back).unwrap();
        assert_eq!(read_back, content, "{}", address);

        reader.seek(SeekFrom::Start(4000)).unwrap();
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail).unwrap();
        assert_eq!(&tail[..], &content[4000..]);
    }
}

#[test]
fn test_open_write_invalidates_cache() {
    let env = memory_storage(cache(16, 3600)).unwrap();
    env.storage.put_string("s3://tiles/a", "old").unwrap();
    assert_eq!(env.storage.get_string("s3://tiles/a").unwrap(), "old");

    let mut writer = env.storage.open_write("s3://tiles/a").unwrap();
    writer.write_all(b"new").unwrap();
    writer.finish().unwrap();

    assert_eq!(env.storage.get_string("s3://tiles/a").unwrap(), "new");
}

#[test]
fn test_prefix_size() {
    let env = memory_storage(CacheConfig::default()).unwrap();
    let test_dir = TestDir::new().unwrap();
    tilestore_testing::fixtures::create_pyramid_files(&test_dir).unwrap();

    let local = env.storage.prefix_size(&test_dir.address("pyramid/DATA")).unwrap();
    assert_eq!(local, 4096 + 1024);

    env.storage.put_binary("s3://tiles/pyr/a", vec![0u8; 10]).unwrap();
    env.storage.put_binary("s3://tiles/pyr/sub/b", vec![0u8; 20]).unwrap();
    env.storage.put_binary("s3://tiles/pyramid/c", vec![0u8; 40]).unwrap();
    assert_eq!(env.storage.prefix_size("s3://tiles/pyr").unwrap(), 30);

    assert_unsupported(env.storage.prefix_size("ceph://pool/pyr"));
}
