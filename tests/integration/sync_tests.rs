use filetime::{set_file_mtime, FileTime};
use prodsync::error::SyncError;
use prodsync::key::{encode, ProductKey};
use prodsync::model::{CachedProduct, Product};
use prodsync::reconcile::{DriverConfig, Phase, SyncDriver};
use prodsync::store::{
    CacheStore, Datastore, JsonSerializer, MemoryCache, MemoryDatastore, Serializer,
    SqliteCache, SqliteDatastore,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_millis(500);

struct Env {
    dir: TempDir,
    datastore_path: PathBuf,
    cache_path: PathBuf,
}

impl Env {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let datastore_path = dir.path().join("products.db");
        let cache_path = dir.path().join("cache").join("cache.db");
        Self {
            dir,
            datastore_path,
            cache_path,
        }
    }

    fn file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn insert(&self, nrn: &str, nsn: &str, path: &Path) -> ProductKey {
        let ds = SqliteDatastore::open(&self.datastore_path, TIMEOUT).unwrap();
        let product = Product::new(nrn, nsn, path.to_string_lossy());
        ds.insert(&product).unwrap();
        product.key().unwrap()
    }

    fn driver(&self) -> SyncDriver {
        SyncDriver::new(
            Arc::new(SqliteDatastore::open(&self.datastore_path, TIMEOUT).unwrap()),
            Arc::new(SqliteCache::open(&self.cache_path, TIMEOUT).unwrap()),
            Arc::new(JsonSerializer::new()),
            DriverConfig::default().with_workers(2),
        )
    }

    fn cache(&self) -> SqliteCache {
        SqliteCache::open(&self.cache_path, TIMEOUT).unwrap()
    }

    fn cached(&self, key: &ProductKey) -> CachedProduct {
        let payload = self.cache().get(key).unwrap().unwrap();
        JsonSerializer::new().deserialize(&payload).unwrap()
    }
}

#[test]
fn test_example_plan_against_sqlite() {
    let env = Env::new();
    let k = |s: &str| encode(s, "NSN").unwrap();
    for name in ["B", "C", "D"] {
        let path = env.file(name, name.as_bytes());
        env.insert(name, "NSN", &path);
    }
    let cache = env.cache();
    for name in ["A", "B", "C"] {
        cache.put(&k(name), "{}").unwrap();
    }

    let mut plan = env.driver().preview().unwrap();
    plan.update_candidates.sort();

    assert_eq!(plan.to_remove, vec![k("A")]);
    assert_eq!(plan.to_add, vec![k("D")]);
    assert_eq!(plan.update_candidates, vec![k("B"), k("C")]);
}

#[test]
fn test_full_cycle_converges() {
    let env = Env::new();
    let a = env.file("a.bin", b"alpha");
    let b = env.file("b.bin", b"bravo");
    let key_a = env.insert("NRN A", "NSN 1", &a);
    let key_b = env.insert("NRN-B", "NSN-2", &b);
    env.cache().put(&encode("GONE", "X").unwrap(), "{}").unwrap();

    let summary = env.driver().run().unwrap();
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.added, 2);
    assert_eq!(summary.errors, 0);

    let cached = env.cached(&key_a);
    assert_eq!(cached.product.nrn, "NRN A");
    assert_eq!(cached.size_bytes, 5);
    assert_eq!(cached.digest_hex, blake3::hash(b"alpha").to_hex().to_string());

    let second = env.driver().run().unwrap();
    assert_eq!(second.changes(), 0);
    assert_eq!(second.unchanged, 2);
    assert_eq!(env.cache().len().unwrap(), 2);
    assert!(env.cache().get(&key_b).unwrap().is_some());
}

#[test]
fn test_payload_field_names() {
    let env = Env::new();
    let path = env.file("p.bin", b"payload");
    let key = env.insert("NRN", "NSN", &path);
    env.driver().run().unwrap();

    let payload = env.cache().get(&key).unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(value["path"], path.to_string_lossy().as_ref());
    assert_eq!(value["sizeBytes"], 7);
    assert!(value["fileDate"].is_i64());
    assert_eq!(value["digestHex"].as_str().unwrap().len(), 64);
}

#[test]
fn test_same_size_edit_is_detected() {
    let env = Env::new();
    let path = env.file("f.bin", b"aaaa");
    let key = env.insert("NRN", "NSN", &path);
    env.driver().run().unwrap();

    fs::write(&path, b"bbbb").unwrap();
    let summary = env.driver().run().unwrap();

    assert_eq!(summary.updated, 1);
    assert_eq!(
        env.cached(&key).digest_hex,
        blake3::hash(b"bbbb").to_hex().to_string()
    );
}

#[test]
fn test_touch_without_edit_is_not_drift() {
    let env = Env::new();
    let path = env.file("f.bin", b"steady");
    env.insert("NRN", "NSN", &path);
    env.driver().run().unwrap();

    set_file_mtime(&path, FileTime::from_unix_time(1_000_000_000, 0)).unwrap();
    let summary = env.driver().run().unwrap();

    assert_eq!(summary.updated, 0);
    assert_eq!(summary.unchanged, 1);
}

#[test]
fn test_newest_row_is_cached() {
    let env = Env::new();
    let old = env.file("old.bin", b"old");
    let new = env.file("new.bin", b"newer");
    let ds = SqliteDatastore::open(&env.datastore_path, TIMEOUT).unwrap();
    let mut first = Product::new("NRN", "NSN", old.to_string_lossy());
    first.recorded_date = chrono::DateTime::from_timestamp_millis(1_000);
    let mut second = Product::new("NRN", "NSN", new.to_string_lossy());
    second.recorded_date = chrono::DateTime::from_timestamp_millis(2_000);
    ds.insert(&first).unwrap();
    ds.insert(&second).unwrap();
    drop(ds);

    env.driver().run().unwrap();

    let cached = env.cached(&encode("NRN", "NSN").unwrap());
    assert_eq!(cached.product.path, new.to_string_lossy());
    assert_eq!(cached.size_bytes, 5);
}

#[test]
fn test_record_pointing_at_new_file_is_updated() {
    let env = Env::new();
    let first = env.file("v1.bin", b"version one");
    let key = env.insert("NRN", "NSN", &first);
    env.driver().run().unwrap();

    let ds = SqliteDatastore::open(&env.datastore_path, TIMEOUT).unwrap();
    ds.delete(&key).unwrap();
    let second = env.file("v2.bin", b"version one");
    ds.insert(&Product::new("NRN", "NSN", second.to_string_lossy()))
        .unwrap();
    drop(ds);

    let summary = env.driver().run().unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(env.cached(&key).product.path, second.to_string_lossy());
}

#[test]
fn test_missing_file_in_update_phase_keeps_entry() {
    let env = Env::new();
    let path = env.file("f.bin", b"data");
    let key = env.insert("NRN", "NSN", &path);
    env.driver().run().unwrap();

    fs::remove_file(&path).unwrap();
    let summary = env.driver().run().unwrap();

    assert_eq!(summary.errors, 1);
    assert_eq!(summary.failures[0].phase, Phase::Update);
    assert_eq!(summary.failures[0].kind, "file_not_found");
    assert!(env.cache().get(&key).unwrap().is_some());
}

#[test]
fn test_invalid_datastore_rows_are_counted() {
    let env = Env::new();
    let path = env.file("f.bin", b"data");
    let ds = SqliteDatastore::open(&env.datastore_path, TIMEOUT).unwrap();
    ds.insert(&Product::new("  ", "NSN", path.to_string_lossy()))
        .unwrap();
    drop(ds);
    env.insert("NRN", "NSN", &path);

    let summary = env.driver().run().unwrap();
    assert_eq!(summary.added, 1);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.failures[0].kind, "invalid_key");
    assert_eq!(summary.failures[0].phase, Phase::Add);
}

#[test]
fn test_offline_datastore_mutates_nothing() {
    let datastore = Arc::new(MemoryDatastore::new());
    let cache = Arc::new(MemoryCache::new());
    cache.seed(encode("ORPHAN", "NSN").unwrap(), "{}");
    datastore.set_offline(true);

    let driver = SyncDriver::new(
        datastore.clone(),
        cache.clone(),
        Arc::new(JsonSerializer::new()),
        DriverConfig::default(),
    );
    let err = driver.run().unwrap_err();

    assert!(matches!(err, SyncError::Connectivity(_)));
    assert!(err.is_fatal());
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.write_count(), 0);
}

#[test]
fn test_record_vanishing_mid_run_is_counted() {
    struct VanishingDatastore(MemoryDatastore);

    impl Datastore for VanishingDatastore {
        fn listing(&self) -> prodsync::store::StoreResult<prodsync::store::Listing> {
            self.0.listing()
        }

        fn get_record(&self, key: &ProductKey) -> prodsync::store::StoreResult<Product> {
            self.0.remove(key);
            self.0.get_record(key)
        }
    }

    let inner = MemoryDatastore::new();
    inner.insert(Product::new("A", "NSN", "/nowhere")).unwrap();
    let cache = Arc::new(MemoryCache::new());
    let driver = SyncDriver::new(
        Arc::new(VanishingDatastore(inner)),
        cache.clone(),
        Arc::new(JsonSerializer::new()),
        DriverConfig::default(),
    );

    let summary = driver.run().unwrap();
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.failures[0].kind, "not_found");
    assert!(cache.is_empty());
}
