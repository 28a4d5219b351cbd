use prodsync::key::encode;
use prodsync::model::Product;
use prodsync::reconcile::{DriverConfig, SyncDriver};
use prodsync::store::{
    CacheStore, JsonSerializer, MemoryDatastore, SqliteCache, SqliteDatastore, StoreError,
};
use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

const TIMEOUT: Duration = Duration::from_millis(200);

#[test]
fn test_open_corrupted_database() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path();
    {
        let mut f = fs::File::create(path).unwrap();
        f.write_all(b"not a sqlite database, only a handful of bytes")
            .unwrap();
    }

    let res = SqliteCache::open(path, TIMEOUT);
    assert!(matches!(res, Err(StoreError::Connectivity(_))));
}

#[test]
fn test_recovery_after_removing_corrupted_file() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();
    fs::write(&path, b"corrupted garbage that is not sqlite").unwrap();
    assert!(SqliteCache::open(&path, TIMEOUT).is_err());

    fs::remove_file(&path).unwrap();
    let cache = SqliteCache::open(&path, TIMEOUT).expect("fresh cache after removal");
    assert!(cache.is_empty().unwrap());
}

#[test]
fn test_rows_with_bad_keys_are_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.db");
    let cache = SqliteCache::open(&path, TIMEOUT).unwrap();
    cache.put(&encode("A", "1").unwrap(), "{}").unwrap();

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute(
        "INSERT INTO cache_entries (key, payload, updated_at) VALUES ('no-separator', '{}', 0)",
        [],
    )
    .unwrap();
    drop(conn);

    let listing = cache.listing().unwrap();
    assert_eq!(listing.keys, vec![encode("A", "1").unwrap()]);
    assert_eq!(listing.rejected.len(), 1);
    assert_eq!(listing.rejected[0].raw, "no-separator");
    assert_eq!(cache.len().unwrap(), 2);
}

#[test]
fn test_unkeyable_rows_are_counted_and_malformed_entries_purged() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("ok.bin");
    fs::write(&file, b"fine").unwrap();

    let datastore =
        Arc::new(SqliteDatastore::open(&dir.path().join("products.db"), TIMEOUT).unwrap());
    datastore
        .insert(&Product::new("", "7643", file.to_string_lossy()))
        .unwrap();
    datastore
        .insert(&Product::new("GOOD", "7643", file.to_string_lossy()))
        .unwrap();

    let cache_path = dir.path().join("cache.db");
    let cache = Arc::new(SqliteCache::open(&cache_path, TIMEOUT).unwrap());
    let conn = rusqlite::Connection::open(&cache_path).unwrap();
    conn.execute(
        "INSERT INTO cache_entries (key, payload, updated_at) VALUES ('a+b+c', '{}', 0)",
        [],
    )
    .unwrap();
    drop(conn);

    let driver = SyncDriver::new(
        datastore,
        cache.clone(),
        Arc::new(JsonSerializer::new()),
        DriverConfig::default(),
    );
    let summary = driver.run().unwrap();

    assert_eq!(summary.removed, 1);
    assert_eq!(summary.added, 1);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.failures[0].kind, "invalid_key");
    assert_eq!(summary.failures[0].key, "7643+");
    assert_eq!(cache.len().unwrap(), 1);
    assert!(cache.listing().unwrap().rejected.is_empty());
}

#[test]
fn test_corrupt_payload_is_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("ok.bin");
    fs::write(&file, b"fine").unwrap();
    let datastore = Arc::new(MemoryDatastore::new());
    let good = datastore
        .insert(Product::new("GOOD", "N", file.to_string_lossy()))
        .unwrap();
    let bad = datastore
        .insert(Product::new("BAD", "N", file.to_string_lossy()))
        .unwrap();

    let cache = Arc::new(SqliteCache::open(&dir.path().join("cache.db"), TIMEOUT).unwrap());
    cache.put(&bad, "{\"truncated\": ").unwrap();

    let driver = SyncDriver::new(
        datastore,
        cache.clone(),
        Arc::new(JsonSerializer::new()),
        DriverConfig::default(),
    );
    let summary = driver.run().unwrap();

    assert_eq!(summary.added, 1);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.failures[0].key, bad.as_str());
    assert_eq!(summary.failures[0].kind, "serialization");
    assert!(cache.get(&good).unwrap().is_some());
}
