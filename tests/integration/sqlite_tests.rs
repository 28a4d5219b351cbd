use chrono::DateTime;
use prodsync::key::encode;
use prodsync::model::Product;
use prodsync::reconcile::{DriverConfig, SyncDriver};
use prodsync::store::{
    CacheStore, Datastore, JsonSerializer, SqliteCache, SqliteDatastore, StoreError,
};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_millis(500);

fn full_product() -> Product {
    Product {
        nrn: "MAP 100".to_string(),
        nsn: "7643-01".to_string(),
        product_type: "CADRG".to_string(),
        media_name: "DVD".to_string(),
        edition: 3,
        load_date: DateTime::from_timestamp_millis(1_600_000_000_000),
        recorded_date: DateTime::from_timestamp_millis(1_650_000_000_000),
        classification: "U".to_string(),
        classification_description: "Unclassified".to_string(),
        releasability: "R".to_string(),
        releasability_description: "Releasable".to_string(),
        path: "/data/map100.zip".to_string(),
        url: "https://example.invalid/map100".to_string(),
        notes: "reprint".to_string(),
        iso3_char: "USA".to_string(),
        aor_code: "NA".to_string(),
        country_name: "United States".to_string(),
        recorded_size: 123_456,
    }
}

#[test]
fn test_datastore_round_trips_all_columns() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("products.db");
    {
        let ds = SqliteDatastore::open(&path, TIMEOUT).unwrap();
        ds.insert(&full_product()).unwrap();
    }

    let ds = SqliteDatastore::open(&path, TIMEOUT).unwrap();
    let key = encode("MAP 100", "7643-01").unwrap();
    assert_eq!(ds.list_keys().unwrap(), vec![key.clone()]);
    assert_eq!(ds.get_record(&key).unwrap(), full_product());
}

#[test]
fn test_datastore_delete_normalized() {
    let ds = SqliteDatastore::open_in_memory().unwrap();
    ds.insert(&full_product()).unwrap();
    let key = encode("MAP 100", "7643-01").unwrap();

    assert_eq!(ds.delete(&key).unwrap(), 1);
    assert!(matches!(ds.get_record(&key), Err(StoreError::NotFound(_))));
}

#[test]
fn test_identifiers_with_control_whitespace_are_cached() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("abc.bin");
    fs::write(&file, b"abc").unwrap();

    let ds = Arc::new(SqliteDatastore::open(&dir.path().join("products.db"), TIMEOUT).unwrap());
    ds.insert(&Product::new("ABC\t", "\n7643", file.to_string_lossy()))
        .unwrap();
    let key = encode("ABC", "7643").unwrap();
    assert_eq!(ds.list_keys().unwrap(), vec![key.clone()]);
    assert_eq!(ds.get_record(&key).unwrap().nrn, "ABC\t");

    let cache = Arc::new(SqliteCache::open(&dir.path().join("cache.db"), TIMEOUT).unwrap());
    let driver = SyncDriver::new(
        ds,
        cache.clone(),
        Arc::new(JsonSerializer::new()),
        DriverConfig::default(),
    );
    let first = driver.run().unwrap();
    assert_eq!(first.added, 1);
    assert_eq!(first.errors, 0);

    let second = driver.run().unwrap();
    assert_eq!(second.changes(), 0);
    assert_eq!(second.unchanged, 1);
    assert!(cache.get(&key).unwrap().is_some());
}

#[test]
fn test_datastore_unopenable_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing-dir").join("products.db");
    assert!(matches!(
        SqliteDatastore::open(&path, TIMEOUT),
        Err(StoreError::Connectivity(_))
    ));
}

#[test]
fn test_cache_shared_between_connections() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.db");
    let writer = SqliteCache::open(&path, TIMEOUT).unwrap();
    let reader = SqliteCache::open(&path, TIMEOUT).unwrap();
    let key = encode("A", "1").unwrap();

    writer.put(&key, "payload").unwrap();
    assert_eq!(reader.get(&key).unwrap().as_deref(), Some("payload"));

    writer.remove(&key).unwrap();
    assert!(reader.list_keys().unwrap().is_empty());
}

#[test]
fn test_cache_entries_sorted() {
    let cache = SqliteCache::open_in_memory().unwrap();
    for name in ["C", "A", "B"] {
        cache.put(&encode(name, "S").unwrap(), name).unwrap();
    }
    let keys: Vec<String> = cache
        .entries()
        .unwrap()
        .into_iter()
        .map(|(k, _)| k.into_string())
        .collect();
    assert_eq!(keys, vec!["S+A", "S+B", "S+C"]);
}
