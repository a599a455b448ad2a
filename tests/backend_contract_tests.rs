//! Adapter contract checks run against every shipped backend.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{FakeCollection, FakeKvServer};
use herdcache::storage::{DocumentAdapter, FileAdapter, KvAdapter, KvClient};
use herdcache::{CacheEntry, CacheError, Clock, ManualClock, MemoryAdapter, StorageAdapter};
use tempfile::TempDir;

fn entry(clock: &ManualClock, value: &'static [u8], ttl_secs: Option<u64>) -> CacheEntry {
    CacheEntry::new(
        Bytes::from_static(value),
        ttl_secs.map(Duration::from_secs),
        clock.now(),
    )
}

async fn check_contract(adapter: &dyn StorageAdapter, clock: &ManualClock) {
    let name = adapter.backend_type();

    // Absent keys
    assert_eq!(adapter.get("absent").await.unwrap(), None, "{name}");
    assert!(!adapter.exists("absent").await.unwrap(), "{name}");
    assert!(!adapter.delete("absent").await.unwrap(), "{name}");
    assert!(!adapter.touch("absent", None).await.unwrap(), "{name}");

    // Set, get, overwrite
    adapter.set("k", entry(clock, b"v1", Some(60))).await.unwrap();
    adapter.set("k", entry(clock, b"v2", Some(60))).await.unwrap();
    let got = adapter.get("k").await.unwrap().expect("entry present");
    assert_eq!(got.value, Bytes::from_static(b"v2"), "{name}");
    assert_eq!(got.ttl, Some(Duration::from_secs(60)), "{name}");
    assert!(adapter.exists("k").await.unwrap(), "{name}");

    // Negative markers keep their flag
    adapter
        .set("neg", CacheEntry::negative(Some(Duration::from_secs(60)), clock.now()))
        .await
        .unwrap();
    assert!(adapter.get("neg").await.unwrap().unwrap().is_negative, "{name}");

    // Expiry boundary: live one millisecond before, gone at the instant
    clock.advance(Duration::from_millis(59_999));
    assert!(adapter.get("k").await.unwrap().is_some(), "{name}");
    clock.advance(Duration::from_millis(1));
    assert_eq!(adapter.get("k").await.unwrap(), None, "{name}");
    assert!(!adapter.exists("k").await.unwrap(), "{name}");
    assert!(!adapter.touch("k", Some(Duration::from_secs(60))).await.unwrap(), "{name}");

    // Touch restarts the lifetime
    adapter.set("t", entry(clock, b"tv", Some(10))).await.unwrap();
    clock.advance(Duration::from_secs(8));
    assert!(adapter.touch("t", Some(Duration::from_secs(10))).await.unwrap(), "{name}");
    clock.advance(Duration::from_secs(8));
    let touched = adapter.get("t").await.unwrap().expect("touched entry live");
    assert_eq!(touched.value, Bytes::from_static(b"tv"), "{name}");

    // Touch with no TTL makes the entry permanent
    assert!(adapter.touch("t", None).await.unwrap(), "{name}");
    clock.advance(Duration::from_secs(86_400));
    assert!(adapter.exists("t").await.unwrap(), "{name}");

    // Delete
    assert!(adapter.delete("t").await.unwrap(), "{name}");
    assert!(!adapter.exists("t").await.unwrap(), "{name}");

    // Bulk
    adapter.set("a", entry(clock, b"1", None)).await.unwrap();
    adapter.set("b", entry(clock, b"2", None)).await.unwrap();
    let keys = vec!["a".to_string(), "missing".to_string(), "b".to_string()];
    let many = adapter.get_many(&keys).await.unwrap();
    let values: Vec<Option<Bytes>> = many.into_iter().map(|e| e.map(|e| e.value)).collect();
    assert_eq!(
        values,
        vec![Some(Bytes::from_static(b"1")), None, Some(Bytes::from_static(b"2"))],
        "{name}"
    );
    assert_eq!(adapter.delete_many(&keys).await.unwrap(), 2, "{name}");
    assert_eq!(adapter.get("a").await.unwrap(), None, "{name}");

    // Touch to zero expires on the spot and leaves the key reusable
    adapter.set("z", entry(clock, b"zv", Some(60))).await.unwrap();
    assert!(adapter.touch("z", Some(Duration::ZERO)).await.unwrap(), "{name}");
    assert_eq!(adapter.get("z").await.unwrap(), None, "{name}");
    assert!(!adapter.exists("z").await.unwrap(), "{name}");
    assert!(!adapter.touch("z", Some(Duration::from_secs(60))).await.unwrap(), "{name}");

    adapter.set("z", entry(clock, b"zv2", Some(60))).await.unwrap();
    let reused = adapter.get("z").await.unwrap().map(|e| e.value);
    assert_eq!(reused, Some(Bytes::from_static(b"zv2")), "{name}");
}

#[tokio::test]
async fn test_memory_adapter_contract() {
    let clock = ManualClock::default();
    let adapter = MemoryAdapter::new().with_clock(Arc::new(clock.clone()));
    check_contract(&adapter, &clock).await;
}

#[tokio::test]
async fn test_kv_adapter_contract() {
    let clock = ManualClock::default();
    let server = Arc::new(FakeKvServer::new(clock.clone()));
    let adapter = KvAdapter::new(server).with_clock(Arc::new(clock.clone()));
    check_contract(&adapter, &clock).await;
}

#[tokio::test]
async fn test_document_adapter_contract() {
    let clock = ManualClock::default();
    let adapter =
        DocumentAdapter::new(FakeCollection::default()).with_clock(Arc::new(clock.clone()));
    check_contract(&adapter, &clock).await;
}

#[tokio::test]
async fn test_file_adapter_contract() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::default();
    let adapter = FileAdapter::new(dir.path().join("cache"))
        .await
        .unwrap()
        .with_clock(Arc::new(clock.clone()));
    check_contract(&adapter, &clock).await;
}

// == Backend Specifics ==

#[tokio::test]
async fn test_kv_key_prefix_namespaces_keys() {
    let clock = ManualClock::default();
    let server = Arc::new(FakeKvServer::new(clock.clone()));
    let adapter = KvAdapter::new(server.clone())
        .with_key_prefix("app")
        .with_clock(Arc::new(clock.clone()));

    adapter.set("user:1", entry(&clock, b"v", None)).await.unwrap();

    assert!(server.raw("app:user:1").is_some());
    assert!(server.raw("user:1").is_none());
    assert!(adapter.exists("user:1").await.unwrap());
}

#[tokio::test]
async fn test_kv_server_expiry_matches_entry() {
    let clock = ManualClock::default();
    let server = Arc::new(FakeKvServer::new(clock.clone()));
    let adapter = KvAdapter::new(server.clone()).with_clock(Arc::new(clock.clone()));

    adapter.set("k", entry(&clock, b"v", Some(30))).await.unwrap();
    let expected = clock.now() + chrono::Duration::seconds(30);
    assert_eq!(server.native_expiry("k"), Some(expected));

    adapter.set("forever", entry(&clock, b"v", None)).await.unwrap();
    assert_eq!(server.native_expiry("forever"), None);
}

#[tokio::test]
async fn test_kv_touch_never_recreates_a_lapsed_key() {
    let clock = ManualClock::default();
    let server = Arc::new(FakeKvServer::new(clock.clone()));
    let adapter = KvAdapter::new(server.clone()).with_clock(Arc::new(clock.clone()));

    adapter.set("k", entry(&clock, b"v", Some(60))).await.unwrap();
    server.lapse_after_get.store(true, Ordering::SeqCst);

    assert!(!adapter.touch("k", Some(Duration::from_secs(60))).await.unwrap());
    assert_eq!(server.raw("k"), None);
    assert_eq!(adapter.get("k").await.unwrap(), None);
    assert!(!adapter.exists("k").await.unwrap());
}

#[tokio::test]
async fn test_kv_touch_to_zero_deletes_on_server() {
    let clock = ManualClock::default();
    let server = Arc::new(FakeKvServer::new(clock.clone()));
    let adapter = KvAdapter::new(server.clone()).with_clock(Arc::new(clock.clone()));

    adapter.set("k", entry(&clock, b"v", None)).await.unwrap();
    assert!(adapter.touch("k", Some(Duration::ZERO)).await.unwrap());

    assert_eq!(server.raw("k"), None);
    assert_eq!(adapter.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_kv_server_reclaim_ahead_of_local_clock() {
    let local = ManualClock::default();
    let server_clock = ManualClock::new(local.now());
    let server = Arc::new(FakeKvServer::new(server_clock.clone()));
    let adapter = KvAdapter::new(server.clone()).with_clock(Arc::new(local.clone()));

    adapter.set("k", entry(&local, b"v", Some(10))).await.unwrap();
    server_clock.advance(Duration::from_secs(10));

    assert!(!adapter.touch("k", Some(Duration::from_secs(10))).await.unwrap());
    assert_eq!(adapter.get("k").await.unwrap(), None);
    assert_eq!(server.raw("k"), None);
}

#[tokio::test]
async fn test_kv_unavailable_server_surfaces_backend_error() {
    let clock = ManualClock::default();
    let server = Arc::new(FakeKvServer::new(clock.clone()));
    let adapter = KvAdapter::new(server.clone());
    server.down.store(true, Ordering::SeqCst);

    let err = adapter.get("k").await.unwrap_err();
    assert!(matches!(err, CacheError::BackendUnavailable(_)));
    assert!(err.is_backend());
}

#[tokio::test]
async fn test_kv_op_timeout() {
    let clock = ManualClock::default();
    let server = Arc::new(FakeKvServer::new(clock.clone()));
    *server.latency.lock().unwrap() = Some(Duration::from_millis(200));
    let adapter = KvAdapter::new(server).with_op_timeout(Duration::from_millis(20));

    let err = adapter.get("k").await.unwrap_err();
    assert!(matches!(err, CacheError::BackendTimeout(limit) if limit == Duration::from_millis(20)));
}

#[tokio::test]
async fn test_kv_garbage_blob_is_corrupt() {
    let clock = ManualClock::default();
    let server = Arc::new(FakeKvServer::new(clock.clone()));
    let adapter = KvAdapter::new(server.clone()).with_clock(Arc::new(clock.clone()));

    KvClient::set(&*server, "k", Bytes::from_static(b"junk"), None)
        .await
        .unwrap();

    let err = adapter.get("k").await.unwrap_err();
    assert!(matches!(err, CacheError::CorruptValue { ref key, .. } if key == "k"));
}

#[tokio::test]
async fn test_document_records_expiry_fields() {
    let clock = ManualClock::default();
    let collection = Arc::new(FakeCollection::default());
    let adapter = DocumentAdapter::new(collection.clone()).with_clock(Arc::new(clock.clone()));

    adapter.set("k", entry(&clock, b"v", Some(10))).await.unwrap();
    let doc = collection.document("k").unwrap();
    assert_eq!(doc.ttl_ms, Some(10_000));
    assert_eq!(doc.expires_at, Some(clock.now() + chrono::Duration::seconds(10)));

    clock.advance(Duration::from_secs(5));
    adapter.touch("k", None).await.unwrap();
    let doc = collection.document("k").unwrap();
    assert_eq!(doc.ttl_ms, None);
    assert_eq!(doc.expires_at, None);
    assert_eq!(doc.created_at, clock.now());
}

#[tokio::test]
async fn test_file_adapter_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let first = FileAdapter::new(dir.path()).await.unwrap();
    first
        .set("k", CacheEntry::new(Bytes::from_static(b"persisted"), None, chrono::Utc::now()))
        .await
        .unwrap();
    drop(first);

    let second = FileAdapter::new(dir.path()).await.unwrap();
    let got = second.get("k").await.unwrap().unwrap();
    assert_eq!(got.value, Bytes::from_static(b"persisted"));
}

#[tokio::test]
async fn test_file_adapter_purges_expired_files() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::default();
    let adapter = FileAdapter::new(dir.path())
        .await
        .unwrap()
        .with_clock(Arc::new(clock.clone()));

    adapter.set("short", entry(&clock, b"v", Some(1))).await.unwrap();
    adapter.set("long", entry(&clock, b"v", Some(3600))).await.unwrap();
    clock.advance(Duration::from_secs(2));

    assert_eq!(adapter.purge_expired().await.unwrap(), 1);
    assert!(adapter.exists("long").await.unwrap());
}

#[tokio::test]
async fn test_memory_capacity_evicts_least_recent() {
    let adapter = MemoryAdapter::with_capacity(Some(2));
    let now = chrono::Utc::now();
    let mk = |v: &'static [u8]| CacheEntry::new(Bytes::from_static(v), None, now);

    adapter.set("a", mk(b"1")).await.unwrap();
    adapter.set("b", mk(b"2")).await.unwrap();
    adapter.get("a").await.unwrap();
    adapter.set("c", mk(b"3")).await.unwrap();

    assert!(adapter.exists("a").await.unwrap());
    assert!(!adapter.exists("b").await.unwrap());
    assert!(adapter.exists("c").await.unwrap());
    assert_eq!(adapter.evictions().await, 1);
}

#[tokio::test]
async fn test_cache_over_remote_backends() {
    use herdcache::{BincodeCodec, Cache, CacheConfig};

    let clock = ManualClock::default();
    let server = Arc::new(FakeKvServer::new(clock.clone()));
    let kv: Arc<dyn StorageAdapter> = Arc::new(
        KvAdapter::new(server)
            .with_key_prefix("svc")
            .with_clock(Arc::new(clock.clone())),
    );
    let doc: Arc<dyn StorageAdapter> = Arc::new(
        DocumentAdapter::new(FakeCollection::default()).with_clock(Arc::new(clock.clone())),
    );

    for adapter in [kv, doc] {
        let cache = Cache::new(adapter, CacheConfig::default())
            .unwrap()
            .with_codec(BincodeCodec)
            .with_clock(Arc::new(clock.clone()));

        let value: Vec<u32> = cache
            .get_or_set("list", Some(Duration::from_secs(5)), || async { Ok(vec![1, 2, 3]) })
            .await
            .unwrap();
        assert_eq!(value, vec![1, 2, 3]);
        assert_eq!(cache.get::<Vec<u32>>("list").await.unwrap(), Some(vec![1, 2, 3]));

        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.get::<Vec<u32>>("list").await.unwrap(), None, "{}", cache.backend_type());
    }
}
