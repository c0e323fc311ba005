use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;
use zcache::{CacheError, CacheInstance, CacheItem, FakeCache, RequestCounts};

#[tokio::test]
async fn test_fake_cache_basic_operations() {
    let cache = FakeCache::with_latency(Duration::ZERO);

    assert_eq!(cache.get("key").await.unwrap(), None);
    assert!(cache.is_empty().await);

    cache.set("key", Bytes::from("value"), None).await.unwrap();
    assert_eq!(cache.get("key").await.unwrap(), Some(Bytes::from("value")));
    assert_eq!(cache.len().await, 1);

    cache.del("key").await.unwrap();
    assert_eq!(cache.get("key").await.unwrap(), None);

    // Deleting an absent key is not an error
    cache.del("key").await.unwrap();
}

#[tokio::test]
async fn test_fake_cache_batches() {
    let cache = FakeCache::with_latency(Duration::ZERO);
    let items = vec![CacheItem::new("a", "1"), CacheItem::new("b", "2")];
    cache.mset(&items, None).await.unwrap();

    let keys = vec!["b".to_string(), "missing".to_string(), "a".to_string()];
    let values = cache.mget(&keys).await.unwrap();
    assert_eq!(
        values,
        vec![Some(Bytes::from("2")), None, Some(Bytes::from("1"))]
    );

    let data = cache.data().await;
    assert_eq!(data.len(), 2);
    assert_eq!(data["a"], Bytes::from("1"));
}

#[tokio::test]
async fn test_fake_cache_request_counts() {
    let cache = FakeCache::with_latency(Duration::ZERO);

    cache.set("a", Bytes::from("1"), None).await.unwrap();
    cache
        .mset(&[CacheItem::new("b", "2")], None)
        .await
        .unwrap();
    cache.get("a").await.unwrap();
    cache.get("zzz").await.unwrap();
    cache
        .mget(&["a".to_string(), "b".to_string(), "c".to_string()])
        .await
        .unwrap();
    cache.mget(&["b".to_string()]).await.unwrap();
    cache.del("a").await.unwrap();

    let counts = cache.request_counts();
    assert_eq!(
        counts,
        RequestCounts {
            get: 2,
            mget: 2,
            set: 1,
            mset: 1,
            del: 1,
            mget_item_counts: vec![3, 1],
            hit_count: 4,
            miss_count: 2,
        }
    );

    cache.reset_request_counts();
    assert_eq!(cache.request_counts(), RequestCounts::default());
}

#[tokio::test]
async fn test_fake_cache_flush() {
    let cache = FakeCache::with_latency(Duration::ZERO);
    cache.set("a", Bytes::from("1"), None).await.unwrap();
    cache.get("a").await.unwrap();

    cache.flush().await;

    assert!(cache.is_empty().await);
    assert_eq!(cache.request_counts(), RequestCounts::default());
}

#[tokio::test(start_paused = true)]
async fn test_fake_cache_latency() {
    let cache = FakeCache::new();

    let started = Instant::now();
    cache.get("key").await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(10));
    assert!(started.elapsed() < Duration::from_millis(12));

    cache.set_latency(Duration::from_millis(40));
    let started = Instant::now();
    cache.set("key", Bytes::from("value"), None).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert!(started.elapsed() < Duration::from_millis(42));

    // del never waits
    let started = Instant::now();
    cache.del("key").await.unwrap();
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_fake_cache_ttl() {
    let cache = FakeCache::with_latency(Duration::ZERO);
    cache
        .set("short", Bytes::from("1"), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    cache.set("forever", Bytes::from("2"), None).await.unwrap();

    tokio::time::advance(Duration::from_millis(999)).await;
    assert_eq!(cache.get("short").await.unwrap(), Some(Bytes::from("1")));

    tokio::time::advance(Duration::from_millis(2)).await;
    assert_eq!(cache.get("short").await.unwrap(), None);
    assert_eq!(cache.get("forever").await.unwrap(), Some(Bytes::from("2")));
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn test_fake_cache_failure_injection() {
    let cache = FakeCache::with_latency(Duration::ZERO);
    cache.set_failure_count(2);

    let err = cache.get("key").await.unwrap_err();
    assert_eq!(err.to_string(), "Backend error: fake failure");
    assert!(cache.set("key", Bytes::from("v"), None).await.is_err());
    cache.set("key", Bytes::from("v"), None).await.unwrap();

    cache.set_next_failure(CacheError::Timeout(Duration::from_millis(5)));
    cache.set_failure_count(1);
    let err = cache.mget(&["key".to_string()]).await.unwrap_err();
    assert!(err.is_timeout());

    // Failed calls are not counted as requests
    let counts = cache.request_counts();
    assert_eq!(counts.get, 0);
    assert_eq!(counts.set, 1);
    assert_eq!(counts.mget, 0);
}

#[tokio::test]
async fn test_fake_cache_lifecycle() {
    let cache = FakeCache::with_latency(Duration::ZERO);
    assert!(!cache.is_available());

    cache.connect().await.unwrap();
    assert!(cache.is_available());

    cache.disconnect().await;
    assert!(!cache.is_available());

    cache.destroy().await;
    assert!(!cache.is_available());
    assert!(matches!(cache.connect().await, Err(CacheError::Destroyed)));
    assert!(matches!(cache.get("key").await, Err(CacheError::Destroyed)));
    assert!(matches!(cache.del("key").await, Err(CacheError::Destroyed)));
}
