//! Integration tests for the read-through secrets cache.

mod common;

use common::TestEnv;
use futures::future::join_all;
use secretlock::secrets::{
    refresh_fn, CacheOptions, ErrorCode, RefreshFn, SecretConfig, SecretString, SecretsCache,
    SetOptions, StoreOp,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

fn cache_for(env: &TestEnv, options: CacheOptions) -> SecretsCache {
    SecretsCache::new(env.store_handle(), options.with_lock_options(env.lock_options()))
}

/// Refresh function returning `value-<n>` and counting its calls.
fn counting_refresh() -> (RefreshFn, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let refresh = refresh_fn(move || {
        let n = c.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            tokio::task::yield_now().await;
            Ok::<_, std::io::Error>(format!("value-{}", n))
        }
    });
    (refresh, calls)
}

fn value_of(entry: &secretlock::secrets::CachedSecret) -> Option<&str> {
    entry.value().map(SecretString::expose_secret)
}

#[tokio::test]
async fn test_concurrent_reads_during_refresh_share_one_result() {
    let env = TestEnv::new();
    let name = env.create_secret("signing-key", SecretConfig::default()).await;
    let cache = cache_for(&env, CacheOptions::default());
    let (refresh, calls) = counting_refresh();

    cache.set(&name, None, Some(refresh), SetOptions::default()).await.unwrap();
    assert!(cache.is_refreshing(&name));

    let reads = (0..16).map(|i| {
        let cache = cache.clone();
        let name = name.clone();
        async move {
            if i % 2 == 0 {
                cache.get(&name).await
            } else {
                cache.update(&name).await
            }
        }
    });
    let results: Vec<_> = join_all(reads).await.into_iter().map(Result::unwrap).collect();

    let first = &results[0];
    assert!(results.iter().all(|entry| Arc::ptr_eq(entry, first)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(env.store.version_count(&name).await, 1);
    assert_eq!(value_of(first), Some("value-1"));
}

#[tokio::test]
async fn test_burst_of_forced_updates_rotates_once() {
    let env = TestEnv::new();
    let name = env.create_secret("session-key", SecretConfig::default()).await;
    let cache = cache_for(&env, CacheOptions::default());
    let (refresh, calls) = counting_refresh();
    cache.set(&name, Some("seed".into()), Some(refresh), SetOptions::default()).await.unwrap();

    let updates = (0..8).map(|_| cache.update(&name));
    let results: Vec<_> = join_all(updates).await.into_iter().map(Result::unwrap).collect();

    assert!(results.iter().all(|entry| Arc::ptr_eq(entry, &results[0])));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(env.store.call_count(StoreOp::AddVersion).await, 1);
}

#[tokio::test]
async fn test_failed_update_keeps_previous_value() {
    let env = TestEnv::new();
    let name = env.create_secret("flaky", SecretConfig::default()).await;
    let cache = cache_for(&env, CacheOptions::default());
    let failing = Arc::new(AtomicBool::new(true));
    let f = Arc::clone(&failing);
    let refresh = refresh_fn(move || {
        let fail = f.load(Ordering::SeqCst);
        async move {
            if fail {
                Err(std::io::Error::other("issuer offline"))
            } else {
                Ok("fresh".to_string())
            }
        }
    });
    cache.set(&name, Some("x".into()), Some(refresh), SetOptions::default()).await.unwrap();

    let err = cache.update(&name).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ProducerFailed);

    let entry = assert_ok!(cache.get(&name).await);
    assert_eq!(value_of(&entry), Some("x"));
    assert_eq!(env.store.version_count(&name).await, 0);

    failing.store(false, Ordering::SeqCst);
    let entry = assert_ok!(cache.update(&name).await);
    assert_eq!(value_of(&entry), Some("fresh"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_of_expired_entry_keeps_it_readable() {
    let env = TestEnv::new();
    let name = env.create_secret("expired", SecretConfig::default()).await;
    let cache = cache_for(&env, CacheOptions::default());
    let refresh = refresh_fn(|| async { Err::<String, _>(std::io::Error::other("down")) });
    cache
        .set(&name, Some("last-good".into()), Some(refresh), SetOptions::with_ttl(Duration::from_secs(5)))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(cache.get(&name).await.is_err());

    let entry = cache.peek(&name).await.unwrap();
    assert_eq!(value_of(&entry), Some("last-good"));
    assert_eq!(cache.remaining_ttl(&name).await, Some(Duration::ZERO));
}

#[tokio::test]
async fn test_update_without_refresh_fn_reads_store_value() {
    let env = TestEnv::new();
    let name = env.create_secret("read-only", SecretConfig::default()).await;
    let cache = cache_for(&env, CacheOptions::default());
    cache.set(&name, Some("x".into()), None, SetOptions::default()).await.unwrap();

    // No version yet: the local value stands.
    let entry = cache.update(&name).await.unwrap();
    assert_eq!(value_of(&entry), Some("x"));

    let v1 = env.add_version(&name, "from-store").await;
    let entry = cache.update(&name).await.unwrap();
    assert_eq!(value_of(&entry), Some("from-store"));
    assert_eq!(entry.version_name(), Some(v1.as_str()));
    assert_eq!(env.store.call_count(StoreOp::AddVersion).await, 1);
}

#[tokio::test]
async fn test_entry_without_value_or_refresh_fn_resolves_empty() {
    let env = TestEnv::new();
    let name = env.create_secret("empty", SecretConfig::default()).await;
    let cache = cache_for(&env, CacheOptions::default());
    cache.set(&name, None, None, SetOptions::default()).await.unwrap();

    let entry = assert_ok!(cache.get(&name).await);
    assert!(entry.value().is_none());
    assert!(entry.version_name().is_none());
    assert_eq!(env.store.write_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_fresh_entry_is_served_without_store_calls() {
    let env = TestEnv::new();
    let name = env.create_secret("hot", SecretConfig::default()).await;
    let cache = cache_for(&env, CacheOptions::default());
    cache
        .set(&name, Some("cached".into()), None, SetOptions::with_ttl(Duration::from_secs(60)))
        .await
        .unwrap();
    env.store.clear_calls().await;

    tokio::time::advance(Duration::from_secs(59)).await;
    let entry = cache.get(&name).await.unwrap();

    assert_eq!(value_of(&entry), Some("cached"));
    assert!(env.store.calls().await.is_empty());
    assert_eq!(cache.remaining_ttl(&name).await, Some(Duration::from_secs(1)));
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_rotates_and_restarts_ttl() {
    let env = TestEnv::new();
    let name = env.create_secret("rolling", SecretConfig::default()).await;
    let cache = cache_for(&env, CacheOptions::default());
    let (refresh, calls) = counting_refresh();
    cache
        .set(&name, None, Some(refresh), SetOptions::with_ttl(Duration::from_secs(30)))
        .await
        .unwrap();
    let first = cache.get(&name).await.unwrap();

    tokio::time::advance(Duration::from_secs(31)).await;
    let second = cache.get(&name).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(value_of(&second), Some("value-2"));
    assert_ne!(first.version_name(), second.version_name());
    assert_eq!(env.latest_value(&name).await, "value-2");
    assert_eq!(cache.remaining_ttl(&name).await, Some(Duration::from_secs(30)));
}

#[tokio::test(start_paused = true)]
async fn test_second_process_adopts_rotation_instead_of_rotating() {
    let env = TestEnv::new();
    let name = env.create_secret("shared", SecretConfig::default()).await;
    let ttl = SetOptions::with_ttl(Duration::from_secs(10));

    let (refresh_a, calls_a) = counting_refresh();
    let (refresh_b, calls_b) = counting_refresh();
    let a = cache_for(&env, CacheOptions::default());
    let b = cache_for(&env, CacheOptions::default());

    a.set(&name, None, Some(refresh_a), ttl).await.unwrap();
    let from_a = a.get(&name).await.unwrap();
    b.set(&name, None, Some(refresh_b), ttl).await.unwrap();
    let from_b = b.get(&name).await.unwrap();
    assert_eq!(from_a.version_name(), from_b.version_name());

    tokio::time::advance(Duration::from_secs(11)).await;
    let rotated = a.get(&name).await.unwrap();
    let adopted = b.get(&name).await.unwrap();

    assert_eq!(adopted.version_name(), rotated.version_name());
    assert_eq!(value_of(&adopted), value_of(&rotated));
    assert_eq!(calls_a.load(Ordering::SeqCst), 2);
    assert_eq!(calls_b.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_entry_is_served_while_refreshing() {
    let env = TestEnv::new();
    let name = env.create_secret("stale", SecretConfig::default()).await;
    let cache = cache_for(&env, CacheOptions::default().with_allow_stale(true));
    let (refresh, calls) = counting_refresh();
    cache
        .set(&name, None, Some(refresh), SetOptions::with_ttl(Duration::from_secs(5)))
        .await
        .unwrap();
    cache.get(&name).await.unwrap();

    tokio::time::advance(Duration::from_secs(6)).await;
    let served = cache.get(&name).await.unwrap();
    assert_eq!(value_of(&served), Some("value-1"));

    while cache.is_refreshing(&name) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let refreshed = cache.peek(&name).await.unwrap();
    assert_eq!(value_of(&refreshed), Some("value-2"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_get_of_unregistered_name_reads_latest_version() {
    let env = TestEnv::new();
    let name = env.create_secret("unregistered", SecretConfig::default()).await;
    env.add_version(&name, "remote").await;
    let cache = cache_for(&env, CacheOptions::default());

    let entry = cache.get(&name).await.unwrap();
    assert_eq!(value_of(&entry), Some("remote"));
    assert!(!entry.has_refresh());
    assert_eq!(cache.entry_count().await, 1);
}

#[tokio::test]
async fn test_get_of_malformed_name_is_rejected() {
    let env = TestEnv::new();
    let cache = cache_for(&env, CacheOptions::default());

    let err = cache.get("not/a/secret/name").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert_eq!(cache.entry_count().await, 0);
    assert!(env.store.calls().await.is_empty());
}
