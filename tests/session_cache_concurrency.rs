//! Concurrent acquisition behaviour of the model session cache

mod common;

use bgremove_service::ModelSessionCache;
use common::CountingLoader;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn concurrent_first_use_loads_once() {
    let loader = Arc::new(CountingLoader::new().slow(Duration::from_millis(100)));
    let cache = Arc::new(ModelSessionCache::unbounded(loader.clone()));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.acquire("u2net").await })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }

    assert_eq!(loader.load_count("u2net"), 1);
    assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));

    let stats = cache.stats();
    assert_eq!(stats.acquisitions, 16);
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.hits, 15);
}

#[tokio::test(start_paused = true)]
async fn distinct_models_load_in_parallel() {
    let loader = Arc::new(CountingLoader::new().slow(Duration::from_millis(200)));
    let cache = Arc::new(ModelSessionCache::unbounded(loader.clone()));

    let start = tokio::time::Instant::now();
    let (a, b) = tokio::join!(cache.acquire("u2net"), cache.acquire("silueta"));
    a.unwrap();
    b.unwrap();

    // Serialised loads would take 400ms
    assert!(start.elapsed() < Duration::from_millis(400));
    assert_eq!(cache.cached_models(), vec!["silueta", "u2net"]);
}

#[tokio::test]
async fn sequential_acquires_return_the_same_handle() {
    let loader = Arc::new(CountingLoader::new());
    let cache = ModelSessionCache::unbounded(loader.clone());

    let first = cache.acquire("isnet-general-use").await.unwrap();
    let second = cache.acquire("isnet-general-use").await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(loader.load_count("isnet-general-use"), 1);
}

#[tokio::test]
async fn failed_loads_are_retried_not_cached() {
    let loader = Arc::new(CountingLoader::new().broken("broken"));
    let cache = ModelSessionCache::unbounded(loader.clone());

    assert!(cache.acquire("broken").await.is_err());
    assert!(cache.acquire("broken").await.is_err());

    assert_eq!(loader.load_count("broken"), 2);
    assert!(!cache.contains("broken"));
    assert_eq!(cache.stats().load_failures, 2);
}

#[tokio::test]
async fn lru_eviction_keeps_held_handles_valid() {
    let loader = Arc::new(CountingLoader::new());
    let cache = ModelSessionCache::new(loader.clone(), 2);

    let held = cache.acquire("u2net").await.unwrap();
    cache.acquire("u2netp").await.unwrap();
    cache.acquire("silueta").await.unwrap();

    assert_eq!(cache.len(), 2);
    assert!(!cache.contains("u2net"));
    assert_eq!(cache.stats().evictions, 1);
    assert_eq!(held.model_id(), "u2net");

    let reloaded = cache.acquire("u2net").await.unwrap();
    assert!(!Arc::ptr_eq(&held, &reloaded));
    assert_eq!(loader.load_count("u2net"), 2);
}
