//! Concurrent access tests for the shared lookup context.
//!
//! A long-lived lookup service answers many calls at once through one
//! [`TagLookup`]. These tests drive it from parallel tasks to catch lost
//! updates and torn cache entries.

#![allow(clippy::expect_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use autosign_inventory::{
    InventoryClient, LookupConfig, LookupScope, MemoryInventory, ResolutionType, TagLookup,
    TaggedResource, TtlCache,
};
use tokio::task::JoinSet;

/// Number of concurrent tasks.
const CONCURRENCY: usize = 16;

/// Number of lookups each task performs.
const OPS_PER_TASK: usize = 50;

fn inventory() -> MemoryInventory {
    MemoryInventory::with_resources(
        "1234",
        (0..8).map(|i| TaggedResource::new([format!("hiera:role=r{i}")])),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_lookups_agree() {
    let account = inventory();
    let client = InventoryClient::new(vec![Arc::new(account.clone())]);
    let lookup = Arc::new(TagLookup::new(
        client,
        LookupConfig::new("hiera:").with_cache_timeout(Duration::from_secs(300)),
    ));

    let mut set = JoinSet::new();
    for _ in 0..CONCURRENCY {
        let lookup = Arc::clone(&lookup);
        set.spawn(async move {
            for _ in 0..OPS_PER_TASK {
                let values = lookup
                    .lookup(
                        Some("hiera:role=r3"),
                        &LookupScope::new(),
                        None,
                        ResolutionType::Priority,
                    )
                    .await
                    .expect("lookup should succeed");
                assert_eq!(values, Some(vec!["r3".to_string()]));
            }
        });
    }
    while let Some(joined) = set.join_next().await {
        joined.expect("task panicked");
    }

    // Racing misses may each search once; after that every call is a hit.
    assert!(account.search_count() <= CONCURRENCY as u64);
    assert_eq!(lookup.cache().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_writers_leave_whole_entries() {
    let cache = Arc::new(TtlCache::new(Some(Duration::from_secs(300))));

    let mut set = JoinSet::new();
    for task in 0..CONCURRENCY {
        let cache = Arc::clone(&cache);
        set.spawn(async move {
            for i in 0..OPS_PER_TASK {
                let key = format!("key-{}", i % 4);
                cache.put(key.clone(), vec![format!("t{task}"); 4]);
                if let Some(values) = cache.get(&key) {
                    assert_eq!(values.len(), 4);
                    assert!(values.iter().all(|v| v == &values[0]), "torn entry: {values:?}");
                }
                tokio::task::yield_now().await;
            }
        });
    }
    while let Some(joined) = set.join_next().await {
        joined.expect("task panicked");
    }

    assert_eq!(cache.len(), 4);
}
