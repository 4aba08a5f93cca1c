use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use domains::{CounterStore, PostNumber};
use services::{IdentifierAllocator, RetryPolicy, POST_COUNTER};
use storage_adapters::MemoryDocumentStore;

fn patient_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 500,
        base_delay: Duration::from_micros(100),
        max_delay: Duration::from_millis(2),
        ..RetryPolicy::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_allocations_never_collide() {
    let store = Arc::new(MemoryDocumentStore::new());
    let allocator = Arc::new(IdentifierAllocator::new(store.clone(), patient_policy()));

    let handles: Vec<_> = (0..64)
        .map(|_| {
            let allocator = allocator.clone();
            tokio::spawn(async move { allocator.allocate().await })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut primary = 0u64;
    for handle in handles {
        let allocation = handle.await.unwrap();
        assert!(seen.insert(allocation.number()), "duplicate {allocation:?}");
        if !allocation.is_degraded() {
            primary += 1;
        }
    }

    assert_eq!(seen.len(), 64);
    assert_eq!(store.read(POST_COUNTER).await.unwrap(), Some(primary));
}

#[tokio::test]
async fn sequential_allocations_strictly_increase() {
    let store = Arc::new(MemoryDocumentStore::new());
    let allocator = IdentifierAllocator::new(store, RetryPolicy::default());

    let mut previous = PostNumber(0);
    for _ in 0..20 {
        let next = allocator.allocate().await;
        assert!(!next.is_degraded());
        assert!(next.number() > previous);
        previous = next.number();
    }
    assert_eq!(previous, PostNumber(20));
}

#[tokio::test]
async fn allocators_sharing_a_store_share_the_sequence() {
    let store = Arc::new(MemoryDocumentStore::new());
    let first = IdentifierAllocator::new(store.clone(), RetryPolicy::default());
    let second = IdentifierAllocator::new(store, RetryPolicy::default());

    assert_eq!(first.allocate().await.number(), PostNumber(1));
    assert_eq!(second.allocate().await.number(), PostNumber(2));
    assert_eq!(first.allocate().await.number(), PostNumber(3));
}
