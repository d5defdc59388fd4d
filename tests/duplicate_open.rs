//! Scenario 2 (spec §8): concurrent `openFeed` calls for the same path
//! return the same handle; the underlying log is instantiated exactly once.

use std::sync::Arc;

use feedstore::keys::RandomKeyPairFactory;
use feedstore::log_engine::SegmentLogEngine;
use feedstore::storage::MemoryStorage;
use feedstore::trie::MemoryTrie;
use feedstore::{FeedStore, FeedStoreOptions, OpenFeedOptions};

#[tokio::test]
async fn concurrent_open_feed_returns_the_same_handle() {
    let store = Arc::new(FeedStore::new(
        Arc::new(MemoryStorage::new()),
        Arc::new(MemoryTrie::new()),
        Arc::new(SegmentLogEngine),
        Arc::new(RandomKeyPairFactory),
        FeedStoreOptions::default(),
    ));
    store.initialize().await.unwrap();

    let a_store = store.clone();
    let b_store = store.clone();
    let (a, b) = tokio::join!(
        a_store.open_feed("/users", OpenFeedOptions::default()),
        b_store.open_feed("/users", OpenFeedOptions::default()),
    );
    let a = a.unwrap();
    let b = b.unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    a.append(b"alice".to_vec()).await.unwrap();
    assert_eq!(b.get(0).await.unwrap(), Some(b"alice".to_vec()));
}
