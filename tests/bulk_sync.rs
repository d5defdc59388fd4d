//! Scenario 4 (spec §8): the Bulk reader's `synced` event fires exactly once
//! per attach cohort, keyed by `hex(key) -> seq`; a later stream created
//! after a third feed is opened gets a cohort covering all three feeds.

use std::collections::HashMap;
use std::sync::Arc;

use feedstore::keys::{hex_key, RandomKeyPairFactory};
use feedstore::log_engine::SegmentLogEngine;
use feedstore::readers::bulk::accept_all;
use feedstore::storage::MemoryStorage;
use feedstore::trie::MemoryTrie;
use feedstore::{FeedStore, FeedStoreOptions, OpenFeedOptions, ReadMode, ReadStream};

fn as_bulk(stream: &ReadStream) -> Arc<feedstore::readers::bulk::BulkReader> {
    match stream {
        ReadStream::Bulk(reader) => reader.clone(),
        _ => panic!("expected a bulk stream"),
    }
}

#[tokio::test]
async fn synced_cohort_grows_to_include_feeds_open_before_stream_creation() {
    let store = FeedStore::new(
        Arc::new(MemoryStorage::new()),
        Arc::new(MemoryTrie::new()),
        Arc::new(SegmentLogEngine),
        Arc::new(RandomKeyPairFactory),
        FeedStoreOptions::default(),
    );
    store.initialize().await.unwrap();

    let feed_a = store.open_feed("/a", OpenFeedOptions::default()).await.unwrap();
    let feed_b = store.open_feed("/b", OpenFeedOptions::default()).await.unwrap();
    feed_a.append(b"a0".to_vec()).await.unwrap();
    feed_b.append(b"b0".to_vec()).await.unwrap();

    let a_key = hex_key(&store.get_descriptor_by_path("/a").unwrap().key);
    let b_key = hex_key(&store.get_descriptor_by_path("/b").unwrap().key);

    let stream1 = store.create_read_stream(ReadMode::Bulk(accept_all())).await;
    let bulk1 = as_bulk(&stream1);
    let mut synced1 = bulk1.subscribe_synced();

    stream1.recv().await.unwrap().unwrap();
    stream1.recv().await.unwrap().unwrap();
    let event1 = synced1.recv().await.unwrap();
    let expected1: HashMap<String, u64> = [(a_key.clone(), 0), (b_key.clone(), 0)].into_iter().collect();
    assert_eq!(event1.watermarks, expected1);

    let feed_c = store.open_feed("/c", OpenFeedOptions::default()).await.unwrap();
    feed_c.append(b"quz1".to_vec()).await.unwrap();
    let c_key = hex_key(&store.get_descriptor_by_path("/c").unwrap().key);

    // Late attachment to stream1's already-closed cohort must not reopen it.
    assert!(synced1.try_recv().is_err());

    let stream2 = store.create_read_stream(ReadMode::Bulk(accept_all())).await;
    let bulk2 = as_bulk(&stream2);
    let mut synced2 = bulk2.subscribe_synced();

    let mut payloads = Vec::new();
    for _ in 0..3 {
        payloads.push(stream2.recv().await.unwrap().unwrap().data);
    }
    payloads.sort();
    assert_eq!(payloads, vec![b"a0".to_vec(), b"b0".to_vec(), b"quz1".to_vec()]);

    let event2 = synced2.recv().await.unwrap();
    let expected2: HashMap<String, u64> = [(a_key, 0), (b_key, 0), (c_key, 0)].into_iter().collect();
    assert_eq!(event2.watermarks, expected2);
}
