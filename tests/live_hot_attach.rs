//! Scenario 6 (spec §8): a live Bulk reader created while only `/feed1` is
//! open keeps delivering after `/feed2` is opened later, with no restart.

use std::sync::Arc;

use feedstore::keys::RandomKeyPairFactory;
use feedstore::log_engine::SegmentLogEngine;
use feedstore::readers::bulk::accept_all;
use feedstore::storage::MemoryStorage;
use feedstore::trie::MemoryTrie;
use feedstore::{FeedStore, FeedStoreOptions, OpenFeedOptions, ReadMode};

#[tokio::test]
async fn bulk_stream_survives_a_feed_opened_after_it_was_created() {
    let store = FeedStore::new(
        Arc::new(MemoryStorage::new()),
        Arc::new(MemoryTrie::new()),
        Arc::new(SegmentLogEngine),
        Arc::new(RandomKeyPairFactory),
        FeedStoreOptions::default(),
    );
    store.initialize().await.unwrap();

    let feed1 = store.open_feed("/feed1", OpenFeedOptions::default()).await.unwrap();
    feed1.append(b"feed1/msg0".to_vec()).await.unwrap();

    let stream = store.create_read_stream(ReadMode::Bulk(accept_all())).await;
    let first = stream.recv().await.unwrap().unwrap();
    assert_eq!(first.data, b"feed1/msg0".to_vec());

    let feed2 = store.open_feed("/feed2", OpenFeedOptions::default()).await.unwrap();
    feed2.append(b"feed2/msg0".to_vec()).await.unwrap();
    feed1.append(b"feed1/msg1".to_vec()).await.unwrap();

    let mut rest = vec![
        stream.recv().await.unwrap().unwrap().data,
        stream.recv().await.unwrap().unwrap().data,
    ];
    rest.sort();
    assert_eq!(rest, vec![b"feed1/msg1".to_vec(), b"feed2/msg0".to_vec()]);
}
