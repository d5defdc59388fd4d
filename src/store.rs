//! `FeedStore`: the top-level orchestrator. Owns the descriptor map, drives
//! the store's own `closed → opening → opened → closing → closed` lifecycle,
//! persists descriptor records through [`IndexDb`], and fans out `feed`
//! events to live readers. Grounded in
//! `chronicle::lifecycle::StorageLifecycleManager::run_once`'s "do the
//! top-level thing, dispatch to the right per-unit handler, collect
//! stats/errors" orchestration style, scaled from "one pass over segments"
//! to "the full feed lifecycle: open, close, delete, read-stream creation".

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use log::{info, warn};
use tokio::sync::{broadcast, Mutex as TokioMutex};

use crate::batch_stream::BatchStreamOptions;
use crate::codec::{CodecRegistry, Metadata};
use crate::descriptor::{DescriptorEvent, FeedDescriptor, Status};
use crate::error::{Error, Result};
use crate::events::{EventBus, StoreEvent};
use crate::index_db::{index_key, IndexDb, IndexRecord, KEY_PREFIX};
use crate::keys::{hex_key, KeyPairFactory};
use crate::log_engine::{LogEngineFactory, LogHandle};
use crate::mutex::AsyncMutex;
use crate::readers::bulk::{BulkReader, FilterFn};
use crate::readers::ordered::OrderedReader;
use crate::readers::selective::SelectiveReader;
use crate::readers::{EnrichedRecord, Predicate};
use crate::storage::StorageBackend;
use crate::trie::Trie;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreStatus {
    Closed,
    Opening,
    Opened,
    Closing,
}

#[derive(Clone, Debug)]
pub struct FeedStoreOptions {
    pub open_timeout: Duration,
    pub close_timeout: Duration,
    pub default_batch_size: usize,
    pub default_value_encoding: String,
}

impl Default for FeedStoreOptions {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(10),
            default_batch_size: crate::batch_stream::DEFAULT_BATCH_SIZE,
            default_value_encoding: "binary".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct OpenFeedOptions {
    pub key: Option<Vec<u8>>,
    pub secret_key: Option<Vec<u8>>,
    pub value_encoding: Option<String>,
    pub metadata: Metadata,
}

/// The three descriptor lookup shapes `getDescriptors`/`getOpenFeed` accept
/// in the original `feed-store` library: a path, a discovery key, or an
/// arbitrary predicate over the descriptor. `&str` and `&[u8]` convert into
/// this automatically; build a predicate with [`DescriptorQuery::predicate`].
pub enum DescriptorQuery<'a> {
    Path(&'a str),
    DiscoveryKey(&'a [u8]),
    Predicate(Box<dyn Fn(&FeedDescriptor) -> bool + 'a>),
}

impl<'a> DescriptorQuery<'a> {
    pub fn predicate(f: impl Fn(&FeedDescriptor) -> bool + 'a) -> Self {
        DescriptorQuery::Predicate(Box::new(f))
    }
}

impl<'a> From<&'a str> for DescriptorQuery<'a> {
    fn from(path: &'a str) -> Self {
        DescriptorQuery::Path(path)
    }
}

impl<'a> From<&'a [u8]> for DescriptorQuery<'a> {
    fn from(discovery_key: &'a [u8]) -> Self {
        DescriptorQuery::DiscoveryKey(discovery_key)
    }
}

/// Selects one of the three reader strategies for [`FeedStore::create_read_stream`].
pub enum ReadMode {
    Bulk(FilterFn),
    Selective(Arc<dyn Predicate>),
    Ordered(Arc<dyn Predicate>),
}

/// A live read stream, wrapping whichever reader strategy was requested.
/// Cloning shares the same underlying reader; the store keeps one clone to
/// drive attach-on-feed-open while handing the other to the caller.
#[derive(Clone)]
pub enum ReadStream {
    Bulk(Arc<BulkReader>),
    Selective(Arc<SelectiveReader>, BatchStreamOptions),
    Ordered(Arc<OrderedReader>, BatchStreamOptions),
}

impl ReadStream {
    pub async fn recv(&self) -> Option<Result<EnrichedRecord>> {
        match self {
            ReadStream::Bulk(r) => r.recv().await,
            ReadStream::Selective(r, _) => r.recv().await,
            ReadStream::Ordered(r, _) => r.recv().await,
        }
    }

    async fn attach(&self, descriptor: Arc<FeedDescriptor>) -> Result<()> {
        match self {
            ReadStream::Bulk(r) => r.attach(descriptor).await,
            ReadStream::Selective(r, opts) => r.attach(descriptor, opts.clone()).await,
            ReadStream::Ordered(r, opts) => r.attach(descriptor, opts.clone()).await,
        }
    }

    fn fail(&self, err: Error) {
        match self {
            ReadStream::Bulk(r) => r.fail(err),
            ReadStream::Selective(r, _) => r.fail(err),
            ReadStream::Ordered(r, _) => r.fail(err),
        }
    }
}

struct StoreState {
    status: StoreStatus,
    descriptors: HashMap<String, Arc<FeedDescriptor>>,
    path_index: HashMap<String, String>,
    key_index: HashMap<String, String>,
}

/// Top-level handle over a collection of feeds rooted on one storage backend
/// and persisted through one trie. Construct with [`FeedStore::new`], then
/// call [`FeedStore::initialize`] before any other operation.
pub struct FeedStore {
    index: IndexDb,
    storage: Arc<dyn StorageBackend>,
    log_factory: Arc<dyn LogEngineFactory>,
    key_factory: Arc<dyn KeyPairFactory>,
    codecs: CodecRegistry,
    options: FeedStoreOptions,
    state: StdMutex<StoreState>,
    lock: AsyncMutex,
    events: EventBus,
    readers: TokioMutex<Vec<ReadStream>>,
}

impl FeedStore {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        trie: Arc<dyn Trie>,
        log_factory: Arc<dyn LogEngineFactory>,
        key_factory: Arc<dyn KeyPairFactory>,
        options: FeedStoreOptions,
    ) -> Self {
        Self {
            index: IndexDb::new(trie),
            storage,
            log_factory,
            key_factory,
            codecs: CodecRegistry::new(),
            options,
            state: StdMutex::new(StoreState {
                status: StoreStatus::Closed,
                descriptors: HashMap::new(),
                path_index: HashMap::new(),
                key_index: HashMap::new(),
            }),
            lock: AsyncMutex::new(),
            events: EventBus::new(),
            readers: TokioMutex::new(Vec::new()),
        }
    }

    pub fn status(&self) -> StoreStatus {
        self.state.lock().unwrap().status
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn ensure_serviceable(&self) -> Result<()> {
        match self.state.lock().unwrap().status {
            StoreStatus::Opening | StoreStatus::Opened => Ok(()),
            StoreStatus::Closing | StoreStatus::Closed => Err(Error::Closed),
        }
    }

    /// At-most-once: lists every persisted record, registers one descriptor
    /// per record (without opening its feed), and emits `ready`. A no-op if
    /// the store is not currently `closed`.
    pub async fn initialize(&self) -> Result<()> {
        let guard = self.lock.acquire().await;
        {
            let mut state = self.state.lock().unwrap();
            if state.status != StoreStatus::Closed {
                guard.release();
                return Ok(());
            }
            state.status = StoreStatus::Opening;
        }

        match self.load_descriptors().await {
            Ok(()) => {
                self.state.lock().unwrap().status = StoreStatus::Opened;
                info!(target: "feedstore::store", "store opened");
                self.events.emit(StoreEvent::Ready);
                guard.release();
                Ok(())
            }
            Err(err) => {
                self.state.lock().unwrap().status = StoreStatus::Closed;
                guard.release();
                Err(err)
            }
        }
    }

    async fn load_descriptors(&self) -> Result<()> {
        let records = self.index.list(KEY_PREFIX).await?;
        let mut state = self.state.lock().unwrap();
        for record in records {
            let descriptor = Arc::new(FeedDescriptor::new(
                record.path.clone(),
                record.key.clone(),
                record.secret_key,
                record.value_encoding,
                record.metadata,
                self.storage.clone(),
                self.log_factory.clone(),
                self.options.open_timeout,
                self.options.close_timeout,
            ));
            let discovery_hex = hex_key(&descriptor.discovery_key);
            let key_hex = hex_key(&descriptor.key);
            state.path_index.insert(descriptor.path.clone(), discovery_hex.clone());
            state.key_index.insert(key_hex, discovery_hex.clone());
            state.descriptors.insert(discovery_hex, descriptor);
        }
        Ok(())
    }

    /// Finds the descriptor for `path`, creating one (minting a key via the
    /// injected [`KeyPairFactory`] if none is supplied) if it does not
    /// already exist. Held under the store's mutex so that concurrent calls
    /// for the same new path never race into creating two descriptors.
    async fn find_or_create_descriptor(&self, path: &str, opts: OpenFeedOptions) -> Result<Arc<FeedDescriptor>> {
        let value_encoding = opts
            .value_encoding
            .clone()
            .unwrap_or_else(|| self.options.default_value_encoding.clone());
        self.codecs.resolve(&value_encoding)?;

        let guard = self.lock.acquire().await;

        let existing = self.state.lock().unwrap().path_index.get(path).cloned();
        if let Some(hex) = existing {
            let descriptor = self
                .state
                .lock()
                .unwrap()
                .descriptors
                .get(&hex)
                .cloned()
                .expect("path_index and descriptors are kept in sync");
            guard.release();
            if let Some(key) = &opts.key {
                if key != &descriptor.key {
                    return Err(Error::KeyMismatch { path: path.to_string() });
                }
            }
            return Ok(descriptor);
        }

        let (key, secret_key) = match opts.key {
            Some(k) => (k, opts.secret_key),
            None => {
                let pair = self.key_factory.generate().await;
                (pair.public, pair.secret)
            }
        };
        let key_hex = hex_key(&key);

        let duplicate = self.state.lock().unwrap().key_index.get(&key_hex).cloned();
        if let Some(existing_hex) = duplicate {
            let existing_path = self
                .state
                .lock()
                .unwrap()
                .descriptors
                .get(&existing_hex)
                .map(|d| d.path.clone())
                .unwrap_or_default();
            guard.release();
            return Err(Error::DuplicateKey { existing_path });
        }

        let descriptor = Arc::new(FeedDescriptor::new(
            path.to_string(),
            key,
            secret_key,
            value_encoding,
            opts.metadata,
            self.storage.clone(),
            self.log_factory.clone(),
            self.options.open_timeout,
            self.options.close_timeout,
        ));
        let discovery_hex = hex_key(&descriptor.discovery_key);
        {
            let mut state = self.state.lock().unwrap();
            state.descriptors.insert(discovery_hex.clone(), descriptor.clone());
            state.path_index.insert(path.to_string(), discovery_hex.clone());
            state.key_index.insert(key_hex, discovery_hex);
        }
        guard.release();
        Ok(descriptor)
    }

    /// Opens the feed bound to `path`, creating its descriptor if this is
    /// the first time `path` has been seen. On the real (not cached)
    /// open-to-opened transition, persists the descriptor and emits `feed`.
    pub async fn open_feed(&self, path: &str, opts: OpenFeedOptions) -> Result<Arc<dyn LogHandle>> {
        if path.is_empty() {
            return Err(Error::MissingPath);
        }
        self.ensure_serviceable()?;

        let descriptor = self.find_or_create_descriptor(path, opts).await?;
        let (handle, first_open) = descriptor.open().await?;
        if first_open {
            self.on_first_open(&descriptor).await?;
        }
        Ok(handle)
    }

    /// Opens every currently-registered descriptor matching `filter`
    /// (typically used after [`FeedStore::initialize`] to warm every known
    /// feed at once).
    pub async fn open_feeds(&self, filter: impl Fn(&FeedDescriptor) -> bool) -> Result<Vec<Arc<dyn LogHandle>>> {
        self.ensure_serviceable()?;
        let mut handles = Vec::new();
        for descriptor in self.get_descriptors() {
            if !filter(&descriptor) {
                continue;
            }
            let (handle, first_open) = descriptor.open().await?;
            if first_open {
                self.on_first_open(&descriptor).await?;
            }
            handles.push(handle);
        }
        Ok(handles)
    }

    async fn on_first_open(&self, descriptor: &Arc<FeedDescriptor>) -> Result<()> {
        let record = IndexRecord {
            path: descriptor.path.clone(),
            key: descriptor.key.clone(),
            secret_key: descriptor.secret_key.clone(),
            value_encoding: descriptor.value_encoding.clone(),
            metadata: descriptor.metadata(),
        };
        self.index.put(&index_key(&descriptor.key), &record).await?;
        self.events.emit(StoreEvent::Feed { descriptor: descriptor.clone() });

        let feed = descriptor.feed().expect("first_open implies the feed is opened");
        self.spawn_event_forwarding(descriptor.clone(), feed);
        self.spawn_metadata_forwarding(descriptor.clone());
        self.attach_to_readers(descriptor.clone()).await;
        Ok(())
    }

    /// Re-persists the index record whenever `setMetadata` fires an
    /// `Updated` watcher. Started once, at first persist, and runs for as
    /// long as the descriptor lives — `setMetadata` may be called any number
    /// of times across later close/reopen cycles of the same feed.
    fn spawn_metadata_forwarding(&self, descriptor: Arc<FeedDescriptor>) {
        let mut watch_rx = descriptor.watch();
        let index = self.index.clone();
        tokio::spawn(async move {
            loop {
                match watch_rx.recv().await {
                    Ok(DescriptorEvent::Updated) => {
                        let record = IndexRecord {
                            path: descriptor.path.clone(),
                            key: descriptor.key.clone(),
                            secret_key: descriptor.secret_key.clone(),
                            value_encoding: descriptor.value_encoding.clone(),
                            metadata: descriptor.metadata(),
                        };
                        if index.put(&index_key(&descriptor.key), &record).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Feeds events from the just-opened log into the store's own typed
    /// `append`/`download` events, tagged with the owning descriptor. Runs
    /// for the lifetime of the log handle; ends when its broadcast channel
    /// closes (the handle is dropped).
    fn spawn_event_forwarding(&self, descriptor: Arc<FeedDescriptor>, feed: Arc<dyn LogHandle>) {
        let mut append_rx = feed.subscribe_append();
        let events = self.events.clone();
        let d = descriptor.clone();
        tokio::spawn(async move {
            loop {
                match append_rx.recv().await {
                    Ok(event) => events.emit(StoreEvent::Append { descriptor: d.clone(), seq: event.seq }),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut download_rx = feed.subscribe_download();
        let events = self.events.clone();
        tokio::spawn(async move {
            loop {
                match download_rx.recv().await {
                    Ok(event) => events.emit(StoreEvent::Download {
                        descriptor: descriptor.clone(),
                        index: event.index,
                        data: event.data,
                    }),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Hands the new descriptor to every live reader. A reader whose attach
    /// fails is destroyed (its own error surfaced through its stream) and
    /// dropped from the live set — per spec, one reader's failure never
    /// propagates to the others.
    async fn attach_to_readers(&self, descriptor: Arc<FeedDescriptor>) {
        let mut readers = self.readers.lock().await;
        let mut i = 0;
        while i < readers.len() {
            match readers[i].attach(descriptor.clone()).await {
                Ok(()) => i += 1,
                Err(err) => {
                    warn!(target: "feedstore::store", "destroying reader after attach failure: {err}");
                    readers[i].fail(err);
                    readers.remove(i);
                }
            }
        }
    }

    pub async fn close_feed(&self, path: &str) -> Result<()> {
        let descriptor = self
            .get_descriptor_by_path(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        descriptor.close().await
    }

    /// Removes the index record and unregisters the descriptor. Does NOT
    /// close the feed — any handle a caller is still holding remains live.
    pub async fn delete_descriptor(&self, path: &str) -> Result<()> {
        let descriptor = self
            .get_descriptor_by_path(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        let guard = descriptor.lock().await;

        if let Err(err) = self.index.delete(&index_key(&descriptor.key)).await {
            guard.release();
            return Err(err);
        }

        {
            let mut state = self.state.lock().unwrap();
            let discovery_hex = hex_key(&descriptor.discovery_key);
            state.descriptors.remove(&discovery_hex);
            state.path_index.remove(path);
            state.key_index.remove(&hex_key(&descriptor.key));
        }
        self.events.emit(StoreEvent::DescriptorRemove { descriptor: descriptor.clone() });
        guard.release();
        Ok(())
    }

    pub fn get_descriptors(&self) -> Vec<Arc<FeedDescriptor>> {
        self.state.lock().unwrap().descriptors.values().cloned().collect()
    }

    pub fn get_descriptor_by_path(&self, path: &str) -> Option<Arc<FeedDescriptor>> {
        let state = self.state.lock().unwrap();
        let hex = state.path_index.get(path)?;
        state.descriptors.get(hex).cloned()
    }

    pub fn get_descriptor_by_discovery_key(&self, discovery_key: &[u8]) -> Option<Arc<FeedDescriptor>> {
        self.state.lock().unwrap().descriptors.get(&hex_key(discovery_key)).cloned()
    }

    /// Unified descriptor lookup: a `path`, a `discovery_key`, or an
    /// arbitrary predicate, mirroring the three `getDescriptors` call shapes
    /// the original `feed-store` library exposes.
    pub fn get_descriptors_filtered<'a>(&self, query: impl Into<DescriptorQuery<'a>>) -> Vec<Arc<FeedDescriptor>> {
        match query.into() {
            DescriptorQuery::Path(path) => self.get_descriptor_by_path(path).into_iter().collect(),
            DescriptorQuery::DiscoveryKey(key) => self.get_descriptor_by_discovery_key(key).into_iter().collect(),
            DescriptorQuery::Predicate(predicate) => {
                self.get_descriptors().into_iter().filter(|d| predicate(d)).collect()
            }
        }
    }

    pub fn get_open_feeds(&self) -> Vec<Arc<dyn LogHandle>> {
        self.get_descriptors().into_iter().filter_map(|d| d.feed()).collect()
    }

    /// Finds the first opened feed matching `query` (`path`, `discovery_key`,
    /// or predicate — see [`DescriptorQuery`]).
    pub fn get_open_feed<'a>(&self, query: impl Into<DescriptorQuery<'a>>) -> Option<Arc<dyn LogHandle>> {
        self.get_descriptors_filtered(query)
            .into_iter()
            .find(|d| d.status() == Status::Opened)
            .and_then(|d| d.feed())
    }

    /// Moves to `closing`, closes every descriptor concurrently, clears the
    /// descriptor map, closes the index, then moves to `closed` and emits
    /// `closed`. Reaches `closed` even if a descriptor or the index failed
    /// to close; the first such error is surfaced.
    pub async fn close(&self) -> Result<()> {
        let guard = self.lock.acquire().await;
        {
            let mut state = self.state.lock().unwrap();
            if state.status == StoreStatus::Closed {
                guard.release();
                return Ok(());
            }
            state.status = StoreStatus::Closing;
        }

        let descriptors = self.get_descriptors();
        let closes = descriptors.iter().map(|d| {
            let d = d.clone();
            async move { d.close().await }
        });
        let results = futures_util::future::join_all(closes).await;
        let first_descriptor_err = results.into_iter().find_map(|r| r.err());

        {
            let mut state = self.state.lock().unwrap();
            state.descriptors.clear();
            state.path_index.clear();
            state.key_index.clear();
        }

        let index_result = self.index.close().await;

        self.state.lock().unwrap().status = StoreStatus::Closed;
        info!(target: "feedstore::store", "store closed");
        self.events.emit(StoreEvent::Closed);
        guard.release();

        if let Some(err) = first_descriptor_err {
            return Err(err);
        }
        index_result
    }

    /// Instantiates one of the three reader strategies, attaches every
    /// currently-open descriptor to it, and registers it to receive future
    /// `feed` events. On a closing or closed store, returns a stream that
    /// immediately carries a `Closed` error instead of erroring synchronously.
    pub async fn create_read_stream(&self, mode: ReadMode) -> ReadStream {
        // Selective and Ordered readers always tail live: a reader that
        // attaches to a feed and then stops would silently miss every
        // message appended after attach, which the wake-on-readable
        // contract (spec §4.6/§4.7) promises never happens.
        let live = BatchStreamOptions {
            live: true,
            ..Default::default()
        };
        let stream = match mode {
            ReadMode::Bulk(filter) => ReadStream::Bulk(Arc::new(BulkReader::new(filter))),
            ReadMode::Selective(predicate) => ReadStream::Selective(Arc::new(SelectiveReader::new(predicate)), live),
            ReadMode::Ordered(predicate) => ReadStream::Ordered(Arc::new(OrderedReader::new(predicate)), live),
        };

        if matches!(self.status(), StoreStatus::Closing | StoreStatus::Closed) {
            stream.fail(Error::Closed);
            return stream;
        }

        for descriptor in self.get_descriptors() {
            if descriptor.status() != Status::Opened {
                continue;
            }
            if let Err(err) = stream.attach(descriptor).await {
                stream.fail(err);
                return stream;
            }
        }

        self.readers.lock().await.push(stream.clone());
        stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::RandomKeyPairFactory;
    use crate::log_engine::SegmentLogEngine;
    use crate::readers::bulk::accept_all;
    use crate::storage::MemoryStorage;
    use crate::trie::MemoryTrie;
    use async_trait::async_trait;

    fn new_store() -> FeedStore {
        FeedStore::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryTrie::new()),
            Arc::new(SegmentLogEngine),
            Arc::new(RandomKeyPairFactory),
            FeedStoreOptions::default(),
        )
    }

    #[tokio::test]
    async fn create_append_reopen_round_trips_through_the_index() {
        let trie = Arc::new(MemoryTrie::new());
        let storage = Arc::new(MemoryStorage::new());

        let store1 = FeedStore::new(
            storage.clone(),
            trie.clone(),
            Arc::new(SegmentLogEngine),
            Arc::new(RandomKeyPairFactory),
            FeedStoreOptions::default(),
        );
        store1.initialize().await.unwrap();
        let mut opts = OpenFeedOptions {
            value_encoding: Some("utf-8".to_string()),
            ..Default::default()
        };
        opts.metadata = Metadata::String("books".to_string());
        let f1 = store1.open_feed("/books", opts).await.unwrap();
        f1.append(b"Foundation and Empire".to_vec()).await.unwrap();
        store1.close().await.unwrap();

        let store2 = FeedStore::new(
            storage,
            trie,
            Arc::new(SegmentLogEngine),
            Arc::new(RandomKeyPairFactory),
            FeedStoreOptions::default(),
        );
        store2.initialize().await.unwrap();
        let descriptors = store2.get_descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].path, "/books");
        assert_eq!(descriptors[0].metadata(), Metadata::String("books".to_string()));

        let f2 = store2.open_feed("/books", OpenFeedOptions::default()).await.unwrap();
        assert_eq!(f2.get(0).await.unwrap(), Some(b"Foundation and Empire".to_vec()));
    }

    #[tokio::test]
    async fn concurrent_open_feed_returns_the_same_handle() {
        let store = Arc::new(new_store());
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

    #[tokio::test]
    async fn reopening_an_existing_path_with_a_different_key_is_a_key_mismatch() {
        let store = new_store();
        store.initialize().await.unwrap();
        store.open_feed("/books", OpenFeedOptions::default()).await.unwrap();

        let err = store
            .open_feed(
                "/books",
                OpenFeedOptions {
                    key: Some(b"not-the-real-key".to_vec()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KeyMismatch { .. }));
    }

    #[tokio::test]
    async fn opening_a_new_path_with_an_already_bound_key_is_a_duplicate_key() {
        let store = new_store();
        store.initialize().await.unwrap();
        let descriptor = {
            store.open_feed("/books", OpenFeedOptions::default()).await.unwrap();
            store.get_descriptor_by_path("/books").unwrap()
        };

        let err = store
            .open_feed(
                "/other",
                OpenFeedOptions {
                    key: Some(descriptor.key.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { .. }));
    }

    #[tokio::test]
    async fn delete_descriptor_removes_index_entry_but_leaves_handle_live() {
        let store = new_store();
        store.initialize().await.unwrap();
        let feed = store.open_feed("/books", OpenFeedOptions::default()).await.unwrap();
        feed.append(b"still alive".to_vec()).await.unwrap();

        store.delete_descriptor("/books").await.unwrap();
        assert!(store.get_descriptor_by_path("/books").is_none());
        assert_eq!(feed.get(0).await.unwrap(), Some(b"still alive".to_vec()));
    }

    #[tokio::test]
    async fn create_read_stream_on_a_closed_store_ends_with_a_closed_error() {
        let store = new_store();
        let stream = store.create_read_stream(ReadMode::Bulk(accept_all())).await;
        assert!(matches!(stream.recv().await, Some(Err(Error::Closed))));
    }

    #[tokio::test]
    async fn bulk_stream_hot_attaches_a_feed_opened_after_stream_creation() {
        let store = new_store();
        store.initialize().await.unwrap();
        let feed1 = store.open_feed("/feed1", OpenFeedOptions::default()).await.unwrap();

        let stream = store.create_read_stream(ReadMode::Bulk(accept_all())).await;
        feed1.append(b"m1".to_vec()).await.unwrap();
        let first = stream.recv().await.unwrap().unwrap();
        assert_eq!(first.data, b"m1".to_vec());

        let feed2 = store.open_feed("/feed2", OpenFeedOptions::default()).await.unwrap();
        feed2.append(b"m2".to_vec()).await.unwrap();
        let second = stream.recv().await.unwrap().unwrap();
        assert_eq!(second.data, b"m2".to_vec());
    }

    struct AcceptAll;
    #[async_trait]
    impl Predicate for AcceptAll {
        async fn evaluate(&self, _descriptor: &FeedDescriptor, _message: &EnrichedRecord) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn selective_stream_delivers_messages_from_a_feed_opened_after_attach() {
        let store = new_store();
        store.initialize().await.unwrap();
        let stream = store.create_read_stream(ReadMode::Selective(Arc::new(AcceptAll))).await;

        let feed = store.open_feed("/late", OpenFeedOptions::default()).await.unwrap();
        feed.append(b"hello".to_vec()).await.unwrap();
        let received = stream.recv().await.unwrap().unwrap();
        assert_eq!(received.data, b"hello".to_vec());
        assert_eq!(received.path, "/late");
    }

    #[tokio::test]
    async fn set_metadata_is_re_persisted_across_reopen() {
        let trie = Arc::new(MemoryTrie::new());
        let storage = Arc::new(MemoryStorage::new());

        let store1 = FeedStore::new(
            storage.clone(),
            trie.clone(),
            Arc::new(SegmentLogEngine),
            Arc::new(RandomKeyPairFactory),
            FeedStoreOptions::default(),
        );
        store1.initialize().await.unwrap();
        store1.open_feed("/books", OpenFeedOptions::default()).await.unwrap();
        let descriptor = store1.get_descriptor_by_path("/books").unwrap();
        descriptor.set_metadata(Metadata::String("updated".to_string())).await;

        // The watcher task runs on its own tokio task; give it a chance to
        // observe the Updated event and re-persist before closing the store.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        store1.close().await.unwrap();

        let store2 = FeedStore::new(
            storage,
            trie,
            Arc::new(SegmentLogEngine),
            Arc::new(RandomKeyPairFactory),
            FeedStoreOptions::default(),
        );
        store2.initialize().await.unwrap();
        let descriptor = store2.get_descriptor_by_path("/books").unwrap();
        assert_eq!(descriptor.metadata(), Metadata::String("updated".to_string()));
    }

    #[tokio::test]
    async fn get_descriptors_filtered_supports_path_discovery_key_and_predicate() {
        let store = new_store();
        store.initialize().await.unwrap();
        store.open_feed("/books", OpenFeedOptions::default()).await.unwrap();
        store.open_feed("/movies", OpenFeedOptions::default()).await.unwrap();
        let books = store.get_descriptor_by_path("/books").unwrap();

        let by_path = store.get_descriptors_filtered("/books");
        assert_eq!(by_path.len(), 1);
        assert_eq!(by_path[0].path, "/books");

        let by_discovery_key = store.get_descriptors_filtered(books.discovery_key.as_slice());
        assert_eq!(by_discovery_key.len(), 1);
        assert_eq!(by_discovery_key[0].path, "/books");

        let mut by_predicate = store.get_descriptors_filtered(DescriptorQuery::predicate(|d| d.path.starts_with('/')));
        by_predicate.sort_by(|a, b| a.path.cmp(&b.path));
        let paths: Vec<&str> = by_predicate.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["/books", "/movies"]);

        assert!(store.get_open_feed("/books").is_some());
        assert!(store.get_open_feed("/missing").is_none());
        assert!(store.get_open_feed(books.discovery_key.as_slice()).is_some());
        assert!(store
            .get_open_feed(DescriptorQuery::predicate(|d| d.path == "/movies"))
            .is_some());
    }
}
