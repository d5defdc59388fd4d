//! Per-feed persistable identity, state machine, and lock. Grounded in
//! `chronicle::lifecycle::StorageLifecycleManager`'s config/state split and
//! `chronicle::core::writer_lock`'s "acquire, attempt, always release,
//! propagate on failure" shape.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::broadcast;

use crate::codec::Metadata;
use crate::error::{Error, Result};
use crate::keys::{discovery_key, hex_key};
use crate::log_engine::{LogEngineFactory, LogHandle, LogOpenOptions};
use crate::mutex::AsyncMutex;
use crate::storage::StorageBackend;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Closed,
    Opening,
    Opened,
    Closing,
}

#[derive(Clone, Debug)]
pub enum DescriptorEvent {
    Opened,
    Updated,
    Closed,
}

struct State {
    feed: Option<Arc<dyn LogHandle>>,
    status: Status,
    metadata: Metadata,
}

pub struct FeedDescriptor {
    pub path: String,
    pub key: Vec<u8>,
    pub secret_key: Option<Vec<u8>>,
    pub discovery_key: Vec<u8>,
    pub value_encoding: String,
    state: StdMutex<State>,
    lock: AsyncMutex,
    events: broadcast::Sender<DescriptorEvent>,
    storage: Arc<dyn StorageBackend>,
    log_factory: Arc<dyn LogEngineFactory>,
    open_timeout: Duration,
    close_timeout: Duration,
}

impl std::fmt::Debug for FeedDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedDescriptor")
            .field("path", &self.path)
            .field("discovery_key", &self.discovery_key)
            .field("value_encoding", &self.value_encoding)
            .finish_non_exhaustive()
    }
}

impl FeedDescriptor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        path: String,
        key: Vec<u8>,
        secret_key: Option<Vec<u8>>,
        value_encoding: String,
        metadata: Metadata,
        storage: Arc<dyn StorageBackend>,
        log_factory: Arc<dyn LogEngineFactory>,
        open_timeout: Duration,
        close_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            discovery_key: discovery_key(&key),
            path,
            key,
            secret_key,
            value_encoding,
            state: StdMutex::new(State {
                feed: None,
                status: Status::Closed,
                metadata,
            }),
            lock: AsyncMutex::new(),
            events,
            storage,
            log_factory,
            open_timeout,
            close_timeout,
        }
    }

    pub fn status(&self) -> Status {
        self.state.lock().unwrap().status
    }

    pub fn feed(&self) -> Option<Arc<dyn LogHandle>> {
        self.state.lock().unwrap().feed.clone()
    }

    pub fn metadata(&self) -> Metadata {
        self.state.lock().unwrap().metadata.clone()
    }

    /// Exposes the descriptor's mutex for cross-cutting critical sections
    /// (deletion) that must serialize with open/close/setMetadata without
    /// themselves being one of those operations.
    pub async fn lock(&self) -> crate::mutex::Release {
        self.lock.acquire().await
    }

    pub fn watch(&self) -> broadcast::Receiver<DescriptorEvent> {
        self.events.subscribe()
    }

    fn set_status(&self, status: Status) {
        self.state.lock().unwrap().status = status;
    }

    /// Opens the underlying feed, or returns the existing handle if already
    /// opened. On any failure the state reverts to `Closed` and the lock is
    /// released before the error is surfaced — a subsequent `lock()` must
    /// succeed immediately.
    ///
    /// The returned `bool` is `true` exactly when this call performed the
    /// real open-to-opened transition (as opposed to returning a cached
    /// handle) — the store uses it to persist and fan out the `feed` event
    /// exactly once per open-to-close interval even under concurrent callers.
    pub async fn open(&self) -> Result<(Arc<dyn LogHandle>, bool)> {
        let guard = self.lock.acquire().await;

        if let Some(feed) = {
            let state = self.state.lock().unwrap();
            (state.status == Status::Opened).then(|| state.feed.clone()).flatten()
        } {
            guard.release();
            return Ok((feed, false));
        }

        self.set_status(Status::Opening);
        debug!(target: "feedstore::descriptor", "opening {}", self.path);

        let hex = hex_key(&self.key);
        let opts = LogOpenOptions {
            secret_key: self.secret_key.clone(),
        };
        let opened = tokio::time::timeout(
            self.open_timeout,
            self.log_factory.open(self.storage.clone(), &hex, opts),
        )
        .await;

        let handle = match opened {
            Err(_) => {
                self.set_status(Status::Closed);
                guard.release();
                return Err(Error::Timeout(self.open_timeout));
            }
            Ok(Err(err)) => {
                self.set_status(Status::Closed);
                guard.release();
                return Err(err);
            }
            Ok(Ok(handle)) => handle,
        };

        match tokio::time::timeout(self.open_timeout, handle.ready()).await {
            Err(_) => {
                self.set_status(Status::Closed);
                guard.release();
                return Err(Error::Timeout(self.open_timeout));
            }
            Ok(Err(err)) => {
                self.set_status(Status::Closed);
                guard.release();
                return Err(err);
            }
            Ok(Ok(())) => {}
        }

        {
            let mut state = self.state.lock().unwrap();
            state.feed = Some(handle.clone());
            state.status = Status::Opened;
        }
        let _ = self.events.send(DescriptorEvent::Opened);
        guard.release();
        Ok((handle, true))
    }

    /// Idempotent: a no-op when the descriptor is not `Opened`. On failure
    /// the descriptor is left in `Closing` — stuck there until a later close
    /// succeeds — rather than reverted, matching the lifecycle this crate's
    /// store expects.
    pub async fn close(&self) -> Result<()> {
        let guard = self.lock.acquire().await;

        let feed = {
            let state = self.state.lock().unwrap();
            if state.status != Status::Opened {
                None
            } else {
                state.feed.clone()
            }
        };
        let Some(feed) = feed else {
            guard.release();
            return Ok(());
        };

        self.set_status(Status::Closing);
        match tokio::time::timeout(self.close_timeout, feed.close()).await {
            Err(_) => {
                guard.release();
                Err(Error::Timeout(self.close_timeout))
            }
            Ok(Err(err)) => {
                warn!(target: "feedstore::descriptor", "close failed for {}: {err}", self.path);
                guard.release();
                Err(err)
            }
            Ok(Ok(())) => {
                {
                    let mut state = self.state.lock().unwrap();
                    state.feed = None;
                    state.status = Status::Closed;
                }
                let _ = self.events.send(DescriptorEvent::Closed);
                guard.release();
                Ok(())
            }
        }
    }

    pub async fn set_metadata(&self, metadata: Metadata) {
        let guard = self.lock.acquire().await;
        self.state.lock().unwrap().metadata = metadata;
        let _ = self.events.send(DescriptorEvent::Updated);
        guard.release();
    }
}
