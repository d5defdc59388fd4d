//! Bulk reader: merges every matching feed into a single output stream with
//! no defined cross-feed interleaving, and computes a per-cohort sync
//! watermark. Grounded in `chronicle::merge::FanInReader` (`src/merge.rs`),
//! generalized from "merge N queue readers by timestamp" to "merge N async
//! batch streams with live hot-attach"; the fan-in itself is a task spawned
//! per attached feed funneling into one shared channel, the async analogue
//! of `FanInReader`'s shared `pending` slot array.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{trace, warn};
use tokio::sync::{broadcast, mpsc, Mutex as TokioMutex};

use crate::batch_stream::{BatchStream, BatchStreamOptions};
use crate::descriptor::FeedDescriptor;
use crate::error::{Error, Result};
use crate::keys::hex_key;
use crate::log_engine::LogHandle;
use crate::readers::EnrichedRecord;

/// What a caller-supplied filter decides for one descriptor.
pub enum FeedFilterDecision {
    Skip,
    Default,
    WithOptions(BatchStreamOptions),
}

pub type FilterFn = Arc<dyn Fn(&FeedDescriptor) -> FeedFilterDecision + Send + Sync>;

pub fn accept_all() -> FilterFn {
    Arc::new(|_descriptor| FeedFilterDecision::Default)
}

#[derive(Clone, Debug)]
pub struct SyncedEvent {
    pub watermarks: HashMap<String, u64>,
}

struct PendingSync {
    cohort_open: AtomicBool,
    targets: TokioMutex<HashMap<String, u64>>,
    completed: TokioMutex<HashMap<String, u64>>,
}

impl PendingSync {
    fn new() -> Self {
        Self {
            cohort_open: AtomicBool::new(true),
            targets: TokioMutex::new(HashMap::new()),
            completed: TokioMutex::new(HashMap::new()),
        }
    }

    /// Joins the sync cohort if it is still open and the feed has a target
    /// to sync to. Feeds attached after the cohort's first `synced` never
    /// reopen the watermark.
    async fn register(&self, hex: &str, target: Option<u64>) {
        if !self.cohort_open.load(Ordering::SeqCst) {
            return;
        }
        if let Some(target) = target {
            self.targets.lock().await.insert(hex.to_string(), target);
        }
    }

    async fn mark(&self, hex: &str, seq: u64) -> Option<HashMap<String, u64>> {
        let mut targets = self.targets.lock().await;
        let Some(&target) = targets.get(hex) else {
            return None;
        };
        if seq < target {
            return None;
        }
        targets.remove(hex);
        let remaining = targets.len();
        drop(targets);

        let mut completed = self.completed.lock().await;
        completed.insert(hex.to_string(), seq);
        if remaining == 0 {
            self.cohort_open.store(false, Ordering::SeqCst);
            Some(completed.clone())
        } else {
            None
        }
    }
}

pub struct BulkReader {
    filter: FilterFn,
    output_tx: mpsc::UnboundedSender<Result<EnrichedRecord>>,
    output_rx: TokioMutex<mpsc::UnboundedReceiver<Result<EnrichedRecord>>>,
    pending: Arc<PendingSync>,
    synced_tx: broadcast::Sender<SyncedEvent>,
}

impl BulkReader {
    pub fn new(filter: FilterFn) -> Self {
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (synced_tx, _) = broadcast::channel(16);
        Self {
            filter,
            output_tx,
            output_rx: TokioMutex::new(output_rx),
            pending: Arc::new(PendingSync::new()),
            synced_tx,
        }
    }

    pub fn subscribe_synced(&self) -> broadcast::Receiver<SyncedEvent> {
        self.synced_tx.subscribe()
    }

    pub async fn recv(&self) -> Option<Result<EnrichedRecord>> {
        self.output_rx.lock().await.recv().await
    }

    /// Pushes a terminal error through the output stream without tearing
    /// down the reader's internal state — used by the store when the reader
    /// is created against a closed store, or when an attach fails.
    pub(crate) fn fail(&self, err: Error) {
        warn!("bulk reader destroyed: {err}");
        let _ = self.output_tx.send(Err(err));
    }

    /// Called by the store once per feed open and once per pre-existing
    /// descriptor at stream creation.
    pub async fn attach(&self, descriptor: Arc<FeedDescriptor>) -> Result<()> {
        let opts = match (self.filter)(&descriptor) {
            FeedFilterDecision::Skip => return Ok(()),
            FeedFilterDecision::Default => BatchStreamOptions {
                live: true,
                ..Default::default()
            },
            FeedFilterDecision::WithOptions(opts) => opts,
        };
        let Some(feed) = descriptor.feed() else {
            return Err(crate::error::Error::ReaderFailed(format!(
                "{} is not open",
                descriptor.path
            )));
        };
        let stream = BatchStream::new(feed.clone(), opts).await?;
        let hex = hex_key(&descriptor.key);
        self.pending.register(&hex, stream.sync_head()).await;

        let output_tx = self.output_tx.clone();
        let pending = self.pending.clone();
        let synced_tx = self.synced_tx.clone();
        tokio::spawn(drive_feed(stream, feed, descriptor, hex, output_tx, pending, synced_tx));
        Ok(())
    }
}

async fn drive_feed(
    mut stream: BatchStream,
    feed: Arc<dyn LogHandle>,
    descriptor: Arc<FeedDescriptor>,
    hex: String,
    output_tx: mpsc::UnboundedSender<Result<EnrichedRecord>>,
    pending: Arc<PendingSync>,
    synced_tx: broadcast::Sender<SyncedEvent>,
) {
    let mut append_rx = feed.subscribe_append();
    loop {
        match stream.next_batch().await {
            Ok(Some(records)) if records.is_empty() => {
                if append_rx.recv().await.is_err() {
                    return;
                }
            }
            Ok(Some(records)) => {
                for record in records {
                    trace!("bulk reader forwarding {}#{}", descriptor.path, record.seq);
                    let sync_seq = record.sync.then_some(record.seq);
                    let enriched = EnrichedRecord::new(&descriptor, record);
                    if output_tx.send(Ok(enriched)).is_err() {
                        return;
                    }
                    if let Some(seq) = sync_seq {
                        if let Some(watermarks) = pending.mark(&hex, seq).await {
                            let _ = synced_tx.send(SyncedEvent { watermarks });
                        }
                    }
                }
            }
            Ok(None) => return,
            Err(err) => {
                warn!("bulk reader feed {} failed: {err}", descriptor.path);
                let _ = output_tx.send(Err(err));
                return;
            }
        }
    }
}
