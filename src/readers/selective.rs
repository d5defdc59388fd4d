//! Selective reader: per-message admission against a caller-supplied
//! predicate, with live tailing and wake-on-readable. Grounded in
//! `chronicle::core::reader::QueueReader::wait`'s register-before-check wait
//! discipline (`src/core/reader.rs`), with `tokio::sync::Notify` standing in
//! for the futex ("Signal Suppression Protocol" in the teacher's comments) —
//! both implement the same race-free register/double-check/wait shape.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{trace, warn};
use tokio::sync::{mpsc, Mutex as TokioMutex, Notify};

use crate::batch_stream::{BatchStream, BatchStreamOptions, Record};
use crate::descriptor::FeedDescriptor;
use crate::error::{Error, Result};
use crate::keys::hex_key;
use crate::readers::{EnrichedRecord, Predicate};

struct FeedBuffer {
    descriptor: Arc<FeedDescriptor>,
    queue: VecDeque<Record>,
}

struct Inner {
    predicate: Arc<dyn Predicate>,
    buffers: TokioMutex<HashMap<String, FeedBuffer>>,
    wake: Notify,
    output_tx: mpsc::UnboundedSender<Result<EnrichedRecord>>,
}

/// No fixed cross-feed iteration order is promised — the Ordered reader
/// (`readers::ordered`) is the one that commits to attachment order.
pub struct SelectiveReader {
    inner: Arc<Inner>,
    output_rx: TokioMutex<mpsc::UnboundedReceiver<Result<EnrichedRecord>>>,
}

impl SelectiveReader {
    pub fn new(predicate: Arc<dyn Predicate>) -> Self {
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            predicate,
            buffers: TokioMutex::new(HashMap::new()),
            wake: Notify::new(),
            output_tx,
        });
        tokio::spawn(drive(inner.clone()));
        Self {
            inner,
            output_rx: TokioMutex::new(output_rx),
        }
    }

    pub async fn attach(&self, descriptor: Arc<FeedDescriptor>, opts: BatchStreamOptions) -> Result<()> {
        let Some(feed) = descriptor.feed() else {
            return Err(Error::ReaderFailed(format!("{} is not open", descriptor.path)));
        };
        let hex = hex_key(&descriptor.key);
        self.inner.buffers.lock().await.insert(
            hex.clone(),
            FeedBuffer {
                descriptor,
                queue: VecDeque::new(),
            },
        );
        let stream = BatchStream::new(feed.clone(), opts).await?;
        tokio::spawn(fill_feed(self.inner.clone(), hex, stream, feed));
        Ok(())
    }

    pub async fn recv(&self) -> Option<Result<EnrichedRecord>> {
        self.output_rx.lock().await.recv().await
    }

    pub(crate) fn fail(&self, err: Error) {
        warn!("selective reader destroyed: {err}");
        let _ = self.inner.output_tx.send(Err(err));
    }
}

async fn fill_feed(
    inner: Arc<Inner>,
    hex: String,
    mut stream: BatchStream,
    feed: Arc<dyn crate::log_engine::LogHandle>,
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
                {
                    let mut buffers = inner.buffers.lock().await;
                    if let Some(buf) = buffers.get_mut(&hex) {
                        buf.queue.extend(records);
                    }
                }
                inner.wake.notify_waiters();
            }
            Ok(None) => return,
            Err(err) => {
                let _ = inner.output_tx.send(Err(err));
                return;
            }
        }
    }
}

/// Single driver task: one active pass at a time, a deferred re-pass after
/// any admission (in case it unblocks an earlier rejection), and a
/// register-before-check wait on `wake` when a whole pass admits nothing.
async fn drive(inner: Arc<Inner>) {
    loop {
        let notified = inner.wake.notified();
        tokio::pin!(notified);

        let mut admitted_this_pass = false;
        let keys: Vec<String> = inner.buffers.lock().await.keys().cloned().collect();
        for key in keys {
            loop {
                let head = {
                    let buffers = inner.buffers.lock().await;
                    buffers
                        .get(&key)
                        .and_then(|buf| buf.queue.front().cloned().map(|r| (buf.descriptor.clone(), r)))
                };
                let Some((descriptor, record)) = head else {
                    break;
                };
                let candidate = EnrichedRecord::new(&descriptor, record);
                if inner.predicate.evaluate(&descriptor, &candidate).await {
                    trace!("selective reader admitting {}#{}", descriptor.path, candidate.seq);
                    let mut buffers = inner.buffers.lock().await;
                    if let Some(buf) = buffers.get_mut(&key) {
                        buf.queue.pop_front();
                    }
                    drop(buffers);
                    if inner.output_tx.send(Ok(candidate)).is_err() {
                        return;
                    }
                    admitted_this_pass = true;
                } else {
                    trace!("selective reader holding back {}#{}", descriptor.path, candidate.seq);
                    break;
                }
            }
        }

        if admitted_this_pass {
            tokio::task::yield_now().await;
            continue;
        }
        notified.await;
    }
}
