//! Ordered reader: the same predicate contract as the Selective reader, but
//! committing to a fixed, attachment-order pass over feeds and never
//! advancing a feed past a rejected head-of-buffer message. Grounded in the
//! same wait discipline as `readers::selective`
//! (`chronicle::core::reader::QueueReader::wait`), plus
//! `StorageLifecycleManager::run_once`'s "one deterministic pass over every
//! unit per call" iteration style, transposed from segments to attached
//! feeds.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{trace, warn};
use tokio::sync::{mpsc, Mutex as TokioMutex, Notify};

use crate::batch_stream::{BatchStream, BatchStreamOptions, Record};
use crate::descriptor::FeedDescriptor;
use crate::error::{Error, Result};
use crate::keys::hex_key;
use crate::log_engine::LogHandle;
use crate::readers::{EnrichedRecord, Predicate};

struct FeedBuffer {
    descriptor: Arc<FeedDescriptor>,
    queue: VecDeque<Record>,
}

struct Inner {
    predicate: Arc<dyn Predicate>,
    order: TokioMutex<Vec<String>>,
    buffers: TokioMutex<HashMap<String, FeedBuffer>>,
    wake: Notify,
    output_tx: mpsc::UnboundedSender<Result<EnrichedRecord>>,
}

pub struct OrderedReader {
    inner: Arc<Inner>,
    output_rx: TokioMutex<mpsc::UnboundedReceiver<Result<EnrichedRecord>>>,
}

impl OrderedReader {
    pub fn new(predicate: Arc<dyn Predicate>) -> Self {
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            predicate,
            order: TokioMutex::new(Vec::new()),
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

    /// Feeds are visited in the order they were attached, for every pass.
    pub async fn attach(&self, descriptor: Arc<FeedDescriptor>, opts: BatchStreamOptions) -> Result<()> {
        let Some(feed) = descriptor.feed() else {
            return Err(Error::ReaderFailed(format!("{} is not open", descriptor.path)));
        };
        let hex = hex_key(&descriptor.key);
        {
            let mut buffers = self.inner.buffers.lock().await;
            buffers.insert(
                hex.clone(),
                FeedBuffer {
                    descriptor,
                    queue: VecDeque::new(),
                },
            );
            self.inner.order.lock().await.push(hex.clone());
        }
        let stream = BatchStream::new(feed.clone(), opts).await?;
        tokio::spawn(fill_feed(self.inner.clone(), hex, stream, feed));
        Ok(())
    }

    pub async fn recv(&self) -> Option<Result<EnrichedRecord>> {
        self.output_rx.lock().await.recv().await
    }

    pub(crate) fn fail(&self, err: Error) {
        warn!("ordered reader destroyed: {err}");
        let _ = self.inner.output_tx.send(Err(err));
    }
}

async fn fill_feed(inner: Arc<Inner>, hex: String, mut stream: BatchStream, feed: Arc<dyn LogHandle>) {
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

/// One deterministic pass per wake: visit feeds in attachment order, and
/// for each stop at the first rejected (or absent) head instead of skipping
/// to the next message in that feed.
async fn drive(inner: Arc<Inner>) {
    loop {
        let notified = inner.wake.notified();
        tokio::pin!(notified);

        let mut admitted_this_pass = false;
        let order: Vec<String> = inner.order.lock().await.clone();
        for key in order {
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
                    trace!("ordered reader admitting {}#{}", descriptor.path, candidate.seq);
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
                    // Head-of-line blocking: do not advance this feed past a
                    // rejection; move on to the next feed in order instead.
                    trace!("ordered reader blocked on {}#{}", descriptor.path, candidate.seq);
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
