//! Per-feed batch stream: pulls contiguous ranges from one feed's log in
//! batches, tagging the record that crosses the head recorded at creation
//! with `sync == true`. Grounded in `chronicle::core::log::LogReader` /
//! `chronicle::core::segment_cursor::SegmentCursor`'s sequential,
//! segment-spanning reads, generalized from "scan a segment" to "scan a
//! `LogHandle` with a configurable snapshot head and optional live tail".

use std::sync::Arc;

use crate::error::Result;
use crate::log_engine::LogHandle;

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Clone, Debug)]
pub struct Record {
    pub data: Vec<u8>,
    pub seq: u64,
    pub sync: bool,
}

#[derive(Clone, Debug)]
pub struct BatchStreamOptions {
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub live: bool,
    /// Whether to record the feed's length at creation as a sync head.
    /// Defaults to `true`.
    pub snapshot: bool,
    /// Start at the feed's current head instead of `start`.
    pub tail: bool,
    pub batch_size: usize,
}

impl Default for BatchStreamOptions {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            live: false,
            snapshot: true,
            tail: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Pull stream over one feed. `next_batch` returns `Ok(None)` once the
/// requested range is exhausted and the stream is not `live`; a `live`
/// stream instead returns `Ok(Some(vec![]))` when it has caught up, letting
/// the caller decide whether to poll again or suspend.
pub struct BatchStream {
    feed: Arc<dyn LogHandle>,
    next_seq: u64,
    end: Option<u64>,
    live: bool,
    sync_head: Option<u64>,
    batch_size: usize,
    finished: bool,
}

impl BatchStream {
    pub async fn new(feed: Arc<dyn LogHandle>, opts: BatchStreamOptions) -> Result<Self> {
        let length = feed.length().await;
        let start = if opts.tail { length } else { opts.start.unwrap_or(0) };
        let sync_head = if opts.snapshot && length > 0 {
            Some(length - 1)
        } else {
            None
        };
        Ok(Self {
            feed,
            next_seq: start,
            end: opts.end,
            live: opts.live,
            sync_head,
            batch_size: opts.batch_size.max(1),
            finished: false,
        })
    }

    /// The head recorded at creation, if this stream was opened with a
    /// snapshot and the feed was non-empty at the time.
    pub fn sync_head(&self) -> Option<u64> {
        self.sync_head
    }

    pub async fn next_batch(&mut self) -> Result<Option<Vec<Record>>> {
        if self.finished {
            return Ok(None);
        }
        if self.feed.closed() {
            self.finished = true;
            return Ok(None);
        }

        let length = self.feed.length().await;
        let upper_bound = match self.end {
            Some(end) => end.min(length),
            None => length,
        };

        if self.next_seq >= upper_bound {
            if self.live && self.end.is_none() {
                return Ok(Some(Vec::new()));
            }
            self.finished = true;
            return Ok(None);
        }

        let batch_end = (self.next_seq + self.batch_size as u64).min(upper_bound);
        let payloads = self.feed.get_batch(self.next_seq, batch_end).await?;
        let mut records: Vec<Record> = payloads
            .into_iter()
            .enumerate()
            .map(|(i, data)| Record {
                data,
                seq: self.next_seq + i as u64,
                sync: false,
            })
            .collect();

        if let Some(head) = self.sync_head {
            if let Some(record) = records.iter_mut().find(|r| r.seq == head) {
                record.sync = true;
                self.sync_head = None;
            }
        }

        self.next_seq += records.len() as u64;
        Ok(Some(records))
    }
}
