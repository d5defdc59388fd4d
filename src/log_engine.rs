//! The log engine: storage of blocks, signing, and the download/replication
//! protocol are out of scope for this crate (spec §1) and are consumed
//! through [`LogHandle`]. [`SegmentLogEngine`] is the default, in-process
//! implementation used when no external engine is injected — enough to make
//! the rest of the crate runnable and testable.
//!
//! Framing follows the teacher's checksummed-record shape
//! (`chronicle::header::MessageHeader`), shrunk from a 64-byte aligned
//! header (seq/timestamp/type/crc) to the 8 bytes this crate actually needs
//! (length + crc32), since sequence number here is just the record's index
//! and there is no type/timestamp concept at this layer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};

use crate::error::{Error, Result};
use crate::storage::{feed_path, RandomAccess, StorageBackend};

const HEADER_LEN: usize = 8;

fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

fn decode_frame_header(bytes: &[u8]) -> Result<(u32, u32)> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::engine(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "truncated record header",
        )));
    }
    let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let crc = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    Ok((len, crc))
}

#[derive(Clone, Debug)]
pub struct AppendEvent {
    pub seq: u64,
}

#[derive(Clone, Debug)]
pub struct DownloadEvent {
    pub index: u64,
    pub data: Vec<u8>,
}

/// Options carried into `LogEngineFactory::open`.
#[derive(Clone, Debug, Default)]
pub struct LogOpenOptions {
    pub secret_key: Option<Vec<u8>>,
}

#[async_trait]
pub trait LogHandle: Send + Sync {
    async fn ready(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
    async fn append(&self, payload: Vec<u8>) -> Result<u64>;
    async fn get(&self, seq: u64) -> Result<Option<Vec<u8>>>;
    async fn get_batch(&self, start: u64, end: u64) -> Result<Vec<Vec<u8>>>;
    async fn length(&self) -> u64;
    fn opened(&self) -> bool;
    fn closed(&self) -> bool;
    fn subscribe_append(&self) -> broadcast::Receiver<AppendEvent>;
    fn subscribe_download(&self) -> broadcast::Receiver<DownloadEvent>;
}

impl std::fmt::Debug for dyn LogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHandle").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait LogEngineFactory: Send + Sync {
    async fn open(
        &self,
        storage: Arc<dyn StorageBackend>,
        hex_key: &str,
        opts: LogOpenOptions,
    ) -> Result<Arc<dyn LogHandle>>;
}

pub struct SegmentLogEngine;

#[async_trait]
impl LogEngineFactory for SegmentLogEngine {
    async fn open(
        &self,
        storage: Arc<dyn StorageBackend>,
        hex_key: &str,
        opts: LogOpenOptions,
    ) -> Result<Arc<dyn LogHandle>> {
        let data = storage.open(&feed_path(hex_key, "data")).await?;
        let offsets = rebuild_offset_index(data.as_ref()).await?;
        let next_seq = offsets.len() as u64;
        let write_offset = data.len().await?;
        let (append_tx, _) = broadcast::channel(128);
        let (download_tx, _) = broadcast::channel(128);
        Ok(Arc::new(SegmentLog {
            data,
            secret_key: opts.secret_key,
            state: Mutex::new(LogState {
                offsets,
                write_offset,
            }),
            opened: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            next_seq: AtomicU64::new(next_seq),
            append_tx,
            download_tx,
        }))
    }
}

/// Scans the data file once at open time to recover the offset index a
/// fresh process needs in order to serve `get(seq)` without rescanning on
/// every read — the same role `chronicle::core::segment_cursor` plays when
/// resuming a reader after restart.
async fn rebuild_offset_index(data: &dyn RandomAccess) -> Result<Vec<(u64, u32)>> {
    let mut offsets = Vec::new();
    let mut cursor = 0u64;
    let total = data.len().await?;
    while cursor < total {
        let header = data.read(cursor, HEADER_LEN).await?;
        let (len, crc) = decode_frame_header(&header)?;
        let payload_offset = cursor + HEADER_LEN as u64;
        let payload = data.read(payload_offset, len as usize).await?;
        if crc32fast::hash(&payload) != crc {
            return Err(Error::engine(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "checksum mismatch while rebuilding offset index",
            )));
        }
        offsets.push((payload_offset, len));
        cursor = payload_offset + len as u64;
    }
    Ok(offsets)
}

struct LogState {
    offsets: Vec<(u64, u32)>,
    write_offset: u64,
}

struct SegmentLog {
    data: Arc<dyn RandomAccess>,
    secret_key: Option<Vec<u8>>,
    state: Mutex<LogState>,
    opened: AtomicBool,
    closed: AtomicBool,
    next_seq: AtomicU64,
    append_tx: broadcast::Sender<AppendEvent>,
    download_tx: broadcast::Sender<DownloadEvent>,
}

#[async_trait]
impl LogHandle for SegmentLog {
    async fn ready(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.opened.store(false, Ordering::SeqCst);
        self.data.close().await
    }

    async fn append(&self, payload: Vec<u8>) -> Result<u64> {
        if self.secret_key.is_none() {
            return Err(Error::BadSecretKey(
                "feed opened without a secret key cannot append".into(),
            ));
        }
        let mut state = self.state.lock().await;
        let frame = encode_frame(&payload);
        let offset = state.write_offset;
        self.data.write(offset, &frame).await?;
        let payload_offset = offset + HEADER_LEN as u64;
        state.offsets.push((payload_offset, payload.len() as u32));
        state.write_offset = payload_offset + payload.len() as u64;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let _ = self.append_tx.send(AppendEvent { seq });
        Ok(seq)
    }

    async fn get(&self, seq: u64) -> Result<Option<Vec<u8>>> {
        let state = self.state.lock().await;
        let Some(&(offset, len)) = state.offsets.get(seq as usize) else {
            return Ok(None);
        };
        drop(state);
        Ok(Some(self.data.read(offset, len as usize).await?))
    }

    async fn get_batch(&self, start: u64, end: u64) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        for seq in start..end {
            match self.get(seq).await? {
                Some(payload) => out.push(payload),
                None => break,
            }
        }
        Ok(out)
    }

    async fn length(&self) -> u64 {
        self.state.lock().await.offsets.len() as u64
    }

    fn opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn subscribe_append(&self) -> broadcast::Receiver<AppendEvent> {
        self.append_tx.subscribe()
    }

    fn subscribe_download(&self) -> broadcast::Receiver<DownloadEvent> {
        self.download_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    async fn open_writable(storage: &Arc<dyn StorageBackend>, hex_key: &str) -> Arc<dyn LogHandle> {
        SegmentLogEngine
            .open(
                storage.clone(),
                hex_key,
                LogOpenOptions {
                    secret_key: Some(vec![9, 9, 9]),
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn append_then_get_round_trips_in_order() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let log = open_writable(&storage, "aa").await;
        let seq0 = log.append(b"one".to_vec()).await.unwrap();
        let seq1 = log.append(b"two".to_vec()).await.unwrap();
        assert_eq!((seq0, seq1), (0, 1));
        assert_eq!(log.get(0).await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(log.get(1).await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(log.length().await, 2);
    }

    #[tokio::test]
    async fn append_without_secret_key_is_rejected() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let log = SegmentLogEngine
            .open(storage, "aa", LogOpenOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            log.append(b"nope".to_vec()).await,
            Err(Error::BadSecretKey(_))
        ));
    }

    #[tokio::test]
    async fn reopen_recovers_offset_index() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let log = open_writable(&storage, "aa").await;
        log.append(b"Foundation and Empire".to_vec()).await.unwrap();
        log.close().await.unwrap();

        let reopened = SegmentLogEngine
            .open(storage, "aa", LogOpenOptions::default())
            .await
            .unwrap();
        assert_eq!(reopened.length().await, 1);
        assert_eq!(
            reopened.get(0).await.unwrap(),
            Some(b"Foundation and Empire".to_vec())
        );
    }

    #[tokio::test]
    async fn append_after_reopen_continues_the_sequence() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let log = open_writable(&storage, "aa").await;
        log.append(b"one".to_vec()).await.unwrap();
        log.append(b"two".to_vec()).await.unwrap();
        log.close().await.unwrap();

        let reopened = open_writable(&storage, "aa").await;
        assert_eq!(reopened.length().await, 2);
        let seq = reopened.append(b"three".to_vec()).await.unwrap();
        assert_eq!(seq, 2);
        assert_eq!(reopened.get(0).await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(reopened.get(1).await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(reopened.get(2).await.unwrap(), Some(b"three".to_vec()));
    }

    #[tokio::test]
    async fn get_batch_stops_at_current_length() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let log = open_writable(&storage, "aa").await;
        for i in 0..5u8 {
            log.append(vec![i]).await.unwrap();
        }
        let batch = log.get_batch(2, 100).await.unwrap();
        assert_eq!(batch, vec![vec![2], vec![3], vec![4]]);
    }

    #[tokio::test]
    async fn append_emits_append_event() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let log = open_writable(&storage, "aa").await;
        let mut rx = log.subscribe_append();
        log.append(b"hi".to_vec()).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.seq, 0);
    }
}
