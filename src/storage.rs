//! Pluggable block-storage abstraction.
//!
//! `StorageBackend::open(name)` returns a named, randomly-addressable byte
//! container. The log engine roots every block file for a feed under
//! `<hex(key)>/<name>`, so many feeds can share one backend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use memmap2::{MmapMut, MmapOptions};

use crate::error::{Error, Result};

#[async_trait]
pub trait RandomAccess: Send + Sync {
    async fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>>;
    async fn write(&self, offset: u64, data: &[u8]) -> Result<()>;
    async fn len(&self) -> Result<u64>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn open(&self, name: &str) -> Result<Arc<dyn RandomAccess>>;
}

/// In-memory storage backend. Each named container is a growable byte
/// buffer; nothing survives process restart.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    files: Arc<Mutex<HashMap<String, Arc<Mutex<Vec<u8>>>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn RandomAccess>> {
        let mut files = self.files.lock().unwrap();
        let buf = files
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone();
        Ok(Arc::new(MemoryHandle { buf }))
    }
}

struct MemoryHandle {
    buf: Arc<Mutex<Vec<u8>>>,
}

#[async_trait]
impl RandomAccess for MemoryHandle {
    async fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let buf = self.buf.lock().unwrap();
        let start = offset as usize;
        let end = start.checked_add(len).ok_or_else(|| Error::BadKey("offset overflow".into()))?;
        if end > buf.len() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "read past end of storage",
            )));
        }
        Ok(buf[start..end].to_vec())
    }

    async fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut buf = self.buf.lock().unwrap();
        let start = offset as usize;
        let end = start + data.len();
        if end > buf.len() {
            buf.resize(end, 0);
        }
        buf[start..end].copy_from_slice(data);
        Ok(())
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.buf.lock().unwrap().len() as u64)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// File-backed storage rooted at a directory. Each container is a
/// memory-mapped file that grows (by doubling) as writes exceed its current
/// capacity, the same create-then-grow shape the teacher's `MmapFile` uses
/// for segment files, generalized from a fixed segment size to an arbitrary
/// named container.
#[derive(Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn RandomAccess>> {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let handle = tokio::task::spawn_blocking(move || MmapHandle::open_or_create(&path))
            .await
            .expect("blocking mmap open task panicked")?;
        Ok(Arc::new(handle))
    }
}

const INITIAL_CAPACITY: u64 = 64 * 1024;

struct MmapHandle {
    inner: Mutex<MmapState>,
}

struct MmapState {
    file: std::fs::File,
    map: MmapMut,
    /// Logical length, distinct from the (possibly larger) mmap capacity.
    len: u64,
}

impl MmapHandle {
    fn open_or_create(path: &Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let existing_len = file.metadata()?.len();
        let capacity = existing_len.max(INITIAL_CAPACITY);
        file.set_len(capacity)?;
        let map = unsafe { MmapOptions::new().len(capacity as usize).map_mut(&file)? };
        Ok(Self {
            inner: Mutex::new(MmapState {
                file,
                map,
                len: existing_len,
            }),
        })
    }

    fn ensure_capacity(state: &mut MmapState, required: u64) -> Result<()> {
        if required <= state.map.len() as u64 {
            return Ok(());
        }
        let mut capacity = state.map.len() as u64;
        while capacity < required {
            capacity *= 2;
        }
        state.file.set_len(capacity)?;
        state.map = unsafe { MmapOptions::new().len(capacity as usize).map_mut(&state.file)? };
        Ok(())
    }
}

#[async_trait]
impl RandomAccess for MmapHandle {
    async fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let state = self.inner.lock().unwrap();
        let start = offset as usize;
        let end = start + len;
        if end as u64 > state.len {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "read past end of storage",
            )));
        }
        Ok(state.map[start..end].to_vec())
    }

    async fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        let end = offset + data.len() as u64;
        Self::ensure_capacity(&mut state, end)?;
        let start = offset as usize;
        state.map[start..start + data.len()].copy_from_slice(data);
        if end > state.len {
            state.len = end;
        }
        Ok(())
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.inner.lock().unwrap().len)
    }

    async fn close(&self) -> Result<()> {
        let state = self.inner.lock().unwrap();
        state.map.flush()?;
        state.file.sync_all()?;
        Ok(())
    }
}

/// Roots a block-file name under the feed's key, so multiple feeds coexist
/// on a single backend: `"<hex(key)>/<name>"`.
pub fn feed_path(hex_key: &str, name: &str) -> String {
    format!("{hex_key}/{name}")
}
