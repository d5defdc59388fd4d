//! Pluggable persisted key/value trie. `feedstore` only ever needs
//! flat key lookups plus prefix listing, so the trait surface is
//! intentionally smaller than a real trie's — any ordered KV store can
//! implement it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait Trie: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
    async fn close(&self) -> Result<()>;
}

/// Default trie backend: an embedded `sled` database, the same engine
/// `kvs::engines::SledKvsEngine` (bonujel) uses for its persistent store.
/// `sled::Db` is internally `Arc`-based and thread-safe, so this wrapper
/// just shuttles blocking calls onto `spawn_blocking`.
#[derive(Clone)]
pub struct SledTrie {
    db: sled::Db,
}

impl SledTrie {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }
}

#[async_trait]
impl Trie for SledTrie {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let db = self.db.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            db.insert(key.as_bytes(), value)?;
            db.flush()?;
            Ok(())
        })
        .await
        .expect("sled put task panicked")
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let db = self.db.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>> {
            Ok(db.get(key.as_bytes())?.map(|ivec| ivec.to_vec()))
        })
        .await
        .expect("sled get task panicked")
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let db = self.db.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            db.remove(key.as_bytes())?;
            db.flush()?;
            Ok(())
        })
        .await
        .expect("sled delete task panicked")
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let db = self.db.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<(String, Vec<u8>)>> {
            let mut out = Vec::new();
            for entry in db.scan_prefix(prefix.as_bytes()) {
                let (k, v) = entry?;
                out.push((String::from_utf8_lossy(&k).into_owned(), v.to_vec()));
            }
            Ok(out)
        })
        .await
        .expect("sled list task panicked")
    }

    async fn close(&self) -> Result<()> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            db.flush()?;
            Ok(())
        })
        .await
        .expect("sled close task panicked")
    }
}

/// In-memory trie, used in tests and for ephemeral stores.
#[derive(Clone, Default)]
pub struct MemoryTrie {
    entries: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryTrie {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Trie for MemoryTrie {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_trie_lists_by_prefix() {
        let trie = MemoryTrie::new();
        trie.put("@feedstore/aa", b"one".to_vec()).await.unwrap();
        trie.put("@feedstore/bb", b"two".to_vec()).await.unwrap();
        trie.put("@other/cc", b"three".to_vec()).await.unwrap();

        let mut listed = trie.list("@feedstore/").await.unwrap();
        listed.sort();
        assert_eq!(
            listed,
            vec![
                ("@feedstore/aa".to_string(), b"one".to_vec()),
                ("@feedstore/bb".to_string(), b"two".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn sled_trie_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let trie = SledTrie::open(dir.path()).unwrap();
            trie.put("k", b"v".to_vec()).await.unwrap();
            trie.close().await.unwrap();
        }
        let trie = SledTrie::open(dir.path()).unwrap();
        assert_eq!(trie.get("k").await.unwrap(), Some(b"v".to_vec()));
    }
}
