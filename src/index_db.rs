//! Thin K/V adapter over a [`Trie`], persisting [`IndexRecord`]s under
//! `"@feedstore/<hex(key)>"`.

use std::sync::Arc;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::codec::Metadata;
use crate::error::Result;
use crate::keys::hex_key;
use crate::trie::Trie;

pub const KEY_PREFIX: &str = "@feedstore/";

pub fn index_key(public_key: &[u8]) -> String {
    format!("{KEY_PREFIX}{}", hex_key(public_key))
}

/// The persisted shape of a [`crate::descriptor::FeedDescriptor`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub path: String,
    pub key: Vec<u8>,
    pub secret_key: Option<Vec<u8>>,
    pub value_encoding: String,
    pub metadata: Metadata,
}

#[derive(Clone)]
pub struct IndexDb {
    trie: Arc<dyn Trie>,
}

impl IndexDb {
    pub fn new(trie: Arc<dyn Trie>) -> Self {
        Self { trie }
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<IndexRecord>> {
        let entries = self.trie.list(prefix).await?;
        let mut records = Vec::with_capacity(entries.len());
        for (_, value) in entries {
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    pub async fn get(&self, key: &str) -> Result<Option<IndexRecord>> {
        match self.trie.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Writes `record` under `key`, unless the stored value already encodes
    /// to the same bytes — rewriting a record on every open (as opposed to
    /// only when it changes) would amplify writes against the trie with no
    /// observable benefit.
    pub async fn put(&self, key: &str, record: &IndexRecord) -> Result<()> {
        let encoded = serde_json::to_vec(record)?;
        if let Some(existing) = self.trie.get(key).await? {
            if existing == encoded {
                trace!("index put elided for {key}: unchanged");
                return Ok(());
            }
        }
        self.trie.put(key, encoded).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.trie.delete(key).await
    }

    pub async fn close(&self) -> Result<()> {
        self.trie.close().await
    }
}
