//! `feedstore`: a collection of append-only, cryptographically-keyed
//! message logs ("feeds") rooted on a pluggable block-storage backend, with
//! unified read streams that merge and filter records across feeds while
//! they are being appended to live.
//!
//! The log engine itself (block storage, signing, replication), the
//! block-storage backend, the persisted trie, and codec registration are
//! external collaborators, consumed through the traits in [`log_engine`],
//! [`storage`], [`trie`], and [`codec`] respectively. The crate's own
//! responsibility is feed lifecycle and locking ([`descriptor`]),
//! persistent indexing ([`index_db`]), and the three multi-feed reader
//! strategies ([`readers`]), all orchestrated by [`store::FeedStore`].

pub mod batch_stream;
pub mod codec;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod index_db;
pub mod keys;
pub mod log_engine;
pub mod mutex;
pub mod readers;
pub mod storage;
pub mod store;
pub mod trie;

pub use error::{Error, Result};
pub use store::{DescriptorQuery, FeedStore, FeedStoreOptions, OpenFeedOptions, ReadMode, ReadStream};
