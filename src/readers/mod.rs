//! The three composable multi-feed reader strategies (spec §4.5–4.7): bulk
//! merge with sync detection, per-message selective admission, and strict
//! cross-feed ordered admission. All three attach to [`crate::descriptor::FeedDescriptor`]s
//! handed to them by [`crate::store::FeedStore`] and pull from that feed's
//! [`crate::batch_stream::BatchStream`].

pub mod bulk;
pub mod ordered;
pub mod selective;

use async_trait::async_trait;

use crate::batch_stream::Record;
use crate::codec::Metadata;
use crate::descriptor::FeedDescriptor;

/// A message enriched with the feed it came from, the shape both the
/// Selective and Ordered readers hand to their output stream.
#[derive(Clone, Debug)]
pub struct EnrichedRecord {
    pub data: Vec<u8>,
    pub seq: u64,
    pub key: Vec<u8>,
    pub path: String,
    pub metadata: Metadata,
}

impl EnrichedRecord {
    pub(crate) fn new(descriptor: &FeedDescriptor, record: Record) -> Self {
        Self {
            data: record.data,
            seq: record.seq,
            key: descriptor.key.clone(),
            path: descriptor.path.clone(),
            metadata: descriptor.metadata(),
        }
    }
}

/// Classifies each admission decision for the Selective and Ordered readers.
/// An asynchronous predicate, since evaluating admissibility may itself need
/// to consult external state (as spec.md's starvation-avoidance scenario
/// does, by counting prior admissions per feed).
#[async_trait]
pub trait Predicate: Send + Sync {
    async fn evaluate(&self, descriptor: &FeedDescriptor, message: &EnrichedRecord) -> bool;
}
