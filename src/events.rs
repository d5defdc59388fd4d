//! Typed per-signal event surface for [`crate::store::FeedStore`], replacing
//! a loose event-emitter with an explicit observer channel. Grounded in
//! `chronicle::lifecycle`'s watcher callbacks, mechanically implemented with
//! `tokio::sync::broadcast` the same way `descriptor::FeedDescriptor` uses it
//! for its own `opened`/`updated`/`closed` watchers.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::descriptor::FeedDescriptor;

#[derive(Clone, Debug)]
pub enum StoreEvent {
    Ready,
    Closed,
    Feed { descriptor: Arc<FeedDescriptor> },
    DescriptorRemove { descriptor: Arc<FeedDescriptor> },
    Append { descriptor: Arc<FeedDescriptor>, seq: u64 },
    Download { descriptor: Arc<FeedDescriptor>, index: u64, data: Vec<u8> },
}

/// Cloneable handle onto the store's broadcast channel; cloning shares the
/// same underlying sender, so event-forwarding tasks spawned per feed can
/// each hold their own handle without borrowing the store.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    /// Silently drops the event if nobody is subscribed; the store has no
    /// subscriber of last resort.
    pub fn emit(&self, event: StoreEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
