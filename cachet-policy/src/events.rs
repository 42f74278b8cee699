//! Error channel for failures the policy absorbs.

use cachet_core::CachetError;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Something a caller did not see as an error but an operator may care
/// about: read failures turned into misses, write failures after
/// generation, failed deletes after a generator error, generator errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyEvent {
    Error {
        segment: String,
        id: String,
        error: CachetError,
    },
}

#[derive(Debug)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<PolicyEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PolicyEvent> {
        self.sender.subscribe()
    }

    /// No-op without subscribers.
    pub fn error(&self, segment: &str, id: &str, error: &CachetError) {
        let _ = self.sender.send(PolicyEvent::Error {
            segment: segment.to_string(),
            id: id.to_string(),
            error: error.clone(),
        });
    }
}
