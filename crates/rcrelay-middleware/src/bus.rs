//! Broadcast bus for outbound status payloads.
//!
//! Uses [`tokio::sync::broadcast`] so that every subscriber receives every
//! payload without any single slow observer blocking the others.

use rcrelay_types::{RelayError, RobotStatus};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered payloads before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Shared status bus. Clone it cheaply – all clones share one channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<RobotStatus>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `status` to every current subscriber.
    ///
    /// Returns the number of receivers that were handed the payload, or a
    /// [`RelayError::Channel`] error when nobody is subscribed.
    pub fn publish(&self, status: RobotStatus) -> Result<usize, RelayError> {
        self.sender
            .send(status)
            .map_err(|e| RelayError::Channel(format!("status bus send error: {e}")))
    }

    /// Subscribe to all subsequently published payloads.
    pub fn subscribe(&self) -> broadcast::Receiver<RobotStatus> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
