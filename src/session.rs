//! Session lifecycle broadcast.
//!
//! The refresher emits [`SessionEvent::Expired`] when the refresh token is
//! gone or rejected and the credentials have been cleared. Whoever owns the
//! user-facing surface subscribes and routes back to sign-in. Delivery is
//! in-process and best effort: events are not persisted and late subscribers
//! do not see earlier emissions.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const SIGNAL_CAPACITY: usize = 16;

/// Events published on a [`SessionSignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Re-authentication is required.
    Expired,
}

/// Cloneable broadcast handle; clones publish to the same subscribers.
#[derive(Debug, Clone)]
pub struct SessionSignal {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish [`SessionEvent::Expired`]; returns how many subscribers it reached.
    pub fn emit_expired(&self) -> usize {
        // No subscribers is fine.
        self.tx.send(SessionEvent::Expired).unwrap_or(0)
    }
}
