//! Broadcast fan-out — delivery of board events to bound connections.
//!
//! Each connection registers a bounded `mpsc` sender. Publishing is a
//! non-blocking `try_send` per subscriber, performed while the board lock is
//! held, so every subscriber's queue receives events in application order and
//! a slow or dead receiver never stalls the board.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::frame::Frame;
use crate::services::presence::SessionId;

/// Identifies one transport connection. Distinct from the session id, which
/// a client may reuse across connections.
pub type ConnectionId = Uuid;

#[derive(Debug)]
struct Subscriber {
    session_id: SessionId,
    tx: mpsc::Sender<Frame>,
}

#[derive(Debug, Default)]
pub struct Fanout {
    subscribers: HashMap<ConnectionId, Subscriber>,
}

impl Fanout {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, connection_id: ConnectionId, session_id: SessionId, tx: mpsc::Sender<Frame>) {
        self.subscribers.insert(connection_id, Subscriber { session_id, tx });
    }

    /// Remove a connection. Returns the session it was bound as.
    pub fn unsubscribe(&mut self, connection_id: ConnectionId) -> Option<SessionId> {
        self.subscribers.remove(&connection_id).map(|s| s.session_id)
    }

    /// Whether any connection is currently bound as `session_id`.
    #[must_use]
    pub fn has_session(&self, session_id: &str) -> bool {
        self.subscribers.values().any(|s| s.session_id == session_id)
    }

    #[must_use]
    pub fn session_of(&self, connection_id: ConnectionId) -> Option<&str> {
        self.subscribers
            .get(&connection_id)
            .map(|s| s.session_id.as_str())
    }

    /// Deliver `frame` to every subscriber except `exclude`. Returns the
    /// number of queues the frame was placed on.
    pub fn publish(&self, frame: &Frame, exclude: Option<ConnectionId>) -> usize {
        let mut delivered = 0;
        for (connection_id, sub) in &self.subscribers {
            if exclude == Some(*connection_id) {
                continue;
            }
            // Best-effort: a full or closed queue drops this frame for that client.
            // Closed subscribers stay until the gateway parts the connection.
            match sub.tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(%connection_id, syscall = %frame.syscall, "fanout: client queue full; dropping frame");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%connection_id, syscall = %frame.syscall, "fanout: client queue closed; awaiting part");
                }
            }
        }
        delivered
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
