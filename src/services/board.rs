//! Board — the serialization point for one collaborative scene.
//!
//! DESIGN
//! ======
//! A board owns its primitive store, presence tracker, history stacks, and
//! fan-out subscribers inside a single `tokio::sync::Mutex`. Every operation
//! takes the lock, mutates, records history, and publishes the resulting
//! event before releasing it. Holding the lock across publish is what makes
//! every subscriber observe events in application order; publish itself is
//! a non-blocking `try_send`, so the critical section never waits on I/O.
//!
//! Boards never lock each other, so independent boards proceed in parallel.
//!
//! EVENTS
//! ======
//! - direct mutations (`create`/`update`/`delete`, cursor moves) go to every
//!   connection except the originator, who already applied them locally
//! - undo/redo results and presence changes go to every connection,
//!   including the originator
//! - `update` events carry the full post-merge field set so peers converge
//!   regardless of which fields the originator supplied

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, TryLockError, mpsc};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::frame::{self, Data, Frame, to_data};
use crate::primitive::{Primitive, Shape};
use crate::services::fanout::{ConnectionId, Fanout};
use crate::services::history::{HistoryEntry, HistoryError, HistoryManager};
use crate::services::presence::{Presence, PresencePatch, PresenceTracker, SessionId};
use crate::services::store::{PrimitiveError, PrimitiveStore, StoredPrimitive};

pub type BoardId = String;

// =============================================================================
// TYPES
// =============================================================================

/// Point-in-time view of a board sent to a joining connection.
#[derive(Debug, Clone, Serialize)]
pub struct SyncPayload {
    pub primitives: Vec<Primitive>,
    pub presence: Vec<Presence>,
}

/// Everything a board owns. Only reachable through `Board::lock`.
pub struct BoardState {
    pub primitives: PrimitiveStore,
    pub presence: PresenceTracker,
    pub history: HistoryManager,
    pub fanout: Fanout,
    /// Set when the last connection leaves; cleared on join.
    pub idle_since: Option<Instant>,
}

pub struct Board {
    id: BoardId,
    state: Mutex<BoardState>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateEvent<'a> {
    id: &'a str,
    changes: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PresenceEvent<'a> {
    session_id: &'a str,
    #[serde(flatten)]
    patch: PresencePatch,
}

// =============================================================================
// CONSTRUCTION
// =============================================================================

impl Board {
    #[must_use]
    pub fn new(id: impl Into<BoardId>, history_limit: usize) -> Self {
        Self::hydrated(id, Vec::new(), history_limit)
    }

    /// Build a board from persisted records.
    #[must_use]
    pub fn hydrated(id: impl Into<BoardId>, records: Vec<StoredPrimitive>, history_limit: usize) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(BoardState {
                primitives: PrimitiveStore::hydrate(records),
                presence: PresenceTracker::new(),
                history: HistoryManager::new(history_limit),
                fanout: Fanout::new(),
                idle_since: Some(Instant::now()),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Acquire the board's serialization slot.
    pub async fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().await
    }

    /// Acquire the lock only if it is free right now.
    ///
    /// # Errors
    ///
    /// Returns `TryLockError` if another task holds the lock.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, BoardState>, TryLockError> {
        self.state.try_lock()
    }

    fn event(&self, syscall: &str, data: Data) -> Frame {
        Frame::request(syscall, data).with_board_id(self.id.as_str())
    }
}

// =============================================================================
// JOIN / PART
// =============================================================================

impl Board {
    /// Bind a connection as `presence` and return a consistent snapshot.
    ///
    /// The snapshot and the subscription happen under the same lock, so every
    /// later mutation reaches the joiner's queue and none is reflected twice.
    pub async fn join(&self, connection_id: ConnectionId, presence: Presence, tx: mpsc::Sender<Frame>) -> SyncPayload {
        let mut st = self.lock().await;
        st.presence.join(presence.clone());
        st.fanout
            .subscribe(connection_id, presence.session_id.clone(), tx);
        st.idle_since = None;

        let joined = self
            .event(frame::PRESENCE_JOINED, to_data(&presence))
            .with_from(presence.session_id.as_str());
        st.fanout.publish(&joined, Some(connection_id));

        info!(
            board_id = %self.id,
            %connection_id,
            session_id = %presence.session_id,
            connections = st.fanout.len(),
            present = st.presence.len(),
            primitives = st.primitives.live_count(),
            "client joined board"
        );
        SyncPayload { primitives: st.primitives.snapshot(), presence: st.presence.snapshot() }
    }

    /// Unbind a connection. The presence entry is removed and `presence.left`
    /// published only if no other connection holds the same session.
    /// Returns the session that left, if any.
    pub async fn part(&self, connection_id: ConnectionId) -> Option<SessionId> {
        let mut st = self.lock().await;
        let session_id = st.fanout.unsubscribe(connection_id)?;
        if st.fanout.is_empty() {
            st.idle_since = Some(Instant::now());
        }

        info!(board_id = %self.id, %connection_id, remaining = st.fanout.len(), "client left board");

        if st.fanout.has_session(&session_id) {
            return None;
        }
        st.presence.leave(&session_id);
        let left = self
            .event(frame::PRESENCE_LEFT, Data::new())
            .with_data("sessionId", session_id.as_str());
        st.fanout.publish(&left, None);
        Some(session_id)
    }

    /// Consistent copy of the live primitives and presence records.
    pub async fn snapshot(&self) -> SyncPayload {
        let st = self.lock().await;
        SyncPayload { primitives: st.primitives.snapshot(), presence: st.presence.snapshot() }
    }
}

// =============================================================================
// PRIMITIVE MUTATIONS
// =============================================================================

impl Board {
    /// # Errors
    ///
    /// Returns `DuplicateId` if the id was already used on this board.
    pub async fn create_primitive(&self, connection_id: ConnectionId, primitive: Primitive) -> Result<(), PrimitiveError> {
        let mut st = self.lock().await;
        let created = st.primitives.create(primitive)?.clone();
        st.history
            .record(HistoryEntry::Create(created.id.clone()));

        let event = self.originated(&st, frame::PRIMITIVE_CREATE, to_data(&created), connection_id);
        st.fanout.publish(&event, Some(connection_id));
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `NotFound` for a missing or deleted id and `MalformedChanges`
    /// if the change set does not fit the primitive kind. A change set that
    /// leaves every field as it was is accepted without history or fan-out.
    pub async fn update_primitive(
        &self,
        connection_id: ConnectionId,
        id: &str,
        changes: serde_json::Value,
    ) -> Result<(), PrimitiveError> {
        let mut st = self.lock().await;
        let (before, after) = st.primitives.patch(id, changes)?;
        if before == after {
            return Ok(());
        }
        let data = to_data(&UpdateEvent { id, changes: after.fields() });
        st.history
            .record(HistoryEntry::Update { id: id.to_owned(), before, after });

        let event = self.originated(&st, frame::PRIMITIVE_UPDATE, data, connection_id);
        st.fanout.publish(&event, Some(connection_id));
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `NotFound` for a missing or already deleted id.
    pub async fn delete_primitive(&self, connection_id: ConnectionId, id: &str) -> Result<(), PrimitiveError> {
        let mut st = self.lock().await;
        let snapshot = st.primitives.soft_delete(id)?;
        st.history.record(HistoryEntry::Delete(snapshot));

        let event = self.originated(&st, frame::PRIMITIVE_DELETE, id_data(id), connection_id);
        st.fanout.publish(&event, Some(connection_id));
        Ok(())
    }

    fn originated(&self, st: &BoardState, syscall: &str, data: Data, connection_id: ConnectionId) -> Frame {
        let event = self.event(syscall, data);
        match st.fanout.session_of(connection_id) {
            Some(session_id) => event.with_from(session_id),
            None => event,
        }
    }
}

// =============================================================================
// HISTORY
// =============================================================================

impl Board {
    /// Revert the most recent mutation on this board, whoever made it, and
    /// publish the resulting event to every connection.
    ///
    /// # Errors
    ///
    /// Returns `NothingToUndo` on an empty stack and `TargetMissing` if the
    /// recorded primitive can no longer be reverted. In both cases nothing is
    /// published and the history stacks are left as they were.
    pub async fn undo(&self) -> Result<(), HistoryError> {
        let mut st = self.lock().await;
        let entry = st.history.undo().ok_or(HistoryError::NothingToUndo)?;
        debug!(
            board_id = %self.id,
            target = entry.target(),
            undo = st.history.undo_len(),
            redo = st.history.redo_len(),
            "undo"
        );
        let event = match self.revert(&mut st, entry) {
            Ok(event) => event,
            Err(e) => {
                st.history.rollback_undo();
                return Err(e);
            }
        };
        if let Some(event) = event {
            st.fanout.publish(&event, None);
        }
        Ok(())
    }

    /// Re-apply the most recently undone mutation and publish the result to
    /// every connection.
    ///
    /// # Errors
    ///
    /// Returns `NothingToRedo` on an empty stack and `TargetMissing` if the
    /// recorded primitive can no longer be re-applied.
    pub async fn redo(&self) -> Result<(), HistoryError> {
        let mut st = self.lock().await;
        let entry = st.history.redo().ok_or(HistoryError::NothingToRedo)?;
        debug!(
            board_id = %self.id,
            target = entry.target(),
            undo = st.history.undo_len(),
            redo = st.history.redo_len(),
            "redo"
        );
        let event = match self.reapply(&mut st, entry) {
            Ok(event) => event,
            Err(e) => {
                st.history.rollback_redo();
                return Err(e);
            }
        };
        if let Some(event) = event {
            st.fanout.publish(&event, None);
        }
        Ok(())
    }

    fn revert(&self, st: &mut BoardState, entry: HistoryEntry) -> Result<Option<Frame>, HistoryError> {
        match entry {
            HistoryEntry::Create(id) => {
                st.primitives
                    .soft_delete(&id)
                    .map_err(|_| HistoryError::TargetMissing(id.clone()))?;
                Ok(Some(self.event(frame::PRIMITIVE_DELETE, id_data(&id))))
            }
            HistoryEntry::Delete(snapshot) => {
                let revived = st.primitives.revive(snapshot);
                Ok(Some(self.event(frame::PRIMITIVE_CREATE, to_data(revived))))
            }
            HistoryEntry::Update { id, before, .. } => self.overwrite(st, &id, before),
        }
    }

    fn reapply(&self, st: &mut BoardState, entry: HistoryEntry) -> Result<Option<Frame>, HistoryError> {
        match entry {
            HistoryEntry::Create(id) => {
                let restored = st
                    .primitives
                    .undelete(&id)
                    .map_err(|_| HistoryError::TargetMissing(id.clone()))?;
                Ok(Some(self.event(frame::PRIMITIVE_CREATE, to_data(restored))))
            }
            HistoryEntry::Delete(snapshot) => {
                st.primitives
                    .soft_delete(&snapshot.id)
                    .map_err(|_| HistoryError::TargetMissing(snapshot.id.clone()))?;
                Ok(Some(self.event(frame::PRIMITIVE_DELETE, id_data(&snapshot.id))))
            }
            HistoryEntry::Update { id, after, .. } => self.overwrite(st, &id, after),
        }
    }

    /// Overwrite a record's fields for undo/redo of an update. A deleted
    /// record is overwritten silently: nobody can see it, so nothing is
    /// published.
    fn overwrite(
        &self,
        st: &mut BoardState,
        id: &str,
        shape: Shape,
    ) -> Result<Option<Frame>, HistoryError> {
        let changes = shape.fields();
        let live = st
            .primitives
            .overwrite(id, shape)
            .map_err(|_| HistoryError::TargetMissing(id.to_owned()))?;
        Ok(live.then(|| self.event(frame::PRIMITIVE_UPDATE, to_data(&UpdateEvent { id, changes }))))
    }
}

// =============================================================================
// PRESENCE + CURSORS
// =============================================================================

impl Board {
    /// Relay a cursor position to peers. Touches neither store nor history.
    pub async fn move_cursor(&self, connection_id: ConnectionId, x: f64, y: f64) {
        let st = self.lock().await;
        let Some(session_id) = st.fanout.session_of(connection_id) else {
            return;
        };
        let event = self
            .event(frame::CURSOR_MOVE, Data::new())
            .with_data("sessionId", session_id)
            .with_data("x", x)
            .with_data("y", y);
        st.fanout.publish(&event, Some(connection_id));
    }

    /// Merge a presence change for the connection's session and publish it to
    /// everyone as `syscall` (`presence.rename` or `presence.update`).
    /// Returns the updated record, or `None` if the session is unknown.
    pub async fn update_presence(
        &self,
        connection_id: ConnectionId,
        syscall: &str,
        patch: PresencePatch,
    ) -> Option<Presence> {
        let mut st = self.lock().await;
        let session_id = st.fanout.session_of(connection_id)?.to_owned();
        let updated = st.presence.update(&session_id, patch.clone())?.clone();

        let data = to_data(&PresenceEvent { session_id: &session_id, patch });
        let event = self.event(syscall, data).with_from(session_id.as_str());
        st.fanout.publish(&event, None);
        Some(updated)
    }
}

fn id_data(id: &str) -> Data {
    let mut data = Data::new();
    data.insert("id".into(), serde_json::json!(id));
    data
}

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;
