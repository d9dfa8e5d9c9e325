//! Persistence service — pluggable board storage plus background flush.
//!
//! DESIGN
//! ======
//! Boards live in memory; storage is write-behind. A background task
//! snapshots dirty records from every loaded board, writes them through the
//! configured `BoardStore`, and acknowledges them by revision. Socket
//! handling never waits on storage I/O.
//!
//! The same task evicts idle boards once their state is safely written, but
//! only when the store is durable. With the in-memory store an evicted board
//! would be lost, so boards stay resident for the life of the process.
//!
//! ERROR HANDLING
//! ==============
//! Dirty flags are cleared only after successful writes. A failed flush is
//! logged and retried on the next cycle: repeated upserts are acceptable,
//! silent data loss is not.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::frame::ErrorCode;
use crate::services::board::Board;
use crate::services::registry::BoardRegistry;
use crate::services::store::StoredPrimitive;
use crate::state::AppState;

// =============================================================================
// STORE CONTRACT
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "E_STORE_DATABASE",
            Self::Encode(_) => "E_STORE_ENCODE",
        }
    }
}

/// Backing storage for board contents.
#[async_trait]
pub trait BoardStore: Send + Sync {
    /// Whether records survive a process restart. Idle boards are only
    /// evicted from memory when this is true.
    fn is_durable(&self) -> bool;

    /// Register a new, empty board.
    async fn create_board(&self, board_id: &str) -> Result<(), StoreError>;

    /// Every stored record of a board, live and deleted. An unknown board
    /// yields an empty list.
    async fn load_board(&self, board_id: &str) -> Result<Vec<StoredPrimitive>, StoreError>;

    /// Upsert a batch of records.
    async fn save_primitives(&self, board_id: &str, records: &[StoredPrimitive]) -> Result<(), StoreError>;
}

/// Store used when no database is configured. Boards exist only in memory.
#[derive(Debug, Default)]
pub struct MemoryStore;

#[async_trait]
impl BoardStore for MemoryStore {
    fn is_durable(&self) -> bool {
        false
    }

    async fn create_board(&self, _board_id: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load_board(&self, _board_id: &str) -> Result<Vec<StoredPrimitive>, StoreError> {
        Ok(Vec::new())
    }

    async fn save_primitives(&self, _board_id: &str, _records: &[StoredPrimitive]) -> Result<(), StoreError> {
        Ok(())
    }
}

// =============================================================================
// BACKGROUND TASK
// =============================================================================

/// Spawn the background flush and eviction task. Returns a handle for shutdown.
pub fn spawn_persistence_task(state: AppState) -> JoinHandle<()> {
    let flush_interval = state.config.flush_interval;
    let idle_ttl = state.config.board_idle_ttl;
    let evict = state.store.is_durable();
    info!(
        flush_interval_ms = flush_interval.as_millis(),
        idle_ttl_secs = idle_ttl.as_secs(),
        evict,
        "board persistence configured"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            flush_all_dirty(&state.registry, state.store.as_ref()).await;
            if evict {
                state.registry.evict_idle(idle_ttl).await;
            }
        }
    })
}

/// Write every dirty record of every loaded board. Returns how many records
/// were written successfully.
pub async fn flush_all_dirty(registry: &BoardRegistry, store: &dyn BoardStore) -> usize {
    let mut written = 0;
    for board in registry.boards().await {
        written += flush_board(&board, store).await;
    }
    written
}

async fn flush_board(board: &Arc<Board>, store: &dyn BoardStore) -> usize {
    // PHASE: SNAPSHOT DIRTY RECORDS
    // WHY: clone under the board lock, then write lock-free.
    let records = {
        let st = board.lock().await;
        if !st.primitives.has_dirty() {
            return 0;
        }
        st.primitives.dirty_records()
    };
    let flushed: Vec<(String, u64)> = records
        .iter()
        .map(|r| (r.primitive.id.clone(), r.revision))
        .collect();

    // PHASE: WRITE + ACK
    // WHY: on failure the dirty flags stay set for the next cycle.
    match store.save_primitives(board.id(), &records).await {
        Ok(()) => {
            board.lock().await.primitives.ack_flushed(&flushed);
            records.len()
        }
        Err(e) => {
            error!(error = %e, board_id = %board.id(), count = records.len(), "persistence flush failed");
            0
        }
    }
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
