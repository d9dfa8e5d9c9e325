//! Board registry — maps board ids to live boards.
//!
//! DESIGN
//! ======
//! Boards are created lazily on first lookup and hydrated from the store.
//! Hydration happens outside the registry lock; if two lookups race on an
//! unloaded board, the first insert wins and the other load is discarded,
//! so every caller receives the same `Arc<Board>`.
//!
//! Eviction runs under the registry write lock. A board is only dropped when
//! the registry holds the sole reference, no connection is bound, nothing is
//! waiting to be flushed, and it has been idle for the configured TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::services::board::{Board, BoardId};
use crate::services::persistence::{BoardStore, StoreError};

pub struct BoardRegistry {
    boards: RwLock<HashMap<BoardId, Arc<Board>>>,
    store: Arc<dyn BoardStore>,
    history_limit: usize,
}

impl BoardRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn BoardStore>, history_limit: usize) -> Self {
        Self { boards: RwLock::new(HashMap::new()), store, history_limit }
    }

    /// Return the board for `board_id`, loading it from the store on first use.
    ///
    /// # Errors
    ///
    /// Returns a store error if the board had to be loaded and the load failed.
    pub async fn get_or_create(&self, board_id: &str) -> Result<Arc<Board>, StoreError> {
        if let Some(board) = self.boards.read().await.get(board_id) {
            return Ok(board.clone());
        }

        let records = self.store.load_board(board_id).await?;
        let mut boards = self.boards.write().await;
        let board = boards.entry(board_id.to_owned()).or_insert_with(|| {
            let board = Board::hydrated(board_id, records, self.history_limit);
            info!(%board_id, "board loaded");
            Arc::new(board)
        });
        Ok(board.clone())
    }

    /// Allocate a fresh board id and register it with the store.
    ///
    /// # Errors
    ///
    /// Returns a store error if the board could not be registered.
    pub async fn create(&self) -> Result<BoardId, StoreError> {
        let board_id = Uuid::new_v4().to_string();
        self.store.create_board(&board_id).await?;
        self.boards.write().await.insert(
            board_id.clone(),
            Arc::new(Board::new(board_id.as_str(), self.history_limit)),
        );
        info!(%board_id, "board created");
        Ok(board_id)
    }

    /// Look up a loaded board without loading it.
    #[cfg(test)]
    pub async fn get(&self, board_id: &str) -> Option<Arc<Board>> {
        self.boards.read().await.get(board_id).cloned()
    }

    /// Every currently loaded board.
    pub async fn boards(&self) -> Vec<Arc<Board>> {
        self.boards.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.boards.read().await.len()
    }

    /// Drop boards that have been idle for at least `ttl`. Returns the number
    /// of boards evicted.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let mut boards = self.boards.write().await;
        let before = boards.len();
        boards.retain(|board_id, board| {
            // Another holder may be about to join.
            if Arc::strong_count(board) > 1 {
                return true;
            }
            // A board whose lock is busy is in use.
            let Ok(st) = board.try_lock() else {
                return true;
            };
            let idle = st
                .idle_since
                .is_some_and(|since| since.elapsed() >= ttl);
            let evict = idle && st.fanout.is_empty() && st.presence.is_empty() && !st.primitives.has_dirty();
            if evict {
                info!(%board_id, "idle board evicted");
            }
            !evict
        });
        before - boards.len()
    }
}
