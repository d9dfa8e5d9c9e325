//! Primitive store — ordered, soft-deleting collection of board primitives.
//!
//! DESIGN
//! ======
//! Records live in a `Vec` in insertion order with a `HashMap` index from id
//! to position. Records are never removed: delete sets a `deleted_at`
//! marker so undo can resurrect the record at its original position, and so
//! ids are never reused for the life of the board.
//!
//! Every mutation bumps the record's `revision` and marks it dirty. The
//! persistence worker snapshots dirty records and acknowledges them by
//! revision, so a record mutated again mid-flush stays dirty.
//!
//! The store is plain synchronous data. Serialization of concurrent access is
//! the owning board's job.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::frame::{ErrorCode, now_ms};
use crate::primitive::{Primitive, PrimitiveId, Shape};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PrimitiveError {
    #[error("primitive already exists: {0}")]
    DuplicateId(PrimitiveId),
    #[error("primitive not found: {0}")]
    NotFound(PrimitiveId),
    #[error("malformed changes for {id}: {message}")]
    MalformedChanges { id: PrimitiveId, message: String },
}

impl ErrorCode for PrimitiveError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::DuplicateId(_) => "E_DUPLICATE_ID",
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::MalformedChanges { .. } => "E_MALFORMED_CHANGES",
        }
    }
}

/// A primitive plus its storage bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPrimitive {
    pub primitive: Primitive,
    /// Soft-delete marker, milliseconds since Unix epoch.
    pub deleted_at: Option<i64>,
    /// Insertion position. Stable for the life of the board.
    pub seq: i64,
    /// Bumped on every mutation. Used to acknowledge flushes.
    #[serde(skip)]
    pub revision: u64,
}

impl StoredPrimitive {
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Debug, Default)]
pub struct PrimitiveStore {
    records: Vec<StoredPrimitive>,
    index: HashMap<PrimitiveId, usize>,
    dirty: HashSet<PrimitiveId>,
}

impl PrimitiveStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted records. Records are ordered by `seq`;
    /// nothing is marked dirty.
    #[must_use]
    pub fn hydrate(mut records: Vec<StoredPrimitive>) -> Self {
        records.sort_by_key(|r| r.seq);
        let mut store = Self::new();
        for record in records {
            if store.index.contains_key(&record.primitive.id) {
                continue;
            }
            store.index.insert(record.primitive.id.clone(), store.records.len());
            store.records.push(record);
        }
        store
    }

    /// Insert a new live primitive.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateId` if the id has ever been used on this board,
    /// including by a soft-deleted record.
    pub fn create(&mut self, primitive: Primitive) -> Result<&Primitive, PrimitiveError> {
        if self.index.contains_key(&primitive.id) {
            return Err(PrimitiveError::DuplicateId(primitive.id));
        }
        let seq = self.next_seq();
        let pos = self.records.len();
        self.index.insert(primitive.id.clone(), pos);
        self.dirty.insert(primitive.id.clone());
        self.records.push(StoredPrimitive { primitive, deleted_at: None, seq, revision: 1 });
        Ok(&self.records[pos].primitive)
    }

    /// Shallow-merge an untyped change set into a live primitive.
    /// Returns the `(before, after)` pair for history.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id is absent or soft-deleted, and
    /// `MalformedChanges` if the change set does not fit the primitive kind.
    pub fn patch(&mut self, id: &str, changes: serde_json::Value) -> Result<(Shape, Shape), PrimitiveError> {
        let record = self.live_mut(id)?;
        let patch = record
            .primitive
            .shape
            .parse_patch(changes)
            .map_err(|e| PrimitiveError::MalformedChanges { id: id.to_owned(), message: e.to_string() })?;
        let before = record.primitive.shape.clone();
        record.primitive.shape.apply(patch);
        let after = record.primitive.shape.clone();
        if before != after {
            record.revision += 1;
            self.dirty.insert(id.to_owned());
        }
        Ok((before, after))
    }

    /// Mark a live primitive deleted. Returns its pre-delete snapshot.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id is absent or already deleted.
    pub fn soft_delete(&mut self, id: &str) -> Result<Primitive, PrimitiveError> {
        let record = self.live_mut(id)?;
        let snapshot = record.primitive.clone();
        record.deleted_at = Some(now_ms());
        record.revision += 1;
        self.dirty.insert(id.to_owned());
        Ok(snapshot)
    }

    /// Reinstate a snapshot as a live record, clearing any delete marker.
    /// An unknown id is appended at the end.
    pub fn revive(&mut self, snapshot: Primitive) -> &Primitive {
        let id = snapshot.id.clone();
        let pos = if let Some(&pos) = self.index.get(&id) {
            let record = &mut self.records[pos];
            record.primitive = snapshot;
            record.deleted_at = None;
            record.revision += 1;
            pos
        } else {
            let seq = self.next_seq();
            let pos = self.records.len();
            self.index.insert(id.clone(), pos);
            self.records.push(StoredPrimitive { primitive: snapshot, deleted_at: None, seq, revision: 1 });
            pos
        };
        self.dirty.insert(id);
        &self.records[pos].primitive
    }

    /// Clear the delete marker of an existing record, keeping its fields.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id was never stored.
    pub fn undelete(&mut self, id: &str) -> Result<&Primitive, PrimitiveError> {
        let pos = *self.index.get(id).ok_or_else(|| PrimitiveError::NotFound(id.to_owned()))?;
        let record = &mut self.records[pos];
        record.deleted_at = None;
        record.revision += 1;
        self.dirty.insert(id.to_owned());
        Ok(&self.records[pos].primitive)
    }

    /// Overwrite the fields of an existing record with `shape`, preserving its
    /// delete marker. Returns whether the record is live afterwards.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id was never stored.
    pub fn overwrite(&mut self, id: &str, shape: Shape) -> Result<bool, PrimitiveError> {
        let pos = *self.index.get(id).ok_or_else(|| PrimitiveError::NotFound(id.to_owned()))?;
        let record = &mut self.records[pos];
        record.primitive.shape = shape;
        record.revision += 1;
        let live = record.is_live();
        self.dirty.insert(id.to_owned());
        Ok(live)
    }

    /// Live primitives in insertion order, as owned copies.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Primitive> {
        self.records
            .iter()
            .filter(|r| r.is_live())
            .map(|r| r.primitive.clone())
            .collect()
    }

    /// Look up a live primitive.
    #[cfg(test)]
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Primitive> {
        self.index
            .get(id)
            .map(|&pos| &self.records[pos])
            .filter(|r| r.is_live())
            .map(|r| &r.primitive)
    }

    /// Look up any record, live or deleted.
    #[must_use]
    pub fn record(&self, id: &str) -> Option<&StoredPrimitive> {
        self.index.get(id).map(|&pos| &self.records[pos])
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_live()).count()
    }

    // -------------------------------------------------------------------------
    // Dirty tracking
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Owned copies of every dirty record, in insertion order.
    #[must_use]
    pub fn dirty_records(&self) -> Vec<StoredPrimitive> {
        let mut out: Vec<StoredPrimitive> = self
            .dirty
            .iter()
            .filter_map(|id| self.record(id).cloned())
            .collect();
        out.sort_by_key(|r| r.seq);
        out
    }

    /// Clear dirty flags for records whose revision is unchanged since the
    /// flushed snapshot was taken.
    pub fn ack_flushed(&mut self, flushed: &[(PrimitiveId, u64)]) {
        for (id, revision) in flushed {
            // EDGE: keep dirty if the record was mutated again after snapshot.
            let can_clear = self.record(id).map_or(true, |r| r.revision == *revision);
            if can_clear {
                self.dirty.remove(id);
            }
        }
    }

    fn live_mut(&mut self, id: &str) -> Result<&mut StoredPrimitive, PrimitiveError> {
        self.index
            .get(id)
            .map(|&pos| &mut self.records[pos])
            .filter(|r| r.is_live())
            .ok_or_else(|| PrimitiveError::NotFound(id.to_owned()))
    }

    fn next_seq(&self) -> i64 {
        self.records.last().map_or(0, |r| r.seq + 1)
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
