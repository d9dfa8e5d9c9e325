//! Postgres board store.
//!
//! SYSTEM CONTEXT
//! ==============
//! Startup uses this module when `DATABASE_URL` is set: it creates the
//! shared SQLx pool and applies migrations before accepting traffic. The
//! resulting `PgStore` is the durable `BoardStore` behind the persistence
//! worker.
//!
//! Primitive payloads are stored as JSONB with the kind tag split into its
//! own column, so the table stays readable from `psql`.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::primitive::{Primitive, Shape};
use crate::services::persistence::{BoardStore, StoreError};
use crate::services::store::StoredPrimitive;

/// Initialize the `PostgreSQL` connection pool and run migrations.
///
/// # Errors
///
/// Returns an error if the connection or migrations fail.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    sqlx::migrate!("src/db/migrations").run(&pool).await?;

    Ok(pool)
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BoardStore for PgStore {
    fn is_durable(&self) -> bool {
        true
    }

    async fn create_board(&self, board_id: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO boards (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(board_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_board(&self, board_id: &str) -> Result<Vec<StoredPrimitive>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, seq, kind, data, created_by, deleted_at FROM primitives WHERE board_id = $1 ORDER BY seq",
        )
        .bind(board_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.try_get("kind")?;
            let mut data: serde_json::Value = row.try_get("data")?;
            if let Some(fields) = data.as_object_mut() {
                fields.insert("type".into(), serde_json::Value::String(kind));
            }
            let shape: Shape = serde_json::from_value(data)?;
            records.push(StoredPrimitive {
                primitive: Primitive { id: row.try_get("id")?, created_by: row.try_get("created_by")?, shape },
                deleted_at: row.try_get("deleted_at")?,
                seq: row.try_get("seq")?,
                revision: 0,
            });
        }
        Ok(records)
    }

    async fn save_primitives(&self, board_id: &str, records: &[StoredPrimitive]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO boards (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(board_id)
            .execute(tx.as_mut())
            .await?;

        for record in records {
            let primitive = &record.primitive;
            sqlx::query(
                r"INSERT INTO primitives (id, board_id, seq, kind, data, created_by, deleted_at)
                   VALUES ($1, $2, $3, $4, $5, $6, $7)
                   ON CONFLICT (board_id, id) DO UPDATE SET
                       data = EXCLUDED.data,
                       kind = EXCLUDED.kind,
                       deleted_at = EXCLUDED.deleted_at,
                       updated_at = now()",
            )
            .bind(&primitive.id)
            .bind(board_id)
            .bind(record.seq)
            .bind(primitive.shape.kind())
            .bind(primitive.shape.fields())
            .bind(&primitive.created_by)
            .bind(record.deleted_at)
            .execute(tx.as_mut())
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
