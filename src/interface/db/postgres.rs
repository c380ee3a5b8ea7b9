use std::collections::HashMap;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::shared::entities::{
    BroadcastId, BroadcastSession, BroadcastStatus, CallId, CallRecord, CallStatus,
};
use crate::shared::ports::call_store::{
    CallStoreError, CallStoreFuture, CallStorePort, CallUpdate,
};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);
const MAX_CONNECTIONS: u32 = 5;

const TERMINAL_STATUSES: [&str; 6] = [
    "completed",
    "no-answer",
    "busy",
    "canceled",
    "rejected",
    "failed",
];

/// Durable store: one JSONB document per call / broadcast plus indexed
/// status and broadcast columns for the count/scan queries.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(database_url: String) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(&database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS call_records (
                 call_id TEXT PRIMARY KEY,
                 broadcast_id UUID,
                 status TEXT NOT NULL,
                 document JSONB NOT NULL,
                 updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
             )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS call_records_broadcast_idx
                 ON call_records (broadcast_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS broadcast_sessions (
                 broadcast_id UUID PRIMARY KEY,
                 status TEXT NOT NULL,
                 document JSONB NOT NULL,
                 updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
             )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_call(pool: &PgPool, record: &CallRecord) -> Result<(), CallStoreError> {
        let document = serde_json::to_value(record)
            .map_err(|e| CallStoreError::WriteFailed(e.to_string()))?;
        sqlx::query(
            "INSERT INTO call_records (call_id, broadcast_id, status, document, updated_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (call_id)
             DO UPDATE SET broadcast_id = $2, status = $3, document = $4, updated_at = now()",
        )
        .bind(record.call_id.as_str())
        .bind(record.broadcast_id.map(|b| b.as_uuid()))
        .bind(record.status.as_str())
        .bind(document)
        .execute(pool)
        .await
        .map_err(map_write_err)?;
        Ok(())
    }

    async fn fetch_call(pool: &PgPool, call_id: &CallId) -> Result<Option<CallRecord>, CallStoreError> {
        let row = sqlx::query("SELECT document FROM call_records WHERE call_id = $1")
            .bind(call_id.as_str())
            .fetch_optional(pool)
            .await
            .map_err(map_read_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let document: serde_json::Value = row.try_get("document").map_err(map_read_err)?;
        let record = serde_json::from_value(document)
            .map_err(|e| CallStoreError::ReadFailed(e.to_string()))?;
        Ok(Some(record))
    }

    async fn collect_records(
        pool: &PgPool,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<CallRecord>, CallStoreError> {
        let rows = query.fetch_all(pool).await.map_err(map_read_err)?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let document: serde_json::Value = row.try_get("document").map_err(map_read_err)?;
            match serde_json::from_value(document) {
                Ok(record) => records.push(record),
                Err(err) => log::warn!("[store] skipping undecodable call document: {}", err),
            }
        }
        Ok(records)
    }
}

impl CallStorePort for PostgresStore {
    fn store_call(&self, record: CallRecord) -> CallStoreFuture<()> {
        let pool = self.pool.clone();
        Box::pin(async move { Self::upsert_call(&pool, &record).await })
    }

    fn update_call(&self, call_id: CallId, update: CallUpdate) -> CallStoreFuture<CallRecord> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let mut record = Self::fetch_call(&pool, &call_id)
                .await?
                .unwrap_or_else(|| CallRecord::placeholder(call_id.clone()));
            update.apply_to(&mut record);
            Self::upsert_call(&pool, &record).await?;
            Ok(record)
        })
    }

    fn get_call(&self, call_id: CallId) -> CallStoreFuture<Option<CallRecord>> {
        let pool = self.pool.clone();
        Box::pin(async move { Self::fetch_call(&pool, &call_id).await })
    }

    fn store_broadcast(&self, session: BroadcastSession) -> CallStoreFuture<()> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let document = serde_json::to_value(&session)
                .map_err(|e| CallStoreError::WriteFailed(e.to_string()))?;
            sqlx::query(
                "INSERT INTO broadcast_sessions (broadcast_id, status, document, updated_at)
                 VALUES ($1, $2, $3, now())
                 ON CONFLICT (broadcast_id)
                 DO UPDATE SET status = $2, document = $3, updated_at = now()",
            )
            .bind(session.broadcast_id.as_uuid())
            .bind(session.status.as_str())
            .bind(document)
            .execute(&pool)
            .await
            .map_err(map_write_err)?;
            Ok(())
        })
    }

    fn update_broadcast(
        &self,
        broadcast_id: BroadcastId,
        status: BroadcastStatus,
    ) -> CallStoreFuture<()> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE broadcast_sessions
                 SET status = $2,
                     document = jsonb_set(document, '{status}', to_jsonb($2::text)),
                     updated_at = now()
                 WHERE broadcast_id = $1",
            )
            .bind(broadcast_id.as_uuid())
            .bind(status.as_str())
            .execute(&pool)
            .await
            .map_err(map_write_err)?;
            if result.rows_affected() == 0 {
                return Err(CallStoreError::NotFound(broadcast_id.to_string()));
            }
            Ok(())
        })
    }

    fn get_active_broadcasts(&self) -> CallStoreFuture<Vec<BroadcastSession>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let rows =
                sqlx::query("SELECT document FROM broadcast_sessions WHERE status = 'active'")
                    .fetch_all(&pool)
                    .await
                    .map_err(map_read_err)?;
            let mut sessions = Vec::with_capacity(rows.len());
            for row in rows {
                let document: serde_json::Value =
                    row.try_get("document").map_err(map_read_err)?;
                match serde_json::from_value(document) {
                    Ok(session) => sessions.push(session),
                    Err(err) => {
                        log::warn!("[store] skipping undecodable broadcast document: {}", err)
                    }
                }
            }
            Ok(sessions)
        })
    }

    fn get_call_counts(
        &self,
        broadcast_id: Option<BroadcastId>,
    ) -> CallStoreFuture<HashMap<CallStatus, u64>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let rows = match broadcast_id {
                Some(broadcast_id) => {
                    sqlx::query(
                        "SELECT status, COUNT(*) AS count FROM call_records
                         WHERE broadcast_id = $1 GROUP BY status",
                    )
                    .bind(broadcast_id.as_uuid())
                    .fetch_all(&pool)
                    .await
                }
                None => {
                    sqlx::query(
                        "SELECT status, COUNT(*) AS count FROM call_records GROUP BY status",
                    )
                    .fetch_all(&pool)
                    .await
                }
            }
            .map_err(map_read_err)?;

            let mut counts = HashMap::new();
            for row in rows {
                let status: String = row.try_get("status").map_err(map_read_err)?;
                let count: i64 = row.try_get("count").map_err(map_read_err)?;
                match CallStatus::parse(&status) {
                    Some(status) => {
                        counts.insert(status, count.max(0) as u64);
                    }
                    None => log::warn!("[store] unknown status in call_records: {}", status),
                }
            }
            Ok(counts)
        })
    }

    fn get_active_calls(&self) -> CallStoreFuture<Vec<CallRecord>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let query = sqlx::query(
                "SELECT document FROM call_records WHERE status IN ('pending', 'ringing')",
            );
            Self::collect_records(&pool, query).await
        })
    }

    fn get_broadcast_calls(&self, broadcast_id: BroadcastId) -> CallStoreFuture<Vec<CallRecord>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let uuid: Uuid = broadcast_id.as_uuid();
            let query = sqlx::query("SELECT document FROM call_records WHERE broadcast_id = $1")
                .bind(uuid);
            Self::collect_records(&pool, query).await
        })
    }

    fn cancel_broadcast_calls(&self, broadcast_id: BroadcastId) -> CallStoreFuture<u64> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE call_records
                 SET status = 'canceled',
                     document = jsonb_set(document, '{status}', '\"canceled\"'),
                     updated_at = now()
                 WHERE broadcast_id = $1 AND status <> ALL($2)",
            )
            .bind(broadcast_id.as_uuid())
            .bind(
                TERMINAL_STATUSES
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<String>>(),
            )
            .execute(&pool)
            .await
            .map_err(map_write_err)?;
            Ok(result.rows_affected())
        })
    }
}

fn map_write_err(err: sqlx::Error) -> CallStoreError {
    CallStoreError::WriteFailed(err.to_string())
}

fn map_read_err<E: std::fmt::Display>(err: E) -> CallStoreError {
    CallStoreError::ReadFailed(err.to_string())
}
