//! SQLite implementation of the queue store.
//!
//! One table, `request_queue`, holds the durable queue. Timestamps are
//! stored as milliseconds since the epoch; headers and body are JSON text
//! on both the write and read paths.

use std::str::FromStr;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};

use super::QueueStore;
use crate::error::Result;
use crate::request::{Method, Priority, QueueStatus, QueuedRequest, Request, RequestId};

/// SQLite-backed queue store.
///
/// # Example
/// ```ignore
/// let store = SqliteQueueStore::open("backhaul.db").await?;
/// ```
pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    /// Open (or create) a database file and apply migrations.
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))
            .map_err(|e| anyhow!("Invalid database path '{}': {}", path, e))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        Self::with_options(options).await
    }

    /// Open a private in-memory database. Used by tests and callers that
    /// explicitly opt out of durability.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| anyhow!("Invalid in-memory options: {}", e))?;
        Self::with_options(options).await
    }

    async fn with_options(options: SqliteConnectOptions) -> Result<Self> {
        // A single connection serializes store access; the in-memory
        // database also lives exactly as long as this connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;
        crate::migrator().run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn item_from_row(row: &SqliteRow) -> Result<QueuedRequest> {
    let method: String = row.get("method");
    let method = Method::from_str(&method).map_err(|e| anyhow!(e))?;

    let headers: String = row.get("headers");
    let headers = serde_json::from_str(&headers)?;

    let body = row
        .get::<Option<String>, _>("body")
        .map(|text| serde_json::from_str(&text))
        .transpose()?;

    let priority = Priority::from_weight(row.get::<i64, _>("priority"))
        .ok_or_else(|| anyhow!("Unknown priority weight in row"))?;

    let status: String = row.get("status");
    let status = QueueStatus::from_str(&status).map_err(|e| anyhow!(e))?;

    let created_at = DateTime::from_timestamp_millis(row.get::<i64, _>("created_at"))
        .ok_or_else(|| anyhow!("Invalid created_at timestamp"))?;
    let expires_at = row
        .get::<Option<i64>, _>("expires_at")
        .map(|ms| DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("Invalid expires_at")))
        .transpose()?;

    Ok(QueuedRequest {
        id: RequestId(row.get("id")),
        request: Request {
            method,
            url: row.get("url"),
            headers,
            body,
            priority,
            sms_eligible: row.get::<i64, _>("sms_eligible") != 0,
            idempotency_key: row.get("idempotency_key"),
            timeout: row
                .get::<Option<i64>, _>("timeout_ms")
                .map(|ms| Duration::from_millis(ms as u64)),
        },
        retry_count: row.get::<i64, _>("retry_count") as u32,
        max_retries: row.get::<i64, _>("max_retries") as u32,
        created_at,
        expires_at,
        status,
    })
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn insert(&self, item: &QueuedRequest) -> Result<()> {
        // OR REPLACE covers both the primary key and the idempotency-key
        // unique index: a second row for the same logical operation
        // supersedes the first.
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO request_queue
                (id, method, url, headers, body, priority, sms_eligible,
                 idempotency_key, timeout_ms, retry_count, max_retries,
                 created_at, expires_at, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.id.as_str())
        .bind(item.request.method.as_str())
        .bind(&item.request.url)
        .bind(serde_json::to_string(&item.request.headers)?)
        .bind(
            item.request
                .body
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(item.request.priority.weight())
        .bind(item.request.sms_eligible as i64)
        .bind(&item.request.idempotency_key)
        .bind(item.request.timeout.map(|t| t.as_millis() as i64))
        .bind(item.retry_count as i64)
        .bind(item.max_retries as i64)
        .bind(item.created_at.timestamp_millis())
        .bind(item.expires_at.map(|at| at.timestamp_millis()))
        .bind(item.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: &RequestId) -> Result<Option<QueuedRequest>> {
        let row = sqlx::query("SELECT * FROM request_queue WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn update_status(&self, id: &RequestId, status: QueueStatus) -> Result<()> {
        sqlx::query("UPDATE request_queue SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment_retry(&self, id: &RequestId) -> Result<()> {
        sqlx::query("UPDATE request_queue SET retry_count = retry_count + 1 WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &RequestId) -> Result<()> {
        sqlx::query("DELETE FROM request_queue WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<Vec<RequestId>> {
        let rows = sqlx::query(
            r#"
            DELETE FROM request_queue
            WHERE expires_at IS NOT NULL
              AND expires_at <= ?
              AND status IN ('pending', 'processing')
            RETURNING id
            "#,
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| RequestId(row.get("id")))
            .collect())
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<QueuedRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM request_queue
            WHERE status = 'pending'
            ORDER BY priority DESC, created_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn count_pending(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM request_queue WHERE status IN ('pending', 'processing')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn clear_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM request_queue")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Body;

    fn item(id: &str, priority: Priority, created_at: DateTime<Utc>) -> QueuedRequest {
        let mut body = Body::new();
        body.insert("amount".to_string(), serde_json::json!(1500));
        QueuedRequest {
            id: RequestId::from(id),
            request: Request::new(Method::Post, "https://api.example.com/transfer")
                .header("X-Trace", "t-1")
                .body(body)
                .priority(priority)
                .sms_eligible(true)
                .timeout(Duration::from_secs(10)),
            retry_count: 0,
            max_retries: 3,
            created_at,
            expires_at: None,
            status: QueueStatus::Pending,
        }
    }

    #[tokio::test]
    async fn insert_and_read_back_is_structural() {
        let store = SqliteQueueStore::in_memory().await.unwrap();
        let original = item("a1b2c3d4e5f60718", Priority::High, Utc::now());
        store.insert(&original).await.unwrap();

        let loaded = store.get_by_id(&original.id).await.unwrap().unwrap();
        assert_eq!(loaded.request, original.request);
        assert_eq!(loaded.status, QueueStatus::Pending);
        // Millisecond precision survives the epoch round-trip.
        assert_eq!(
            loaded.created_at.timestamp_millis(),
            original.created_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn idempotency_key_replaces_earlier_row() {
        let store = SqliteQueueStore::in_memory().await.unwrap();
        let now = Utc::now();

        let mut first = item("1111111111111111", Priority::Normal, now);
        first.request.idempotency_key = Some("op-1".to_string());
        let mut second = item("2222222222222222", Priority::Normal, now);
        second.request.idempotency_key = Some("op-1".to_string());

        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        assert_eq!(store.count_pending().await.unwrap(), 1);
        assert!(store.get_by_id(&first.id).await.unwrap().is_none());
        assert!(store.get_by_id(&second.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_pending_orders_by_priority_then_age() {
        let store = SqliteQueueStore::in_memory().await.unwrap();
        let base = Utc::now();

        store
            .insert(&item("aaaa000000000001", Priority::Low, base))
            .await
            .unwrap();
        store
            .insert(&item(
                "aaaa000000000002",
                Priority::Critical,
                base + chrono::Duration::milliseconds(20),
            ))
            .await
            .unwrap();
        store
            .insert(&item(
                "aaaa000000000003",
                Priority::Critical,
                base + chrono::Duration::milliseconds(10),
            ))
            .await
            .unwrap();
        store
            .insert(&item(
                "aaaa000000000004",
                Priority::High,
                base + chrono::Duration::milliseconds(5),
            ))
            .await
            .unwrap();

        let pending = store.list_pending(10).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "aaaa000000000003", // critical, older
                "aaaa000000000002", // critical, newer
                "aaaa000000000004", // high
                "aaaa000000000001", // low
            ]
        );

        let limited = store.list_pending(2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn delete_expired_returns_removed_ids() {
        let store = SqliteQueueStore::in_memory().await.unwrap();
        let now = Utc::now();

        let mut stale = item("aaaa000000000001", Priority::Normal, now);
        stale.expires_at = Some(now - chrono::Duration::seconds(1));
        let mut boundary = item("aaaa000000000002", Priority::Normal, now);
        boundary.expires_at = Some(now);
        let mut live = item("aaaa000000000003", Priority::Normal, now);
        live.expires_at = Some(now + chrono::Duration::minutes(5));

        store.insert(&stale).await.unwrap();
        store.insert(&boundary).await.unwrap();
        store.insert(&live).await.unwrap();

        let mut removed = store.delete_expired(now).await.unwrap();
        removed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(
            removed,
            vec![
                RequestId::from("aaaa000000000001"),
                RequestId::from("aaaa000000000002")
            ]
        );
        assert_eq!(store.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn status_transitions_and_retry_counter() {
        let store = SqliteQueueStore::in_memory().await.unwrap();
        let queued = item("aaaa000000000001", Priority::Normal, Utc::now());
        store.insert(&queued).await.unwrap();

        store
            .update_status(&queued.id, QueueStatus::Processing)
            .await
            .unwrap();
        store.increment_retry(&queued.id).await.unwrap();
        store
            .update_status(&queued.id, QueueStatus::Pending)
            .await
            .unwrap();

        let loaded = store.get_by_id(&queued.id).await.unwrap().unwrap();
        assert_eq!(loaded.retry_count, 1);
        assert_eq!(loaded.status, QueueStatus::Pending);

        // Failed rows drop out of the pending count.
        store
            .update_status(&queued.id, QueueStatus::Failed)
            .await
            .unwrap();
        assert_eq!(store.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_all_reports_removed_rows() {
        let store = SqliteQueueStore::in_memory().await.unwrap();
        let now = Utc::now();
        store
            .insert(&item("aaaa000000000001", Priority::Normal, now))
            .await
            .unwrap();
        store
            .insert(&item("aaaa000000000002", Priority::Normal, now))
            .await
            .unwrap();

        assert_eq!(store.clear_all().await.unwrap(), 2);
        assert_eq!(store.count_pending().await.unwrap(), 0);
    }
}
