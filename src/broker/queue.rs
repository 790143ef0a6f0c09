/// Lease-based per-topic FIFO queue
///
/// Messages live in one SQLite table. A queued message has no lease; leasing
/// stamps a lease id and an absolute deadline on the head of the topic in a
/// single statement, so two consumers can never hold the same message. Acks
/// delete the row; expired leases are put back at the tail of the topic.
///
/// Blocked consumers wake on a per-topic `Notify` (fast path) with a poll
/// interval fallback for writes made by other processes.

use crate::error::Result;
use crate::store::now_rfc3339;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Row, SqliteConnection};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A message held under a lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: i64,
    pub topic: String,
    pub payload: Vec<u8>,
    /// Identifies this particular lease; acks from older leases are ignored
    pub lease_id: String,
    pub lease_deadline: DateTime<Utc>,
}

/// Message counts for one topic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    pub queued: i64,
    pub leased: i64,
}

#[derive(Debug, Clone)]
pub struct LeaseQueue {
    pool: SqlitePool,
    poll_interval: Duration,
    /// topic -> wake-up handle for blocked dequeues
    wakers: Arc<RwLock<HashMap<String, Arc<Notify>>>>,
}

impl LeaseQueue {
    pub fn new(pool: SqlitePool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
            wakers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Append a message to the tail of `topic`
    pub async fn enqueue(&self, topic: &str, payload: &[u8]) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        let id = self.enqueue_in(&mut *conn, topic, payload).await?;
        self.notify(topic).await;
        Ok(id)
    }

    /// Append a message inside the caller's transaction.
    ///
    /// The message only becomes visible on commit; call [`notify`](Self::notify)
    /// afterwards to wake consumers immediately.
    pub async fn enqueue_in(
        &self,
        conn: &mut SqliteConnection,
        topic: &str,
        payload: &[u8],
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO queue_messages (topic, payload, seq, enqueued_at)
            VALUES (?1, ?2, (SELECT COALESCE(MAX(seq), 0) + 1 FROM queue_messages WHERE topic = ?1), ?3)
            RETURNING id
            "#,
        )
        .bind(topic)
        .bind(payload)
        .bind(now_rfc3339())
        .fetch_one(&mut *conn)
        .await?;

        let id: i64 = row.get("id");
        tracing::debug!("📨 Enqueued message {} on {}", id, topic);
        Ok(id)
    }

    /// Wake every consumer blocked on `topic`
    pub async fn notify(&self, topic: &str) {
        if let Some(waker) = self.wakers.read().await.get(topic) {
            waker.notify_waiters();
        }
    }

    /// Lease the head of `topic`, waiting until a message arrives.
    ///
    /// Returns `Ok(None)` once `cancel` fires; a cancelled wait is not an error.
    pub async fn dequeue(
        &self,
        topic: &str,
        lease: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<QueueMessage>> {
        let waker = self.waker(topic).await;
        let result = self.wait_and_lease(topic, lease, cancel, &waker).await;
        drop(waker);
        self.prune_waker(topic).await;
        result
    }

    async fn wait_and_lease(
        &self,
        topic: &str,
        lease: Duration,
        cancel: &CancellationToken,
        waker: &Notify,
    ) -> Result<Option<QueueMessage>> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            // Register for wake-ups before looking, so an enqueue landing
            // between the lookup and the wait is not missed.
            let notified = waker.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.try_dequeue(topic, lease).await? {
                return Ok(Some(message));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Lease the head of `topic` if there is one, without waiting
    pub async fn try_dequeue(&self, topic: &str, lease: Duration) -> Result<Option<QueueMessage>> {
        let lease_id = Uuid::new_v4().to_string();
        let deadline = Utc::now()
            + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(30));

        let row = sqlx::query(
            r#"
            UPDATE queue_messages
            SET lease_id = ?1, lease_deadline = ?2
            WHERE id = (
                SELECT id FROM queue_messages
                WHERE topic = ?3 AND lease_id IS NULL
                ORDER BY seq
                LIMIT 1
            )
            RETURNING id, payload
            "#,
        )
        .bind(&lease_id)
        .bind(deadline.timestamp_millis())
        .bind(topic)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let message = QueueMessage {
                id: row.get("id"),
                topic: topic.to_string(),
                payload: row.get("payload"),
                lease_id,
                lease_deadline: deadline,
            };
            tracing::debug!(
                "🔒 Leased message {} on {} until {}",
                message.id,
                topic,
                deadline.to_rfc3339()
            );
            message
        }))
    }

    /// Remove a leased message. Idempotent; returns false if the message was
    /// already acked or its lease was reclaimed in the meantime.
    pub async fn ack(&self, message: &QueueMessage) -> Result<bool> {
        let result = sqlx::query("DELETE FROM queue_messages WHERE id = ? AND lease_id = ?")
            .bind(message.id)
            .bind(&message.lease_id)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            tracing::debug!("✅ Acked message {} on {}", message.id, message.topic);
        } else {
            tracing::debug!(
                "⏭️ Ack for message {} on {} ignored (lease no longer held)",
                message.id,
                message.topic
            );
        }
        Ok(removed)
    }

    /// Put every message whose lease expired back at the tail of `topic`.
    /// Returns how many were requeued.
    pub async fn reclaim_expired(&self, topic: &str) -> Result<usize> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        // Writing first makes this transaction the database writer before it
        // reads the current tail sequence.
        let rows = sqlx::query(
            r#"
            UPDATE queue_messages
            SET lease_id = NULL
            WHERE topic = ? AND lease_deadline IS NOT NULL AND lease_deadline <= ?
            RETURNING id, lease_deadline
            "#,
        )
        .bind(topic)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tx.rollback().await?;
            return Ok(0);
        }

        let mut expired: Vec<(i64, i64)> = rows
            .iter()
            .map(|row| (row.get("lease_deadline"), row.get("id")))
            .collect();
        expired.sort_unstable();

        let tail: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) FROM queue_messages WHERE topic = ?")
                .bind(topic)
                .fetch_one(&mut *tx)
                .await?;

        for (offset, (_, id)) in expired.iter().enumerate() {
            sqlx::query("UPDATE queue_messages SET seq = ?, lease_deadline = NULL WHERE id = ?")
                .bind(tail + 1 + offset as i64)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        self.notify(topic).await;

        tracing::info!("♻️ Reclaimed {} expired leases on {}", expired.len(), topic);
        Ok(expired.len())
    }

    pub async fn depth(&self, topic: &str) -> Result<QueueDepth> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN lease_id IS NULL THEN 1 ELSE 0 END), 0) AS queued,
                COALESCE(SUM(CASE WHEN lease_id IS NULL THEN 0 ELSE 1 END), 0) AS leased
            FROM queue_messages WHERE topic = ?
            "#,
        )
        .bind(topic)
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueDepth {
            queued: row.get("queued"),
            leased: row.get("leased"),
        })
    }

    /// Get or create the wake-up handle for a topic
    async fn waker(&self, topic: &str) -> Arc<Notify> {
        {
            let wakers = self.wakers.read().await;
            if let Some(waker) = wakers.get(topic) {
                return Arc::clone(waker);
            }
        }

        let mut wakers = self.wakers.write().await;
        Arc::clone(
            wakers
                .entry(topic.to_string())
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }

    /// Forget a topic's wake-up handle once no dequeue holds it
    async fn prune_waker(&self, topic: &str) {
        let mut wakers = self.wakers.write().await;
        if wakers.get(topic).is_some_and(|waker| Arc::strong_count(waker) == 1) {
            wakers.remove(topic);
        }
    }
}
