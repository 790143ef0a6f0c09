/// SQLite persistence for subscriber registrations
///
/// A registration is unique per (process, task, callback URL); the unique
/// index enforces it so concurrent subscribes cannot both succeed.

use crate::error::{EngineError, Result};
use crate::process::storage::parse_timestamp;
use crate::subscriber::types::SubscriberRegistration;
use sqlx::{sqlite::SqlitePool, Row};

#[derive(Debug, Clone)]
pub struct SubscriberStorage {
    pool: SqlitePool,
}

impl SubscriberStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a registration, rejecting a duplicate target
    pub async fn insert_unique(&self, registration: &SubscriberRegistration) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions
                (session_key, process_id, task, health_check_url, callback_url, topic, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(process_id, task, callback_url) DO NOTHING
            "#,
        )
        .bind(&registration.session_key)
        .bind(&registration.process_id)
        .bind(&registration.task)
        .bind(&registration.health_check_url)
        .bind(&registration.callback_url)
        .bind(&registration.topic)
        .bind(registration.created_at.to_rfc3339())
        .bind(registration.expires_at.map(|at| at.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::DuplicateSubscription {
                process_id: registration.process_id.clone(),
                task: registration.task.clone(),
                callback_url: registration.callback_url.clone(),
            });
        }
        Ok(())
    }

    pub async fn get(&self, session_key: &str) -> Result<Option<SubscriberRegistration>> {
        let row = sqlx::query(
            r#"
            SELECT session_key, process_id, task, health_check_url, callback_url, topic, created_at, expires_at
            FROM subscriptions WHERE session_key = ?
            "#,
        )
        .bind(session_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_registration(&row)).transpose()
    }

    /// Every decodable registration. Rows that fail to decode are logged and
    /// left in place.
    pub async fn list_all(&self) -> Result<Vec<SubscriberRegistration>> {
        let rows = sqlx::query(
            r#"
            SELECT session_key, process_id, task, health_check_url, callback_url, topic, created_at, expires_at
            FROM subscriptions ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut registrations = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode_registration(row) {
                Ok(registration) => registrations.push(registration),
                Err(e) => {
                    let session_key: String = row.get("session_key");
                    tracing::error!("❌ Skipping unreadable subscription {}: {}", session_key, e);
                }
            }
        }
        Ok(registrations)
    }

    /// Remove a registration. Returns whether it existed.
    pub async fn delete(&self, session_key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE session_key = ?")
            .bind(session_key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn decode_registration(row: &sqlx::sqlite::SqliteRow) -> Result<SubscriberRegistration> {
    Ok(SubscriberRegistration {
        session_key: row.get("session_key"),
        process_id: row.get("process_id"),
        task: row.get("task"),
        health_check_url: row.get("health_check_url"),
        callback_url: row.get("callback_url"),
        topic: row.get("topic"),
        created_at: parse_timestamp(row.get("created_at"))?,
        expires_at: row
            .get::<Option<String>, _>("expires_at")
            .map(parse_timestamp)
            .transpose()?,
    })
}
