/// SQLite persistence layer for process configs and workflows
///
/// Process configs and workflow state are stored as JSON columns. Workflow
/// mutations go through `*_in` methods that take an open transaction so the
/// stage engine can combine them with queue writes atomically.

use crate::error::{EngineError, Result};
use crate::process::types::{ProcessConfig, Workflow};
use crate::store::now_rfc3339;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Row, Sqlite, SqliteConnection, Transaction};
use std::collections::BTreeMap;

/// Storage manager for process definitions and workflow state
#[derive(Debug, Clone)]
pub struct ProcessStorage {
    pool: SqlitePool,
}

impl ProcessStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Insert a new process config. Returns false if the id already exists.
    pub async fn insert_process_config(&self, config: &ProcessConfig) -> Result<bool> {
        let stage_tasks = serde_json::to_string(&config.stage_tasks)?;
        let stage_gates = serde_json::to_string(&config.stage_gates)?;

        let result = sqlx::query(
            r#"
            INSERT INTO process_configs (process_id, stage_tasks, stage_gates, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(process_id) DO NOTHING
            "#,
        )
        .bind(&config.process_id)
        .bind(&stage_tasks)
        .bind(&stage_gates)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Retrieve a process config by id
    pub async fn get_process_config(&self, process_id: &str) -> Result<Option<ProcessConfig>> {
        let row = sqlx::query(
            "SELECT process_id, stage_tasks, stage_gates FROM process_configs WHERE process_id = ?",
        )
        .bind(process_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_process_config(&row)).transpose()
    }

    /// Load every process config for registry initialization
    pub async fn load_all_process_configs(&self) -> Result<Vec<ProcessConfig>> {
        let rows = sqlx::query("SELECT process_id, stage_tasks, stage_gates FROM process_configs")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_process_config).collect()
    }

    /// Insert a freshly seeded workflow
    pub async fn insert_workflow_in(
        &self,
        conn: &mut SqliteConnection,
        workflow: &Workflow,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflows (workflow_id, process_id, task_status, published_stage, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&workflow.workflow_id)
        .bind(&workflow.process_id)
        .bind(serde_json::to_string(&workflow.task_status)?)
        .bind(serde_json::to_string(&workflow.published_stage)?)
        .bind(workflow.created_at.to_rfc3339())
        .bind(workflow.updated_at.to_rfc3339())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Take the write lock on a workflow row inside `conn`'s transaction.
    ///
    /// SQLite has no row locks; touching the row makes this transaction the
    /// database writer before anything is read, so the read-modify-write
    /// that follows cannot race another writer. Returns false if the workflow
    /// does not exist.
    pub async fn claim_workflow_in(
        &self,
        conn: &mut SqliteConnection,
        workflow_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE workflows SET updated_at = ? WHERE workflow_id = ?")
            .bind(now_rfc3339())
            .bind(workflow_id)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_workflow_in(
        &self,
        conn: &mut SqliteConnection,
        workflow_id: &str,
    ) -> Result<Option<Workflow>> {
        let row = sqlx::query(
            r#"
            SELECT workflow_id, process_id, task_status, published_stage, created_at, updated_at
            FROM workflows WHERE workflow_id = ?
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|row| decode_workflow(&row)).transpose()
    }

    /// Read a workflow snapshot outside any transaction
    pub async fn get_workflow(&self, workflow_id: &str) -> Result<Option<Workflow>> {
        let mut conn = self.pool.acquire().await?;
        self.get_workflow_in(&mut *conn, workflow_id).await
    }

    /// Persist task status and published stages of a workflow
    pub async fn save_workflow_state_in(
        &self,
        conn: &mut SqliteConnection,
        workflow: &Workflow,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workflows
            SET task_status = ?, published_stage = ?, updated_at = ?
            WHERE workflow_id = ?
            "#,
        )
        .bind(serde_json::to_string(&workflow.task_status)?)
        .bind(serde_json::to_string(&workflow.published_stage)?)
        .bind(workflow.updated_at.to_rfc3339())
        .bind(&workflow.workflow_id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

fn decode_process_config(row: &sqlx::sqlite::SqliteRow) -> Result<ProcessConfig> {
    let stage_tasks: String = row.get("stage_tasks");
    let stage_gates: String = row.get("stage_gates");
    Ok(ProcessConfig {
        process_id: row.get("process_id"),
        stage_tasks: serde_json::from_str(&stage_tasks)?,
        stage_gates: serde_json::from_str(&stage_gates)?,
    })
}

fn decode_workflow(row: &sqlx::sqlite::SqliteRow) -> Result<Workflow> {
    let task_status: String = row.get("task_status");
    let published_stage: String = row.get("published_stage");
    let published_stage: BTreeMap<String, bool> = serde_json::from_str(&published_stage)?;
    Ok(Workflow {
        workflow_id: row.get("workflow_id"),
        process_id: row.get("process_id"),
        task_status: serde_json::from_str(&task_status)?,
        published_stage,
        created_at: parse_timestamp(row.get("created_at"))?,
        updated_at: parse_timestamp(row.get("updated_at"))?,
    })
}

pub(crate) fn parse_timestamp(raw: String) -> Result<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(t) => Ok(t.with_timezone(&Utc)),
        Err(source) => Err(EngineError::CorruptTimestamp { raw, source }),
    }
}
