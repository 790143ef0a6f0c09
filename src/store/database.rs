/// SQLite database bootstrap
///
/// Opens the single engine database (`{data_dir}/stageline.db`) and creates
/// every table the engine, broker and subscriber registry rely on. All three
/// share one pool so the stage engine can enqueue jobs inside the same
/// transaction that flips workflow state.

use crate::config::DatabaseConfig;
use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Database file name inside the data directory
pub const DATABASE_FILE: &str = "stageline.db";

/// Handle to the engine's SQLite database
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    path: PathBuf,
}

impl Database {
    /// Open (creating if missing) the database described by `config`
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| {
            anyhow::anyhow!("Failed to create data directory '{}': {}", config.data_dir, e)
        })?;
        let path = Path::new(&config.data_dir).join(DATABASE_FILE);
        Self::open(&path, config.max_connections).await
    }

    /// Open a database file directly
    pub async fn open(path: &Path, max_connections: u32) -> Result<Self> {
        tracing::info!("🗄️ Opening engine database: {}", path.display());

        // Writers queue on the busy timeout instead of failing with SQLITE_BUSY.
        // At least two connections: a registry miss may read while a write
        // transaction is open.
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(2))
            .connect_with(options)
            .await?;

        let db = Self {
            pool,
            path: path.to_path_buf(),
        };
        db.init_schema().await?;

        tracing::info!("✅ Engine database ready: {}", path.display());
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create all engine tables. Safe to call repeatedly (IF NOT EXISTS).
    ///
    /// Every statement runs on one connection: a pooled connection that read
    /// the schema halfway through would not see the unique index that
    /// `ON CONFLICT` upserts depend on.
    async fn init_schema(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *conn).await?;
        }
        Ok(())
    }
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS process_configs (
        process_id TEXT PRIMARY KEY,
        stage_tasks JSON NOT NULL,
        stage_gates JSON NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workflows (
        workflow_id TEXT PRIMARY KEY,
        process_id TEXT NOT NULL REFERENCES process_configs (process_id),
        task_status JSON NOT NULL,
        published_stage JSON NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    // One row per message: queued rows have no lease, leased rows carry the
    // lease id and its deadline (ms since epoch). `seq` orders the topic.
    r#"
    CREATE TABLE IF NOT EXISTS queue_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        topic TEXT NOT NULL,
        payload BLOB NOT NULL,
        seq INTEGER NOT NULL,
        lease_id TEXT,
        lease_deadline INTEGER,
        enqueued_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_queue_messages_topic_seq
    ON queue_messages(topic, seq)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_queue_messages_deadline
    ON queue_messages(topic, lease_deadline)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subscriptions (
        session_key TEXT PRIMARY KEY,
        process_id TEXT NOT NULL,
        task TEXT NOT NULL,
        health_check_url TEXT NOT NULL,
        callback_url TEXT NOT NULL,
        topic TEXT NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_target
    ON subscriptions(process_id, task, callback_url)
    "#,
];
