// file: src/database/mod.rs

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePool, Row, Sqlite};
use std::path::Path;
use std::time::Instant;

use crate::models::{PassStatus, StateSnapshot};
use crate::utils::{elapsed_ms, logging};

// Declare submodules
pub mod memory;
pub mod meta;
pub mod tracked;

pub use memory::MemoryStateStore;

/// Durable home of the reconciliation state.
///
/// `replace` must be atomic: after a crash the store holds either the old or
/// the new snapshot, never a mix.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<StateSnapshot>;

    async fn replace(&self, snapshot: &StateSnapshot) -> Result<()>;

    async fn reset(&self) -> Result<()>;

    /// Bookkeeping after a pass; stores without it ignore the call.
    async fn record_pass(&self, _at: DateTime<Utc>, _status: PassStatus) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the state database at `path`.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state directory {}", parent.display()))?;
        }
        Self::connect(&format!("sqlite:{}?mode=rwc", path.display())).await
    }

    pub async fn connect(db_url: &str) -> Result<Self> {
        // Create database if it doesn't exist
        let db_exists = Sqlite::database_exists(db_url)
            .await
            .context("Failed to check if database exists")?;
        if !db_exists {
            info!("Creating state database");
            Sqlite::create_database(db_url)
                .await
                .context("Failed to create database")?;
        }

        let pool = SqlitePool::connect(db_url)
            .await
            .context("Failed to connect to database")?;

        run_schema(&pool).await.context("Failed to run database schema")?;
        ensure_migrations(&pool).await.context("Failed to ensure migrations")?;

        info!("State database initialized successfully");

        Ok(Database { pool })
    }

    pub async fn last_pass_at(&self) -> Result<Option<DateTime<Utc>>> {
        meta::last_pass_at(&self.pool).await
    }

    pub async fn last_pass_status(&self) -> Result<Option<String>> {
        meta::get(&self.pool, meta::LAST_PASS_STATUS).await
    }
}

#[async_trait]
impl StateStore for Database {
    async fn load(&self) -> Result<StateSnapshot> {
        let records = tracked::load_all(&self.pool).await?;
        Ok(StateSnapshot::from_records(records))
    }

    async fn replace(&self, snapshot: &StateSnapshot) -> Result<()> {
        let started = Instant::now();
        tracked::replace_all(&self.pool, snapshot).await?;
        logging::log_state_write(snapshot.len(), elapsed_ms(started));
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        let removed = tracked::clear(&self.pool).await?;
        info!("Reset reconciliation state ({} records removed)", removed);
        Ok(())
    }

    async fn record_pass(&self, at: DateTime<Utc>, status: PassStatus) -> Result<()> {
        let status = match status {
            PassStatus::Completed => "completed",
            PassStatus::CompletedWithErrors => "completed_with_errors",
        };
        meta::set(&self.pool, meta::LAST_PASS_AT, &at.to_rfc3339()).await?;
        meta::set(&self.pool, meta::LAST_PASS_STATUS, status).await?;
        Ok(())
    }
}

async fn run_schema(pool: &SqlitePool) -> Result<()> {
    let schema = include_str!("schema.sql");

    let mut current_statement = String::new();
    for line in schema.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") || trimmed.is_empty() {
            continue;
        }

        current_statement.push_str(line);
        current_statement.push('\n');

        if trimmed.ends_with(';') {
            sqlx::query(&current_statement).execute(pool).await?;
            current_statement.clear();
        }
    }
    Ok(())
}

/// Bring databases written by earlier layouts up to date.
async fn ensure_migrations(pool: &SqlitePool) -> Result<()> {
    let rows = sqlx::query("PRAGMA table_info(tracked_events)")
        .fetch_all(pool)
        .await
        .context("Failed to fetch table info")?;

    let columns: Vec<String> = rows
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect();

    if !columns.iter().any(|c| c == "secondary_id") {
        info!("Migrating: Adding secondary_id column to tracked_events table");
        sqlx::query("ALTER TABLE tracked_events ADD COLUMN secondary_id TEXT")
            .execute(pool)
            .await
            .context("Failed to add secondary_id column")?;
    }

    if !columns.iter().any(|c| c == "sequence") {
        info!("Migrating: Adding sequence column to tracked_events table");
        sqlx::query("ALTER TABLE tracked_events ADD COLUMN sequence INTEGER NOT NULL DEFAULT 0")
            .execute(pool)
            .await
            .context("Failed to add sequence column")?;
    }

    Ok(())
}
