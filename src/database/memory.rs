// file: src/database/memory.rs
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::StateStore;
use crate::models::{PassStatus, StateSnapshot};

#[derive(Debug, Default)]
struct Inner {
    snapshot: StateSnapshot,
    fail_load: bool,
    fail_replace: bool,
    replace_count: usize,
    last_pass: Option<(DateTime<Utc>, PassStatus)>,
}

/// State kept for the life of the process only.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: RwLock<Inner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            inner: RwLock::new(Inner {
                snapshot,
                ..Inner::default()
            }),
        }
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        self.inner.read().await.snapshot.clone()
    }

    pub async fn fail_load(&self, failing: bool) {
        self.inner.write().await.fail_load = failing;
    }

    pub async fn fail_replace(&self, failing: bool) {
        self.inner.write().await.fail_replace = failing;
    }

    /// Number of successful `replace` calls.
    pub async fn replace_count(&self) -> usize {
        self.inner.read().await.replace_count
    }

    pub async fn last_pass(&self) -> Option<(DateTime<Utc>, PassStatus)> {
        self.inner.read().await.last_pass
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<StateSnapshot> {
        let inner = self.inner.read().await;
        if inner.fail_load {
            return Err(anyhow!("state storage is locked"));
        }
        Ok(inner.snapshot.clone())
    }

    async fn replace(&self, snapshot: &StateSnapshot) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.fail_replace {
            return Err(anyhow!("state storage is read-only"));
        }
        inner.snapshot = snapshot.clone();
        inner.replace_count += 1;
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.inner.write().await.snapshot = StateSnapshot::new();
        Ok(())
    }

    async fn record_pass(&self, at: DateTime<Utc>, status: PassStatus) -> Result<()> {
        self.inner.write().await.last_pass = Some((at, status));
        Ok(())
    }
}
