//! One feed, one destination calendar, one state store.

use chrono::Utc;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::calendar::{CalendarStore, FeedSource};
use crate::config::{validate_config, SyncConfig};
use crate::database::StateStore;
use crate::error::{SyncError, SyncResult};
use crate::feed::parse_feed;
use crate::identity::DestinationView;
use crate::models::SyncReport;
use crate::reconcile::{apply_plan, plan, ApplyOptions, PlanOptions};
use crate::utils::{elapsed_ms, logging};

pub struct SyncEngine {
    config: SyncConfig,
    feed: Arc<dyn FeedSource>,
    calendar: Arc<dyn CalendarStore>,
    state: Arc<dyn StateStore>,
    pass_lock: Mutex<()>,
    shutdown: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        feed: Arc<dyn FeedSource>,
        calendar: Arc<dyn CalendarStore>,
        state: Arc<dyn StateStore>,
    ) -> SyncResult<Self> {
        validate_config(&config)?;
        Ok(Self {
            config,
            feed,
            calendar,
            state,
            pass_lock: Mutex::new(()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Cancelling this token stops the running pass before its next write.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run one reconciliation pass.
    ///
    /// Fails without touching the destination when the state, the feed or
    /// the feed's structure is unusable. Per-event and per-operation
    /// problems end up in the report instead.
    pub async fn run_pass(&self) -> SyncResult<SyncReport> {
        let _guard = self.pass_lock.try_lock().map_err(|_| SyncError::PassInProgress)?;
        let started = Instant::now();
        let now = Utc::now();
        let calendar = self.config.destination_calendar.as_str();

        let result = self.run_locked(now).await;
        match &result {
            Ok(report) => logging::log_sync_pass(calendar, report, elapsed_ms(started)),
            Err(e) if e.is_pass_fatal() => error!("[Sync] {}: pass aborted: {}", calendar, e.to_safe_string()),
            Err(e) => warn!("[Sync] {}: pass stopped: {}", calendar, e.to_safe_string()),
        }
        result
    }

    async fn run_locked(&self, now: chrono::DateTime<Utc>) -> SyncResult<SyncReport> {
        let prior = self
            .state
            .load()
            .await
            .map_err(|e| SyncError::state_store(format!("{:#}", e)))?;

        let text = self.feed.fetch().await.map_err(|e| {
            SyncError::feed_unavailable(format!("{}: {:#}", self.feed.describe(), e))
        })?;

        let parsed = parse_feed(&text)?;
        info!(
            "Parsed {} events from {} ({} diagnostics)",
            parsed.events.len(),
            self.feed.describe(),
            parsed.diagnostics.len()
        );

        let (from, to) = self.config.window.bounds(now);
        let view = DestinationView::gather(
            self.calendar.as_ref(),
            &prior,
            &self.config.destination_calendar,
            from,
            to,
        )
        .await;

        let options = PlanOptions {
            window: self.config.window,
            delete_orphans: self.config.delete_orphans,
        };
        let mut plan = plan(parsed.events, &prior, &view, &options, now);
        let mut diagnostics = parsed.diagnostics;
        diagnostics.append(&mut plan.diagnostics);
        plan.diagnostics = diagnostics;

        if self.config.dry_run {
            info!("Dry run: {}", plan.summary());
            let mut report = SyncReport::dry_run(plan);
            report.sync_time = now;
            return Ok(report);
        }

        let outcome = apply_plan(
            &plan,
            self.calendar.as_ref(),
            &ApplyOptions {
                calendar: &self.config.destination_calendar,
                operation_timeout: self.config.operation_timeout(),
                cancel: &self.shutdown,
                now,
            },
        )
        .await?;

        self.state
            .replace(&outcome.snapshot)
            .await
            .map_err(|e| SyncError::state_store(format!("could not save state: {:#}", e)))?;

        if let Err(e) = self.state.record_pass(now, outcome.report.status()).await {
            logging::log_error_with_context(&e, "record pass");
        }

        Ok(outcome.report)
    }

    /// Forget every tracked record. The destination is left alone.
    pub async fn reset_state(&self) -> SyncResult<()> {
        let _guard = self.pass_lock.try_lock().map_err(|_| SyncError::PassInProgress)?;
        self.state
            .reset()
            .await
            .map_err(|e| SyncError::state_store(format!("{:#}", e)))?;
        info!("State reset for {}", self.config.destination_calendar);
        Ok(())
    }
}
