//! Expiry scheduler for temporary rules
//!
//! A single background task wakes on a fixed interval and retracts every
//! temporary rule whose deadline has passed. Because iptables addresses rules
//! only by line number, each due row is handled as snapshot, match, delete:
//!
//! 1. list the row's table and parse it;
//! 2. locate the rule in the row's chain by its canonical spec
//!    ([`crate::core::matcher`]);
//! 3. delete it by the line number just found and record the outcome;
//! 4. drop the tracking row, whatever happened.
//!
//! The snapshot-then-delete sequence is not atomic against the tool, so every
//! pass (timer-driven or manual) runs inside one exclusive section. Rows are
//! processed one at a time because each delete renumbers the chain.
//!
//! # Lifecycle
//!
//! `NotStarted -> Running -> Stopping -> Stopped`. [`RuleScheduler::stop`]
//! lets an in-flight pass finish and returns only once no further delete can
//! be issued. A stopped scheduler cannot be restarted.

use crate::audit::{self, ActionKind, HistoryRecord, SCHEDULER_ACTOR, SCHEDULER_ORIGIN};
use crate::core::error::{Error, Result};
use crate::core::iptables::PacketFilter;
use crate::core::matcher::find_line_number;
use crate::core::parser::parse_listing;
use crate::store::{Store, TemporaryRule};
use crate::validators;
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default period between passes
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum SchedulerState {
    NotStarted,
    Running,
    Stopping,
    Stopped,
}

/// Outcome counts of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Due rows handled (each one is removed from the store)
    pub processed: usize,
    pub deleted: usize,
    /// Deletes the tool rejected
    pub failed: usize,
    /// Rows with no matching live rule, including unreadable listings
    pub not_found: usize,
}

enum Expiry {
    Deleted,
    Failed,
    NotFound,
}

struct Lifecycle {
    state: SchedulerState,
    worker: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

struct Worker {
    store: Store,
    filter: Arc<dyn PacketFilter>,
    /// Exclusive section for passes; `true` once the scheduler has stopped
    tick_lock: tokio::sync::Mutex<bool>,
}

/// Owns the expiry worker and its lifecycle
pub struct RuleScheduler {
    worker: Arc<Worker>,
    interval: Duration,
    lifecycle: Mutex<Lifecycle>,
}

impl RuleScheduler {
    pub fn new(store: Store, filter: Arc<dyn PacketFilter>, interval: Duration) -> Self {
        Self {
            worker: Arc::new(Worker {
                store,
                filter,
                tick_lock: tokio::sync::Mutex::new(false),
            }),
            interval,
            lifecycle: Mutex::new(Lifecycle {
                state: SchedulerState::NotStarted,
                worker: None,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn state(&self) -> SchedulerState {
        self.lifecycle().state
    }

    /// Launches the background worker.
    ///
    /// Calling this while running is a no-op. Must be called from within a
    /// tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Scheduler`] once the scheduler has been stopped.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle();
        match lifecycle.state {
            SchedulerState::Running => {
                debug!("Scheduler already running");
                return Ok(());
            }
            SchedulerState::Stopping | SchedulerState::Stopped => {
                return Err(Error::Scheduler(
                    "scheduler has been stopped and cannot be restarted".to_string(),
                ));
            }
            SchedulerState::NotStarted => {}
        }

        let worker = Arc::clone(&self.worker);
        let shutdown = lifecycle.shutdown.clone();
        let period = self.interval;
        lifecycle.worker = Some(tokio::spawn(async move {
            worker.run(period, shutdown).await;
        }));
        lifecycle.state = SchedulerState::Running;

        info!("Expiry scheduler started (interval: {}s)", period.as_secs_f64());
        Ok(())
    }

    /// Stops the worker, waiting for an in-flight pass to finish.
    ///
    /// After this returns no pass runs again, timer-driven or manual.
    pub async fn stop(&self) {
        let handle = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state == SchedulerState::Stopped {
                return;
            }
            lifecycle.state = SchedulerState::Stopping;
            lifecycle.shutdown.cancel();
            lifecycle.worker.take()
        };

        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!("Scheduler worker ended abnormally: {e}");
        }

        // Waits out any manual pass still holding the section
        *self.worker.tick_lock.lock().await = true;

        self.lifecycle().state = SchedulerState::Stopped;
        info!("Expiry scheduler stopped");
    }

    /// Runs one pass now, under the same exclusive section as the timer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Scheduler`] after [`stop`](Self::stop), or a store
    /// error if the due-row scan fails.
    pub async fn run_pending(&self) -> Result<TickReport> {
        self.worker.pass().await
    }

    /// Registers a rule for deletion `ttl_seconds` from now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a bad table or chain, a zero TTL or
    /// an empty spec; otherwise any store error.
    pub async fn schedule_deletion(
        &self,
        table: &str,
        chain: &str,
        canonical_spec: &str,
        ttl_seconds: u64,
    ) -> Result<TemporaryRule> {
        validators::validate_table(table).map_err(|m| Error::validation("table", m))?;
        validators::validate_chain(chain).map_err(|m| Error::validation("chain", m))?;
        if ttl_seconds == 0 {
            return Err(Error::validation("ttl", "TTL must be positive"));
        }
        if canonical_spec.trim().is_empty() {
            return Err(Error::validation("spec", "Rule spec is empty"));
        }

        let rule = TemporaryRule::new(table, chain, canonical_spec, ttl_seconds);
        self.worker.store.insert_temp_rule(&rule).await?;

        info!(
            id = %rule.id,
            table,
            chain,
            expires_at = %rule.expires_at,
            "Scheduled rule deletion"
        );
        Ok(rule)
    }
}

impl Worker {
    async fn run(&self, period: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.pass().await {
                Ok(report) if report.processed > 0 => info!(
                    processed = report.processed,
                    deleted = report.deleted,
                    failed = report.failed,
                    not_found = report.not_found,
                    "Expiry pass complete"
                ),
                Ok(_) => {}
                Err(Error::Scheduler(_)) => break,
                Err(e) => warn!("Expiry pass failed: {e}"),
            }
        }

        debug!("Expiry worker exiting");
    }

    async fn pass(&self) -> Result<TickReport> {
        let stopped = self.tick_lock.lock().await;
        if *stopped {
            return Err(Error::Scheduler("scheduler is stopped".to_string()));
        }

        let mut report = TickReport::default();
        for row in self.store.due_temp_rules(Utc::now()).await? {
            report.processed += 1;
            match self.expire(&row).await {
                Expiry::Deleted => report.deleted += 1,
                Expiry::Failed => report.failed += 1,
                Expiry::NotFound => report.not_found += 1,
            }

            if let Err(e) = self.store.delete_temp_rule(row.id).await {
                warn!(id = %row.id, "Failed to remove tracking row: {e}");
            }
        }

        drop(stopped);
        Ok(report)
    }

    async fn expire(&self, row: &TemporaryRule) -> Expiry {
        let table = row.table.as_str();
        let chain = row.chain.as_str();

        let raw = match self.filter.list_rules(table).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(id = %row.id, table, chain, "Listing failed, treating as not found: {e}");
                return Expiry::NotFound;
            }
        };

        let rules = parse_listing(&raw, table);
        let Some(line) = find_line_number(&rules, chain, &row.rule_spec) else {
            info!(
                id = %row.id,
                table,
                chain,
                spec = %row.rule_spec,
                "Temporary rule no longer present"
            );
            return Expiry::NotFound;
        };

        let result = self.filter.delete_rule(table, chain, line).await;
        audit::record(
            &self.store,
            HistoryRecord::new(ActionKind::AutoDelete, table, chain, row.rule_spec.as_str())
                .by(SCHEDULER_ACTOR, SCHEDULER_ORIGIN)
                .outcome(&result),
        )
        .await;

        match result {
            Ok(()) => {
                info!(id = %row.id, table, chain, line, "Expired rule deleted");
                Expiry::Deleted
            }
            Err(e) => {
                error!(id = %row.id, table, chain, line, "Expired rule delete failed: {e}");
                Expiry::Failed
            }
        }
    }
}
