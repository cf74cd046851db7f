// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Built-in cron job scheduler.
//!
//! [`Schedulers`] implements [`SchedulerRunner`]. Every run drives one
//! [`JobScheduler`] for a single (application, partition, workspace, job):
//!
//! ```text
//! Initializing ──resolve cron (retry while app unknown)──▶ Running ──cancel──▶ Finalizing
//!       │                                                    │
//!       └── job missing / bad cron ──▶ stop                  └── fire: borrow, invoke, apply intents, release
//! ```
//!
//! A failing fire is logged and counted; the job keeps its schedule.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use croner::Cron;
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::engines::Intents;
use crate::error::{Error, Result};
use crate::registry::AppPartitions;
use crate::retry::retry_while;
use crate::runners::SchedulerRunner;
use crate::types::{AppQName, CallerKind, PartitionId, QName, WorkspaceId};

/// What a job is told about the current fire. Passed to the job as its state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobContext {
    /// Application name.
    pub app: AppQName,
    /// Partition the job runs in.
    pub partition: PartitionId,
    /// App workspace the job runs for.
    pub workspace: WorkspaceId,
    /// Index of the app workspace.
    pub workspace_index: usize,
    /// Job name.
    pub job: QName,
    /// Scheduled fire time.
    pub fired_at: DateTime<Utc>,
}

/// Applies side effects produced by jobs.
#[async_trait]
pub trait IntentsApplier: Send + Sync {
    /// Apply `intents` produced by one fire of `job`.
    async fn apply(&self, job: &JobContext, intents: Intents) -> Result<()>;
}

/// Applier that drops every intent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardIntents;

#[async_trait]
impl IntentsApplier for DiscardIntents {
    async fn apply(&self, job: &JobContext, intents: Intents) -> Result<()> {
        if !intents.is_empty() {
            debug!(job = %job.job, intents = intents.len(), "Discarding job intents");
        }
        Ok(())
    }
}

/// Counters shared by every job of one [`Schedulers`].
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    fires: AtomicU64,
    failures: AtomicU64,
    in_error: AtomicI64,
}

impl SchedulerMetrics {
    /// Successful fires.
    pub fn fires(&self) -> u64 {
        self.fires.load(Ordering::Relaxed)
    }

    /// Failed fires.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Jobs whose last fire failed.
    pub fn in_error(&self) -> i64 {
        self.in_error.load(Ordering::Relaxed)
    }
}

/// Built-in scheduler runner.
pub struct Schedulers {
    parts: OnceCell<Weak<AppPartitions>>,
    clock: Arc<dyn Clock>,
    intents: Arc<dyn IntentsApplier>,
    init_retry_delay: Duration,
    metrics: Arc<SchedulerMetrics>,
}

impl Schedulers {
    /// Create a runner using the system clock and discarding intents.
    pub fn new(init_retry_delay: Duration) -> Self {
        Self::with_collaborators(
            Arc::new(SystemClock),
            Arc::new(DiscardIntents),
            init_retry_delay,
        )
    }

    /// Create a runner with an explicit clock and intents applier.
    pub fn with_collaborators(
        clock: Arc<dyn Clock>,
        intents: Arc<dyn IntentsApplier>,
        init_retry_delay: Duration,
    ) -> Self {
        Self {
            parts: OnceCell::new(),
            clock,
            intents,
            init_retry_delay,
            metrics: Arc::new(SchedulerMetrics::default()),
        }
    }

    /// Counters of every job run by this runner.
    pub fn metrics(&self) -> Arc<SchedulerMetrics> {
        self.metrics.clone()
    }
}

#[async_trait]
impl SchedulerRunner for Schedulers {
    fn set_app_partitions(&self, parts: Weak<AppPartitions>) {
        if self.parts.set(parts).is_err() {
            warn!("Scheduler runner is already bound to a registry");
        }
    }

    async fn new_and_run(
        &self,
        token: CancellationToken,
        app: AppQName,
        partition: PartitionId,
        workspace_index: usize,
        workspace: WorkspaceId,
        job: QName,
    ) {
        let Some(parts) = self.parts.get().cloned() else {
            error!(app = %app, job = %job, "Scheduler runner is not bound to a registry");
            return;
        };

        JobScheduler {
            parts,
            clock: self.clock.clone(),
            intents: self.intents.clone(),
            metrics: self.metrics.clone(),
            init_retry_delay: self.init_retry_delay,
            app,
            partition,
            workspace_index,
            workspace,
            job,
            in_error: false,
        }
        .run(token)
        .await;
    }
}

/// Schedule of one job in one app workspace.
pub struct JobScheduler {
    parts: Weak<AppPartitions>,
    clock: Arc<dyn Clock>,
    intents: Arc<dyn IntentsApplier>,
    metrics: Arc<SchedulerMetrics>,
    init_retry_delay: Duration,
    app: AppQName,
    partition: PartitionId,
    workspace_index: usize,
    workspace: WorkspaceId,
    job: QName,
    in_error: bool,
}

impl JobScheduler {
    /// Run until `token` is cancelled or the schedule can not be resolved.
    pub async fn run(mut self, token: CancellationToken) {
        match self.init(&token).await {
            Ok(cron) => {
                info!(
                    app = %self.app,
                    partition = %self.partition,
                    workspace = %self.workspace,
                    job = %self.job,
                    "Job scheduler started"
                );
                self.keep_running(&token, &cron).await;
            }
            Err(e) if e.is_cancelled() => {
                debug!(app = %self.app, job = %self.job, "Job scheduler cancelled before start");
            }
            Err(e) => {
                error!(
                    app = %self.app,
                    partition = %self.partition,
                    workspace = %self.workspace,
                    job = %self.job,
                    error = %e,
                    "Job scheduler failed to start"
                );
            }
        }
        self.finalize();
    }

    async fn init(&self, token: &CancellationToken) -> Result<Cron> {
        retry_while(
            token,
            self.init_retry_delay,
            Error::is_retryable,
            |e, attempt| {
                warn!(
                    app = %self.app,
                    job = %self.job,
                    attempt,
                    error = %e,
                    "Job schedule not available yet, retrying"
                );
            },
            || std::future::ready(self.resolve_schedule()),
        )
        .await
    }

    fn resolve_schedule(&self) -> Result<Cron> {
        let parts = self.parts.upgrade().ok_or(Error::Cancelled)?;
        let def = parts.app_def(&self.app)?;
        let expr = def
            .job(&self.job)
            .and_then(|j| j.cron())
            .ok_or_else(|| Error::ExtensionNotFound(self.job.clone()))?;

        Cron::new(expr)
            .with_seconds_optional()
            .parse()
            .map_err(|e| Error::InvalidSchedule {
                job: self.job.clone(),
                reason: e.to_string(),
            })
    }

    async fn keep_running(&mut self, token: &CancellationToken, cron: &Cron) {
        let mut last_fired: Option<DateTime<Utc>> = None;

        loop {
            let now = self.clock.now();
            let from = last_fired.map_or(now, |t| t.max(now));
            let next = match cron.find_next_occurrence(&from, false) {
                Ok(next) => next,
                Err(e) => {
                    error!(job = %self.job, error = %e, "No next fire time for job");
                    return;
                }
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }

            last_fired = Some(next);
            self.fire(token, next).await;
        }
    }

    async fn fire(&mut self, token: &CancellationToken, fired_at: DateTime<Utc>) {
        match self.execute(token, fired_at).await {
            Ok(()) => {
                self.metrics.fires.fetch_add(1, Ordering::Relaxed);
                if self.in_error {
                    self.in_error = false;
                    self.metrics.in_error.fetch_sub(1, Ordering::Relaxed);
                    info!(app = %self.app, workspace = %self.workspace, job = %self.job, "Job recovered");
                }
            }
            Err(e) if e.is_cancelled() => {
                debug!(job = %self.job, "Job fire cancelled");
            }
            Err(e) => {
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                if !self.in_error {
                    self.in_error = true;
                    self.metrics.in_error.fetch_add(1, Ordering::Relaxed);
                }
                error!(
                    app = %self.app,
                    partition = %self.partition,
                    workspace = %self.workspace,
                    job = %self.job,
                    fired_at = %fired_at,
                    error = %e,
                    "Job failed"
                );
            }
        }
    }

    async fn execute(&self, token: &CancellationToken, fired_at: DateTime<Utc>) -> Result<()> {
        let parts = self.parts.upgrade().ok_or(Error::Cancelled)?;
        let borrowed = parts
            .wait_for_borrow(token, &self.app, self.partition, CallerKind::Scheduler)
            .await?;

        let context = JobContext {
            app: self.app.clone(),
            partition: self.partition,
            workspace: self.workspace,
            workspace_index: self.workspace_index,
            job: self.job.clone(),
            fired_at,
        };
        let state = serde_json::to_value(&context)?;
        let mut intents = Intents::new();

        borrowed
            .invoke(token, &self.job, &state, &mut intents)
            .await?;
        self.intents.apply(&context, intents).await?;
        borrowed.release();

        debug!(job = %self.job, workspace = %self.workspace, "Job fired");
        Ok(())
    }

    fn finalize(&mut self) {
        if self.in_error {
            self.in_error = false;
            self.metrics.in_error.fetch_sub(1, Ordering::Relaxed);
        }
        info!(
            app = %self.app,
            partition = %self.partition,
            workspace = %self.workspace,
            job = %self.job,
            "Job scheduler stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_job_context_serializes_fire_time() {
        let context = JobContext {
            app: "acme/orders".into(),
            partition: PartitionId(2),
            workspace: WorkspaceId(65538),
            workspace_index: 2,
            job: "orders.Cleanup".into(),
            fired_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 10).unwrap(),
        };
        let json = serde_json::to_value(&context).unwrap();
        assert_eq!(json["app"], "acme/orders");
        assert_eq!(json["partition"], 2);
        assert_eq!(json["workspace"], 65538);
        assert_eq!(json["fired_at"], "2025-01-01T00:00:10Z");
    }

    #[test]
    fn test_cron_with_optional_seconds() {
        let cron = Cron::new("*/10 * * * * *")
            .with_seconds_optional()
            .parse()
            .unwrap();
        let from = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 3).unwrap();
        let next = cron.find_next_occurrence(&from, false).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 10).unwrap());

        let five_fields = Cron::new("0 * * * *").with_seconds_optional().parse();
        assert!(five_fields.is_ok());
    }

    #[tokio::test]
    async fn test_unbound_runner_returns() {
        let schedulers = Schedulers::new(Duration::from_millis(10));
        schedulers
            .new_and_run(
                CancellationToken::new(),
                "acme/orders".into(),
                PartitionId(0),
                0,
                WorkspaceId(65536),
                "orders.Cleanup".into(),
            )
            .await;
        assert_eq!(schedulers.metrics().fires(), 0);
    }
}
