// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for runtara-appparts integration tests.
//!
//! Provides recording runners, a tokio-driven clock and a TestContext that
//! wires a registry with mock engines.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use runtara_appparts::clock::Clock;
use runtara_appparts::engines::{EngineFactories, Intents, MockEngineFactory};
use runtara_appparts::registry::{AppPartitions, Collaborators};
use runtara_appparts::runners::{ActualizerRunner, SchedulerRunner};
use runtara_appparts::scheduler::{IntentsApplier, JobContext};
use runtara_appparts::{AppQName, EngineKind, PartitionId, QName, WorkspaceId};

/// Install a tracing subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Key of one running background processor instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunKey {
    pub app: AppQName,
    pub partition: PartitionId,
    pub workspace: Option<WorkspaceId>,
    pub name: QName,
}

/// Records which processors are running right now.
#[derive(Debug, Default, Clone)]
pub struct RunningSet {
    running: Arc<Mutex<HashMap<RunKey, usize>>>,
    started_total: Arc<Mutex<usize>>,
}

impl RunningSet {
    fn enter(&self, key: RunKey) {
        *self.running.lock().unwrap().entry(key).or_insert(0) += 1;
        *self.started_total.lock().unwrap() += 1;
    }

    fn leave(&self, key: &RunKey) {
        let mut running = self.running.lock().unwrap();
        if let Some(n) = running.get_mut(key) {
            *n -= 1;
            if *n == 0 {
                running.remove(key);
            }
        }
    }

    /// Sorted names running in `partition` of `app`.
    pub fn names(&self, app: &AppQName, partition: PartitionId) -> Vec<QName> {
        let mut names: Vec<QName> = self
            .running
            .lock()
            .unwrap()
            .keys()
            .filter(|k| &k.app == app && k.partition == partition)
            .map(|k| k.name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Number of running processor instances.
    pub fn total(&self) -> usize {
        self.running.lock().unwrap().values().sum()
    }

    /// Number of processor instances ever started.
    pub fn started_total(&self) -> usize {
        *self.started_total.lock().unwrap()
    }

    /// Largest number of instances of one key running at the same time.
    pub fn max_instances(&self) -> usize {
        self.running.lock().unwrap().values().copied().max().unwrap_or(0)
    }
}

/// Actualizer runner that idles until cancelled.
#[derive(Debug, Default, Clone)]
pub struct MockActualizers {
    pub running: RunningSet,
}

#[async_trait]
impl ActualizerRunner for MockActualizers {
    async fn new_and_run(
        &self,
        token: CancellationToken,
        app: AppQName,
        partition: PartitionId,
        projector: QName,
    ) {
        let key = RunKey {
            app,
            partition,
            workspace: None,
            name: projector,
        };
        self.running.enter(key.clone());
        token.cancelled().await;
        self.running.leave(&key);
    }
}

/// Scheduler runner that idles until cancelled, once per workspace.
#[derive(Debug, Default, Clone)]
pub struct MockSchedulers {
    pub running: RunningSet,
}

#[async_trait]
impl SchedulerRunner for MockSchedulers {
    async fn new_and_run(
        &self,
        token: CancellationToken,
        app: AppQName,
        partition: PartitionId,
        _workspace_index: usize,
        workspace: WorkspaceId,
        job: QName,
    ) {
        let key = RunKey {
            app,
            partition,
            workspace: Some(workspace),
            name: job,
        };
        self.running.enter(key.clone());
        token.cancelled().await;
        self.running.leave(&key);
    }
}

/// Clock following tokio time, so paused tests control it.
pub struct TokioClock {
    base: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl TokioClock {
    /// Clock reading `base` now. Must be created inside a tokio runtime.
    pub fn starting_at(base: DateTime<Utc>) -> Self {
        Self {
            base,
            start: tokio::time::Instant::now(),
        }
    }

    /// Clock starting at 2025-01-01T00:00:00Z.
    pub fn new() -> Self {
        Self::starting_at(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.start.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.base + elapsed
    }
}

/// Intents applier recording every applied batch.
#[derive(Debug, Default, Clone)]
pub struct RecordingIntents {
    applied: Arc<Mutex<Vec<(JobContext, usize)>>>,
}

impl RecordingIntents {
    /// Applied batches as (job context, intent count).
    pub fn applied(&self) -> Vec<(JobContext, usize)> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl IntentsApplier for RecordingIntents {
    async fn apply(&self, job: &JobContext, intents: Intents) -> runtara_appparts::Result<()> {
        self.applied.lock().unwrap().push((job.clone(), intents.len()));
        Ok(())
    }
}

/// Registry with mock engines and recording runners.
pub struct TestContext {
    pub root: CancellationToken,
    pub engines: MockEngineFactory,
    pub actualizers: MockActualizers,
    pub schedulers: MockSchedulers,
    pub parts: Arc<AppPartitions>,
}

impl TestContext {
    /// Registry using the recording scheduler runner.
    pub fn new() -> Self {
        let schedulers = MockSchedulers::default();
        Self::with_schedulers(schedulers.clone(), Arc::new(schedulers))
    }

    /// Registry using `runner` for jobs. `schedulers` is kept for inspection only.
    pub fn with_schedulers(schedulers: MockSchedulers, runner: Arc<dyn SchedulerRunner>) -> Self {
        init_tracing();
        let root = CancellationToken::new();
        let engines = MockEngineFactory::new(EngineKind::Builtin);
        let actualizers = MockActualizers::default();

        let parts = AppPartitions::new(
            root.clone(),
            Collaborators::new(
                EngineFactories::new().with(Arc::new(engines.clone())),
                Arc::new(actualizers.clone()),
                runner,
            ),
            Duration::from_millis(5),
        );

        Self {
            root,
            engines,
            actualizers,
            schedulers,
            parts,
        }
    }

    /// Cancel every processor and wait until they are gone.
    pub async fn shutdown(&self) {
        self.root.cancel();
        assert!(
            self.parts
                .wait_processors_drained(Duration::from_secs(5))
                .await,
            "processors did not drain"
        );
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Partition ids `0..n`.
pub fn partition_ids(n: u16) -> Vec<PartitionId> {
    (0..n).map(PartitionId).collect()
}
