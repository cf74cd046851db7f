// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Partition processors reconciler.
//!
//! Keeps the background processors of one partition in line with the
//! current application definition:
//!
//! | Declared as | Caller kind | Runner |
//! |-------------|-------------|--------|
//! | async projector | `Actualizer` | [`ActualizerRunner`] |
//! | job | `Scheduler` | [`SchedulerRunner`], once per owned workspace |
//!
//! [`PartitionProcessors::deploy`] first stops every processor no longer
//! declared, waits until they have finished, then starts every declared
//! processor not yet running and waits until each has started.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::app::App;
use crate::appdef::AppDef;
use crate::runners::{ActualizerRunner, SchedulerRunner};
use crate::structs::AppStructs;
use crate::types::{CallerKind, PartitionId, QName};

/// Lifecycle state of a background processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Spawned, body not entered yet.
    New,
    /// Body is running.
    Started,
    /// Body returned and the processor is no longer tracked.
    Finished,
}

struct Tracked {
    kind: CallerKind,
    generation: u64,
    token: CancellationToken,
    state: watch::Receiver<ProcessorState>,
}

type Entries = Arc<RwLock<HashMap<QName, Tracked>>>;

/// Background processors of one partition.
pub struct PartitionProcessors {
    app: Arc<App>,
    partition: PartitionId,
    root: CancellationToken,
    tracker: TaskTracker,
    actualizers: Arc<dyn ActualizerRunner>,
    schedulers: Arc<dyn SchedulerRunner>,
    entries: Entries,
    generation: AtomicU64,
    deploy_lock: Mutex<()>,
}

impl PartitionProcessors {
    pub(crate) fn new(
        app: Arc<App>,
        partition: PartitionId,
        root: CancellationToken,
        tracker: TaskTracker,
        actualizers: Arc<dyn ActualizerRunner>,
        schedulers: Arc<dyn SchedulerRunner>,
    ) -> Self {
        Self {
            app,
            partition,
            root,
            tracker,
            actualizers,
            schedulers,
            entries: Arc::new(RwLock::new(HashMap::new())),
            generation: AtomicU64::new(0),
            deploy_lock: Mutex::new(()),
        }
    }

    /// Partition id.
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Reconcile running processors with the current application definition.
    ///
    /// Concurrent calls on the same partition run one after another.
    pub async fn deploy(&self) {
        let _guard = self.deploy_lock.lock().await;
        let version = self.app.version();
        let def = version.def();

        self.stop_stale(def).await;
        self.start_missing(def, version.structs()).await;

        debug!(
            app = %self.app.name(),
            partition = %self.partition,
            processors = self.count(),
            "Partition processors deployed"
        );
    }

    /// Tracked processors, sorted by name.
    pub fn enumerate(&self) -> Vec<(QName, CallerKind)> {
        let mut list: Vec<_> = self
            .read_entries()
            .iter()
            .map(|(name, t)| (name.clone(), t.kind))
            .collect();
        list.sort();
        list
    }

    /// Number of tracked processors.
    pub fn count(&self) -> usize {
        self.read_entries().len()
    }

    /// Current state of processor `name`, if tracked.
    pub fn state(&self, name: &QName) -> Option<ProcessorState> {
        self.read_entries().get(name).map(|t| *t.state.borrow())
    }

    async fn stop_stale(&self, def: &AppDef) {
        let stale: Vec<(QName, CancellationToken, watch::Receiver<ProcessorState>)> = self
            .read_entries()
            .iter()
            .filter(|(name, t)| match t.kind {
                CallerKind::Actualizer => def
                    .projector(name)
                    .is_none_or(|p| !p.is_async_projector()),
                CallerKind::Scheduler => def.job(name).is_none(),
                CallerKind::Command | CallerKind::Query => false,
            })
            .map(|(name, t)| (name.clone(), t.token.clone(), t.state.clone()))
            .collect();

        if stale.is_empty() {
            return;
        }

        for (name, token, _) in &stale {
            info!(
                app = %self.app.name(),
                partition = %self.partition,
                processor = %name,
                "Stopping processor"
            );
            token.cancel();
        }

        join_all(stale.into_iter().map(|(_, _, mut state)| async move {
            // A closed channel means the task is gone too.
            let _ = state.wait_for(|s| *s == ProcessorState::Finished).await;
        }))
        .await;
    }

    async fn start_missing(&self, def: &AppDef, structs: &AppStructs) {
        let started: Vec<watch::Receiver<ProcessorState>> = {
            let mut entries = self.write_entries();
            let declared = def
                .async_projectors()
                .map(|p| (p.name.clone(), CallerKind::Actualizer))
                .chain(def.jobs().map(|j| (j.name.clone(), CallerKind::Scheduler)));

            let mut started = Vec::new();
            for (name, kind) in declared {
                if entries.contains_key(&name) {
                    continue;
                }
                started.push(self.start(&mut entries, name, kind, structs));
            }
            started
        };

        join_all(started.into_iter().map(|mut state| async move {
            let _ = state.wait_for(|s| *s != ProcessorState::New).await;
        }))
        .await;
    }

    fn start(
        &self,
        entries: &mut HashMap<QName, Tracked>,
        name: QName,
        kind: CallerKind,
        structs: &AppStructs,
    ) -> watch::Receiver<ProcessorState> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        let (state_tx, state_rx) = watch::channel(ProcessorState::New);

        entries.insert(
            name.clone(),
            Tracked {
                kind,
                generation,
                token: token.clone(),
                state: state_rx.clone(),
            },
        );

        info!(
            app = %self.app.name(),
            partition = %self.partition,
            processor = %name,
            kind = %kind,
            "Starting processor"
        );

        let body = self.body(kind, name.clone(), token, structs);
        let tracked = self.entries.clone();
        let app = self.app.name().clone();
        let partition = self.partition;

        self.tracker.spawn(async move {
            state_tx.send_replace(ProcessorState::Started);

            if let Err(e) = tokio::spawn(body).await {
                error!(
                    app = %app,
                    partition = %partition,
                    processor = %name,
                    error = %e,
                    "Processor task panicked"
                );
            }

            {
                let mut entries = tracked.write().unwrap_or_else(PoisonError::into_inner);
                if entries.get(&name).is_some_and(|t| t.generation == generation) {
                    entries.remove(&name);
                }
            }

            debug!(app = %app, partition = %partition, processor = %name, "Processor finished");
            state_tx.send_replace(ProcessorState::Finished);
        });

        state_rx
    }

    fn body(
        &self,
        kind: CallerKind,
        name: QName,
        token: CancellationToken,
        structs: &AppStructs,
    ) -> BoxFuture<'static, ()> {
        let app = self.app.name().clone();
        let partition = self.partition;

        match kind {
            CallerKind::Scheduler => {
                let runner = self.schedulers.clone();
                let workspaces = structs.workspaces_handled_by(partition);
                async move {
                    if workspaces.is_empty() {
                        token.cancelled().await;
                        return;
                    }
                    join_all(workspaces.into_iter().map(|(idx, ws)| {
                        runner.new_and_run(
                            token.clone(),
                            app.clone(),
                            partition,
                            idx,
                            ws,
                            name.clone(),
                        )
                    }))
                    .await;
                }
                .boxed()
            }
            CallerKind::Actualizer => {
                let runner = self.actualizers.clone();
                async move { runner.new_and_run(token, app, partition, name).await }.boxed()
            }
            CallerKind::Command | CallerKind::Query => {
                unreachable!("{kind} callers have no background processors")
            }
        }
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<QName, Tracked>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<QName, Tracked>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PartitionProcessors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionProcessors")
            .field("app", self.app.name())
            .field("partition", &self.partition)
            .field("processors", &self.enumerate())
            .finish()
    }
}
