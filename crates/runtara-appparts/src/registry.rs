// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Application partitions registry.
//!
//! [`AppPartitions`] owns every deployed application and its activated
//! partitions. It is the only way to borrow a partition.
//!
//! The application map is guarded by one `std::sync::RwLock`. The lock is
//! never held while talking to a pool, reconciling processors or running
//! extensions.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::app::{App, AppVersion};
use crate::appdef::AppDef;
use crate::borrowed::BorrowedPartition;
use crate::engines::EngineFactories;
use crate::error::{Error, Result};
use crate::limits::{Limiter, NoLimits};
use crate::partition::Partition;
use crate::pool::PoolSizes;
use crate::processors::PartitionProcessors;
use crate::retry::retry_while;
use crate::runners::{ActualizerRunner, SchedulerRunner};
use crate::structs::{AppStructs, AppStructsProvider, DefaultAppStructsProvider};
use crate::types::{AppQName, CallerKind, PartitionId, QName};

/// External collaborators of the registry.
pub struct Collaborators {
    /// Engine factories used to fill partition pools.
    pub engines: EngineFactories,
    /// Builds runtime structures for each application version.
    pub structs: Arc<dyn AppStructsProvider>,
    /// Runs async projectors.
    pub actualizers: Arc<dyn ActualizerRunner>,
    /// Runs cron jobs.
    pub schedulers: Arc<dyn SchedulerRunner>,
    /// Rate limiter exposed to borrowed partitions.
    pub limiter: Arc<dyn Limiter>,
}

impl Collaborators {
    /// Collaborators with default structs provider and no rate limits.
    pub fn new(
        engines: EngineFactories,
        actualizers: Arc<dyn ActualizerRunner>,
        schedulers: Arc<dyn SchedulerRunner>,
    ) -> Self {
        Self {
            engines,
            structs: Arc::new(DefaultAppStructsProvider::new()),
            actualizers,
            schedulers,
            limiter: Arc::new(NoLimits),
        }
    }
}

struct AppEntry {
    app: Arc<App>,
    partitions: BTreeMap<PartitionId, Arc<Partition>>,
}

/// Registry of deployed applications and partitions.
pub struct AppPartitions {
    root: CancellationToken,
    tracker: TaskTracker,
    apps: RwLock<HashMap<AppQName, AppEntry>>,
    engines: EngineFactories,
    structs: Arc<dyn AppStructsProvider>,
    actualizers: Arc<dyn ActualizerRunner>,
    schedulers: Arc<dyn SchedulerRunner>,
    limiter: Arc<dyn Limiter>,
    borrow_retry_delay: Duration,
}

impl AppPartitions {
    /// Create a registry. Background processors run under child tokens of `root`.
    ///
    /// Both runners receive a weak reference to the new registry.
    pub fn new(
        root: CancellationToken,
        collaborators: Collaborators,
        borrow_retry_delay: Duration,
    ) -> Arc<Self> {
        let parts = Arc::new(Self {
            root,
            tracker: TaskTracker::new(),
            apps: RwLock::new(HashMap::new()),
            engines: collaborators.engines,
            structs: collaborators.structs,
            actualizers: collaborators.actualizers,
            schedulers: collaborators.schedulers,
            limiter: collaborators.limiter,
            borrow_retry_delay,
        });

        parts.actualizers.set_app_partitions(Arc::downgrade(&parts));
        parts.schedulers.set_app_partitions(Arc::downgrade(&parts));

        parts
    }

    /// Deploy an application and build its first version.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already deployed.
    pub fn deploy_app(
        &self,
        name: AppQName,
        def: AppDef,
        parts_count: u16,
        pool_sizes: PoolSizes,
        workspaces: usize,
    ) -> Result<()> {
        if self.read_apps().contains_key(&name) {
            panic!("application {} already deployed", name);
        }

        let version = self.build_version(&name, def, parts_count, pool_sizes, workspaces)?;
        let stamp = version.structs().version();
        let app = Arc::new(App::new(
            name.clone(),
            parts_count,
            workspaces,
            pool_sizes,
            version,
        ));

        {
            let mut apps = self.apps.write().unwrap_or_else(PoisonError::into_inner);
            if apps.contains_key(&name) {
                drop(apps);
                panic!("application {} already deployed", name);
            }
            apps.insert(
                name.clone(),
                AppEntry {
                    app,
                    partitions: BTreeMap::new(),
                },
            );
        }

        info!(
            app = %name,
            parts_count,
            workspaces,
            version = stamp,
            "Application deployed"
        );
        Ok(())
    }

    /// Activate partitions `ids` of `name` and reconcile their background processors.
    ///
    /// Already deployed partitions are reconciled again. Partitions are
    /// reconciled concurrently.
    pub async fn deploy_app_partitions(&self, name: &AppQName, ids: &[PartitionId]) -> Result<()> {
        let processors: Vec<Arc<PartitionProcessors>> = {
            let mut apps = self.apps.write().unwrap_or_else(PoisonError::into_inner);
            let entry = apps
                .get_mut(name)
                .ok_or_else(|| Error::AppNotFound(name.clone()))?;

            let parts_count = entry.app.parts_count();
            if let Some(&id) = ids.iter().find(|id| id.0 >= parts_count) {
                return Err(Error::PartitionOutOfRange {
                    app: name.clone(),
                    partition: id,
                    parts_count,
                });
            }

            ids.iter()
                .map(|&id| {
                    let app = entry.app.clone();
                    entry
                        .partitions
                        .entry(id)
                        .or_insert_with(|| {
                            debug!(app = %name, partition = %id, "Partition created");
                            Arc::new(self.new_partition(app, id))
                        })
                        .processors()
                        .clone()
                })
                .collect()
        };

        join_all(processors.iter().map(|p| p.deploy())).await;

        info!(app = %name, partitions = ?ids, "Application partitions deployed");
        Ok(())
    }

    /// Publish a new version of `name` built from `def`.
    ///
    /// Outstanding borrows keep their version. Background processors are not
    /// touched; they follow the new definition on the next
    /// [`deploy_app_partitions`](Self::deploy_app_partitions) of their partition.
    pub fn upgrade_app_def(&self, name: &AppQName, def: AppDef) -> Result<()> {
        let app = self.app(name)?;
        let version = self.build_version(
            name,
            def,
            app.parts_count(),
            app.pool_sizes(),
            app.workspaces(),
        )?;
        let stamp = version.structs().version();
        app.set_version(version);

        info!(app = %name, version = stamp, "Application definition upgraded");
        Ok(())
    }

    /// Current definition of `name`.
    pub fn app_def(&self, name: &AppQName) -> Result<Arc<AppDef>> {
        Ok(self.app(name)?.version().def().clone())
    }

    /// Partitions count declared for `name`.
    pub fn app_parts_count(&self, name: &AppQName) -> Result<u16> {
        Ok(self.app(name)?.parts_count())
    }

    /// Current runtime structures of `name`.
    pub fn app_structs(&self, name: &AppQName) -> Result<Arc<AppStructs>> {
        Ok(self.app(name)?.version().structs().clone())
    }

    /// Borrow partition `id` of `name` for `kind`. Never waits.
    ///
    /// # Errors
    ///
    /// - [`Error::AppNotFound`] if `name` is not deployed
    /// - [`Error::PartitionNotDeployed`] if `id` is not activated
    /// - [`Error::NotEnoughEngines`] if the `kind` pool is exhausted
    pub fn borrow(
        &self,
        name: &AppQName,
        id: PartitionId,
        kind: CallerKind,
    ) -> Result<BorrowedPartition> {
        self.partition(name, id)?.borrow(kind)
    }

    /// Borrow like [`borrow`](Self::borrow), retrying while engines are exhausted.
    ///
    /// Returns [`Error::Cancelled`] if `token` is cancelled while waiting.
    /// Other errors are returned immediately.
    pub async fn wait_for_borrow(
        &self,
        token: &CancellationToken,
        name: &AppQName,
        id: PartitionId,
        kind: CallerKind,
    ) -> Result<BorrowedPartition> {
        retry_while(
            token,
            self.borrow_retry_delay,
            |e| matches!(e, Error::NotEnoughEngines { .. }),
            |_, attempt| {
                if attempt == 1 {
                    debug!(app = %name, partition = %id, kind = %kind, "Waiting for engines");
                }
            },
            || std::future::ready(self.borrow(name, id, kind)),
        )
        .await
    }

    /// Background processors of every activated partition of `name`.
    pub fn workers(&self, name: &AppQName) -> Result<BTreeMap<PartitionId, Vec<(QName, CallerKind)>>> {
        let apps = self.read_apps();
        let entry = apps
            .get(name)
            .ok_or_else(|| Error::AppNotFound(name.clone()))?;
        Ok(entry
            .partitions
            .iter()
            .map(|(id, p)| (*id, p.processors().enumerate()))
            .collect())
    }

    /// Processors reconciler of partition `id` of `name`.
    pub fn partition_processors(
        &self,
        name: &AppQName,
        id: PartitionId,
    ) -> Result<Arc<PartitionProcessors>> {
        Ok(self.partition(name, id)?.processors().clone())
    }

    /// Activated partitions of `name`.
    pub fn deployed_partitions(&self, name: &AppQName) -> Result<Vec<PartitionId>> {
        let apps = self.read_apps();
        let entry = apps
            .get(name)
            .ok_or_else(|| Error::AppNotFound(name.clone()))?;
        Ok(entry.partitions.keys().copied().collect())
    }

    /// Wait until every background processor has exited.
    ///
    /// Processors only exit once their token is cancelled, so this is meant to
    /// follow cancellation of the root token. Returns `false` on timeout.
    pub async fn wait_processors_drained(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        if drained {
            info!("All partition processors stopped");
        } else {
            warn!(
                remaining = self.tracker.len(),
                timeout_ms = timeout.as_millis() as u64,
                "Partition processors did not stop in time"
            );
        }
        drained
    }

    /// Root cancellation token of all background processors.
    pub fn root_token(&self) -> &CancellationToken {
        &self.root
    }

    fn build_version(
        &self,
        name: &AppQName,
        def: AppDef,
        parts_count: u16,
        pool_sizes: PoolSizes,
        workspaces: usize,
    ) -> Result<AppVersion> {
        let structs = self.structs.build(name, &def, parts_count, workspaces);
        Ok(AppVersion::build(
            name,
            Arc::new(def),
            structs,
            pool_sizes,
            &self.engines,
        )?)
    }

    fn new_partition(&self, app: Arc<App>, id: PartitionId) -> Partition {
        let processors = Arc::new(PartitionProcessors::new(
            app.clone(),
            id,
            self.root.clone(),
            self.tracker.clone(),
            self.actualizers.clone(),
            self.schedulers.clone(),
        ));
        Partition::new(app, id, processors, self.limiter.clone())
    }

    /// Current version of `name`.
    ///
    /// The snapshot stays valid after an upgrade; engine sets borrowed from
    /// it keep returning to its pools.
    pub fn app_version(&self, name: &AppQName) -> Result<Arc<AppVersion>> {
        Ok(self.app(name)?.version())
    }

    fn app(&self, name: &AppQName) -> Result<Arc<App>> {
        self.read_apps()
            .get(name)
            .map(|e| e.app.clone())
            .ok_or_else(|| Error::AppNotFound(name.clone()))
    }

    fn partition(&self, name: &AppQName, id: PartitionId) -> Result<Arc<Partition>> {
        let apps = self.read_apps();
        let entry = apps
            .get(name)
            .ok_or_else(|| Error::AppNotFound(name.clone()))?;
        entry
            .partitions
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::PartitionNotDeployed {
                app: name.clone(),
                partition: id,
            })
    }

    fn read_apps(&self) -> RwLockReadGuard<'_, HashMap<AppQName, AppEntry>> {
        self.apps.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for AppPartitions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut apps: Vec<_> = self.read_apps().keys().cloned().collect();
        apps.sort();
        f.debug_struct("AppPartitions")
            .field("apps", &apps)
            .field("borrow_retry_delay", &self.borrow_retry_delay)
            .finish()
    }
}
