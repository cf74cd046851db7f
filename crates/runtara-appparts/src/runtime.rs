// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable partitions runtime.
//!
//! [`AppPartitionsRuntime`] wires a registry together with its collaborators
//! and owns the root cancellation token of every background processor.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use runtara_appparts::engines::MockEngineFactory;
//! use runtara_appparts::{AppDef, AppPartitionsRuntime, AppQName, Config, EngineKind, PartitionId};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = AppPartitionsRuntime::builder()
//!         .config(Config::from_env()?)
//!         .engine_factory(Arc::new(MockEngineFactory::new(EngineKind::Builtin)))
//!         .actualizers(Arc::new(MyActualizers::default()))
//!         .build()?;
//!
//!     let app = AppQName::from("acme/orders");
//!     runtime.deploy_app(app.clone(), AppDef::new().with_job("orders.Cleanup", "0 * * * *"), 4, 16)?;
//!     runtime.partitions().deploy_app_partitions(&app, &[PartitionId(0), PartitionId(1)]).await?;
//!
//!     // ... serve requests ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::appdef::AppDef;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::engines::{EngineFactories, EngineFactory};
use crate::limits::{Limiter, NoLimits};
use crate::registry::{AppPartitions, Collaborators};
use crate::runners::{ActualizerRunner, SchedulerRunner};
use crate::scheduler::{DiscardIntents, IntentsApplier, SchedulerMetrics, Schedulers};
use crate::structs::{AppStructsProvider, DefaultAppStructsProvider};
use crate::types::AppQName;

/// Builder for creating an [`AppPartitionsRuntime`].
pub struct AppPartitionsRuntimeBuilder {
    config: Config,
    root: Option<CancellationToken>,
    engines: EngineFactories,
    structs: Option<Arc<dyn AppStructsProvider>>,
    actualizers: Option<Arc<dyn ActualizerRunner>>,
    schedulers: Option<Arc<dyn SchedulerRunner>>,
    clock: Arc<dyn Clock>,
    intents: Arc<dyn IntentsApplier>,
    limiter: Arc<dyn Limiter>,
}

impl Default for AppPartitionsRuntimeBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            root: None,
            engines: EngineFactories::new(),
            structs: None,
            actualizers: None,
            schedulers: None,
            clock: Arc::new(SystemClock),
            intents: Arc::new(DiscardIntents),
            limiter: Arc::new(NoLimits),
        }
    }
}

impl AppPartitionsRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the runtime configuration.
    ///
    /// Default: [`Config::default`]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use `token` as the root token instead of a fresh one.
    ///
    /// Cancelling it stops every background processor.
    pub fn root_token(mut self, token: CancellationToken) -> Self {
        self.root = Some(token);
        self
    }

    /// Register an engine factory (at least one is required).
    pub fn engine_factory(mut self, factory: Arc<dyn EngineFactory>) -> Self {
        self.engines.register(factory);
        self
    }

    /// Set the runtime structures provider.
    ///
    /// Default: [`DefaultAppStructsProvider`]
    pub fn structs_provider(mut self, provider: Arc<dyn AppStructsProvider>) -> Self {
        self.structs = Some(provider);
        self
    }

    /// Set the actualizer runner (required).
    pub fn actualizers(mut self, runner: Arc<dyn ActualizerRunner>) -> Self {
        self.actualizers = Some(runner);
        self
    }

    /// Replace the built-in [`Schedulers`] runner.
    pub fn schedulers(mut self, runner: Arc<dyn SchedulerRunner>) -> Self {
        self.schedulers = Some(runner);
        self
    }

    /// Set the clock used by the built-in scheduler.
    ///
    /// Default: [`SystemClock`]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the applier for job intents used by the built-in scheduler.
    ///
    /// Default: [`DiscardIntents`]
    pub fn intents_applier(mut self, applier: Arc<dyn IntentsApplier>) -> Self {
        self.intents = applier;
        self
    }

    /// Set the rate limiter.
    ///
    /// Default: [`NoLimits`]
    pub fn limiter(mut self, limiter: Arc<dyn Limiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Build the runtime.
    pub fn build(self) -> Result<AppPartitionsRuntime> {
        let actualizers = self
            .actualizers
            .ok_or_else(|| anyhow::anyhow!("actualizer runner is required"))?;
        if self.engines.is_empty() {
            anyhow::bail!("at least one engine factory is required");
        }

        let (schedulers, scheduler_metrics): (Arc<dyn SchedulerRunner>, _) = match self.schedulers
        {
            Some(runner) => (runner, None),
            None => {
                let builtin = Schedulers::with_collaborators(
                    self.clock,
                    self.intents,
                    self.config.scheduler_init_retry_delay,
                );
                let metrics = builtin.metrics();
                (Arc::new(builtin) as Arc<dyn SchedulerRunner>, Some(metrics))
            }
        };

        let structs: Arc<dyn AppStructsProvider> = match self.structs {
            Some(provider) => provider,
            None => Arc::new(DefaultAppStructsProvider::new()),
        };

        let root = self.root.unwrap_or_default();
        let partitions = AppPartitions::new(
            root.clone(),
            Collaborators {
                engines: self.engines,
                structs,
                actualizers,
                schedulers,
                limiter: self.limiter,
            },
            self.config.borrow_retry_delay,
        );

        info!(
            pool_sizes = ?self.config.pool_sizes,
            borrow_retry_delay_ms = self.config.borrow_retry_delay.as_millis() as u64,
            builtin_scheduler = scheduler_metrics.is_some(),
            "AppPartitionsRuntime built"
        );

        Ok(AppPartitionsRuntime {
            partitions,
            root,
            config: self.config,
            scheduler_metrics,
        })
    }
}

/// A partitions registry with its background processors.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct AppPartitionsRuntime {
    partitions: Arc<AppPartitions>,
    root: CancellationToken,
    config: Config,
    scheduler_metrics: Option<Arc<SchedulerMetrics>>,
}

impl AppPartitionsRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> AppPartitionsRuntimeBuilder {
        AppPartitionsRuntimeBuilder::new()
    }

    /// The partitions registry.
    pub fn partitions(&self) -> &Arc<AppPartitions> {
        &self.partitions
    }

    /// Runtime configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Counters of the built-in scheduler, if it is in use.
    pub fn scheduler_metrics(&self) -> Option<&Arc<SchedulerMetrics>> {
        self.scheduler_metrics.as_ref()
    }

    /// Deploy an application with the configured pool sizes.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already deployed.
    pub fn deploy_app(
        &self,
        name: AppQName,
        def: AppDef,
        parts_count: u16,
        workspaces: usize,
    ) -> crate::error::Result<()> {
        self.partitions
            .deploy_app(name, def, parts_count, self.config.pool_sizes, workspaces)
    }

    /// Gracefully shut down the runtime.
    ///
    /// Cancels every background processor and waits up to the configured
    /// shutdown timeout for all of them to exit.
    pub async fn shutdown(self) -> Result<()> {
        info!("AppPartitionsRuntime shutting down...");

        self.root.cancel();

        if !self
            .partitions
            .wait_processors_drained(self.config.shutdown_timeout)
            .await
        {
            anyhow::bail!(
                "partition processors did not stop within {:?}",
                self.config.shutdown_timeout
            );
        }

        info!("AppPartitionsRuntime shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appdef::EngineKind;
    use crate::engines::MockEngineFactory;
    use crate::types::{PartitionId, QName};
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Default)]
    struct IdleActualizers;

    #[async_trait]
    impl ActualizerRunner for IdleActualizers {
        async fn new_and_run(
            &self,
            token: CancellationToken,
            _app: AppQName,
            _partition: PartitionId,
            _projector: QName,
        ) {
            token.cancelled().await;
        }
    }

    fn builder() -> AppPartitionsRuntimeBuilder {
        AppPartitionsRuntime::builder()
            .engine_factory(Arc::new(MockEngineFactory::new(EngineKind::Builtin)))
            .actualizers(Arc::new(IdleActualizers))
    }

    #[test]
    fn test_builder_default_values() {
        let builder = AppPartitionsRuntimeBuilder::default();
        assert_eq!(builder.config, Config::default());
        assert!(builder.root.is_none());
        assert!(builder.engines.is_empty());
        assert!(builder.actualizers.is_none());
        assert!(builder.schedulers.is_none());
    }

    #[test]
    fn test_builder_config() {
        let config = Config {
            shutdown_timeout: Duration::from_secs(3),
            ..Config::default()
        };
        let builder = AppPartitionsRuntimeBuilder::new().config(config.clone());
        assert_eq!(builder.config, config);
    }

    #[test]
    fn test_builder_build_fails_without_actualizers() {
        let result = AppPartitionsRuntime::builder()
            .engine_factory(Arc::new(MockEngineFactory::new(EngineKind::Builtin)))
            .build();
        let err = result.err().unwrap();
        assert!(err.to_string().contains("actualizer runner is required"));
    }

    #[test]
    fn test_builder_build_fails_without_engines() {
        let result = AppPartitionsRuntime::builder()
            .actualizers(Arc::new(IdleActualizers))
            .build();
        let err = result.err().unwrap();
        assert!(err.to_string().contains("engine factory is required"));
    }

    #[tokio::test]
    async fn test_builtin_scheduler_metrics_exposed() {
        let runtime = builder().build().unwrap();
        assert!(runtime.scheduler_metrics().is_some());
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_custom_root_token_cancelled_on_shutdown() {
        let root = CancellationToken::new();
        let runtime = builder().root_token(root.clone()).build().unwrap();
        assert!(!root.is_cancelled());
        runtime.shutdown().await.unwrap();
        assert!(root.is_cancelled());
    }

    #[tokio::test]
    async fn test_deploy_uses_configured_pool_sizes() {
        let config = Config {
            pool_sizes: crate::pool::PoolSizes::uniform(2),
            ..Config::default()
        };
        let runtime = builder().config(config).build().unwrap();
        let app = AppQName::from("acme/orders");
        runtime
            .deploy_app(app.clone(), AppDef::new().with_command("orders.Close"), 1, 1)
            .unwrap();
        runtime
            .partitions()
            .deploy_app_partitions(&app, &[PartitionId(0)])
            .await
            .unwrap();

        let parts = runtime.partitions();
        let a = parts
            .borrow(&app, PartitionId(0), crate::types::CallerKind::Command)
            .unwrap();
        let b = parts
            .borrow(&app, PartitionId(0), crate::types::CallerKind::Command)
            .unwrap();
        assert!(
            parts
                .borrow(&app, PartitionId(0), crate::types::CallerKind::Command)
                .is_err()
        );
        a.release();
        b.release();

        runtime.shutdown().await.unwrap();
    }
}
