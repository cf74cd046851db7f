// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background processor runners.
//!
//! Runners execute one background processor until its token is cancelled.
//! The partition processors reconciler decides which processors run and
//! calls the runners; runners borrow partitions through the registry like any
//! other caller.

use std::sync::Weak;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::registry::AppPartitions;
use crate::types::{AppQName, PartitionId, QName, WorkspaceId};

/// Runs asynchronous projectors (actualizers).
#[async_trait]
pub trait ActualizerRunner: Send + Sync {
    /// Receive the registry this runner serves. Called once by [`AppPartitions::new`].
    fn set_app_partitions(&self, _parts: Weak<AppPartitions>) {}

    /// Run `projector` for `partition` of `app` until `token` is cancelled.
    async fn new_and_run(
        &self,
        token: CancellationToken,
        app: AppQName,
        partition: PartitionId,
        projector: QName,
    );
}

/// Runs cron jobs.
#[async_trait]
pub trait SchedulerRunner: Send + Sync {
    /// Receive the registry this runner serves. Called once by [`AppPartitions::new`].
    fn set_app_partitions(&self, _parts: Weak<AppPartitions>) {}

    /// Run `job` in app workspace `workspace` until `token` is cancelled.
    async fn new_and_run(
        &self,
        token: CancellationToken,
        app: AppQName,
        partition: PartitionId,
        workspace_index: usize,
        workspace: WorkspaceId,
        job: QName,
    );
}
