// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-version runtime structures and partition-to-workspace assignment.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::appdef::AppDef;
use crate::types::{AppQName, PartitionId, WorkspaceId};

/// Identifier of the first application workspace.
///
/// App workspace `i` has id `FIRST_APP_WORKSPACE_ID + i`.
pub const FIRST_APP_WORKSPACE_ID: u64 = 1 << 16;

/// Runtime structures of one application version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppStructs {
    app: AppQName,
    parts_count: u16,
    workspaces: usize,
    version: u64,
}

impl AppStructs {
    /// Create runtime structures.
    pub fn new(app: AppQName, parts_count: u16, workspaces: usize, version: u64) -> Self {
        Self {
            app,
            parts_count,
            workspaces,
            version,
        }
    }

    /// Application name.
    pub fn app(&self) -> &AppQName {
        &self.app
    }

    /// Total number of partitions declared for the application.
    pub fn parts_count(&self) -> u16 {
        self.parts_count
    }

    /// Number of application workspaces.
    pub fn workspaces(&self) -> usize {
        self.workspaces
    }

    /// Version stamp, incremented on every deploy or upgrade of the application.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// App workspaces owned by `partition`, as `(index, id)` pairs.
    pub fn workspaces_handled_by(&self, partition: PartitionId) -> Vec<(usize, WorkspaceId)> {
        app_workspaces_handled_by_partition(self.parts_count, self.workspaces, partition)
    }
}

/// Builds [`AppStructs`] for each new application version.
pub trait AppStructsProvider: Send + Sync {
    /// Build structures for `app` at schema `def`.
    fn build(
        &self,
        app: &AppQName,
        def: &AppDef,
        parts_count: u16,
        workspaces: usize,
    ) -> Arc<AppStructs>;
}

/// Provider that stamps versions with a per-application counter.
#[derive(Debug, Default)]
pub struct DefaultAppStructsProvider {
    versions: Mutex<HashMap<AppQName, u64>>,
}

impl DefaultAppStructsProvider {
    /// Create a new provider.
    pub fn new() -> Self {
        Self::default()
    }
}

impl AppStructsProvider for DefaultAppStructsProvider {
    fn build(
        &self,
        app: &AppQName,
        _def: &AppDef,
        parts_count: u16,
        workspaces: usize,
    ) -> Arc<AppStructs> {
        let mut versions = self
            .versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let version = versions.entry(app.clone()).or_insert(0);
        *version += 1;
        Arc::new(AppStructs::new(
            app.clone(),
            parts_count,
            workspaces,
            *version,
        ))
    }
}

/// Partition that owns workspace `workspace`.
pub fn partition_of_workspace(workspace: WorkspaceId, parts_count: u16) -> PartitionId {
    PartitionId((workspace.0 % u64::from(parts_count.max(1))) as u16)
}

/// App workspaces owned by `partition`, as `(index, id)` pairs.
///
/// Every app workspace is owned by exactly one partition, and the result only
/// depends on the arguments.
pub fn app_workspaces_handled_by_partition(
    parts_count: u16,
    workspaces: usize,
    partition: PartitionId,
) -> Vec<(usize, WorkspaceId)> {
    (0..workspaces)
        .map(|idx| (idx, WorkspaceId(FIRST_APP_WORKSPACE_ID + idx as u64)))
        .filter(|(_, ws)| partition_of_workspace(*ws, parts_count) == partition)
        .collect()
}
