// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployed applications and their immutable versions.

use std::sync::{Arc, PoisonError, RwLock};

use crate::appdef::AppDef;
use crate::engines::{EngineError, EngineFactories, EngineSet};
use crate::pool::{Pool, PoolSizes};
use crate::structs::AppStructs;
use crate::types::{AppQName, CallerKind};

/// One immutable version of an application: schema, runtime structures and
/// one engine pool per caller kind.
///
/// Borrowed partitions keep the version they were borrowed from alive, so
/// engine sets always go back to the pool they came from even after the
/// application has been upgraded.
pub struct AppVersion {
    def: Arc<AppDef>,
    structs: Arc<AppStructs>,
    pools: [Pool<EngineSet>; 4],
}

impl AppVersion {
    /// Build a version, creating `sizes.get(kind)` engine sets for every caller kind.
    pub fn build(
        app: &AppQName,
        def: Arc<AppDef>,
        structs: Arc<AppStructs>,
        sizes: PoolSizes,
        factories: &EngineFactories,
    ) -> Result<Self, EngineError> {
        let pool = |kind: CallerKind| -> Result<Pool<EngineSet>, EngineError> {
            Ok(Pool::new(factories.build_sets(app, &def, sizes.get(kind))?))
        };
        let pools = [
            pool(CallerKind::Command)?,
            pool(CallerKind::Query)?,
            pool(CallerKind::Actualizer)?,
            pool(CallerKind::Scheduler)?,
        ];

        Ok(Self {
            def,
            structs,
            pools,
        })
    }

    /// Application definition of this version.
    pub fn def(&self) -> &Arc<AppDef> {
        &self.def
    }

    /// Runtime structures of this version.
    pub fn structs(&self) -> &Arc<AppStructs> {
        &self.structs
    }

    /// Engine pool for `kind`.
    pub fn pool(&self, kind: CallerKind) -> &Pool<EngineSet> {
        &self.pools[kind.index()]
    }
}

impl std::fmt::Debug for AppVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppVersion")
            .field("version", &self.structs.version())
            .field("extensions", &self.def.extensions().count())
            .finish()
    }
}

/// A deployed application. Its current version is the only mutable part.
pub(crate) struct App {
    name: AppQName,
    parts_count: u16,
    workspaces: usize,
    pool_sizes: PoolSizes,
    version: RwLock<Arc<AppVersion>>,
}

impl App {
    pub(crate) fn new(
        name: AppQName,
        parts_count: u16,
        workspaces: usize,
        pool_sizes: PoolSizes,
        version: AppVersion,
    ) -> Self {
        Self {
            name,
            parts_count,
            workspaces,
            pool_sizes,
            version: RwLock::new(Arc::new(version)),
        }
    }

    pub(crate) fn name(&self) -> &AppQName {
        &self.name
    }

    pub(crate) fn parts_count(&self) -> u16 {
        self.parts_count
    }

    pub(crate) fn workspaces(&self) -> usize {
        self.workspaces
    }

    pub(crate) fn pool_sizes(&self) -> PoolSizes {
        self.pool_sizes
    }

    /// Consistent snapshot of the current version.
    pub(crate) fn version(&self) -> Arc<AppVersion> {
        self.version
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publish `version` as current. Handles of older versions are unaffected.
    pub(crate) fn set_version(&self, version: AppVersion) {
        *self.version.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(version);
    }
}
