// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Borrowed partition handles.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::app::AppVersion;
use crate::appdef::AppDef;
use crate::engines::{EngineSet, Intents};
use crate::error::{Error, Result};
use crate::limits::{Limiter, OperationKind};
use crate::structs::AppStructs;
use crate::types::{AppQName, CallerKind, PartitionId, QName, WorkspaceId};

/// Exclusive use of one engine set of a partition.
///
/// The handle pins the application version it was borrowed from. Releasing it,
/// explicitly with [`release`](Self::release) or by dropping it, returns the
/// engine set to that version's pool.
pub struct BorrowedPartition {
    app: AppQName,
    id: PartitionId,
    kind: CallerKind,
    version: Arc<AppVersion>,
    engines: Option<EngineSet>,
    limiter: Arc<dyn Limiter>,
}

impl BorrowedPartition {
    pub(crate) fn new(
        app: AppQName,
        id: PartitionId,
        kind: CallerKind,
        version: Arc<AppVersion>,
        engines: EngineSet,
        limiter: Arc<dyn Limiter>,
    ) -> Self {
        Self {
            app,
            id,
            kind,
            version,
            engines: Some(engines),
            limiter,
        }
    }

    /// Application name.
    pub fn app(&self) -> &AppQName {
        &self.app
    }

    /// Partition id.
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// Caller kind this partition was borrowed for.
    pub fn kind(&self) -> CallerKind {
        self.kind
    }

    /// Application definition of the borrowed version.
    pub fn app_def(&self) -> &Arc<AppDef> {
        self.version.def()
    }

    /// Runtime structures of the borrowed version.
    pub fn app_structs(&self) -> &Arc<AppStructs> {
        self.version.structs()
    }

    /// Invoke `extension` with `state`, collecting side effects in `intents`.
    ///
    /// # Errors
    ///
    /// - [`Error::ExtensionNotFound`] if the borrowed version does not declare `extension`
    /// - [`Error::ExtensionIncompatible`] if the caller kind may not invoke it
    /// - [`Error::Engine`] if the engine fails
    ///
    /// # Panics
    ///
    /// Panics if the engine set has no engine for the extension's engine kind,
    /// which can only happen if a factory broke the engine set contract.
    pub async fn invoke(
        &self,
        token: &CancellationToken,
        extension: &QName,
        state: &Value,
        intents: &mut Intents,
    ) -> Result<()> {
        let def = self
            .version
            .def()
            .extension(extension)
            .ok_or_else(|| Error::ExtensionNotFound(extension.clone()))?;

        if !self.kind.can_invoke(&def.kind) {
            return Err(Error::ExtensionIncompatible {
                kind: self.kind,
                extension: extension.clone(),
            });
        }

        let engine = self
            .engines
            .as_ref()
            .and_then(|set| set.get(def.engine))
            .unwrap_or_else(|| {
                panic!(
                    "engine set of {} partition {} has no {} engine for '{}'",
                    self.app, self.id, def.engine, extension
                )
            });

        engine.invoke(token, extension, state, intents).await?;
        Ok(())
    }

    /// Rule name if the operation on `resource` exceeds a rate limit.
    pub fn is_limit_exceeded(
        &self,
        resource: &QName,
        operation: OperationKind,
        workspace: WorkspaceId,
        remote_addr: &str,
    ) -> Option<String> {
        self.limiter
            .exceeded(resource, operation, workspace, remote_addr)
    }

    /// Return the engine set to its pool.
    pub fn release(self) {}
}

impl Drop for BorrowedPartition {
    fn drop(&mut self) {
        if let Some(engines) = self.engines.take() {
            self.version.pool(self.kind).release(engines);
            debug!(
                app = %self.app,
                partition = %self.id,
                kind = %self.kind,
                version = self.version.structs().version(),
                "Partition released"
            );
        }
    }
}

impl std::fmt::Debug for BorrowedPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BorrowedPartition")
            .field("app", &self.app)
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("version", &self.version.structs().version())
            .finish()
    }
}
