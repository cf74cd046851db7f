// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployed partitions.

use std::sync::Arc;

use tracing::debug;

use crate::app::App;
use crate::borrowed::BorrowedPartition;
use crate::error::{Error, Result};
use crate::limits::Limiter;
use crate::processors::PartitionProcessors;
use crate::types::{CallerKind, PartitionId};

/// One activated partition of an application.
pub(crate) struct Partition {
    app: Arc<App>,
    id: PartitionId,
    processors: Arc<PartitionProcessors>,
    limiter: Arc<dyn Limiter>,
}

impl Partition {
    pub(crate) fn new(
        app: Arc<App>,
        id: PartitionId,
        processors: Arc<PartitionProcessors>,
        limiter: Arc<dyn Limiter>,
    ) -> Self {
        Self {
            app,
            id,
            processors,
            limiter,
        }
    }

    pub(crate) fn processors(&self) -> &Arc<PartitionProcessors> {
        &self.processors
    }

    /// Borrow one engine set of `kind` from the current version. Never waits.
    pub(crate) fn borrow(&self, kind: CallerKind) -> Result<BorrowedPartition> {
        let version = self.app.version();
        let engines = version
            .pool(kind)
            .borrow()
            .map_err(|_| Error::NotEnoughEngines {
                app: self.app.name().clone(),
                partition: self.id,
                kind,
            })?;

        debug!(
            app = %self.app.name(),
            partition = %self.id,
            kind = %kind,
            version = version.structs().version(),
            "Partition borrowed"
        );

        Ok(BorrowedPartition::new(
            self.app.name().clone(),
            self.id,
            kind,
            version,
            engines,
            self.limiter.clone(),
        ))
    }
}
