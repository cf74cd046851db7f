// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for runtara-appparts.

use thiserror::Error;

use crate::engines::EngineError;
use crate::types::{AppQName, CallerKind, PartitionId, QName};

/// Partitions runtime errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Application is not deployed.
    #[error("Application not found: {0}")]
    AppNotFound(AppQName),

    /// Partition exists in the application but was never deployed.
    #[error("Partition {partition} of application {app} is not deployed")]
    PartitionNotDeployed {
        /// Application name.
        app: AppQName,
        /// Requested partition.
        partition: PartitionId,
    },

    /// Partition id is not below the application's partitions count.
    #[error("Partition {partition} is out of range for application {app} ({parts_count} partitions)")]
    PartitionOutOfRange {
        /// Application name.
        app: AppQName,
        /// Requested partition.
        partition: PartitionId,
        /// Declared partitions count.
        parts_count: u16,
    },

    /// Every engine set of the application's caller kind pool is borrowed.
    #[error("No available engines for {kind} in application {app} (requested by partition {partition})")]
    NotEnoughEngines {
        /// Application name.
        app: AppQName,
        /// Requested partition.
        partition: PartitionId,
        /// Caller kind whose pool is exhausted.
        kind: CallerKind,
    },

    /// Extension is not declared by the application definition.
    #[error("Extension not found: {0}")]
    ExtensionNotFound(QName),

    /// Extension kind can not be invoked by the caller kind.
    #[error("Extension '{extension}' can not be invoked by {kind}")]
    ExtensionIncompatible {
        /// Caller kind the partition was borrowed for.
        kind: CallerKind,
        /// Requested extension.
        extension: QName,
    },

    /// Job schedule could not be parsed or evaluated.
    #[error("Invalid schedule for job '{job}': {reason}")]
    InvalidSchedule {
        /// Job name.
        job: QName,
        /// Parser message.
        reason: String,
    },

    /// Engine failed.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::AppNotFound(_) | Error::NotEnoughEngines { .. })
    }

    /// Whether this error only reports cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Engine(EngineError::Cancelled))
    }
}

/// Result type using the partitions runtime Error.
pub type Result<T> = std::result::Result<T, Error>;
