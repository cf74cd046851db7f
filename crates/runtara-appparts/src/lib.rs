// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtara AppParts - Application Partitions Runtime
//!
//! This crate hosts many versioned application partitions inside one process.
//! Request handlers borrow a partition for a short time to run commands and
//! queries; background processors (actualizers and cron jobs) are started and
//! stopped per partition as application definitions change.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │              Callers (command / query processors, runners)             │
//! └────────────────────────────────────────────────────────────────────────┘
//!                    │ borrow / wait_for_borrow          ▲ release
//!                    ▼                                   │
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │                        AppPartitions (registry)                        │
//! │   ┌──────────────┐    ┌──────────────┐    ┌────────────────────────┐   │
//! │   │     App      │───▶│  AppVersion  │───▶│ Pool<EngineSet> × kind │   │
//! │   │ (current ver)│    │ def, structs │    └────────────────────────┘   │
//! │   └──────────────┘    └──────────────┘                                 │
//! │          │                                                             │
//! │          ▼                                                             │
//! │   ┌──────────────┐    ┌──────────────────────┐                         │
//! │   │  Partition   │───▶│ PartitionProcessors  │──spawn──┐               │
//! │   └──────────────┘    │    (reconciler)      │         │               │
//! │                       └──────────────────────┘         │               │
//! └────────────────────────────────────────────────────────│───────────────┘
//!                                                         ▼
//!                      ┌────────────────────┐   ┌────────────────────┐
//!                      │  ActualizerRunner  │   │ SchedulerRunner    │
//!                      │ (async projectors) │   │ (Schedulers: cron) │
//!                      └────────────────────┘   └────────────────────┘
//! ```
//!
//! # Caller Kinds
//!
//! | Caller kind | Pool | May invoke |
//! |-------------|------|------------|
//! | `Command` | command engines | commands, sync projectors |
//! | `Query` | query engines | queries |
//! | `Actualizer` | actualizer engines | async projectors |
//! | `Scheduler` | scheduler engines | jobs |
//!
//! # Versions
//!
//! Every deploy or upgrade builds a new immutable [`app::AppVersion`] with its
//! own pools. A [`BorrowedPartition`] pins the version it was borrowed from
//! and returns its engines to that version's pool, so upgrades never disturb
//! outstanding borrows.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `RUNTARA_APPPARTS_COMMAND_ENGINES` | No | `10` | Command pool size |
//! | `RUNTARA_APPPARTS_QUERY_ENGINES` | No | `10` | Query pool size |
//! | `RUNTARA_APPPARTS_ACTUALIZER_ENGINES` | No | `10` | Actualizer pool size |
//! | `RUNTARA_APPPARTS_SCHEDULER_ENGINES` | No | `10` | Scheduler pool size |
//! | `RUNTARA_APPPARTS_BORROW_RETRY_DELAY_MS` | No | `20` | `wait_for_borrow` poll delay |
//! | `RUNTARA_APPPARTS_SCHEDULER_RETRY_DELAY_MS` | No | `1000` | Job schedule resolve retry delay |
//! | `RUNTARA_APPPARTS_SHUTDOWN_TIMEOUT_SECS` | No | `30` | Wait for processors on shutdown |
//!
//! # Modules
//!
//! - [`registry`]: Applications and partitions, borrowing
//! - [`processors`]: Background processor reconciliation
//! - [`scheduler`]: Built-in cron job runner
//! - [`pool`]: Bounded non-blocking pool
//! - [`engines`]: Extension engine seams and the mock engine
//! - [`runtime`]: Embeddable runtime with builder

#![deny(missing_docs)]

/// Application versions.
pub mod app;

/// Application definitions: declared extensions and their engines.
pub mod appdef;

/// Borrowed partition handles.
pub mod borrowed;

/// Time source for schedules.
pub mod clock;

/// Runtime configuration loaded from environment variables.
pub mod config;

/// Extension engines, engine sets and factories.
pub mod engines;

/// Error types for partition operations.
pub mod error;

/// Rate limiter seam.
pub mod limits;

mod partition;

/// Bounded resource pool.
pub mod pool;

/// Per-partition background processor reconciliation.
pub mod processors;

/// Application partitions registry.
pub mod registry;

/// Cancellable retry helper.
pub mod retry;

/// Actualizer and scheduler runner traits.
pub mod runners;

/// Embeddable runtime for runtara-appparts.
pub mod runtime;

/// Built-in cron job scheduler.
pub mod scheduler;

/// Runtime structures and workspace assignment.
pub mod structs;

/// Shared identifiers.
pub mod types;

pub use appdef::{AppDef, EngineKind, ExtensionDef, ExtensionKind};
pub use borrowed::BorrowedPartition;
pub use config::Config;
pub use error::{Error, Result};
pub use pool::{Pool, PoolSizes};
pub use registry::{AppPartitions, Collaborators};
pub use runtime::AppPartitionsRuntime;
pub use types::{AppQName, CallerKind, PartitionId, QName, WorkspaceId};
