// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Identifiers shared across the partitions runtime.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::appdef::ExtensionKind;

/// Globally unique application name, e.g. `acme/orders`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppQName(String);

impl AppQName {
    /// Build an application name from its owner and name parts.
    pub fn new(owner: &str, name: &str) -> Self {
        Self(format!("{}/{}", owner, name))
    }

    /// The full name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AppQName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for AppQName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Qualified extension name, e.g. `orders.CloseShift`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QName(String);

impl QName {
    /// Build a qualified name from package and entity parts.
    pub fn new(pkg: &str, entity: &str) -> Self {
        Self(format!("{}.{}", pkg, entity))
    }

    /// The full name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for QName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Partition number, unique within one application.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PartitionId(pub u16);

impl From<u16> for PartitionId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application workspace identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(pub u64);

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role under which a partition is borrowed.
///
/// Each caller kind has its own engine pool, and may only invoke the
/// extension kinds listed in [`CallerKind::can_invoke`]:
///
/// | Caller | Invokes |
/// |--------|---------|
/// | `Command` | commands, sync projectors |
/// | `Query` | queries |
/// | `Actualizer` | async projectors |
/// | `Scheduler` | jobs |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerKind {
    /// Command processor.
    Command,
    /// Query processor.
    Query,
    /// Asynchronous projector runner.
    Actualizer,
    /// Cron job runner.
    Scheduler,
}

impl CallerKind {
    /// All caller kinds, in pool order.
    pub const ALL: [CallerKind; 4] = [
        CallerKind::Command,
        CallerKind::Query,
        CallerKind::Actualizer,
        CallerKind::Scheduler,
    ];

    /// Position of this kind in [`CallerKind::ALL`].
    pub fn index(self) -> usize {
        match self {
            CallerKind::Command => 0,
            CallerKind::Query => 1,
            CallerKind::Actualizer => 2,
            CallerKind::Scheduler => 3,
        }
    }

    /// Get the kind name.
    pub fn as_str(self) -> &'static str {
        match self {
            CallerKind::Command => "command",
            CallerKind::Query => "query",
            CallerKind::Actualizer => "actualizer",
            CallerKind::Scheduler => "scheduler",
        }
    }

    /// Whether a partition borrowed for this kind may invoke an extension of `kind`.
    pub fn can_invoke(self, kind: &ExtensionKind) -> bool {
        match (self, kind) {
            (CallerKind::Command, ExtensionKind::Command) => true,
            (CallerKind::Command, ExtensionKind::Projector { sync }) => *sync,
            (CallerKind::Query, ExtensionKind::Query) => true,
            (CallerKind::Actualizer, ExtensionKind::Projector { sync }) => !*sync,
            (CallerKind::Scheduler, ExtensionKind::Job { .. }) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CallerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
