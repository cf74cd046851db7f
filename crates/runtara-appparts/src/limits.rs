// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rate limiter seam consulted by borrowed partitions.

use std::fmt;

use crate::types::{QName, WorkspaceId};

/// Operation checked against rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Command or query execution.
    Execute,
    /// Record or view read.
    Select,
    /// Record insert.
    Insert,
    /// Record update.
    Update,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Execute => "execute",
            OperationKind::Select => "select",
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
        };
        f.write_str(s)
    }
}

/// Rate limiter.
pub trait Limiter: Send + Sync {
    /// Returns the violated rule name when the operation exceeds a limit.
    fn exceeded(
        &self,
        resource: &QName,
        operation: OperationKind,
        workspace: WorkspaceId,
        remote_addr: &str,
    ) -> Option<String>;
}

/// Limiter that never limits anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimits;

impl Limiter for NoLimits {
    fn exceeded(&self, _: &QName, _: OperationKind, _: WorkspaceId, _: &str) -> Option<String> {
        None
    }
}
