// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fixed-capacity, non-blocking resource pool.
//!
//! A pool is seeded once with every element it will ever hold. Borrowing
//! never waits: when the pool is empty the caller gets
//! [`PoolError::NotEnoughResources`] immediately and decides itself whether
//! to poll again (see `AppPartitions::wait_for_borrow`).

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::CallerKind;

/// Pool errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Every element is currently borrowed.
    #[error("Not enough resources")]
    NotEnoughResources,
}

/// Bounded pool of reusable elements.
#[derive(Debug)]
pub struct Pool<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> Pool<T> {
    /// Create a pool holding `items`. Capacity is fixed to their count.
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        let items: VecDeque<T> = items.into_iter().collect();
        let capacity = items.len();
        Self {
            items: Mutex::new(items),
            capacity,
        }
    }

    /// Take one element out of the pool without waiting.
    pub fn borrow(&self) -> Result<T, PoolError> {
        self.lock().pop_front().ok_or(PoolError::NotEnoughResources)
    }

    /// Return an element previously obtained from this pool.
    pub fn release(&self, item: T) {
        let mut items = self.lock();
        debug_assert!(
            items.len() < self.capacity,
            "released more elements than the pool was seeded with"
        );
        items.push_back(item);
    }

    /// Number of elements available right now. Advisory only.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if nothing is available right now.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of elements the pool was seeded with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Engine pool size for each caller kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSizes {
    /// Engines for command processors.
    pub command: usize,
    /// Engines for query processors.
    pub query: usize,
    /// Engines for actualizers.
    pub actualizer: usize,
    /// Engines for schedulers.
    pub scheduler: usize,
}

impl PoolSizes {
    /// Same size for every caller kind.
    pub fn uniform(size: usize) -> Self {
        Self {
            command: size,
            query: size,
            actualizer: size,
            scheduler: size,
        }
    }

    /// Pool size for `kind`.
    pub fn get(&self, kind: CallerKind) -> usize {
        match kind {
            CallerKind::Command => self.command,
            CallerKind::Query => self.query,
            CallerKind::Actualizer => self.actualizer,
            CallerKind::Scheduler => self.scheduler,
        }
    }
}

impl Default for PoolSizes {
    fn default() -> Self {
        Self::uniform(10)
    }
}
