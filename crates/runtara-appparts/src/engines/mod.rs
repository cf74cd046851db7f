// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Extension engines and the engine sets stored in partition pools.
//!
//! Engines are PURE execution backends: they run one extension against the
//! state they are given and append side-effect intents. They know nothing
//! about partitions, pools or borrowing.

pub mod mock;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::appdef::{AppDef, EngineKind, ExtensionDef};
use crate::types::{AppQName, QName};

pub use mock::MockEngineFactory;

/// Errors from engine operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// No factory is registered for an engine kind the application uses.
    #[error("No engine factory for engine kind '{0}'")]
    NoFactory(EngineKind),

    /// Factory could not build engines.
    #[error("Engine initialization failed: {0}")]
    Init(String),

    /// The engine does not implement the extension.
    #[error("Extension '{0}' is not implemented by the engine")]
    NotImplemented(QName),

    /// The extension ran and failed.
    #[error("Extension '{extension}' failed: {message}")]
    Failed {
        /// The failed extension.
        extension: QName,
        /// Failure message.
        message: String,
    },

    /// Invocation was cancelled.
    #[error("Invocation cancelled")]
    Cancelled,
}

/// A side effect requested by an extension, applied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Intent kind, e.g. `insert`, `update`, `send_mail`.
    pub kind: String,
    /// Intent payload.
    pub payload: Value,
}

/// Intents produced by one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intents(Vec<Intent>);

impl Intents {
    /// Create an empty intents buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an intent.
    pub fn push(&mut self, kind: impl Into<String>, payload: Value) {
        self.0.push(Intent {
            kind: kind.into(),
            payload,
        });
    }

    /// Number of intents.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no intent was produced.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over intents in production order.
    pub fn iter(&self) -> impl Iterator<Item = &Intent> {
        self.0.iter()
    }

    /// Consume into the underlying list.
    pub fn into_vec(self) -> Vec<Intent> {
        self.0
    }
}

/// One extension engine instance.
#[async_trait]
pub trait ExtensionEngine: Send + Sync {
    /// Invoke `extension` with `state`, appending produced side effects to `intents`.
    async fn invoke(
        &self,
        token: &CancellationToken,
        extension: &QName,
        state: &Value,
        intents: &mut Intents,
    ) -> Result<(), EngineError>;
}

/// Builds engine instances of one kind.
pub trait EngineFactory: Send + Sync {
    /// Engine kind this factory builds.
    fn kind(&self) -> EngineKind;

    /// Build `count` engines able to run `extensions` of `app`.
    fn new_engines(
        &self,
        app: &AppQName,
        extensions: &[&ExtensionDef],
        count: usize,
    ) -> Result<Vec<Box<dyn ExtensionEngine>>, EngineError>;
}

/// Engines borrowed together: one instance per engine kind.
#[derive(Default)]
pub struct EngineSet {
    engines: HashMap<EngineKind, Box<dyn ExtensionEngine>>,
}

impl EngineSet {
    /// Engine for `kind`, if the set has one.
    pub fn get(&self, kind: EngineKind) -> Option<&dyn ExtensionEngine> {
        self.engines.get(&kind).map(|e| e.as_ref())
    }

    /// Engine kinds present in the set.
    pub fn kinds(&self) -> Vec<EngineKind> {
        let mut kinds: Vec<_> = self.engines.keys().copied().collect();
        kinds.sort();
        kinds
    }

    fn insert(&mut self, kind: EngineKind, engine: Box<dyn ExtensionEngine>) {
        self.engines.insert(kind, engine);
    }
}

impl fmt::Debug for EngineSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSet")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Engine factories by engine kind.
#[derive(Clone, Default)]
pub struct EngineFactories {
    factories: HashMap<EngineKind, Arc<dyn EngineFactory>>,
}

impl EngineFactories {
    /// Create an empty factory set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one of the same kind.
    pub fn with(mut self, factory: Arc<dyn EngineFactory>) -> Self {
        self.factories.insert(factory.kind(), factory);
        self
    }

    /// Register a factory in place.
    pub fn register(&mut self, factory: Arc<dyn EngineFactory>) {
        self.factories.insert(factory.kind(), factory);
    }

    /// True if no factory is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build `count` engine sets covering every engine kind `def` uses.
    pub fn build_sets(
        &self,
        app: &AppQName,
        def: &AppDef,
        count: usize,
    ) -> Result<Vec<EngineSet>, EngineError> {
        let mut sets: Vec<EngineSet> = (0..count).map(|_| EngineSet::default()).collect();
        if count == 0 {
            return Ok(sets);
        }

        for kind in def.engine_kinds() {
            let factory = self
                .factories
                .get(&kind)
                .ok_or(EngineError::NoFactory(kind))?;
            let extensions: Vec<&ExtensionDef> =
                def.extensions().filter(|e| e.engine == kind).collect();
            let engines = factory.new_engines(app, &extensions, count)?;
            if engines.len() != count {
                return Err(EngineError::Init(format!(
                    "{} factory built {} engines, {} requested",
                    kind,
                    engines.len(),
                    count
                )));
            }
            for (set, engine) in sets.iter_mut().zip(engines) {
                set.insert(kind, engine);
            }
        }

        Ok(sets)
    }
}

impl fmt::Debug for EngineFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.factories.keys().copied().collect();
        kinds.sort();
        f.debug_struct("EngineFactories")
            .field("kinds", &kinds)
            .finish()
    }
}
