// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock engine for testing.
//!
//! A simple engine implementation that records invocations instead of
//! running extension code. Every engine built by one factory shares the same
//! recording state, so tests can inspect the factory after handing it to the
//! runtime.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{EngineError, EngineFactory, ExtensionEngine, Intents};
use crate::appdef::{EngineKind, ExtensionDef};
use crate::types::{AppQName, QName};

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct MockInvocation {
    /// Application the engine was built for.
    pub app: AppQName,
    /// Invoked extension.
    pub extension: QName,
    /// State passed to the extension.
    pub state: Value,
}

#[derive(Debug, Default)]
struct MockState {
    invocations: Vec<MockInvocation>,
    failing: HashSet<QName>,
}

/// Mock engine factory for testing.
#[derive(Debug, Clone)]
pub struct MockEngineFactory {
    kind: EngineKind,
    state: Arc<Mutex<MockState>>,
    engines_built: Arc<AtomicUsize>,
}

impl MockEngineFactory {
    /// Create a mock factory building engines of `kind`.
    pub fn new(kind: EngineKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(MockState::default())),
            engines_built: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make every invocation of `extension` fail until [`recover_extension`](Self::recover_extension).
    pub async fn fail_extension(&self, extension: &QName) {
        self.state.lock().await.failing.insert(extension.clone());
    }

    /// Let `extension` succeed again.
    pub async fn recover_extension(&self, extension: &QName) {
        self.state.lock().await.failing.remove(extension);
    }

    /// All recorded invocations, failed ones included.
    pub async fn invocations(&self) -> Vec<MockInvocation> {
        self.state.lock().await.invocations.clone()
    }

    /// Number of recorded invocations of `extension`.
    pub async fn invocation_count(&self, extension: &QName) -> usize {
        self.state
            .lock()
            .await
            .invocations
            .iter()
            .filter(|i| &i.extension == extension)
            .count()
    }

    /// Number of engine instances built so far.
    pub fn engines_built(&self) -> usize {
        self.engines_built.load(Ordering::SeqCst)
    }
}

impl EngineFactory for MockEngineFactory {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn new_engines(
        &self,
        app: &AppQName,
        extensions: &[&ExtensionDef],
        count: usize,
    ) -> Result<Vec<Box<dyn ExtensionEngine>>, EngineError> {
        let known: Arc<HashSet<QName>> =
            Arc::new(extensions.iter().map(|e| e.name.clone()).collect());
        self.engines_built.fetch_add(count, Ordering::SeqCst);
        Ok((0..count)
            .map(|_| {
                Box::new(MockEngine {
                    app: app.clone(),
                    known: known.clone(),
                    state: self.state.clone(),
                }) as Box<dyn ExtensionEngine>
            })
            .collect())
    }
}

struct MockEngine {
    app: AppQName,
    known: Arc<HashSet<QName>>,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl ExtensionEngine for MockEngine {
    async fn invoke(
        &self,
        token: &CancellationToken,
        extension: &QName,
        state: &Value,
        intents: &mut Intents,
    ) -> Result<(), EngineError> {
        if token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if !self.known.contains(extension) {
            return Err(EngineError::NotImplemented(extension.clone()));
        }

        let mut mock = self.state.lock().await;
        mock.invocations.push(MockInvocation {
            app: self.app.clone(),
            extension: extension.clone(),
            state: state.clone(),
        });

        if mock.failing.contains(extension) {
            return Err(EngineError::Failed {
                extension: extension.clone(),
                message: "Mock failure".to_string(),
            });
        }

        intents.push("mock", serde_json::json!({ "extension": extension }));
        Ok(())
    }
}
