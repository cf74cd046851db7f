// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Application definition: the immutable schema snapshot handed over by the
//! schema compiler.
//!
//! Only the parts the partitions runtime needs are modelled here: the set of
//! extensions, what kind each one is and which engine executes it.
//!
//! ```json
//! [
//!   { "name": "orders.Close", "kind": "command" },
//!   { "name": "orders.Totals", "kind": "projector", "sync": false },
//!   { "name": "orders.Nightly", "kind": "job", "cron": "0 2 * * *", "engine": "wasm" }
//! ]
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::QName;

/// Engine implementation that executes an extension.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Extensions compiled into the host process.
    #[default]
    Builtin,
    /// Sandboxed WebAssembly extensions.
    Wasm,
}

impl EngineKind {
    /// Get the engine kind name.
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Builtin => "builtin",
            EngineKind::Wasm => "wasm",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an extension is, as far as invocation rules are concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtensionKind {
    /// Command handler.
    Command,
    /// Query handler.
    Query,
    /// Projector reacting to committed events.
    Projector {
        /// Sync projectors run inside command processing; async ones are actualizers.
        #[serde(default)]
        sync: bool,
    },
    /// Cron-driven job.
    Job {
        /// Cron expression, five or six fields.
        cron: String,
    },
}

/// One declared extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionDef {
    /// Qualified extension name.
    pub name: QName,
    /// Extension kind.
    #[serde(flatten)]
    pub kind: ExtensionKind,
    /// Engine that executes the extension.
    #[serde(default)]
    pub engine: EngineKind,
}

impl ExtensionDef {
    /// Create a builtin extension definition.
    pub fn new(name: impl Into<QName>, kind: ExtensionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            engine: EngineKind::Builtin,
        }
    }

    /// Set the engine kind.
    pub fn engine(mut self, engine: EngineKind) -> Self {
        self.engine = engine;
        self
    }

    /// Cron expression if this is a job.
    pub fn cron(&self) -> Option<&str> {
        match &self.kind {
            ExtensionKind::Job { cron } => Some(cron),
            _ => None,
        }
    }

    /// True for projectors that run as actualizers.
    pub fn is_async_projector(&self) -> bool {
        matches!(self.kind, ExtensionKind::Projector { sync: false })
    }
}

/// Application definition errors.
#[derive(Debug, thiserror::Error)]
pub enum AppDefError {
    /// Two extensions share the same qualified name.
    #[error("Duplicate extension name: {0}")]
    DuplicateExtension(QName),
}

/// Immutable application schema snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ExtensionDef>", into = "Vec<ExtensionDef>")]
pub struct AppDef {
    extensions: BTreeMap<QName, ExtensionDef>,
}

impl AppDef {
    /// Create an empty definition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an extension, replacing any previous one with the same name.
    pub fn with_extension(mut self, ext: ExtensionDef) -> Self {
        self.extensions.insert(ext.name.clone(), ext);
        self
    }

    /// Add a builtin command.
    pub fn with_command(self, name: impl Into<QName>) -> Self {
        self.with_extension(ExtensionDef::new(name, ExtensionKind::Command))
    }

    /// Add a builtin query.
    pub fn with_query(self, name: impl Into<QName>) -> Self {
        self.with_extension(ExtensionDef::new(name, ExtensionKind::Query))
    }

    /// Add a builtin projector.
    pub fn with_projector(self, name: impl Into<QName>, sync: bool) -> Self {
        self.with_extension(ExtensionDef::new(name, ExtensionKind::Projector { sync }))
    }

    /// Add a builtin job.
    pub fn with_job(self, name: impl Into<QName>, cron: &str) -> Self {
        self.with_extension(ExtensionDef::new(
            name,
            ExtensionKind::Job {
                cron: cron.to_string(),
            },
        ))
    }

    /// All extensions, ordered by name.
    pub fn extensions(&self) -> impl Iterator<Item = &ExtensionDef> {
        self.extensions.values()
    }

    /// Look up an extension by name.
    pub fn extension(&self, name: &QName) -> Option<&ExtensionDef> {
        self.extensions.get(name)
    }

    /// All projectors, sync and async.
    pub fn projectors(&self) -> impl Iterator<Item = &ExtensionDef> {
        self.extensions()
            .filter(|e| matches!(e.kind, ExtensionKind::Projector { .. }))
    }

    /// Projectors that run as actualizers.
    pub fn async_projectors(&self) -> impl Iterator<Item = &ExtensionDef> {
        self.extensions().filter(|e| e.is_async_projector())
    }

    /// Look up a projector by name.
    pub fn projector(&self, name: &QName) -> Option<&ExtensionDef> {
        self.extension(name)
            .filter(|e| matches!(e.kind, ExtensionKind::Projector { .. }))
    }

    /// All jobs.
    pub fn jobs(&self) -> impl Iterator<Item = &ExtensionDef> {
        self.extensions()
            .filter(|e| matches!(e.kind, ExtensionKind::Job { .. }))
    }

    /// Look up a job by name.
    pub fn job(&self, name: &QName) -> Option<&ExtensionDef> {
        self.extension(name)
            .filter(|e| matches!(e.kind, ExtensionKind::Job { .. }))
    }

    /// Engine kinds used by at least one extension.
    pub fn engine_kinds(&self) -> BTreeSet<EngineKind> {
        self.extensions().map(|e| e.engine).collect()
    }
}

impl TryFrom<Vec<ExtensionDef>> for AppDef {
    type Error = AppDefError;

    fn try_from(list: Vec<ExtensionDef>) -> Result<Self, Self::Error> {
        let mut extensions = BTreeMap::new();
        for ext in list {
            if extensions.contains_key(&ext.name) {
                return Err(AppDefError::DuplicateExtension(ext.name));
            }
            extensions.insert(ext.name.clone(), ext);
        }
        Ok(Self { extensions })
    }
}

impl From<AppDef> for Vec<ExtensionDef> {
    fn from(def: AppDef) -> Self {
        def.extensions.into_values().collect()
    }
}
