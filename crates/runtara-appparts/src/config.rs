// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for runtara-appparts.

use std::time::Duration;

use crate::pool::PoolSizes;

/// Partitions runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Default engine pool sizes for deployed applications.
    pub pool_sizes: PoolSizes,
    /// Delay between borrow attempts in `wait_for_borrow`.
    pub borrow_retry_delay: Duration,
    /// Delay between attempts to resolve a job schedule.
    pub scheduler_init_retry_delay: Duration,
    /// How long shutdown waits for background processors to stop.
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_sizes: PoolSizes::default(),
            borrow_retry_delay: Duration::from_millis(20),
            scheduler_init_retry_delay: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables (all optional):
    /// - `RUNTARA_APPPARTS_COMMAND_ENGINES`: command pool size (default: 10)
    /// - `RUNTARA_APPPARTS_QUERY_ENGINES`: query pool size (default: 10)
    /// - `RUNTARA_APPPARTS_ACTUALIZER_ENGINES`: actualizer pool size (default: 10)
    /// - `RUNTARA_APPPARTS_SCHEDULER_ENGINES`: scheduler pool size (default: 10)
    /// - `RUNTARA_APPPARTS_BORROW_RETRY_DELAY_MS`: default 20
    /// - `RUNTARA_APPPARTS_SCHEDULER_RETRY_DELAY_MS`: default 1000
    /// - `RUNTARA_APPPARTS_SHUTDOWN_TIMEOUT_SECS`: default 30
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps variable names to values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let pool_sizes = PoolSizes {
            command: parse_var(
                &lookup,
                "RUNTARA_APPPARTS_COMMAND_ENGINES",
                defaults.pool_sizes.command,
            )?,
            query: parse_var(
                &lookup,
                "RUNTARA_APPPARTS_QUERY_ENGINES",
                defaults.pool_sizes.query,
            )?,
            actualizer: parse_var(
                &lookup,
                "RUNTARA_APPPARTS_ACTUALIZER_ENGINES",
                defaults.pool_sizes.actualizer,
            )?,
            scheduler: parse_var(
                &lookup,
                "RUNTARA_APPPARTS_SCHEDULER_ENGINES",
                defaults.pool_sizes.scheduler,
            )?,
        };

        let borrow_retry_delay = Duration::from_millis(parse_var(
            &lookup,
            "RUNTARA_APPPARTS_BORROW_RETRY_DELAY_MS",
            defaults.borrow_retry_delay.as_millis() as u64,
        )?);

        let scheduler_init_retry_delay = Duration::from_millis(parse_var(
            &lookup,
            "RUNTARA_APPPARTS_SCHEDULER_RETRY_DELAY_MS",
            defaults.scheduler_init_retry_delay.as_millis() as u64,
        )?);

        let shutdown_timeout = Duration::from_secs(parse_var(
            &lookup,
            "RUNTARA_APPPARTS_SHUTDOWN_TIMEOUT_SECS",
            defaults.shutdown_timeout.as_secs(),
        )?);

        if borrow_retry_delay.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "RUNTARA_APPPARTS_BORROW_RETRY_DELAY_MS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            pool_sizes,
            borrow_retry_delay,
            scheduler_init_retry_delay,
            shutdown_timeout,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but can not be parsed.
    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
}
