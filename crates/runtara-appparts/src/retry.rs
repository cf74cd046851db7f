// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cancellable fixed-delay retry.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Run `op` until it succeeds, fails with an error `should_retry` rejects, or
/// `token` is cancelled while waiting between attempts.
///
/// The first attempt is always made. `on_retry` is called with the error and
/// the number of the failed attempt before each wait.
pub async fn retry_while<T, F, Fut>(
    token: &CancellationToken,
    delay: Duration,
    should_retry: impl Fn(&Error) -> bool,
    mut on_retry: impl FnMut(&Error, u32),
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if should_retry(&e) => {
                on_retry(&e, attempt);
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}
