//! Retry Logic with Exponential Backoff
//!
//! Every range fetch goes through [`RetryPolicy::fetch`], which drives a
//! worker's [`ClientSlot`] until the fetch succeeds, fails permanently, or the
//! retry budget runs out.
//!
//! ```text
//!        ├─→ Attempt 1: Immediate
//!        ├─→ Attempt 2: Wait 100ms (backoff)
//!        ├─→ Attempt 3: Wait 200ms (backoff * 2)
//!        └─→ Attempt 4: Wait 400ms (backoff * 4)   (default: 3 retries)
//! ```
//!
//! ## Retryable vs Non-Retryable Errors
//!
//! **Retryable** (see [`FetchErrorKind::is_transient`]):
//! - connection reset / aborted / EOF, stream terminated mid-response
//! - HTTP 429
//! - HTTP 500, 502, 503, 504
//!
//! **Non-Retryable**: everything else, including timeouts, refused
//! connections and 4xx statuses other than 429.
//!
//! ## Poisoned Connections
//!
//! Connection-level failures (reset, protocol termination) leave the worker's
//! client in the poisoned state. The slot drops it, and the next attempt
//! builds a fresh client from the factory instead of reusing a pool that may
//! still hold the dead connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::client::{ClientFactory, RangeClient};
use crate::error::{FetchError, RetryError};
use crate::keyspace::KeyspaceUnit;

/// Retry policy configuration for exponential backoff.
///
/// ```text
/// backoff = min(initial_backoff * multiplier^attempt, max_backoff)
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_backoff: Duration,

    /// Upper bound on any single delay
    pub max_backoff: Duration,

    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    /// 3 retries, 100ms initial backoff doubling up to 30s.
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        }
    }

    /// Delay before retry number `attempt + 1` (0-indexed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let backoff_ms =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff = Duration::from_millis(backoff_ms.min(u64::MAX as f64) as u64);
        backoff.min(self.max_backoff)
    }

    pub fn is_retryable(&self, error: &FetchError) -> bool {
        error.is_transient()
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Fetch one unit through `slot`, retrying transient failures.
    ///
    /// On failure the returned [`RetryError`] carries the last error seen and
    /// the number of attempts made.
    pub async fn fetch<F: ClientFactory>(
        &self,
        slot: &mut ClientSlot<F>,
        unit: KeyspaceUnit,
    ) -> Result<String, RetryError> {
        let mut attempt: u32 = 0;

        loop {
            match slot.fetch(unit).await {
                Ok(body) => {
                    if attempt > 0 {
                        debug!(%unit, attempt = attempt + 1, "Fetch succeeded after retry");
                    }
                    return Ok(body);
                }
                Err(error) => {
                    if !self.is_retryable(&error) {
                        debug!(%unit, error = %error, "Non-retryable error, giving up");
                        return Err(RetryError {
                            attempts: attempt + 1,
                            last: error,
                        });
                    }

                    if attempt >= self.max_retries {
                        debug!(
                            %unit,
                            attempt = attempt + 1,
                            max_retries = self.max_retries,
                            error = %error,
                            "Max retries exhausted, giving up"
                        );
                        return Err(RetryError {
                            attempts: attempt + 1,
                            last: error,
                        });
                    }

                    let backoff = self.backoff(attempt);
                    warn!(
                        %unit,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        poisoned = slot.is_poisoned(),
                        error = %error,
                        "Retryable error, backing off"
                    );

                    sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// A worker's exclusively owned client, built lazily from a factory.
///
/// `client` is `None` before the first fetch and after the slot is poisoned;
/// either way the next fetch builds a fresh one.
pub struct ClientSlot<F: ClientFactory> {
    factory: Arc<F>,
    client: Option<F::Client>,
    poisoned: bool,
    builds: u32,
}

impl<F: ClientFactory> ClientSlot<F> {
    pub fn new(factory: Arc<F>) -> Self {
        Self {
            factory,
            client: None,
            poisoned: false,
            builds: 0,
        }
    }

    /// Whether the last exchange died at the connection level.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Discard the current client; the next fetch builds a new one.
    pub fn poison(&mut self) {
        self.client = None;
        self.poisoned = true;
    }

    /// How many clients this slot has built.
    pub fn builds(&self) -> u32 {
        self.builds
    }

    fn client(&mut self) -> Result<&F::Client, FetchError> {
        let client = match self.client.take() {
            Some(client) => client,
            None => {
                if self.poisoned {
                    debug!(builds = self.builds, "Replacing poisoned client");
                }
                let client = self.factory.build()?;
                self.builds += 1;
                self.poisoned = false;
                client
            }
        };
        Ok(self.client.insert(client))
    }

    /// One attempt. Poisons the slot on connection-level failures.
    pub async fn fetch(&mut self, unit: KeyspaceUnit) -> Result<String, FetchError> {
        let result = {
            let client = self.client()?;
            client.fetch_range(unit).await
        };
        if let Err(error) = &result {
            if error.kind.poisons_connection() {
                self.poison();
            }
        }
        result
    }
}
