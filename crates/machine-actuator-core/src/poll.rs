//! Bounded polling with cancellation
//!
//! Every external call the actuator makes can be cut short by the caller's
//! cancellation token. [`cancellable`] wraps a single call; [`poll_until`]
//! repeats a check at a fixed interval until it succeeds, the deadline passes
//! or the caller cancels.

use crate::config::ActuatorConfig;
use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Interval and deadline of a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Pause between checks
    pub interval: Duration,
    /// Total time allowed, measured from the first check
    pub timeout: Duration,
}

impl PollConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl From<&ActuatorConfig> for PollConfig {
    /// The old-instance deletion wait of a replace-in-place update
    fn from(config: &ActuatorConfig) -> Self {
        Self::new(
            config.instance_status_retry_interval(),
            config.instance_delete_timeout(),
        )
    }
}

/// Run `fut` unless `cancel` fires first
pub async fn cancellable<T, Fut>(cancel: &CancellationToken, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// Poll `check` until it reports `true`
///
/// The first check runs immediately. A check that fails with a recoverable
/// error counts as "not yet" and is logged. Returns `Error::Timeout` once
/// `config.timeout` has elapsed without success, or `Error::Cancelled` as soon
/// as `cancel` fires.
pub async fn poll_until<F, Fut>(
    cancel: &CancellationToken,
    config: PollConfig,
    description: &str,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match cancellable(cancel, check()).await {
            Ok(true) => {
                debug!(attempt, "Done waiting for {}", description);
                return Ok(());
            }
            Ok(false) => {
                debug!(attempt, "Still waiting for {}", description);
            }
            Err(e) if e.bypasses_status() => return Err(e),
            Err(e) => {
                warn!(attempt, error = %e, "Poll error for {}, retrying", description);
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= config.timeout {
            return Err(Error::Timeout {
                what: description.to_string(),
                waited: config.timeout,
            });
        }

        let pause = config.interval.min(config.timeout - elapsed);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(pause) => {}
        }
    }
}
