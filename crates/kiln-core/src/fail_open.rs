//! Fail-open utilities for graceful degradation
//!
//! Infrastructure side effects (activity logs, progress notes) must never
//! stop the agent. Wrap them with [`fail_open`].
//!
//! DO NOT use fail-open for:
//! - Environment steps (an environment failure is fatal)
//! - Critique or task parsing (a malformed verdict is fatal)
//! - Skill library writes (the sync invariant must hold)

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Execute an operation that should fail open (infrastructure, not business logic)
///
/// Logs the error via `tracing::warn!` on failure and returns `None`.
///
/// # Usage
///
/// ```no_run
/// use kiln_core::fail_open::fail_open;
/// use kiln_core::Result;
///
/// async fn append_log() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let result = fail_open("activity_logger", || append_log()).await;
///     // result is None if append_log() failed, otherwise Some(())
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}
