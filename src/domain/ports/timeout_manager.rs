use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Deadline registry for running executions.
///
/// The manager owns interruption: when a deadline elapses it cancels the
/// execution's token. The security core only registers and clears deadlines.
#[async_trait]
pub trait TimeoutManager: Send + Sync {
    /// Register a deadline `seconds` from now for `execution_id`.
    ///
    /// Re-registering an id replaces its previous deadline.
    async fn set_timeout(&self, execution_id: &str, seconds: f64, agent_name: &str);

    /// Drop the deadline for `execution_id`.
    ///
    /// Must be a no-op for ids that were never registered, already expired, or
    /// already cleared.
    async fn clear_timeout(&self, execution_id: &str);

    /// Token cancelled when the execution's deadline elapses.
    async fn cancellation_token(&self, _execution_id: &str) -> Option<CancellationToken> {
        None
    }

    /// Number of registered deadlines.
    async fn active_count(&self) -> usize;

    /// Drop every registered deadline, returning how many were cleared.
    async fn clear_all(&self) -> usize;
}
