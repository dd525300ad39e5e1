use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::ports::TimeoutManager;

struct Deadline {
    token: CancellationToken,
    sleeper: JoinHandle<()>,
}

/// Tokio-backed [`TimeoutManager`].
///
/// Each registration spawns a sleeper task that cancels the execution's
/// token when the deadline elapses. Expired entries stay registered until
/// cleared, so the token remains observable to the running execution.
#[derive(Default)]
pub struct DeadlineTimeoutManager {
    deadlines: Mutex<HashMap<String, Deadline>>,
}

impl DeadlineTimeoutManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimeoutManager for DeadlineTimeoutManager {
    async fn set_timeout(&self, execution_id: &str, seconds: f64, agent_name: &str) {
        let token = CancellationToken::new();
        let deadline = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO);

        let sleeper = {
            let token = token.clone();
            let execution_id = execution_id.to_string();
            let agent_name = agent_name.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                warn!(
                    execution_id = %execution_id,
                    agent = %agent_name,
                    timeout_seconds = seconds,
                    "execution deadline elapsed, cancelling"
                );
                token.cancel();
            })
        };

        let previous = self
            .deadlines
            .lock()
            .await
            .insert(execution_id.to_string(), Deadline { token, sleeper });
        if let Some(previous) = previous {
            previous.sleeper.abort();
        }
        debug!(execution_id, agent = agent_name, timeout_seconds = seconds, "deadline registered");
    }

    async fn clear_timeout(&self, execution_id: &str) {
        if let Some(deadline) = self.deadlines.lock().await.remove(execution_id) {
            deadline.sleeper.abort();
            debug!(execution_id, "deadline cleared");
        }
    }

    async fn cancellation_token(&self, execution_id: &str) -> Option<CancellationToken> {
        self.deadlines
            .lock()
            .await
            .get(execution_id)
            .map(|d| d.token.clone())
    }

    /// Registered deadlines that have not yet elapsed.
    async fn active_count(&self) -> usize {
        self.deadlines
            .lock()
            .await
            .values()
            .filter(|d| !d.token.is_cancelled())
            .count()
    }

    async fn clear_all(&self) -> usize {
        let drained: Vec<Deadline> = self
            .deadlines
            .lock()
            .await
            .drain()
            .map(|(_, deadline)| deadline)
            .collect();
        for deadline in &drained {
            deadline.sleeper.abort();
        }
        drained.len()
    }
}
