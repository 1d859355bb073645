// ABOUTME: Fixed-delay bounded retry policy shared by all poll loops
// ABOUTME: One parameterized implementation instead of ad hoc sleep loops

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::{ContainerRuntime, ContainerStatus, Result, RuntimeError};

/// Fixed-delay polling with a hard attempt ceiling. There is no backoff and
/// no cancellation: callers either get a result or the budget exhausts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Post-start setup budget: 15 attempts, 2s apart.
    pub const fn setup() -> Self {
        Self::new(15, Duration::from_secs(2))
    }

    /// Terminal readiness budget: 10 attempts, 500ms apart.
    pub const fn terminal_ready() -> Self {
        Self::new(10, Duration::from_millis(500))
    }

    /// Run `op` until it yields `Ok(Some(value))`, sleeping `delay` between
    /// attempts. `Ok(None)` means "retry"; `Err` aborts immediately.
    /// Returns `Ok(None)` when the attempt budget exhausts.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> std::result::Result<Option<T>, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        for attempt in 1..=self.max_attempts {
            if let Some(value) = op(attempt).await? {
                return Ok(Some(value));
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.delay).await;
            }
        }
        Ok(None)
    }
}

/// Poll `inspect` until the container is observed running, within the policy
/// budget. A `restarting` observation is logged as its own diagnostic since
/// it usually means a crash loop rather than slow startup.
pub async fn wait_until_running(
    runtime: &dyn ContainerRuntime,
    container_ref: &str,
    policy: RetryPolicy,
) -> Result<()> {
    let ready = policy
        .run(|attempt| async move {
            match runtime.inspect(container_ref).await {
                Ok(state) => match state.status {
                    ContainerStatus::Running => Ok(Some(())),
                    ContainerStatus::Restarting => {
                        warn!(
                            "Container {} is restarting (attempt {}/{})",
                            container_ref, attempt, policy.max_attempts
                        );
                        Ok(None)
                    }
                    other => {
                        debug!(
                            "Container {} not yet running: {} (attempt {}/{})",
                            container_ref,
                            other.as_str(),
                            attempt,
                            policy.max_attempts
                        );
                        Ok(None)
                    }
                },
                // Not visible yet; keep polling within the budget.
                Err(RuntimeError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await?;

    if ready.is_some() {
        return Ok(());
    }

    let last_status = match runtime.inspect(container_ref).await {
        Ok(state) => state.status.as_str().to_string(),
        Err(e) => format!("inspect failed: {}", e),
    };
    Err(RuntimeError::NotRunning {
        container_ref: container_ref.to_string(),
        attempts: policy.max_attempts,
        last_status,
    })
}
