use std::{future::Future, time::Duration};

use crate::models::AlertStatus;

pub type CoreResult<T> = Result<T, CoreError>;

/// Failures surfaced by the care core.
///
/// Everything except `TransientDependencyFailure` is deterministic for a given input and is
/// never retried by the core itself.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("alert #{alert_id} is {current}, it cannot become {attempted}")]
    InvalidTransition {
        alert_id: i32,
        current: AlertStatus,
        attempted: AlertStatus,
    },

    #[error("{0}")]
    ImmutableHistory(String),

    #[error("dependency unavailable: {0}")]
    TransientDependencyFailure(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Runs a storage call under `limit`, turning an elapsed deadline into a transient failure.
pub async fn bounded<T, F>(limit: Duration, operation: &str, fut: F) -> CoreResult<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(CoreError::from),
        Err(_) => Err(CoreError::TransientDependencyFailure(format!(
            "{operation} timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn elapsed_storage_call_is_transient() {
        let result: CoreResult<()> = bounded(Duration::from_millis(10), "load alert", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(
            result,
            Err(CoreError::TransientDependencyFailure(msg)) if msg.starts_with("load alert")
        ));
    }

    #[tokio::test]
    async fn storage_errors_pass_through() {
        let result: CoreResult<()> = bounded(Duration::from_secs(1), "load alert", async {
            Err(anyhow::anyhow!("connection reset"))
        })
        .await;

        assert!(matches!(result, Err(CoreError::Other(_))));
    }
}
