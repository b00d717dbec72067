use std::future::Future;

use crate::{Error, config::RetryPolicy};

/// Run `op` until it succeeds or `policy.max_retries` retries are spent,
/// sleeping with doubling backoff in between.
pub(crate) async fn with_retries<T, E, F, Fut>(
  policy: RetryPolicy,
  what: &str,
  mut op: F,
) -> Result<T, Error>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
  E: std::error::Error + Send + Sync + 'static,
{
  let mut delay = policy.backoff;
  let mut attempts = 0u32;
  loop {
    attempts += 1;
    match op().await {
      Ok(value) => return Ok(value),
      Err(e) if attempts > policy.max_retries => {
        tracing::error!(what, attempts, error = %e, "giving up");
        return Err(Error::PersistenceFailure { attempts, source: Box::new(e) });
      }
      Err(e) => {
        tracing::warn!(what, attempt = attempts, error = %e, ?delay, "retrying");
        tokio::time::sleep(delay).await;
        delay = delay.saturating_mul(2);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
  };

  use super::*;

  #[derive(Debug, thiserror::Error)]
  #[error("locked")]
  struct Locked;

  fn policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy { max_retries, backoff: Duration::from_millis(1) }
  }

  #[tokio::test]
  async fn transient_failures_are_retried() {
    let calls = AtomicU32::new(0);
    let value = with_retries(policy(3), "write", || async {
      if calls.fetch_add(1, Ordering::SeqCst) < 2 { Err(Locked) } else { Ok(7) }
    })
    .await
    .unwrap();
    assert_eq!(value, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn exhausted_retries_escalate() {
    let err = with_retries(policy(2), "write", || async { Err::<(), _>(Locked) })
      .await
      .unwrap_err();
    assert!(matches!(err, Error::PersistenceFailure { attempts: 3, .. }));
  }
}
