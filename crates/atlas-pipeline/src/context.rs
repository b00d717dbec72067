//! The explicit per-invocation context handed to every job.

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use uuid::Uuid;

/// Identity and cancellation state of one job invocation.
///
/// Cloning shares the cancellation flag.
#[derive(Debug, Clone)]
pub struct JobContext {
  job:       String,
  holder:    Uuid,
  cancelled: Arc<AtomicBool>,
}

impl JobContext {
  pub fn new(job: impl Into<String>) -> Self {
    Self {
      job:       job.into(),
      holder:    Uuid::new_v4(),
      cancelled: Arc::new(AtomicBool::new(false)),
    }
  }

  /// Name used in logs and as the ledger process name.
  pub fn job(&self) -> &str { &self.job }

  /// Lease holder id of this invocation.
  pub fn holder(&self) -> Uuid { self.holder }

  /// Request cancellation; jobs stop at the next chunk boundary.
  pub fn cancel(&self) { self.cancelled.store(true, Ordering::SeqCst) }

  pub fn is_cancelled(&self) -> bool { self.cancelled.load(Ordering::SeqCst) }

  pub fn span(&self) -> tracing::Span {
    tracing::info_span!("job", job = %self.job, holder = %self.holder)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn clones_share_cancellation() {
    let ctx = JobContext::new("load");
    let handle = ctx.clone();
    assert!(!ctx.is_cancelled());
    handle.cancel();
    assert!(ctx.is_cancelled());
    assert_eq!(ctx.holder(), handle.holder());
  }
}
