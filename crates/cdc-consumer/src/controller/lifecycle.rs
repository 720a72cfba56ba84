use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Start/stop state shared by the message loop, the shutdown listener and
/// the liveness endpoint. Cloned around behind an `Arc`.
#[derive(Debug, Default)]
pub struct ConsumerLifecycle {
  running: AtomicBool,
  shutdown_requested: AtomicBool,
  shutdown: Notify,
}

impl ConsumerLifecycle {
  pub fn new() -> Self {
    Self::default()
  }

  /// The message loop has started pulling messages
  pub fn mark_running(&self) {
    self.running.store(true, Ordering::SeqCst);
  }

  pub fn mark_stopped(&self) {
    self.running.store(false, Ordering::SeqCst);
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::SeqCst)
  }

  /// Stop accepting new messages and wake everything waiting in `cancelled`
  pub fn request_shutdown(&self) {
    self.shutdown_requested.store(true, Ordering::SeqCst);
    self.shutdown.notify_waiters();
  }

  pub fn shutdown_requested(&self) -> bool {
    self.shutdown_requested.load(Ordering::SeqCst)
  }

  /// Resolves once shutdown has been requested, including before this call
  pub async fn cancelled(&self) {
    loop {
      // registered before the flag check so a concurrent request is not lost
      let notified = self.shutdown.notified();
      if self.shutdown_requested() {
        return;
      }
      notified.await;
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{sync::Arc, time::Duration};

  use tokio::time::timeout;

  use super::*;

  #[test]
  fn test_running_flag() {
    let lifecycle = ConsumerLifecycle::new();
    assert!(!lifecycle.is_running());
    lifecycle.mark_running();
    assert!(lifecycle.is_running());
    lifecycle.mark_stopped();
    assert!(!lifecycle.is_running());
  }

  #[tokio::test]
  async fn test_cancelled_after_request() {
    let lifecycle = ConsumerLifecycle::new();
    lifecycle.request_shutdown();
    timeout(Duration::from_secs(1), lifecycle.cancelled()).await.expect("already cancelled");
  }

  #[tokio::test]
  async fn test_cancelled_wakes_waiter() {
    let lifecycle = Arc::new(ConsumerLifecycle::new());
    let waiter = {
      let lifecycle = lifecycle.clone();
      tokio::spawn(async move { lifecycle.cancelled().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    lifecycle.request_shutdown();
    timeout(Duration::from_secs(1), waiter).await.expect("waiter woke up").unwrap();
  }
}
