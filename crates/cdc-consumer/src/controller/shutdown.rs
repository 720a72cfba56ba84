use std::sync::Arc;

use tokio::{signal::ctrl_c, spawn, task::JoinHandle};
use tracing::{error, info};

use super::lifecycle::ConsumerLifecycle;

/// Resolves on Ctrl+C, or SIGTERM on unix
async fn termination_signal() {
  #[cfg(unix)]
  {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
      Ok(sigterm) => sigterm,
      Err(err) => {
        error!("Error installing SIGTERM handler: {}", err);
        if let Err(err) = ctrl_c().await {
          error!("Error waiting for ctrl_c: {}", err);
        }
        return;
      }
    };

    tokio::select! {
      res = ctrl_c() => {
        if let Err(err) = res {
          error!("Error waiting for ctrl_c: {}", err);
        }
      }
      _ = sigterm.recv() => {}
    }
  }

  #[cfg(not(unix))]
  if let Err(err) = ctrl_c().await {
    error!("Error waiting for ctrl_c: {}", err);
  }
}

/// Start listening for termination signals. The first one requests a
/// cooperative shutdown of the message loop.
pub fn shutdown_listener(lifecycle: Arc<ConsumerLifecycle>) -> JoinHandle<()> {
  spawn(async move {
    termination_signal().await;
    info!("Shutdown signal received. Stopping consumer...");
    lifecycle.request_shutdown();
  })
}
