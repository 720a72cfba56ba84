use std::sync::Arc;

use cdcwatch_config::Settings;
use thiserror::Error;
use tracing::info;

use crate::server::observability::MetricsCollector;

use self::{
  broker::Broker, connector::ConnectError, emitter::ChangeEmitter, lifecycle::ConsumerLifecycle,
};

pub mod broker;
pub mod connector;
pub mod consumer_shutdown;
pub mod emitter;
pub mod kafka;
pub mod lifecycle;
pub mod message_loop;
pub mod normalizer;
pub mod shutdown;

#[cfg(test)]
pub(crate) mod fakes;

pub struct CdcConsumerControllerArgs {
  pub config: Arc<Settings>,
  pub metrics: Arc<MetricsCollector>,
  pub lifecycle: Arc<ConsumerLifecycle>,
  pub broker: Arc<dyn Broker>,
  pub emitter: Arc<ChangeEmitter>,
}

pub struct CdcConsumerController {
  pub(super) config: Arc<Settings>,
  pub(super) metrics: Arc<MetricsCollector>,
  pub(super) lifecycle: Arc<ConsumerLifecycle>,
  pub(super) broker: Arc<dyn Broker>,
  pub(super) emitter: Arc<ChangeEmitter>,
}

#[derive(Debug, Error)]
pub enum ControllerError {
  #[error(transparent)]
  Connect(#[from] ConnectError),
}

impl CdcConsumerController {
  pub fn new(args: CdcConsumerControllerArgs) -> CdcConsumerController {
    CdcConsumerController {
      config: args.config,
      metrics: args.metrics,
      lifecycle: args.lifecycle,
      broker: args.broker,
      emitter: args.emitter,
    }
  }

  /// Connect, consume until shutdown is requested, then leave the group.
  /// A shutdown that arrives while still connecting is not an error.
  pub async fn run(self) -> Result<(), ControllerError> {
    let conn = match self.connect_with_retry().await {
      Ok(conn) => conn,
      Err(ConnectError::Cancelled) => {
        info!("Shutdown requested before the consumer connected");
        return Ok(());
      }
      Err(err) => return Err(err.into()),
    };

    self.lifecycle.mark_running();
    self.metrics.set_running(true);

    self.consume(conn.as_ref()).await;

    self.lifecycle.mark_stopped();
    self.metrics.set_running(false);

    self.consumer_shutdown(conn).await;
    Ok(())
  }
}
