use tokio::task::spawn_blocking;
use tracing::{error, info};

use super::{broker::BrokerConnection, CdcConsumerController};

impl CdcConsumerController {
  /// Commit stored offsets and leave the consumer group. Best effort: a
  /// failure is logged and never retried.
  pub async fn consumer_shutdown(&self, conn: Box<dyn BrokerConnection>) {
    info!("Disconnecting consumer from group '{}'", self.config.kafka.group_id);

    // the final commit blocks on the broker
    match spawn_blocking(move || conn.disconnect()).await {
      Ok(Ok(())) => info!("Consumer disconnected"),
      Ok(Err(err)) => error!("Error disconnecting consumer: {}", err),
      Err(err) => error!("Consumer disconnect task failed: {}", err),
    }
  }
}
