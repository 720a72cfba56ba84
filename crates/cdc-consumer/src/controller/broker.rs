use async_trait::async_trait;
use thiserror::Error;

use crate::models::message::{MessageMeta, RawMessage};

#[derive(Debug, Error)]
pub enum BrokerError {
  #[error("failed to create broker client: {0}")]
  Client(String),
  #[error("broker probe failed: {0}")]
  Probe(String),
  #[error("failed to subscribe to topic '{topic}': {reason}")]
  Subscribe { topic: String, reason: String },
  #[error("consumer is not subscribed to any topic")]
  NotSubscribed,
  #[error("failed to receive message: {0}")]
  Receive(String),
  #[error("failed to store offset {offset} for {topic}[{partition}]: {reason}")]
  Ack { topic: String, partition: i32, offset: i64, reason: String },
  #[error("failed to disconnect: {0}")]
  Disconnect(String),
}

/// Entry point to a message broker cluster
#[async_trait]
pub trait Broker: Send + Sync {
  /// Lightweight reachability check that does not join the consumer group
  async fn probe(&self) -> Result<(), BrokerError>;

  /// Open a consumer-group connection
  async fn connect(
    &self,
    brokers: &[String],
    group_id: &str,
  ) -> Result<Box<dyn BrokerConnection>, BrokerError>;
}

/// One consumer-group membership. Owned by a single task; never shared.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
  fn subscribe(&self, topic: &str, from_beginning: bool) -> Result<(), BrokerError>;

  /// Next message in per-partition delivery order
  async fn recv(&self) -> Result<RawMessage, BrokerError>;

  /// Mark a message as processed so its offset is committed
  fn ack(&self, meta: &MessageMeta) -> Result<(), BrokerError>;

  /// Flush committed offsets and leave the group. Blocking.
  fn disconnect(&self) -> Result<(), BrokerError>;
}
