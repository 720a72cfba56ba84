use std::{sync::OnceLock, time::Duration};

use async_trait::async_trait;
use cdcwatch_config::Kafka;
use rdkafka::{
  admin::AdminClient,
  client::DefaultClientContext,
  consumer::{CommitMode, Consumer, StreamConsumer},
  error::KafkaError,
  types::RDKafkaErrorCode,
  ClientConfig, Message,
};
use tokio::task::spawn_blocking;
use tracing::debug;

use super::broker::{Broker, BrokerConnection, BrokerError};
use crate::models::message::{MessageMeta, RawMessage};

/// rdkafka-backed broker
pub struct KafkaBroker {
  brokers: Vec<String>,
  client_id: String,
  session_timeout_ms: u32,
  probe_timeout: Duration,
}

impl KafkaBroker {
  pub fn new(settings: &Kafka) -> Self {
    Self {
      brokers: settings.brokers.clone(),
      client_id: settings.client_id.clone(),
      session_timeout_ms: settings.session_timeout_ms,
      probe_timeout: Duration::from_millis(settings.probe_timeout_ms),
    }
  }

  fn base_config(&self, brokers: &[String]) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", brokers.join(",")).set("client.id", &self.client_id);
    config
  }
}

#[async_trait]
impl Broker for KafkaBroker {
  async fn probe(&self) -> Result<(), BrokerError> {
    let mut config = self.base_config(&self.brokers);
    config.set("socket.timeout.ms", self.probe_timeout.as_millis().to_string());
    let timeout = self.probe_timeout;

    // metadata fetch blocks the calling thread
    let topics = spawn_blocking(move || {
      let admin: AdminClient<DefaultClientContext> =
        config.create().map_err(|e| BrokerError::Client(e.to_string()))?;

      let metadata = admin
        .inner()
        .fetch_metadata(None, timeout)
        .map_err(|e| BrokerError::Probe(e.to_string()))?;

      if metadata.brokers().is_empty() {
        return Err(BrokerError::Probe("no brokers available".to_string()));
      }

      Ok(metadata.topics().len())
    })
    .await
    .map_err(|e| BrokerError::Probe(format!("probe task failed: {}", e)))??;

    debug!(topics, "broker probe succeeded");
    Ok(())
  }

  async fn connect(
    &self,
    brokers: &[String],
    group_id: &str,
  ) -> Result<Box<dyn BrokerConnection>, BrokerError> {
    let mut config = self.base_config(brokers);
    config
      .set("group.id", group_id)
      .set("session.timeout.ms", self.session_timeout_ms.to_string())
      // offsets are stored after processing and committed in the background
      .set("enable.auto.commit", "true")
      .set("enable.auto.offset.store", "false");

    Ok(Box::new(KafkaConnection { config, consumer: OnceLock::new() }))
  }
}

/// `auto.offset.reset` is fixed when the client is created, so the consumer
/// itself is only built once `subscribe` knows where to start from. Client
/// configuration errors therefore surface from `subscribe`.
pub struct KafkaConnection {
  config: ClientConfig,
  consumer: OnceLock<StreamConsumer>,
}

impl KafkaConnection {
  fn consumer(&self) -> Result<&StreamConsumer, BrokerError> {
    self.consumer.get().ok_or(BrokerError::NotSubscribed)
  }
}

#[async_trait]
impl BrokerConnection for KafkaConnection {
  fn subscribe(&self, topic: &str, from_beginning: bool) -> Result<(), BrokerError> {
    let se = |reason: String| BrokerError::Subscribe { topic: topic.to_string(), reason };

    if self.consumer.get().is_some() {
      return Err(se("already subscribed".to_string()));
    }

    let mut config = self.config.clone();
    config.set("auto.offset.reset", if from_beginning { "earliest" } else { "latest" });

    let consumer: StreamConsumer = config.create().map_err(|e| se(e.to_string()))?;
    consumer.subscribe(&[topic]).map_err(|e| se(e.to_string()))?;

    self.consumer.set(consumer).map_err(|_| se("already subscribed".to_string()))
  }

  async fn recv(&self) -> Result<RawMessage, BrokerError> {
    let consumer = self.consumer()?;
    let msg = consumer.recv().await.map_err(|e| BrokerError::Receive(e.to_string()))?;

    Ok(RawMessage::new(
      msg.topic(),
      msg.partition(),
      msg.offset(),
      msg.timestamp().to_millis(),
      msg.payload().map(|p| p.to_vec()),
    ))
  }

  fn ack(&self, meta: &MessageMeta) -> Result<(), BrokerError> {
    // librdkafka stores `offset + 1`, the next one to read
    self.consumer()?.store_offset(&meta.topic, meta.partition, meta.offset).map_err(|e| {
      BrokerError::Ack {
        topic: meta.topic.clone(),
        partition: meta.partition,
        offset: meta.offset,
        reason: e.to_string(),
      }
    })
  }

  fn disconnect(&self) -> Result<(), BrokerError> {
    let consumer = match self.consumer.get() {
      Some(c) => c,
      None => return Ok(()),
    };

    let commit = match consumer.commit_consumer_state(CommitMode::Sync) {
      Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => Ok(()),
      other => other,
    };
    consumer.unsubscribe();

    commit.map_err(|e| BrokerError::Disconnect(e.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use rdkafka::{
    consumer::BaseConsumer,
    mocking::MockCluster,
    producer::{FutureProducer, FutureRecord},
    Offset, TopicPartitionList,
  };
  use tokio::time::timeout;

  use super::*;

  const TOPIC: &str = "tidb-cdc-changes";
  const GROUP: &str = "cdc-test-group";

  fn broker_for(bootstrap: &str) -> KafkaBroker {
    KafkaBroker::new(&Kafka { brokers: vec![bootstrap.to_string()], ..Kafka::default() })
  }

  async fn produce(bootstrap: &str, payloads: &[&str]) {
    let producer: FutureProducer =
      ClientConfig::new().set("bootstrap.servers", bootstrap).create().unwrap();
    for payload in payloads {
      producer
        .send(FutureRecord::<(), str>::to(TOPIC).payload(*payload), Duration::from_secs(5))
        .await
        .unwrap();
    }
  }

  fn committed(bootstrap: &str) -> Offset {
    let consumer: BaseConsumer = ClientConfig::new()
      .set("bootstrap.servers", bootstrap)
      .set("group.id", GROUP)
      .create()
      .unwrap();
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition(TOPIC, 0);
    let offsets = consumer.committed_offsets(tpl, Duration::from_secs(5)).unwrap();
    offsets.find_partition(TOPIC, 0).unwrap().offset()
  }

  async fn next(conn: &dyn BrokerConnection) -> RawMessage {
    timeout(Duration::from_secs(30), conn.recv()).await.unwrap().unwrap()
  }

  #[tokio::test]
  async fn test_probe_reaches_cluster() {
    let cluster = MockCluster::new(1).unwrap();
    broker_for(&cluster.bootstrap_servers()).probe().await.unwrap();
  }

  #[tokio::test]
  async fn test_probe_fails_without_broker() {
    let broker = KafkaBroker::new(&Kafka {
      brokers: vec!["127.0.0.1:1".to_string()],
      probe_timeout_ms: 500,
      ..Kafka::default()
    });
    assert!(matches!(broker.probe().await, Err(BrokerError::Probe(_))));
  }

  #[tokio::test]
  async fn test_connection_requires_subscribe() {
    let cluster = MockCluster::new(1).unwrap();
    let bootstrap = cluster.bootstrap_servers();
    let conn = broker_for(&bootstrap).connect(&[bootstrap.clone()], GROUP).await.unwrap();

    assert!(matches!(conn.recv().await, Err(BrokerError::NotSubscribed)));
    let meta = RawMessage::new(TOPIC, 0, 0, None, None).meta;
    assert!(matches!(conn.ack(&meta), Err(BrokerError::NotSubscribed)));
    conn.disconnect().unwrap();

    conn.subscribe(TOPIC, true).unwrap();
    assert!(matches!(conn.subscribe(TOPIC, true), Err(BrokerError::Subscribe { .. })));
  }

  #[tokio::test]
  async fn test_ack_commits_next_offset_to_read() {
    let cluster = MockCluster::new(1).unwrap();
    cluster.create_topic(TOPIC, 1, 1).unwrap();
    let bootstrap = cluster.bootstrap_servers();
    produce(&bootstrap, &[r#"{"type":"insert"}"#, r#"{"type":"update"}"#, r#"{"type":"delete"}"#])
      .await;

    let broker = broker_for(&bootstrap);
    let conn = broker.connect(&[bootstrap.clone()], GROUP).await.unwrap();
    conn.subscribe(TOPIC, true).unwrap();

    let first = next(conn.as_ref()).await;
    assert_eq!(first.meta.offset, 0);
    assert_eq!(first.body(), Some(br#"{"type":"insert"}"#.as_slice()));
    conn.ack(&first.meta).unwrap();
    conn.disconnect().unwrap();
    drop(conn);

    assert_eq!(committed(&bootstrap), Offset::Offset(1));

    // a restarted consumer resumes at the first unprocessed message
    let conn = broker.connect(&[bootstrap.clone()], GROUP).await.unwrap();
    conn.subscribe(TOPIC, true).unwrap();
    let resumed = next(conn.as_ref()).await;
    assert_eq!(resumed.meta.offset, 1);
    assert_eq!(resumed.body(), Some(br#"{"type":"update"}"#.as_slice()));
    conn.disconnect().unwrap();
  }
}
