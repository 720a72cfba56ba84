//! In-memory broker used by the controller tests

use std::{
  collections::VecDeque,
  sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, Mutex,
  },
};

use async_trait::async_trait;
use cdcwatch_config::Settings;

use super::{
  broker::{Broker, BrokerConnection, BrokerError},
  emitter::{ChangeEmitter, MemorySink},
  lifecycle::ConsumerLifecycle,
  CdcConsumerController, CdcConsumerControllerArgs,
};
use crate::{
  models::message::{MessageMeta, RawMessage},
  server::observability::MetricsCollector,
};

pub fn raw(offset: i64, payload: Option<&[u8]>) -> RawMessage {
  RawMessage::new("tidb-cdc-changes", 0, offset, Some(1700000000000), payload.map(|p| p.to_vec()))
}

/// Shared between a `FakeConnection` and the test that inspects it
#[derive(Default)]
pub struct ConnState {
  messages: Mutex<VecDeque<Result<RawMessage, BrokerError>>>,
  acked: Mutex<Vec<i64>>,
  subscribed: Mutex<Option<(String, bool)>>,
  disconnected: AtomicBool,
  fail_acks: AtomicBool,
  on_drained: Mutex<Option<Arc<ConsumerLifecycle>>>,
}

impl ConnState {
  pub fn with_messages(messages: Vec<Result<RawMessage, BrokerError>>) -> Arc<Self> {
    Arc::new(Self { messages: Mutex::new(messages.into()), ..Default::default() })
  }

  /// Request shutdown once every queued message has been handed out
  pub fn stop_when_drained(&self, lifecycle: Arc<ConsumerLifecycle>) {
    *self.on_drained.lock().unwrap() = Some(lifecycle);
  }

  pub fn fail_acks(&self) {
    self.fail_acks.store(true, Ordering::SeqCst);
  }

  pub fn acked(&self) -> Vec<i64> {
    self.acked.lock().unwrap().clone()
  }

  pub fn subscribed(&self) -> Option<(String, bool)> {
    self.subscribed.lock().unwrap().clone()
  }

  pub fn disconnected(&self) -> bool {
    self.disconnected.load(Ordering::SeqCst)
  }
}

pub struct FakeConnection(Arc<ConnState>);

#[async_trait]
impl BrokerConnection for FakeConnection {
  fn subscribe(&self, topic: &str, from_beginning: bool) -> Result<(), BrokerError> {
    *self.0.subscribed.lock().unwrap() = Some((topic.to_string(), from_beginning));
    Ok(())
  }

  async fn recv(&self) -> Result<RawMessage, BrokerError> {
    let next = self.0.messages.lock().unwrap().pop_front();
    match next {
      Some(msg) => msg,
      None => {
        let drained = self.0.on_drained.lock().unwrap().clone();
        if let Some(lifecycle) = drained {
          lifecycle.request_shutdown();
        }
        std::future::pending().await
      }
    }
  }

  fn ack(&self, meta: &MessageMeta) -> Result<(), BrokerError> {
    if self.0.fail_acks.load(Ordering::SeqCst) {
      return Err(BrokerError::Ack {
        topic: meta.topic.clone(),
        partition: meta.partition,
        offset: meta.offset,
        reason: "rebalance in progress".into(),
      });
    }
    self.0.acked.lock().unwrap().push(meta.offset);
    Ok(())
  }

  fn disconnect(&self) -> Result<(), BrokerError> {
    self.0.disconnected.store(true, Ordering::SeqCst);
    Ok(())
  }
}

/// Fails probing for the first `failures` attempts, then hands out `state`
pub struct FakeBroker {
  failures: u32,
  pub probes: AtomicU32,
  pub connects: AtomicU32,
  state: Arc<ConnState>,
}

impl FakeBroker {
  pub fn new(failures: u32, state: Arc<ConnState>) -> Self {
    Self { failures, probes: AtomicU32::new(0), connects: AtomicU32::new(0), state }
  }
}

#[async_trait]
impl Broker for FakeBroker {
  async fn probe(&self) -> Result<(), BrokerError> {
    let attempt = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
    if attempt <= self.failures {
      return Err(BrokerError::Probe("connection refused".into()));
    }
    Ok(())
  }

  async fn connect(
    &self,
    _brokers: &[String],
    _group_id: &str,
  ) -> Result<Box<dyn BrokerConnection>, BrokerError> {
    self.connects.fetch_add(1, Ordering::SeqCst);
    Ok(Box::new(FakeConnection(self.state.clone())))
  }
}

/// Everything a controller needs, wired to in-memory parts
pub struct Harness {
  pub config: Arc<Settings>,
  pub metrics: Arc<MetricsCollector>,
  pub lifecycle: Arc<ConsumerLifecycle>,
  pub broker: Arc<dyn Broker>,
  pub sink: Arc<MemorySink>,
  pub emitter: Arc<ChangeEmitter>,
}

impl Harness {
  pub fn new(broker: Arc<dyn Broker>, max_attempts: u32) -> Self {
    let mut settings = Settings::default();
    settings.startup.max_attempts = max_attempts;
    settings.startup.retry_delay_secs = 0;

    let sink = Arc::new(MemorySink::default());
    Self {
      config: Arc::new(settings),
      metrics: Arc::new(MetricsCollector::new().unwrap()),
      lifecycle: Arc::new(ConsumerLifecycle::new()),
      broker,
      emitter: Arc::new(ChangeEmitter::new(Box::new(sink.clone()))),
      sink,
    }
  }

  pub fn controller(&self) -> CdcConsumerController {
    CdcConsumerController::new(CdcConsumerControllerArgs {
      config: self.config.clone(),
      metrics: self.metrics.clone(),
      lifecycle: self.lifecycle.clone(),
      broker: self.broker.clone(),
      emitter: self.emitter.clone(),
    })
  }
}
