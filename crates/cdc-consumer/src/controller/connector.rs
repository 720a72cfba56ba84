use thiserror::Error;
use tokio::{select, time::sleep};
use tracing::{error, info, warn};

use super::{
  broker::{BrokerConnection, BrokerError},
  CdcConsumerController,
};

#[derive(Debug, Error)]
pub enum ConnectError {
  #[error("broker unavailable after {attempts} attempts: {last}")]
  RetriesExhausted { attempts: u32, last: BrokerError },
  #[error("shutdown requested while connecting")]
  Cancelled,
}

impl CdcConsumerController {
  /// Probe, join the group and subscribe, retrying on a fixed delay.
  /// Gives up after `startup.max_attempts`.
  pub async fn connect_with_retry(&self) -> Result<Box<dyn BrokerConnection>, ConnectError> {
    let max_attempts = self.config.startup.max_attempts.max(1);
    let delay = self.config.startup.retry_delay();
    let mut attempt = 0;

    loop {
      if self.lifecycle.shutdown_requested() {
        return Err(ConnectError::Cancelled);
      }
      attempt += 1;

      match self.try_connect().await {
        Ok(conn) => {
          self.metrics.record_connect_attempt(true);
          info!(
            attempt,
            topic = %self.config.topics.cdc_changes,
            group_id = %self.config.kafka.group_id,
            "Connected and subscribed"
          );
          return Ok(conn);
        }
        Err(err) => {
          self.metrics.record_connect_attempt(false);

          if attempt >= max_attempts {
            error!(attempt, max_attempts, "Giving up on broker connection: {}", err);
            return Err(ConnectError::RetriesExhausted { attempts: attempt, last: err });
          }

          warn!(attempt, max_attempts, "Broker connection failed: {}. Retrying in {:?}", err, delay);
          select! {
            _ = sleep(delay) => {}
            _ = self.lifecycle.cancelled() => return Err(ConnectError::Cancelled),
          }
        }
      }
    }
  }

  async fn try_connect(&self) -> Result<Box<dyn BrokerConnection>, BrokerError> {
    let kafka = &self.config.kafka;

    self.broker.probe().await?;
    let conn = self.broker.connect(&kafka.brokers, &kafka.group_id).await?;

    if let Err(err) = conn.subscribe(&self.config.topics.cdc_changes, kafka.from_beginning) {
      if let Err(close_err) = conn.disconnect() {
        warn!("Failed to close unsubscribed connection: {}", close_err);
      }
      return Err(err);
    }

    Ok(conn)
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
  };

  use tokio::time::timeout;

  use super::*;
  use crate::controller::fakes::*;

  #[tokio::test]
  async fn test_connects_after_transient_failures() {
    let state = ConnState::with_messages(vec![]);
    let broker = Arc::new(FakeBroker::new(3, state.clone()));
    let harness = Harness::new(broker.clone(), 10);

    let controller = harness.controller();
    let conn = timeout(Duration::from_secs(5), controller.connect_with_retry()).await.unwrap();

    assert!(conn.is_ok());
    assert_eq!(broker.probes.load(Ordering::SeqCst), 4);
    assert_eq!(broker.connects.load(Ordering::SeqCst), 1);
    assert_eq!(state.subscribed(), Some(("tidb-cdc-changes".to_string(), false)));
    assert_eq!(harness.metrics.connect_attempts.with_label_values(&["failure"]).get(), 3.0);
    assert_eq!(harness.metrics.connect_attempts.with_label_values(&["success"]).get(), 1.0);
  }

  #[tokio::test]
  async fn test_gives_up_after_max_attempts() {
    let state = ConnState::with_messages(vec![]);
    let broker = Arc::new(FakeBroker::new(u32::MAX, state.clone()));
    let harness = Harness::new(broker.clone(), 4);

    let controller = harness.controller();
    let res = timeout(Duration::from_secs(5), controller.connect_with_retry()).await.unwrap();

    match res {
      Err(ConnectError::RetriesExhausted { attempts, last }) => {
        assert_eq!(attempts, 4);
        assert!(matches!(last, BrokerError::Probe(_)));
      }
      Err(other) => panic!("unexpected error: {}", other),
      Ok(_) => panic!("connected to a broker that always fails"),
    }
    assert_eq!(broker.probes.load(Ordering::SeqCst), 4);
    assert_eq!(broker.connects.load(Ordering::SeqCst), 0);
    assert!(state.subscribed().is_none());
  }

  #[tokio::test]
  async fn test_shutdown_interrupts_retry_delay() {
    let state = ConnState::with_messages(vec![]);
    let broker = Arc::new(FakeBroker::new(u32::MAX, state));
    let mut harness = Harness::new(broker.clone(), 10);
    let mut settings = (*harness.config).clone();
    settings.startup.retry_delay_secs = 3600;
    harness.config = Arc::new(settings);

    let controller = harness.controller();
    let lifecycle = harness.lifecycle.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(20)).await;
      lifecycle.request_shutdown();
    });

    let res = timeout(Duration::from_secs(5), controller.connect_with_retry()).await.unwrap();
    assert!(matches!(res, Err(ConnectError::Cancelled)));
    assert_eq!(broker.probes.load(Ordering::SeqCst), 1);
  }
}
