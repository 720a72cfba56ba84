use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;
use tokio::{select, time::sleep};
use tracing::{error, info, warn};

use super::{
  broker::BrokerConnection, emitter::EmitError, normalizer::normalize, CdcConsumerController,
};
use crate::models::{
  cdc::CdcPayload,
  message::{MessageMeta, RawMessage},
};

/// Pause after a broker receive error before asking again
const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ProcessError {
  #[error("payload is not valid JSON: {0}")]
  Parse(#[source] serde_json::Error),
  #[error(transparent)]
  Emit(#[from] EmitError),
}

impl ProcessError {
  /// Metric label for the failure
  pub fn reason(&self) -> &'static str {
    match self {
      ProcessError::Parse(_) => "parse",
      ProcessError::Emit(EmitError::Serialize(_)) => "serialize",
      ProcessError::Emit(EmitError::Write(_)) => "emit",
    }
  }
}

/// Raw payload as it should appear in a diagnostic log line
pub fn printable_payload(body: &[u8]) -> String {
  match std::str::from_utf8(body) {
    Ok(text) => text.to_string(),
    Err(_) => format!("base64:{}", STANDARD.encode(body)),
  }
}

impl CdcConsumerController {
  /// Pull, process and acknowledge messages one at a time until shutdown is
  /// requested. A message that is already being processed always finishes.
  pub async fn consume(&self, conn: &dyn BrokerConnection) {
    info!("Consuming change events from '{}'", self.config.topics.cdc_changes);

    loop {
      let received = select! {
        biased;
        _ = self.lifecycle.cancelled() => break,
        res = conn.recv() => res,
      };

      let msg = match received {
        Ok(msg) => msg,
        Err(err) => {
          self.metrics.receive_errors.inc();
          error!("Error receiving message: {}", err);
          select! {
            _ = sleep(RECEIVE_BACKOFF) => continue,
            _ = self.lifecycle.cancelled() => break,
          }
        }
      };

      self.handle_message(&msg);

      // failed messages are acked too; redelivery would fail the same way
      if let Err(err) = conn.ack(&msg.meta) {
        self.metrics.ack_failures.inc();
        error!("{}", err);
      }
    }

    info!("Stopped accepting new messages");
  }

  fn handle_message(&self, msg: &RawMessage) {
    self.metrics.record_received();
    let meta = &msg.meta;

    let Some(body) = msg.body() else {
      warn!(
        topic = %meta.topic,
        partition = meta.partition,
        offset = meta.offset,
        "Received message with empty payload, skipping"
      );
      self.metrics.record_skipped("empty");
      return;
    };

    let started = Instant::now();
    match self.process_message(body, meta) {
      Ok(()) => self.metrics.record_processed(started.elapsed().as_secs_f64()),
      Err(err) => {
        self.metrics.record_failed(err.reason());
        error!(
          topic = %meta.topic,
          partition = meta.partition,
          offset = meta.offset,
          raw_payload = %printable_payload(body),
          "Error processing message: {}",
          err
        );
      }
    }
  }

  /// Parse, normalize and emit a single payload
  pub fn process_message(&self, body: &[u8], meta: &MessageMeta) -> Result<(), ProcessError> {
    let payload = CdcPayload::parse(body).map_err(ProcessError::Parse)?;
    let record = normalize(payload);
    self.emitter.emit(&record, meta)?;
    Ok(())
  }
}
