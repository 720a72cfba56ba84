use serde::Serialize;

/// Broker-side facts about one consumed message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMeta {
  pub topic: String,
  pub partition: i32,
  pub offset: i64,
  /// Milliseconds since epoch as assigned by the broker, when available
  pub broker_timestamp: Option<i64>,
  /// Payload length in bytes, zero when the payload is absent
  pub size: usize,
}

/// A message detached from the broker client, owned by the loop for one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
  pub payload: Option<Vec<u8>>,
  pub meta: MessageMeta,
}

impl RawMessage {
  pub fn new(
    topic: impl Into<String>,
    partition: i32,
    offset: i64,
    broker_timestamp: Option<i64>,
    payload: Option<Vec<u8>>,
  ) -> Self {
    let size = payload.as_ref().map(|p| p.len()).unwrap_or(0);
    let meta = MessageMeta { topic: topic.into(), partition, offset, broker_timestamp, size };
    Self { payload, meta }
  }

  /// The payload, or `None` when it is absent or zero-length
  pub fn body(&self) -> Option<&[u8]> {
    self.payload.as_deref().filter(|p| !p.is_empty())
  }
}
