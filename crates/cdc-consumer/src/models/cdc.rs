use serde_json::{Map, Value};

/// Keys whose presence marks an object as a row-level change event
const ROW_KEYS: [&str; 8] = ["type", "database", "table", "data", "old_data", "old", "ts", "timestamp"];

/// A CDC payload, classified by the upstream shape it arrived in.
///
/// Every variant keeps the parsed document it was built from so the
/// normalized record can always carry the raw payload.
#[derive(Debug, Clone, PartialEq)]
pub enum CdcPayload {
  /// Row change envelope `{type, database, table, data, old_data, ts}`.
  /// TiCDC's canal-json protocol (`old` instead of `old_data`, upper case
  /// `type`) lands here as well.
  Row(RowEvent),
  /// Debezium envelope `{op, before, after, source: {db, table}, ts_ms}`,
  /// optionally wrapped in `{schema, payload}`
  Debezium(DebeziumEvent),
  /// Valid JSON matching no known shape
  Unrecognized(Value),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowEvent {
  pub kind: Option<String>,
  pub database: Option<String>,
  pub table: Option<String>,
  pub data: Option<Value>,
  pub old_data: Option<Value>,
  pub ts: Option<Value>,
  pub timestamp: Option<Value>,
  pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebeziumEvent {
  pub op: String,
  pub before: Option<Value>,
  pub after: Option<Value>,
  pub database: Option<String>,
  pub table: Option<String>,
  pub ts_ms: Option<Value>,
  pub raw: Value,
}

/// Field value unless absent or `null`
fn present(map: &Map<String, Value>, key: &str) -> Option<Value> {
  map.get(key).filter(|v| !v.is_null()).cloned()
}

/// Field value as text. Non-string scalars are rendered as JSON so a table
/// named `42` still shows up instead of being dropped.
fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
  match map.get(key)? {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    other => Some(other.to_string()),
  }
}

impl RowEvent {
  fn from_map(map: &Map<String, Value>, raw: &Value) -> Self {
    RowEvent {
      kind: text(map, "type"),
      database: text(map, "database"),
      table: text(map, "table"),
      data: present(map, "data"),
      old_data: present(map, "old_data").or_else(|| present(map, "old")),
      ts: present(map, "ts"),
      timestamp: present(map, "timestamp"),
      raw: raw.clone(),
    }
  }
}

impl DebeziumEvent {
  /// `Some` when `map` carries a Debezium `op` next to `before`/`after`
  fn from_map(map: &Map<String, Value>, raw: &Value) -> Option<Self> {
    let envelope = match map.get("payload") {
      Some(Value::Object(inner)) if inner.contains_key("op") => inner,
      _ => map,
    };

    let op = match envelope.get("op") {
      Some(Value::String(op)) => op.clone(),
      _ => return None,
    };
    if !envelope.contains_key("before") && !envelope.contains_key("after") {
      return None;
    }

    let source = envelope.get("source").and_then(Value::as_object);

    Some(DebeziumEvent {
      op,
      before: present(envelope, "before"),
      after: present(envelope, "after"),
      database: source.and_then(|s| text(s, "db")),
      table: source.and_then(|s| text(s, "table")),
      ts_ms: present(envelope, "ts_ms").or_else(|| source.and_then(|s| present(s, "ts_ms"))),
      raw: raw.clone(),
    })
  }
}

impl CdcPayload {
  /// Parse a text-encoded payload. Fails only when the bytes are not JSON.
  pub fn parse(bytes: &[u8]) -> Result<CdcPayload, serde_json::Error> {
    let value: Value = serde_json::from_slice(bytes)?;
    Ok(CdcPayload::from_value(value))
  }

  /// Classify an already parsed document. Never fails.
  pub fn from_value(value: Value) -> CdcPayload {
    let classified = match &value {
      Value::Object(map) => DebeziumEvent::from_map(map, &value).map(CdcPayload::Debezium).or_else(
        || {
          ROW_KEYS
            .iter()
            .any(|key| map.contains_key(*key))
            .then(|| CdcPayload::Row(RowEvent::from_map(map, &value)))
        },
      ),
      _ => None,
    };

    classified.unwrap_or(CdcPayload::Unrecognized(value))
  }
}
