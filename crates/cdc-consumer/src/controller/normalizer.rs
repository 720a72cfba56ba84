use serde_json::Value;

use crate::models::{
  cdc::{CdcPayload, DebeziumEvent, RowEvent},
  record::{empty_changes, ChangeRecord, ChangeType, PrimaryKey},
};

/// Map any classified payload into the canonical record. Never fails: missing
/// fields degrade to `null`/`"unknown"`.
pub fn normalize(payload: CdcPayload) -> ChangeRecord {
  match payload {
    CdcPayload::Row(event) => normalize_row(event),
    CdcPayload::Debezium(event) => normalize_debezium(event),
    CdcPayload::Unrecognized(raw) => ChangeRecord::degraded(raw),
  }
}

fn normalize_row(event: RowEvent) -> ChangeRecord {
  let RowEvent { kind, database, table, data, old_data, ts, timestamp, raw } = event;

  ChangeRecord {
    change_type: ChangeType::parse(kind.as_deref()),
    database,
    table,
    primary_key: data.as_ref().and_then(PrimaryKey::from_rows),
    changes: data.unwrap_or_else(empty_changes),
    old_data,
    change_timestamp: ts.or(timestamp),
    raw_payload: raw,
  }
}

fn normalize_debezium(event: DebeziumEvent) -> ChangeRecord {
  let DebeziumEvent { op, before, after, database, table, ts_ms, raw } = event;

  let change_type = match op.as_str() {
    "c" | "r" => ChangeType::Insert,
    "u" => ChangeType::Update,
    "d" => ChangeType::Delete,
    other => ChangeType::parse(Some(other)),
  };

  // deletes carry the removed row in `before`; it becomes the change row
  let (row, old_data) = match change_type {
    ChangeType::Delete => (before.or(after), None),
    _ => (after, before),
  };
  let data = row.map(|row| Value::Array(vec![row]));

  ChangeRecord {
    change_type,
    database,
    table,
    primary_key: data.as_ref().and_then(PrimaryKey::from_rows),
    changes: data.unwrap_or_else(empty_changes),
    old_data,
    change_timestamp: ts_ms,
    raw_payload: raw,
  }
}
