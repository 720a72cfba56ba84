use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Kind of row mutation. Upstream names are matched case-insensitively;
/// anything unrecognized is `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
  Insert,
  Update,
  Delete,
  Unknown,
}

impl ChangeType {
  pub fn parse(raw: Option<&str>) -> ChangeType {
    let raw = match raw.map(str::trim) {
      None | Some("") => return ChangeType::Unknown,
      Some(raw) => raw,
    };

    if raw.eq_ignore_ascii_case("insert") {
      ChangeType::Insert
    } else if raw.eq_ignore_ascii_case("update") {
      ChangeType::Update
    } else if raw.eq_ignore_ascii_case("delete") {
      ChangeType::Delete
    } else {
      ChangeType::Unknown
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ChangeType::Insert => "insert",
      ChangeType::Update => "update",
      ChangeType::Delete => "delete",
      ChangeType::Unknown => "unknown",
    }
  }
}

impl fmt::Display for ChangeType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl Serialize for ChangeType {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}

/// Primary key of the first changed row.
///
/// Only a column literally named `id` is recognized; composite keys and other
/// column names yield no key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrimaryKey {
  pub id: Value,
}

impl PrimaryKey {
  pub fn from_rows(rows: &Value) -> Option<PrimaryKey> {
    let id = rows.as_array()?.first()?.get("id")?;
    Some(PrimaryKey { id: id.clone() })
  }
}

/// Canonical, schema-stable view of one upstream change event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
  pub change_type: ChangeType,
  pub database: Option<String>,
  pub table: Option<String>,
  pub primary_key: Option<PrimaryKey>,
  pub changes: Value,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub old_data: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub change_timestamp: Option<Value>,
  pub raw_payload: Value,
}

impl ChangeRecord {
  /// Record for a payload nothing could be extracted from
  pub fn degraded(raw_payload: Value) -> ChangeRecord {
    ChangeRecord {
      change_type: ChangeType::Unknown,
      database: None,
      table: None,
      primary_key: None,
      changes: empty_changes(),
      old_data: None,
      change_timestamp: None,
      raw_payload,
    }
  }
}

pub fn empty_changes() -> Value {
  Value::Object(Map::new())
}
