use std::{
  io::{self, Write},
  sync::Arc,
};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::{message::MessageMeta, record::ChangeRecord};

pub const SOURCE_TAG: &str = "tidb-cdc-consumer";
const CHANGE_MESSAGE: &str = "Database change detected";

#[derive(Debug, Error)]
pub enum EmitError {
  #[error("failed to serialize change entry: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("failed to write change entry: {0}")]
  Write(#[from] io::Error),
}

/// Destination for emitted lines
pub trait LineSink: Send + Sync {
  fn write_line(&self, line: &str) -> io::Result<()>;
}

/// Standard output, one entry per line
#[derive(Debug, Default)]
pub struct StdoutSink;

impl LineSink for StdoutSink {
  fn write_line(&self, line: &str) -> io::Result<()> {
    let mut out = io::stdout().lock();
    out.write_all(line.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()
  }
}

impl<T: LineSink + ?Sized> LineSink for Arc<T> {
  fn write_line(&self, line: &str) -> io::Result<()> {
    (**self).write_line(line)
  }
}

/// Collects lines in memory
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemorySink {
  lines: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl MemorySink {
  pub(crate) fn lines(&self) -> Vec<String> {
    self.lines.lock().map(|l| l.clone()).unwrap_or_default()
  }
}

#[cfg(test)]
impl LineSink for MemorySink {
  fn write_line(&self, line: &str) -> io::Result<()> {
    self.lines.lock().unwrap().push(line.to_string());
    Ok(())
  }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangeEntry<'a> {
  timestamp: String,
  level: &'static str,
  source: &'static str,
  message: &'static str,
  #[serde(flatten)]
  meta: &'a MessageMeta,
  #[serde(flatten)]
  record: &'a ChangeRecord,
}

/// Writes one JSON object per consumed change
pub struct ChangeEmitter {
  sink: Box<dyn LineSink>,
}

impl ChangeEmitter {
  pub fn new(sink: Box<dyn LineSink>) -> Self {
    Self { sink }
  }

  pub fn stdout() -> Self {
    Self::new(Box::new(StdoutSink))
  }

  pub fn emit(&self, record: &ChangeRecord, meta: &MessageMeta) -> Result<(), EmitError> {
    let line = Self::render(record, meta)?;
    self.sink.write_line(&line)?;
    Ok(())
  }

  fn render(record: &ChangeRecord, meta: &MessageMeta) -> Result<String, serde_json::Error> {
    let entry = ChangeEntry {
      timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
      level: "info",
      source: SOURCE_TAG,
      message: CHANGE_MESSAGE,
      meta,
      record,
    };
    serde_json::to_string(&entry)
  }
}
