use std::error::Error;

use derive_more::Display;
use thiserror::Error as ThisError;

pub type BoxedErr = Box<dyn Error + Sync + Send>;

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ErrorType {
  #[display("Internal error")]
  InternalError,
  #[display("Configuration error")]
  ConfigError,
  #[display("Connection error")]
  Connection,
  #[display("Task failed")]
  TaskFailed,
}

#[derive(Debug, ThisError)]
#[error("{err_type}: {message}")]
pub struct SimpleError {
  pub message: String,
  pub err_type: ErrorType,
  #[source]
  pub err: BoxedErr,
}

/// Error raised at a setup or wiring boundary, carrying where it happened
/// (`path`) and whether retrying could help (`temp`)
#[derive(Debug, ThisError)]
#[error("path: {path}, err_type: {err_type}, msg: {msg}, err: {err}")]
pub struct InternalError {
  pub err_type: ErrorType,
  pub temp: bool,
  #[source]
  pub err: BoxedErr,
  pub msg: String,
  pub path: String,
}

impl InternalError {
  pub fn new(path: String, err: BoxedErr, err_type: ErrorType, temp: bool, msg: String) -> Self {
    Self { err_type, temp, err, msg, path }
  }
}
