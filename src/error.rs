use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("malformed request: {0}")]
  Malformed(String),

  #[error("task {0} not found")]
  NotFound(Uuid),

  #[error("task {0} already exists")]
  Conflict(Uuid),

  #[error("storage failure: {0}")]
  Storage(#[from] sqlx::Error),

  #[error("stored task is invalid: {0}")]
  InvalidRecord(String),

  #[error("log fetch failed: {0}")]
  LogFetch(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
