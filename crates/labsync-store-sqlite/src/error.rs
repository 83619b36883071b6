//! Error type for `labsync-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown event status: {0:?}")]
  UnknownStatus(String),

  #[error("checkpoint version {found} is not supported (expected {expected})")]
  UnsupportedVersion { found: u32, expected: u32 },

  #[error("stored tree is inconsistent: {0}")]
  Corrupt(String),

  #[error("no checkpoint to update")]
  NoCheckpoint,

  #[error("batch not found: {0}")]
  BatchNotFound(uuid::Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
