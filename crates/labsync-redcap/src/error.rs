//! Error type for `labsync-redcap`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// The server answered, but not with anything we can use.
  #[error("REDCap returned {status}: {message}")]
  Api { status: u16, message: String },

  #[error("unexpected export row: {0}")]
  UnexpectedRow(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
