//! Error types for `labsync-core`.

use thiserror::Error;

/// Boxed error from a pluggable backend (registry, store).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
  #[error("raw extract contains no records")]
  EmptyExtract,

  #[error("no subjects left to build a tree from")]
  NoSubjects,

  #[error(
    "event not found in tree: subject {subject:?}, form {form:?}, event \
     {event:?}"
  )]
  EventNotFound {
    subject: String,
    form:    String,
    event:   String,
  },

  #[error(
    "field {field:?} not found in tree: subject {subject:?}, form {form:?}, \
     event {event:?}"
  )]
  FieldNotFound {
    subject: String,
    form:    String,
    event:   String,
    field:   String,
  },

  #[error("form {0:?} has no completion value")]
  EmptyCompletionValue(String),

  #[error("form {0:?} has no imported value")]
  EmptyImportedValue(String),

  #[error("cannot parse {column} value {value:?} with format {format:?}")]
  InvalidDate {
    column: &'static str,
    value:  String,
    format: String,
  },

  #[error("invalid date format string: {0:?}")]
  InvalidDateFormat(String),

  #[error("unknown rule: {0:?}")]
  UnknownRule(String),

  #[error("id registry error: {0}")]
  Registry(#[source] BoxError),

  #[error("checkpoint store error: {0}")]
  Store(#[source] BoxError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
