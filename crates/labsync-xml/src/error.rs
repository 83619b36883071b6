//! Error types for the labsync-xml readers and writers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("XML error: {0}")]
  Xml(#[from] quick_xml::Error),

  #[error("XML attribute error: {0}")]
  Attribute(#[from] quick_xml::events::attributes::AttrError),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("document has no root element")]
  EmptyDocument,

  #[error("element <{0}> is never closed")]
  Unclosed(String),

  #[error("{document}: <{parent}> is missing <{element}>")]
  MissingElement {
    document: &'static str,
    parent:   String,
    element:  &'static str,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
