//! Collection-date backfill and timestamp formatting.

use chrono::{
  Duration,
  format::{Item, StrftimeItems},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Error, Result, record::LabRecord};

/// Days subtracted from the result date when the collection date is missing.
pub const RESULT_DATE_OFFSET_DAYS: i64 = 4;

/// How many records were seen and how many needed a backfilled date.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct CollectionDateSummary {
  pub total: u64,
  pub blank: u64,
}

impl CollectionDateSummary {
  pub fn blank_percent(&self) -> f64 {
    if self.total == 0 {
      return 0.0;
    }
    self.blank as f64 * 100.0 / self.total as f64
  }
}

/// Backfill missing collection timestamps from the result date.
pub fn backfill_collection_dates(
  records: &mut [LabRecord],
) -> CollectionDateSummary {
  let mut summary = CollectionDateSummary::default();
  for record in records.iter_mut() {
    summary.total += 1;
    if record.collection_timestamp.is_some() {
      continue;
    }
    if let Some(result_date) = record.result_date {
      record.collection_timestamp =
        Some(result_date - Duration::days(RESULT_DATE_OFFSET_DAYS));
      summary.blank += 1;
    }
  }
  info!(
    total = summary.total,
    blank = summary.blank,
    "backfilled collection dates"
  );
  summary
}

/// Reject strftime strings chrono cannot render.
pub fn validate_date_format(format: &str) -> Result<()> {
  if format.is_empty()
    || StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
  {
    return Err(Error::InvalidDateFormat(format.to_owned()));
  }
  Ok(())
}

/// Render each collection timestamp into `record.timestamp`; absent
/// timestamps become the empty string.
pub fn format_timestamps(records: &mut [LabRecord], format: &str) -> Result<()> {
  validate_date_format(format)?;
  for record in records.iter_mut() {
    record.timestamp = record
      .collection_timestamp
      .map(|ts| ts.format(format).to_string())
      .unwrap_or_default();
  }
  Ok(())
}
