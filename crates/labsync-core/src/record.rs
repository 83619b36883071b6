//! Lab records: one clinical result per record, plus the untyped rows they
//! are built from.
//!
//! A [`RawRow`] is what the extract reader produces. Field renames and
//! component recodes operate on raw rows; [`LabRecord::from_row`] then types
//! the columns the pipeline cares about.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Sentinel written into enrichment slots when a lookup misses.
pub const UNDEFINED: &str = "undefined";

/// Column names of the raw extract.
pub mod columns {
  pub const SUBJECT_ID: &str = "STUDY_ID";
  pub const COMPONENT_CODE: &str = "loinc_code";
  pub const RESULT: &str = "RESULT";
  pub const UNIT: &str = "REFERENCE_UNIT";
  pub const COLLECTION_TIMESTAMP: &str = "DATE_TIME_STAMP";
  pub const RESULT_DATE: &str = "RESULT_DATE";
  pub const COLLECTION_TIME: &str = "Collection_Time";
}

/// Tag name to text content of a single `<subject>` element.
pub type RawRow = BTreeMap<String, String>;

/// Renames one raw column to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRename {
  pub source: String,
  pub target: String,
}

/// Replaces `source_name = source_value` with `target_name = target_value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRecode {
  pub source_name:  String,
  pub source_value: String,
  pub target_name:  String,
  pub target_value: String,
}

/// Apply every rename to every row. A row without the source column is left
/// alone.
pub fn apply_renames(rows: &mut [RawRow], renames: &[FieldRename]) {
  for rename in renames {
    let mut hits = 0usize;
    for row in rows.iter_mut() {
      if let Some(value) = row.remove(&rename.source) {
        row.insert(rename.target.clone(), value);
        hits += 1;
      }
    }
    debug!(source = %rename.source, target = %rename.target, hits, "renamed column");
  }
}

/// Apply every recode to every row whose source column holds the source
/// value. Returns the number of rows rewritten.
pub fn apply_recodes(rows: &mut [RawRow], recodes: &[ComponentRecode]) -> usize {
  let mut total = 0;
  for recode in recodes {
    for row in rows.iter_mut() {
      if row.get(&recode.source_name) != Some(&recode.source_value) {
        continue;
      }
      row.remove(&recode.source_name);
      row.insert(recode.target_name.clone(), recode.target_value.clone());
      total += 1;
    }
  }
  total
}

// ─── Typed record ────────────────────────────────────────────────────────────

/// One lab result, with the slots filled in by the later pipeline stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabRecord {
  pub subject_id:           String,
  pub component_code:       String,
  pub result_value:         String,
  pub result_unit:          String,
  pub collection_timestamp: Option<NaiveDateTime>,
  pub result_date:          Option<NaiveDateTime>,
  /// Free-text collection time, only used to tell duplicates apart.
  pub collection_time:      Option<String>,
  /// `collection_timestamp` rendered with the output date format, or empty.
  pub timestamp:            String,

  pub form_name:             String,
  /// `None` until the sequencer assigns a label; stays `None` for records
  /// without a timestamp.
  pub event_name:            Option<String>,
  pub date_field_name:       String,
  pub completion_field_name: String,
  pub imported_field_name:   String,
  pub value_field_name:      String,
  pub units_field_name:      String,
  pub status_field_name:     String,
}

impl LabRecord {
  /// Type a raw row. Dates are parsed with `date_format`; a date-only format
  /// yields midnight.
  pub fn from_row(row: &RawRow, date_format: &str) -> Result<Self> {
    let text = |column: &str| row.get(column).cloned().unwrap_or_default();
    Ok(Self {
      subject_id: text(columns::SUBJECT_ID).trim().to_owned(),
      component_code: text(columns::COMPONENT_CODE).trim().to_owned(),
      result_value: text(columns::RESULT),
      result_unit: text(columns::UNIT),
      collection_timestamp: parse_date(
        columns::COLLECTION_TIMESTAMP,
        row.get(columns::COLLECTION_TIMESTAMP),
        date_format,
      )?,
      result_date: parse_date(
        columns::RESULT_DATE,
        row.get(columns::RESULT_DATE),
        date_format,
      )?,
      collection_time: row
        .get(columns::COLLECTION_TIME)
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_owned),
      ..Default::default()
    })
  }

  /// `false` once enrichment failed to find a form for this record.
  pub fn has_form(&self) -> bool {
    !self.form_name.is_empty() && self.form_name != UNDEFINED
  }
}

/// `true` when an enrichment slot names a real field.
pub fn is_declared(slot: &str) -> bool { !slot.is_empty() && slot != UNDEFINED }

fn parse_date(
  column: &'static str,
  value: Option<&String>,
  format: &str,
) -> Result<Option<NaiveDateTime>> {
  let Some(value) = value.map(|v| v.trim()).filter(|v| !v.is_empty()) else {
    return Ok(None);
  };
  if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
    return Ok(Some(dt));
  }
  NaiveDate::parse_from_str(value, format)
    .map(|d| Some(d.and_time(NaiveTime::MIN)))
    .map_err(|_| Error::InvalidDate {
      column,
      value: value.to_owned(),
      format: format.to_owned(),
    })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn row(pairs: &[(&str, &str)]) -> RawRow {
    pairs
      .iter()
      .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
      .collect()
  }

  #[test]
  fn from_row_types_columns() {
    let r = row(&[
      ("STUDY_ID", " 999-0059 "),
      ("loinc_code", "1534435"),
      ("RESULT", "5.4"),
      ("REFERENCE_UNIT", "g/dL"),
      ("DATE_TIME_STAMP", "2013-07-01 08:30:00"),
      ("Collection_Time", "08:30"),
    ]);
    let rec = LabRecord::from_row(&r, "%Y-%m-%d %H:%M:%S").unwrap();
    assert_eq!(rec.subject_id, "999-0059");
    assert_eq!(rec.component_code, "1534435");
    assert_eq!(rec.result_value, "5.4");
    assert_eq!(rec.result_unit, "g/dL");
    assert_eq!(
      rec.collection_timestamp.unwrap().to_string(),
      "2013-07-01 08:30:00"
    );
    assert!(rec.result_date.is_none());
    assert_eq!(rec.collection_time.as_deref(), Some("08:30"));
    assert_eq!(rec.event_name, None);
  }

  #[test]
  fn date_only_format_yields_midnight() {
    let r = row(&[("DATE_TIME_STAMP", "2013-07-01")]);
    let rec = LabRecord::from_row(&r, "%Y-%m-%d").unwrap();
    assert_eq!(
      rec.collection_timestamp.unwrap().to_string(),
      "2013-07-01 00:00:00"
    );
  }

  #[test]
  fn unparseable_date_is_an_error() {
    let r = row(&[("RESULT_DATE", "July 1st")]);
    let err = LabRecord::from_row(&r, "%Y-%m-%d").unwrap_err();
    assert!(matches!(
      err,
      Error::InvalidDate { column: "RESULT_DATE", .. }
    ));
  }

  #[test]
  fn blank_date_is_absent() {
    let r = row(&[("DATE_TIME_STAMP", "  ")]);
    let rec = LabRecord::from_row(&r, "%Y-%m-%d").unwrap();
    assert!(rec.collection_timestamp.is_none());
  }

  #[test]
  fn renames_move_values() {
    let mut rows = vec![row(&[("COMPONENT_ID", "1")]), row(&[("x", "y")])];
    apply_renames(&mut rows, &[FieldRename {
      source: "COMPONENT_ID".into(),
      target: "loinc_code".into(),
    }]);
    assert_eq!(rows[0].get("loinc_code").map(String::as_str), Some("1"));
    assert!(!rows[0].contains_key("COMPONENT_ID"));
    assert_eq!(rows[1], row(&[("x", "y")]));
  }

  #[test]
  fn recodes_only_touch_matching_rows() {
    let mut rows = vec![
      row(&[("COMPONENT_ID", "1534435")]),
      row(&[("COMPONENT_ID", "42")]),
    ];
    let n = apply_recodes(&mut rows, &[ComponentRecode {
      source_name:  "COMPONENT_ID".into(),
      source_value: "1534435".into(),
      target_name:  "loinc_code".into(),
      target_value: "718-7".into(),
    }]);
    assert_eq!(n, 1);
    assert_eq!(rows[0], row(&[("loinc_code", "718-7")]));
    assert_eq!(rows[1], row(&[("COMPONENT_ID", "42")]));
  }

  #[test]
  fn has_form_rejects_sentinel() {
    let mut rec = LabRecord::default();
    assert!(!rec.has_form());
    rec.form_name = UNDEFINED.into();
    assert!(!rec.has_form());
    rec.form_name = "cbc".into();
    assert!(rec.has_form());
  }
}
