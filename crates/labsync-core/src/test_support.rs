//! Shared fixtures for unit tests.

use crate::{
  record::LabRecord,
  reference::{ComponentEntry, FormEntry, ReferenceIndex},
};

/// Two CBC components mapped to form `cbc` with events `1_arm_1` and
/// `2_arm_1`, plus an `inr` form without components.
pub fn cbc_index() -> ReferenceIndex {
  ReferenceIndex::new(
    vec![
      component("1534435", "hemo"),
      component("1009", "plat"),
    ],
    vec![
      FormEntry {
        name:             "cbc".into(),
        date_field:       Some("cbc_lbdtc".into()),
        completion_field: Some("cbc_complete".into()),
        completion_value: Some("2".into()),
        imported_field:   Some("cbc_nximport".into()),
        imported_value:   Some("Y".into()),
        events:           vec!["1_arm_1".into(), "2_arm_1".into()],
      },
      FormEntry {
        name:             "inr".into(),
        date_field:       Some("inr_lbdtc".into()),
        completion_field: Some("inr_complete".into()),
        completion_value: Some("2".into()),
        imported_field:   None,
        imported_value:   None,
        events:           vec!["1_arm_1".into()],
      },
    ],
  )
}

fn component(code: &str, prefix: &str) -> ComponentEntry {
  ComponentEntry {
    code:         code.into(),
    name:         Some(prefix.to_uppercase()),
    form_name:    Some("cbc".into()),
    value_field:  Some(format!("{prefix}_lborres")),
    units_field:  Some(format!("{prefix}_lborresu")),
    status_field: Some(format!("{prefix}_lbstat")),
    status_value: Some("NOT_DONE".into()),
  }
}

/// A record for `subject` and component `code`, collected at `timestamp`
/// (`%Y-%m-%d`), already formatted.
pub fn record(subject: &str, code: &str, timestamp: &str) -> LabRecord {
  let collection_timestamp = (!timestamp.is_empty()).then(|| {
    chrono::NaiveDate::parse_from_str(timestamp, "%Y-%m-%d")
      .unwrap()
      .and_time(chrono::NaiveTime::MIN)
  });
  LabRecord {
    subject_id: subject.into(),
    component_code: code.into(),
    result_value: "13.5".into(),
    result_unit: "g/dL".into(),
    collection_timestamp,
    timestamp: timestamp.into(),
    ..Default::default()
  }
}
