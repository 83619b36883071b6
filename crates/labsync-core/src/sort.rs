//! Ordering of records ahead of event sequencing.

use crate::record::LabRecord;

/// Stable sort by subject, then form, then collection timestamp (absent
/// first).
pub fn sort_records(records: &mut [LabRecord]) {
  records.sort_by(|a, b| {
    a.subject_id
      .cmp(&b.subject_id)
      .then_with(|| a.form_name.cmp(&b.form_name))
      .then_with(|| a.collection_timestamp.cmp(&b.collection_timestamp))
  });
}
