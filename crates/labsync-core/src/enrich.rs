//! Stamp records with the form and field names they map to.

use tracing::info;

use crate::{
  record::{LabRecord, UNDEFINED},
  reference::ReferenceIndex,
};

/// Fill the enrichment slots of `record` from `index`. Any miss writes
/// [`UNDEFINED`].
pub fn enrich(record: &mut LabRecord, index: &ReferenceIndex) {
  let component = index.component(&record.component_code);
  record.form_name = or_undefined(component.and_then(|c| c.form_name.as_deref()));
  record.value_field_name =
    or_undefined(component.and_then(|c| c.value_field.as_deref()));
  record.units_field_name =
    or_undefined(component.and_then(|c| c.units_field.as_deref()));
  record.status_field_name =
    or_undefined(component.and_then(|c| c.status_field.as_deref()));

  let form = record
    .has_form()
    .then(|| index.form(&record.form_name))
    .flatten();
  record.date_field_name =
    or_undefined(form.and_then(|f| f.date_field.as_deref()));
  record.completion_field_name =
    or_undefined(form.and_then(|f| f.completion_field.as_deref()));
  record.imported_field_name =
    or_undefined(form.and_then(|f| f.imported_field.as_deref()));
}

/// Enrich every record, returning how many ended up without a form.
pub fn enrich_all(records: &mut [LabRecord], index: &ReferenceIndex) -> usize {
  let mut unmapped = 0;
  for record in records.iter_mut() {
    enrich(record, index);
    if !record.has_form() {
      unmapped += 1;
    }
  }
  info!(records = records.len(), unmapped, "enriched records");
  unmapped
}

fn or_undefined(value: Option<&str>) -> String {
  value
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .unwrap_or(UNDEFINED)
    .to_owned()
}
