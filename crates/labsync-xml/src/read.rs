//! Readers for the raw extract and the reference documents.

use labsync_core::{
  record::{ComponentRecode, FieldRename, RawRow},
  reference::{ComponentEntry, FormEntry},
  remap::IdFieldNames,
};
use tracing::debug;

use crate::{
  element::{Element, parse_document},
  error::{Error, Result},
};

/// Rows of the raw extract: one per `<subject>` element, mapping each child
/// tag to its text.
pub fn read_raw_rows(xml: &[u8]) -> Result<Vec<RawRow>> {
  let root = parse_document(xml)?;
  let rows: Vec<RawRow> = root
    .descendants_named("subject")
    .into_iter()
    .map(|subject| {
      subject
        .children
        .iter()
        .map(|c| (c.name.clone(), c.text.trim().to_owned()))
        .collect()
    })
    .collect();
  debug!(rows = rows.len(), "read raw extract");
  Ok(rows)
}

/// The component translation table.
pub fn read_translation_table(xml: &[u8]) -> Result<Vec<ComponentEntry>> {
  const DOC: &str = "translation table";
  let root = parse_document(xml)?;
  root
    .descendants_named("clinicalComponent")
    .into_iter()
    .map(|c| {
      Ok(ComponentEntry {
        code:         required(DOC, c, "loinc_code")?,
        name:         optional(c, "clinicalComponentName"),
        form_name:    optional(c, "redcapFormName"),
        value_field:  optional(c, "redcapFieldNameValue"),
        units_field:  optional(c, "redcapFieldNameUnits"),
        status_field: optional(c, "redcapStatusFieldName"),
        status_value: optional(c, "redcapStatusFieldValue"),
      })
    })
    .collect()
}

/// The form events table, forms in document order.
pub fn read_form_events(xml: &[u8]) -> Result<Vec<FormEntry>> {
  const DOC: &str = "form events";
  let root = parse_document(xml)?;
  root
    .descendants_named("form")
    .into_iter()
    .map(|form| {
      Ok(FormEntry {
        name:             required(DOC, form, "name")?,
        date_field:       optional(form, "formDateField"),
        completion_field: optional(form, "formCompletedFieldName"),
        completion_value: optional(form, "formCompletedFieldValue"),
        imported_field:   optional(form, "formImportedFieldName"),
        imported_value:   optional(form, "formImportedFieldValue"),
        events:           form
          .children_named("event")
          .map(|event| required(DOC, event, "name"))
          .collect::<Result<_>>()?,
      })
    })
    .collect()
}

/// Names of the registry fields holding local and canonical subject ids.
pub fn read_id_fields(xml: &[u8]) -> Result<IdFieldNames> {
  const DOC: &str = "id mapping";
  let root = parse_document(xml)?;
  let find = |element: &'static str| {
    root
      .descendants_named(element)
      .first()
      .map(|e| e.text.trim().to_owned())
      .filter(|t| !t.is_empty())
      .ok_or_else(|| Error::MissingElement {
        document: DOC,
        parent: root.name.clone(),
        element,
      })
  };
  Ok(IdFieldNames {
    local:     find("research_id_field_name")?,
    canonical: find("redcap_id_field_name")?,
  })
}

/// Column renames applied to raw rows.
pub fn read_field_renames(xml: &[u8]) -> Result<Vec<FieldRename>> {
  const DOC: &str = "field renames";
  let root = parse_document(xml)?;
  root
    .descendants_named("field")
    .into_iter()
    .map(|f| {
      Ok(FieldRename {
        source: required(DOC, f, "source")?,
        target: required(DOC, f, "target")?,
      })
    })
    .collect()
}

/// Component recodes applied to raw rows.
pub fn read_component_recodes(xml: &[u8]) -> Result<Vec<ComponentRecode>> {
  const DOC: &str = "component recodes";
  let root = parse_document(xml)?;
  root
    .descendants_named("component")
    .into_iter()
    .map(|c| {
      let source = c.child("source").ok_or_else(|| missing(DOC, c, "source"))?;
      let target = c.child("target").ok_or_else(|| missing(DOC, c, "target"))?;
      Ok(ComponentRecode {
        source_name:  required(DOC, source, "name")?,
        source_value: required(DOC, source, "value")?,
        target_name:  required(DOC, target, "name")?,
        target_value: optional(target, "value").unwrap_or_default(),
      })
    })
    .collect()
}

fn optional(parent: &Element, name: &str) -> Option<String> {
  parent.child_text(name).map(str::to_owned)
}

fn required(
  document: &'static str,
  parent: &Element,
  name: &'static str,
) -> Result<String> {
  optional(parent, name).ok_or_else(|| missing(document, parent, name))
}

fn missing(document: &'static str, parent: &Element, element: &'static str) -> Error {
  Error::MissingElement {
    document,
    parent: parent.name.clone(),
    element,
  }
}
