//! Tree assembly: build the skeleton, merge record values into it, then set
//! not-done status markers.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::{
  Error, Result,
  record::{LabRecord, UNDEFINED, is_declared},
  reference::ReferenceIndex,
  tree::{Event, EventStatus, Field, Form, Person, PersonFormEventTree, TreeIndex},
};

/// Counts from [`merge_records`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
  pub merged:  usize,
  pub skipped: usize,
}

/// Every subject gets every form, every form its events, every event the
/// form's fields with empty values.
pub fn build_skeleton(
  records: &[LabRecord],
  index: &ReferenceIndex,
) -> Result<PersonFormEventTree> {
  let subjects: BTreeSet<&str> =
    records.iter().map(|r| r.subject_id.as_str()).collect();
  if subjects.is_empty() {
    return Err(Error::NoSubjects);
  }

  let forms: Vec<Form> = index
    .forms()
    .iter()
    .map(|form| {
      let fields: Vec<Field> = index
        .form_fields(&form.name)
        .iter()
        .map(|name| Field {
          name:  name.clone(),
          value: String::new(),
        })
        .collect();
      Form {
        name:   form.name.clone(),
        events: form
          .events
          .iter()
          .map(|event| Event {
            name:   event.clone(),
            status: EventStatus::Unsent,
            fields: fields.clone(),
          })
          .collect(),
      }
    })
    .collect();

  let persons = subjects
    .into_iter()
    .map(|id| Person {
      id:    id.to_owned(),
      forms: forms.clone(),
    })
    .collect::<Vec<_>>();
  info!(persons = persons.len(), forms = forms.len(), "built tree skeleton");
  Ok(PersonFormEventTree { persons })
}

/// Copy record values into the matching events. Fails when a record points
/// at an event or marker field the skeleton does not have.
pub fn merge_records(
  tree: &mut PersonFormEventTree,
  records: &[LabRecord],
  index: &ReferenceIndex,
) -> Result<MergeStats> {
  let tree_index = TreeIndex::build(tree);
  let mut stats = MergeStats::default();

  for record in records {
    let Some(event_name) = record
      .event_name
      .as_deref()
      .filter(|e| record.has_form() && *e != UNDEFINED)
    else {
      stats.skipped += 1;
      continue;
    };
    let slot = tree_index
      .slot(&record.subject_id, &record.form_name, event_name)
      .ok_or_else(|| Error::EventNotFound {
        subject: record.subject_id.clone(),
        form:    record.form_name.clone(),
        event:   event_name.to_owned(),
      })?;
    let event = slot.event_mut(tree);

    let mut wrote_data = false;
    for (field, value) in [
      (&record.value_field_name, &record.result_value),
      (&record.date_field_name, &record.timestamp),
      (&record.units_field_name, &record.result_unit),
    ] {
      if let Some(pos) = slot.field_position(field) {
        event.fields[pos].value.clone_from(value);
        wrote_data |= !value.is_empty();
      }
    }
    stats.merged += 1;
    if !wrote_data {
      debug!(subject = %record.subject_id, form = %record.form_name, "no values written, skipping markers");
      continue;
    }

    let form = index
      .form(&record.form_name)
      .ok_or_else(|| Error::EventNotFound {
        subject: record.subject_id.clone(),
        form:    record.form_name.clone(),
        event:   event_name.to_owned(),
      })?;
    let missing_field = |field: &str| Error::FieldNotFound {
      subject: record.subject_id.clone(),
      form:    record.form_name.clone(),
      event:   event_name.to_owned(),
      field:   field.to_owned(),
    };

    let pos = slot
      .field_position(&record.completion_field_name)
      .ok_or_else(|| missing_field(&record.completion_field_name))?;
    let completion = form
      .completion_value
      .as_deref()
      .filter(|v| !v.is_empty())
      .ok_or_else(|| Error::EmptyCompletionValue(form.name.clone()))?;
    event.fields[pos].value = completion.to_owned();

    if is_declared(&record.imported_field_name) {
      let pos = slot
        .field_position(&record.imported_field_name)
        .ok_or_else(|| missing_field(&record.imported_field_name))?;
      let imported = form
        .imported_value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::EmptyImportedValue(form.name.clone()))?;
      event.fields[pos].value = imported.to_owned();
    }
  }

  info!(merged = stats.merged, skipped = stats.skipped, "merged records into tree");
  Ok(stats)
}

/// In every event with data, mark components whose value or units field was
/// left empty with their status value. Returns the number of markers set.
pub fn mark_not_done(tree: &mut PersonFormEventTree, index: &ReferenceIndex) -> usize {
  let mut marked = 0;
  for event in tree
    .persons
    .iter_mut()
    .flat_map(|p| p.forms.iter_mut())
    .flat_map(|f| f.events.iter_mut())
  {
    if !event.has_data() {
      continue;
    }
    let updates: Vec<(String, String)> = event
      .fields
      .iter()
      .filter(|f| f.value.is_empty())
      .filter_map(|f| index.status_link(&f.name))
      .map(|(field, value)| (field.to_owned(), value.to_owned()))
      .collect();
    for (status_field, status_value) in updates {
      if let Some(field) = event.fields.iter_mut().find(|f| f.name == status_field)
        && field.value != status_value
      {
        field.value = status_value;
        marked += 1;
      }
    }
  }
  debug!(marked, "set not-done markers");
  marked
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    enrich::enrich_all,
    reference::{ComponentEntry, FormEntry},
    sequence::assign_events,
    sort::sort_records,
    test_support::{cbc_index, record},
  };

  fn prepared(mut records: Vec<LabRecord>, index: &ReferenceIndex) -> Vec<LabRecord> {
    enrich_all(&mut records, index);
    sort_records(&mut records);
    assign_events(&mut records, index);
    records
  }

  fn value<'t>(
    tree: &'t PersonFormEventTree,
    person: &str,
    form: usize,
    event: usize,
    field: &str,
  ) -> &'t str {
    tree.person(person).unwrap().forms[form].events[event]
      .field(field)
      .unwrap()
      .value
      .as_str()
  }

  #[test]
  fn skeleton_is_the_full_closure() {
    let index = cbc_index();
    let recs = vec![record("b", "1", ""), record("a", "1", ""), record("a", "2", "")];
    let tree = build_skeleton(&recs, &index).unwrap();
    let ids: Vec<_> = tree.persons.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, ["a", "b"]);
    for person in &tree.persons {
      let forms: Vec<_> = person.forms.iter().map(|f| f.name.as_str()).collect();
      assert_eq!(forms, ["cbc", "inr"]);
      assert_eq!(person.forms[0].events.len(), 2);
      assert_eq!(person.forms[1].events.len(), 1);
      for event in &person.forms[0].events {
        assert_eq!(event.status, EventStatus::Unsent);
        assert_eq!(event.fields.len(), 9);
        assert!(!event.has_data());
      }
    }
  }

  #[test]
  fn skeleton_without_subjects_fails() {
    assert!(matches!(
      build_skeleton(&[], &cbc_index()),
      Err(Error::NoSubjects)
    ));
  }

  #[test]
  fn merge_writes_anchors_and_markers() {
    let index = cbc_index();
    let recs = prepared(
      vec![
        record("999-0059", "1534435", "2013-07-01"),
        record("999-0059", "1534435", "2013-07-02"),
      ],
      &index,
    );
    let mut tree = build_skeleton(&recs, &index).unwrap();
    let stats = merge_records(&mut tree, &recs, &index).unwrap();
    assert_eq!(stats.merged, 2);

    assert_eq!(value(&tree, "999-0059", 0, 0, "hemo_lborres"), "13.5");
    assert_eq!(value(&tree, "999-0059", 0, 0, "hemo_lborresu"), "g/dL");
    assert_eq!(value(&tree, "999-0059", 0, 0, "cbc_lbdtc"), "2013-07-01");
    assert_eq!(value(&tree, "999-0059", 0, 0, "cbc_complete"), "2");
    assert_eq!(value(&tree, "999-0059", 0, 0, "cbc_nximport"), "Y");
    assert_eq!(value(&tree, "999-0059", 0, 1, "cbc_lbdtc"), "2013-07-02");
    assert_eq!(value(&tree, "999-0059", 0, 0, "plat_lborres"), "");
  }

  #[test]
  fn overflow_and_untimed_records_are_skipped() {
    let index = cbc_index();
    let recs = prepared(
      vec![
        record("a", "1534435", "2013-07-01"),
        record("a", "1534435", "2013-07-02"),
        record("a", "1534435", "2013-07-03"),
        record("a", "1009", ""),
        record("a", "nope", "2013-07-01"),
      ],
      &index,
    );
    let mut tree = build_skeleton(&recs, &index).unwrap();
    let stats = merge_records(&mut tree, &recs, &index).unwrap();
    assert_eq!(stats, MergeStats { merged: 2, skipped: 3 });
  }

  #[test]
  fn blank_values_do_not_set_markers() {
    let index = cbc_index();
    let mut rec = record("a", "1534435", "");
    rec.result_unit.clear();
    rec.result_value.clear();
    rec.form_name = "cbc".into();
    let mut recs = vec![rec];
    enrich_all(&mut recs, &index);
    recs[0].event_name = Some("1_arm_1".into());
    let mut tree = build_skeleton(&recs, &index).unwrap();
    merge_records(&mut tree, &recs, &index).unwrap();
    assert_eq!(value(&tree, "a", 0, 0, "cbc_complete"), "");
  }

  #[test]
  fn missing_event_is_fatal() {
    let index = cbc_index();
    let mut recs = prepared(vec![record("a", "1534435", "2013-07-01")], &index);
    let mut tree = build_skeleton(&recs, &index).unwrap();
    recs[0].event_name = Some("9_arm_1".into());
    assert!(matches!(
      merge_records(&mut tree, &recs, &index),
      Err(Error::EventNotFound { .. })
    ));
  }

  fn single_form_index(form: FormEntry) -> ReferenceIndex {
    ReferenceIndex::new(
      vec![ComponentEntry {
        code: "1".into(),
        form_name: Some("f".into()),
        value_field: Some("v".into()),
        ..Default::default()
      }],
      vec![form],
    )
  }

  #[test]
  fn missing_completion_field_is_fatal() {
    let index = single_form_index(FormEntry {
      name: "f".into(),
      events: vec!["e".into()],
      ..Default::default()
    });
    let recs = prepared(vec![record("a", "1", "2013-07-01")], &index);
    let mut tree = build_skeleton(&recs, &index).unwrap();
    assert!(matches!(
      merge_records(&mut tree, &recs, &index),
      Err(Error::FieldNotFound { field, .. }) if field == UNDEFINED
    ));
  }

  #[test]
  fn empty_completion_value_is_fatal() {
    let index = single_form_index(FormEntry {
      name: "f".into(),
      completion_field: Some("f_complete".into()),
      events: vec!["e".into()],
      ..Default::default()
    });
    let recs = prepared(vec![record("a", "1", "2013-07-01")], &index);
    let mut tree = build_skeleton(&recs, &index).unwrap();
    assert!(matches!(
      merge_records(&mut tree, &recs, &index),
      Err(Error::EmptyCompletionValue(form)) if form == "f"
    ));
  }

  #[test]
  fn empty_imported_value_is_fatal() {
    let index = single_form_index(FormEntry {
      name: "f".into(),
      completion_field: Some("f_complete".into()),
      completion_value: Some("2".into()),
      imported_field: Some("f_import".into()),
      events: vec!["e".into()],
      ..Default::default()
    });
    let recs = prepared(vec![record("a", "1", "2013-07-01")], &index);
    let mut tree = build_skeleton(&recs, &index).unwrap();
    assert!(matches!(
      merge_records(&mut tree, &recs, &index),
      Err(Error::EmptyImportedValue(_))
    ));
  }

  #[test]
  fn missing_imported_field_is_fatal() {
    let form = FormEntry {
      name: "f".into(),
      completion_field: Some("f_complete".into()),
      completion_value: Some("2".into()),
      events: vec!["e".into()],
      ..Default::default()
    };
    let layout = single_form_index(form.clone());
    let index = single_form_index(FormEntry {
      imported_field: Some("f_import".into()),
      imported_value: Some("1".into()),
      ..form
    });
    // The tree comes from a layout that never declared the imported marker.
    let recs = prepared(vec![record("a", "1", "2013-07-01")], &index);
    let mut tree = build_skeleton(&recs, &layout).unwrap();
    assert!(matches!(
      merge_records(&mut tree, &recs, &index),
      Err(Error::FieldNotFound { field, .. }) if field == "f_import"
    ));
  }

  #[test]
  fn not_done_markers_fill_empty_components() {
    let index = cbc_index();
    let recs = prepared(vec![record("a", "1534435", "2013-07-01")], &index);
    let mut tree = build_skeleton(&recs, &index).unwrap();
    merge_records(&mut tree, &recs, &index).unwrap();
    let marked = mark_not_done(&mut tree, &index);
    assert_eq!(marked, 1);
    assert_eq!(value(&tree, "a", 0, 0, "plat_lbstat"), "NOT_DONE");
    assert_eq!(value(&tree, "a", 0, 0, "hemo_lbstat"), "");
    // Events without data stay untouched.
    assert_eq!(value(&tree, "a", 0, 1, "plat_lbstat"), "");
  }
}
