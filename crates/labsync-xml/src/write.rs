//! Writers for the tree export and the run report.

use std::io::Cursor;

use labsync_core::{report::RunReport, tree::PersonFormEventTree};
use quick_xml::{
  Writer,
  events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};

use crate::error::Result;

type XmlWriter = Writer<Cursor<Vec<u8>>>;

/// Serialise the submission tree, event status as an attribute.
pub fn write_tree(tree: &PersonFormEventTree) -> Result<Vec<u8>> {
  let mut w = new_writer()?;
  start(&mut w, "person_form_event")?;
  for person in &tree.persons {
    start(&mut w, "person")?;
    text_elem(&mut w, "study_id", &person.id)?;
    start(&mut w, "all_form_events")?;
    for form in &person.forms {
      start(&mut w, "form")?;
      text_elem(&mut w, "name", &form.name)?;
      for event in &form.events {
        let mut el = BytesStart::new("event");
        el.push_attribute(("status", event.status.as_str()));
        w.write_event(Event::Start(el))?;
        text_elem(&mut w, "name", &event.name)?;
        for field in &event.fields {
          start(&mut w, "field")?;
          text_elem(&mut w, "name", &field.name)?;
          text_elem(&mut w, "value", &field.value)?;
          end(&mut w, "field")?;
        }
        end(&mut w, "event")?;
      }
      end(&mut w, "form")?;
    }
    end(&mut w, "all_form_events")?;
    end(&mut w, "person")?;
  }
  end(&mut w, "person_form_event")?;
  Ok(w.into_inner().into_inner())
}

/// Serialise the end-of-run report.
pub fn write_report(report: &RunReport) -> Result<Vec<u8>> {
  let mut w = new_writer()?;
  start(&mut w, "report")?;

  start(&mut w, "header")?;
  text_elem(&mut w, "project", &report.project)?;
  text_elem(&mut w, "date", &report.date.format("%Y-%m-%d").to_string())?;
  text_elem(&mut w, "redcapServerAddress", &report.service_uri)?;
  end(&mut w, "header")?;

  start(&mut w, "summary")?;
  text_elem(&mut w, "subjectCount", &report.upload.total_subjects.to_string())?;
  text_elem(&mut w, "requestCount", &report.upload.requests_sent.to_string())?;
  text_elem(&mut w, "eventCount", &report.total_events().to_string())?;
  start(&mut w, "forms")?;
  for (form, count) in &report.upload.form_totals {
    form_count(&mut w, form, *count)?;
  }
  end(&mut w, "forms")?;
  end(&mut w, "summary")?;

  start(&mut w, "alerts")?;
  message_list(&mut w, "tooManyForms", "eventAlert", &report.alerts.overflow)?;
  message_list(&mut w, "tooManyValues", "valuesAlert", &report.alerts.duplicate)?;
  end(&mut w, "alerts")?;

  start(&mut w, "subjectsDetails")?;
  for (subject, forms) in &report.upload.subject_totals {
    start(&mut w, "Subject")?;
    text_elem(&mut w, "ID", subject)?;
    start(&mut w, "forms")?;
    for (form, count) in forms {
      form_count(&mut w, form, *count)?;
    }
    end(&mut w, "forms")?;
    end(&mut w, "Subject")?;
  }
  end(&mut w, "subjectsDetails")?;

  start(&mut w, "badIds")?;
  for (id, count) in &report.bad_ids {
    let mut el = BytesStart::new("badId");
    let count = count.to_string();
    el.push_attribute(("count", count.as_str()));
    w.write_event(Event::Start(el))?;
    w.write_event(Event::Text(BytesText::new(id)))?;
    end(&mut w, "badId")?;
  }
  end(&mut w, "badIds")?;

  start(&mut w, "errors")?;
  for error in report.all_errors() {
    text_elem(&mut w, "error", error)?;
  }
  end(&mut w, "errors")?;

  let dates = &report.collection_dates;
  start(&mut w, "summaryOfSpecimenTakenTimes")?;
  text_elem(&mut w, "total", &dates.total.to_string())?;
  text_elem(&mut w, "blank", &dates.blank.to_string())?;
  text_elem(&mut w, "percent", &format!("{:.2}", dates.blank_percent()))?;
  end(&mut w, "summaryOfSpecimenTakenTimes")?;

  end(&mut w, "report")?;
  Ok(w.into_inner().into_inner())
}

fn new_writer() -> Result<XmlWriter> {
  let mut w = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
  w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
  Ok(w)
}

fn start(w: &mut XmlWriter, tag: &str) -> Result<()> {
  w.write_event(Event::Start(BytesStart::new(tag)))?;
  Ok(())
}

fn end(w: &mut XmlWriter, tag: &str) -> Result<()> {
  w.write_event(Event::End(BytesEnd::new(tag)))?;
  Ok(())
}

fn text_elem(w: &mut XmlWriter, tag: &str, text: &str) -> Result<()> {
  if text.is_empty() {
    w.write_event(Event::Empty(BytesStart::new(tag)))?;
    return Ok(());
  }
  start(w, tag)?;
  w.write_event(Event::Text(BytesText::new(text)))?;
  end(w, tag)
}

fn form_count(w: &mut XmlWriter, form: &str, count: u64) -> Result<()> {
  start(w, "form")?;
  text_elem(w, "form_name", form)?;
  text_elem(w, "form_count", &count.to_string())?;
  end(w, "form")
}

fn message_list(
  w: &mut XmlWriter,
  wrapper: &str,
  item: &str,
  messages: &[String],
) -> Result<()> {
  start(w, wrapper)?;
  for message in messages {
    start(w, item)?;
    text_elem(w, "message", message)?;
    end(w, item)?;
  }
  end(w, wrapper)
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use chrono::NaiveDate;
  use labsync_core::{
    checkpoint::Checkpoint,
    tree::{Event as TreeEvent, EventStatus, Field, Form, Person},
    upload::UploadReport,
  };

  use super::*;
  use crate::element::parse_document;

  fn sample_tree() -> PersonFormEventTree {
    PersonFormEventTree {
      persons: vec![Person {
        id:    "1".into(),
        forms: vec![Form {
          name:   "cbc".into(),
          events: vec![TreeEvent {
            name:   "1_arm_1".into(),
            status: EventStatus::Sent,
            fields: vec![
              Field {
                name:  "hemo_lborres".into(),
                value: "<5 & rising".into(),
              },
              Field {
                name:  "hemo_lborresu".into(),
                value: String::new(),
              },
            ],
          }],
        }],
      }],
    }
  }

  #[test]
  fn tree_export_structure() {
    let bytes = write_tree(&sample_tree()).unwrap();
    let root = parse_document(&bytes).unwrap();
    assert_eq!(root.name, "person_form_event");
    let person = root.child("person").unwrap();
    assert_eq!(person.child_text("study_id"), Some("1"));
    let events = person.descendants_named("event");
    let event = events[0];
    assert_eq!(event.attribute("status"), Some("sent"));
    let fields: Vec<_> = event
      .children_named("field")
      .map(|f| (f.child_text("name"), f.child_text("value")))
      .collect();
    assert_eq!(fields, [
      (Some("hemo_lborres"), Some("<5 & rising")),
      (Some("hemo_lborresu"), None),
    ]);
  }

  #[test]
  fn report_sections() {
    let mut checkpoint = Checkpoint::new(sample_tree());
    checkpoint.alerts.overflow.push("too many".into());
    checkpoint.collection_dates.total = 4;
    checkpoint.collection_dates.blank = 1;
    checkpoint.bad_ids.insert("999-0060".into(), 3);
    let upload = UploadReport {
      total_subjects: 1,
      requests_sent:  2,
      form_totals:    BTreeMap::from([("cbc".to_owned(), 2)]),
      subject_totals: BTreeMap::from([(
        "1".to_owned(),
        BTreeMap::from([("cbc".to_owned(), 2)]),
      )]),
      errors:         vec!["Error writing to record 1".into()],
    };
    let report = RunReport::new(
      "Lab import",
      "https://redcap.example/api/",
      NaiveDate::from_ymd_opt(2013, 7, 1).unwrap(),
      upload,
      &checkpoint,
      false,
    );

    let root = parse_document(&write_report(&report).unwrap()).unwrap();
    let header = root.child("header").unwrap();
    assert_eq!(header.child_text("project"), Some("Lab import"));
    assert_eq!(header.child_text("date"), Some("2013-07-01"));
    let summary = root.child("summary").unwrap();
    assert_eq!(summary.child_text("subjectCount"), Some("1"));
    assert_eq!(summary.child_text("eventCount"), Some("2"));
    let overflow = root.descendants_named("eventAlert");
    assert_eq!(overflow[0].child_text("message"), Some("too many"));
    let subjects = root.descendants_named("Subject");
    assert_eq!(subjects[0].child_text("ID"), Some("1"));
    let bad_ids = root.descendants_named("badId");
    let bad = bad_ids[0];
    assert_eq!(bad.attribute("count"), Some("3"));
    assert_eq!(bad.text, "999-0060");
    assert_eq!(root.descendants_named("error").len(), 1);
    let times = root.child("summaryOfSpecimenTakenTimes").unwrap();
    assert_eq!(times.child_text("percent"), Some("25.00"));
  }
}
