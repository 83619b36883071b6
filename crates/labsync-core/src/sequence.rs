//! Event sequencing: label each (subject, form) group's distinct collection
//! timestamps with the form's events, in order.
//!
//! Records must already be sorted with [`crate::sort::sort_records`]. A
//! group that has more distinct timestamps than its form has events gets one
//! overflow alert, and the excess records are labelled
//! [`UNDEFINED`](crate::record::UNDEFINED). Two records landing on the same
//! field of the same event raise a duplicate-value alert.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
  record::{LabRecord, UNDEFINED},
  reference::ReferenceIndex,
};

/// Alerts raised while sequencing, in the order they were found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSummary {
  /// A group had more distinct timestamps than its form has events.
  pub overflow:  Vec<String>,
  /// More than one value targeted the same field of the same event.
  pub duplicate: Vec<String>,
}

impl AlertSummary {
  pub fn is_empty(&self) -> bool {
    self.overflow.is_empty() && self.duplicate.is_empty()
  }
}

/// Assign `event_name` to every record and collect alerts.
pub fn assign_events(
  records: &mut [LabRecord],
  index: &ReferenceIndex,
) -> AlertSummary {
  let mut sequencer = Sequencer::default();
  for record in records.iter_mut() {
    sequencer.step(record, index);
  }
  let alerts = sequencer.finish(index);
  info!(
    overflow = alerts.overflow.len(),
    duplicate = alerts.duplicate.len(),
    "assigned event names"
  );
  alerts
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DuplicateKey {
  subject:         String,
  form:            String,
  value_field:     String,
  timestamp:       String,
  collection_time: String,
}

#[derive(Debug)]
struct Group {
  subject:     String,
  form:        String,
  /// Timestamp of the current event within the group.
  timestamp:   String,
  event_index: usize,
}

#[derive(Debug, Default)]
struct Sequencer {
  group:  Option<Group>,
  seen:   HashMap<DuplicateKey, usize>,
  alerts: AlertSummary,
}

impl Sequencer {
  fn step(&mut self, record: &mut LabRecord, index: &ReferenceIndex) {
    if !record.has_form() {
      record.event_name = Some(UNDEFINED.to_owned());
      return;
    }
    if record.timestamp.is_empty() {
      debug!(
        subject = %record.subject_id,
        form = %record.form_name,
        component = %record.component_code,
        "record has no collection timestamp, leaving it without an event"
      );
      return;
    }

    let event_index = match self.group.as_mut() {
      Some(group)
        if group.subject == record.subject_id
          && group.form == record.form_name =>
      {
        if group.timestamp != record.timestamp {
          group.event_index += 1;
          group.timestamp.clone_from(&record.timestamp);
        }
        group.event_index
      }
      _ => {
        self.close_group(index);
        self.group = Some(Group {
          subject:     record.subject_id.clone(),
          form:        record.form_name.clone(),
          timestamp:   record.timestamp.clone(),
          event_index: 0,
        });
        0
      }
    };

    match index.events(&record.form_name).get(event_index) {
      Some(event) => {
        record.event_name = Some(event.clone());
        self.count_value(record);
      }
      None => {
        debug!(
          subject = %record.subject_id,
          form = %record.form_name,
          event_index,
          "no event left for record"
        );
        record.event_name = Some(UNDEFINED.to_owned());
      }
    }
  }

  fn count_value(&mut self, record: &LabRecord) {
    let key = DuplicateKey {
      subject:         record.subject_id.clone(),
      form:            record.form_name.clone(),
      value_field:     record.value_field_name.clone(),
      timestamp:       record.timestamp.clone(),
      collection_time: record
        .collection_time
        .clone()
        .unwrap_or_else(|| "none".to_owned()),
    };
    let count = self.seen.entry(key).or_default();
    *count += 1;
    if *count > 1 {
      let message = format!(
        "Multiple values found for Subject ID: {} Form Name: {} Field: {} at \
         {} (collection time {})",
        record.subject_id,
        record.form_name,
        record.value_field_name,
        record.timestamp,
        record.collection_time.as_deref().unwrap_or("none"),
      );
      warn!("{message}");
      self.alerts.duplicate.push(message);
    }
  }

  fn close_group(&mut self, index: &ReferenceIndex) {
    let Some(group) = self.group.take() else {
      return;
    };
    let maximum = index.events(&group.form).len();
    let count = group.event_index + 1;
    if count > maximum {
      let message = format!(
        "Exceeded event list for record group with Subject ID: {} and Form \
         Name: {}. Event count of {count} exceeds maximum of {maximum}",
        group.subject, group.form,
      );
      warn!("{message}");
      self.alerts.overflow.push(message);
    }
  }

  fn finish(mut self, index: &ReferenceIndex) -> AlertSummary {
    self.close_group(index);
    self.alerts
  }
}
