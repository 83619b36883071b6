//! Rate-limited submission of unsent events.
//!
//! Each event is sent as one flat payload. Accepted events are marked sent
//! and the tree is persisted before the next request, so an interrupted run
//! resumes without resending them. Rejections are collected; a transport
//! failure ends the run.

use std::{collections::BTreeMap, fmt, future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::{
  checkpoint::CheckpointStore,
  error::BoxError,
  tree::{Event, EventStatus, PersonFormEventTree},
};

/// Field name → value, sent as one record.
pub type Payload = BTreeMap<String, String>;

/// Log a progress line every this many requests.
const PROGRESS_EVERY: usize = 50;

/// One field-level rejection reported by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
  pub record:     String,
  pub field_name: String,
  pub value:      String,
  pub message:    String,
}

impl fmt::Display for FieldError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // Rejections that name no field carry only the service's message.
    if self.field_name.is_empty() {
      return write!(
        f,
        "Error writing to record {}. Error Message: {}",
        self.record, self.message
      );
    }
    write!(
      f,
      "Error writing to record {} field {} Value {}. Error Message: {}",
      self.record, self.field_name, self.value, self.message
    )
  }
}

/// Result of a submission that reached the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
  Accepted,
  Rejected(Vec<FieldError>),
}

/// The remote service records are submitted to.
pub trait SubmissionService: Send + Sync {
  /// A failure to reach the service at all.
  type Error: std::error::Error + Send + Sync + 'static;

  fn submit<'a>(
    &'a self,
    payload: &'a Payload,
  ) -> impl Future<Output = Result<SubmitOutcome, Self::Error>> + Send + 'a;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadOptions {
  /// Maximum requests per minute.
  pub rate_per_minute: f64,
  /// Stop a form at its first event without data.
  pub skip_blanks:     bool,
  /// Payload key carrying the subject id.
  pub record_id_field: String,
  /// Payload key carrying the event name.
  pub event_field:     String,
}

impl Default for UploadOptions {
  fn default() -> Self {
    Self {
      rate_per_minute: 600.0,
      skip_blanks:     false,
      record_id_field: "record_id".to_owned(),
      event_field:     "redcap_event_name".to_owned(),
    }
  }
}

impl UploadOptions {
  /// Minimum spacing between the end of one request and the start of the
  /// next.
  pub fn min_interval(&self) -> Duration {
    if self.rate_per_minute.is_finite() && self.rate_per_minute > 0.0 {
      Duration::from_secs_f64(60.0 / self.rate_per_minute)
    } else {
      Duration::ZERO
    }
  }
}

/// Totals for one upload run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
  pub total_subjects: usize,
  pub requests_sent:  usize,
  /// Form name → events with data accepted.
  pub form_totals:    BTreeMap<String, u64>,
  /// Subject id → form name → events with data accepted.
  pub subject_totals: BTreeMap<String, BTreeMap<String, u64>>,
  pub errors:         Vec<String>,
}

#[derive(Debug, Error)]
pub enum UploadError {
  #[error(
    "submission failed for subject {subject:?} form {form:?} event \
     {event:?}: {source}"
  )]
  Transport {
    subject: String,
    form:    String,
    event:   String,
    #[source]
    source:  BoxError,
  },

  #[error("failed to persist tree: {0}")]
  Persist(#[source] BoxError),
}

/// Drives one upload pass over a tree.
pub struct UploadEngine<'a, S, C> {
  service:      &'a S,
  store:        &'a C,
  options:      UploadOptions,
  last_request: Option<Instant>,
}

impl<'a, S, C> UploadEngine<'a, S, C>
where
  S: SubmissionService,
  C: CheckpointStore,
{
  pub fn new(service: &'a S, store: &'a C, options: UploadOptions) -> Self {
    Self {
      service,
      store,
      options,
      last_request: None,
    }
  }

  /// Submit every unsent event of `tree` in tree order.
  pub async fn run(
    &mut self,
    tree: &mut PersonFormEventTree,
  ) -> Result<UploadReport, UploadError> {
    let mut report = UploadReport::default();

    for p in 0..tree.persons.len() {
      let started = Instant::now();
      let person_id = tree.persons[p].id.clone();
      report.total_subjects += 1;
      let totals = report.subject_totals.entry(person_id.clone()).or_default();
      for form in &tree.persons[p].forms {
        totals.entry(form.name.clone()).or_insert(0);
        report.form_totals.entry(form.name.clone()).or_insert(0);
      }

      for f in 0..tree.persons[p].forms.len() {
        let form_name = tree.persons[p].forms[f].name.clone();
        for e in 0..tree.persons[p].forms[f].events.len() {
          let event = &tree.persons[p].forms[f].events[e];
          if event.status == EventStatus::Sent {
            continue;
          }
          let (payload, has_data) = self.payload(&person_id, event);
          if self.options.skip_blanks && !has_data {
            debug!(
              subject = %person_id,
              form = %form_name,
              event = %event.name,
              "blank event, skipping the rest of the form"
            );
            break;
          }
          let event_name = event.name.clone();

          self.pace().await;
          let outcome = self.service.submit(&payload).await;
          self.last_request = Some(Instant::now());
          report.requests_sent += 1;
          if report.requests_sent % PROGRESS_EVERY == 0 {
            info!(requests = report.requests_sent, "upload progress");
          }

          match outcome {
            Ok(SubmitOutcome::Accepted) => {
              tree.persons[p].forms[f].events[e].status = EventStatus::Sent;
              self
                .store
                .save_tree(tree)
                .await
                .map_err(|err| UploadError::Persist(Box::new(err)))?;
              if has_data {
                *report
                  .subject_totals
                  .entry(person_id.clone())
                  .or_default()
                  .entry(form_name.clone())
                  .or_default() += 1;
                *report.form_totals.entry(form_name.clone()).or_default() += 1;
              }
            }
            Ok(SubmitOutcome::Rejected(errors)) => {
              warn!(
                subject = %person_id,
                form = %form_name,
                event = %event_name,
                count = errors.len(),
                "submission rejected"
              );
              report.errors.extend(errors.into_iter().map(|mut err| {
                if err.record.is_empty() {
                  err.record = person_id.clone();
                }
                err.to_string()
              }));
            }
            Err(source) => {
              return Err(UploadError::Transport {
                subject: person_id,
                form: form_name,
                event: event_name,
                source: Box::new(source),
              });
            }
          }
        }
      }
      info!(
        subject = %person_id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "uploaded subject"
      );
    }

    info!(
      subjects = report.total_subjects,
      requests = report.requests_sent,
      errors = report.errors.len(),
      "upload finished"
    );
    Ok(report)
  }

  fn payload(&self, person_id: &str, event: &Event) -> (Payload, bool) {
    let mut payload = Payload::new();
    payload.insert(self.options.record_id_field.clone(), person_id.to_owned());
    payload.insert(self.options.event_field.clone(), event.name.clone());
    for field in &event.fields {
      payload.insert(field.name.clone(), field.value.clone());
    }
    (payload, event.has_data())
  }

  async fn pace(&self) {
    if let Some(last) = self.last_request {
      sleep_until(last + self.options.min_interval()).await;
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use std::sync::Mutex;

  use super::*;
  use crate::{
    checkpoint::tests::MemoryStore,
    tree::{Field, Form, Person},
  };

  /// Records each payload with the (paused) clock time it arrived.
  #[derive(Default)]
  pub struct RecordingService {
    pub calls:        Mutex<Vec<(Instant, Payload)>>,
    pub reject:       Option<String>,
    /// Reject this event with a message naming no field.
    pub refuse_event: Option<String>,
    pub fail:         bool,
  }

  #[derive(Debug, thiserror::Error)]
  #[error("connection refused")]
  pub struct Refused;

  impl SubmissionService for RecordingService {
    type Error = Refused;

    async fn submit<'a>(
      &'a self,
      payload: &'a Payload,
    ) -> Result<SubmitOutcome, Refused> {
      if self.fail {
        return Err(Refused);
      }
      self
        .calls
        .lock()
        .unwrap()
        .push((Instant::now(), payload.clone()));
      if let Some(event) = &self.refuse_event
        && payload.get("redcap_event_name") == Some(event)
      {
        return Ok(SubmitOutcome::Rejected(vec![FieldError {
          record:     String::new(),
          field_name: String::new(),
          value:      String::new(),
          message:    "The following fields were not found in the project".into(),
        }]));
      }
      match &self.reject {
        Some(field) if payload.contains_key(field) => {
          Ok(SubmitOutcome::Rejected(vec![FieldError {
            record:     payload["record_id"].clone(),
            field_name: field.clone(),
            value:      payload[field].clone(),
            message:    "bad value".into(),
          }]))
        }
        _ => Ok(SubmitOutcome::Accepted),
      }
    }
  }

  fn event(name: &str, value: &str) -> Event {
    Event {
      name:   name.into(),
      status: EventStatus::Unsent,
      fields: vec![Field {
        name:  "hemo_lborres".into(),
        value: value.into(),
      }],
    }
  }

  fn tree(events: Vec<Event>) -> PersonFormEventTree {
    PersonFormEventTree {
      persons: vec![Person {
        id:    "1".into(),
        forms: vec![Form {
          name: "cbc".into(),
          events,
        }],
      }],
    }
  }

  fn options(rate: f64, skip_blanks: bool) -> UploadOptions {
    UploadOptions {
      rate_per_minute: rate,
      skip_blanks,
      ..Default::default()
    }
  }

  #[tokio::test(start_paused = true)]
  async fn submissions_are_spaced_by_the_rate_limit() {
    let service = RecordingService::default();
    let store = MemoryStore::default();
    let mut t = tree(vec![event("1_arm_1", "1"), event("2_arm_1", "2"), event("3_arm_1", "3")]);
    let mut engine = UploadEngine::new(&service, &store, options(30.0, false));
    let report = engine.run(&mut t).await.unwrap();
    assert_eq!(report.requests_sent, 3);

    let calls = service.calls.lock().unwrap();
    for pair in calls.windows(2) {
      assert!(pair[1].0 - pair[0].0 >= Duration::from_secs(2));
    }
  }

  #[tokio::test(start_paused = true)]
  async fn accepted_events_are_marked_and_persisted() {
    let service = RecordingService::default();
    let store = MemoryStore::default();
    let mut t = tree(vec![event("1_arm_1", "13.5"), event("2_arm_1", "")]);
    let report = UploadEngine::new(&service, &store, options(600.0, false))
      .run(&mut t)
      .await
      .unwrap();

    assert_eq!(t.count_with_status(EventStatus::Sent), 2);
    assert_eq!(store.saved_trees(), 2);
    assert_eq!(store.last_tree().unwrap(), t);
    assert_eq!(report.total_subjects, 1);
    assert_eq!(report.form_totals["cbc"], 1);
    assert_eq!(report.subject_totals["1"]["cbc"], 1);

    let calls = service.calls.lock().unwrap();
    let first = &calls[0].1;
    assert_eq!(first["record_id"], "1");
    assert_eq!(first["redcap_event_name"], "1_arm_1");
    assert_eq!(first["hemo_lborres"], "13.5");
  }

  #[tokio::test(start_paused = true)]
  async fn second_run_over_sent_tree_submits_nothing() {
    let service = RecordingService::default();
    let store = MemoryStore::default();
    let mut t = tree(vec![event("1_arm_1", "13.5")]);
    UploadEngine::new(&service, &store, options(600.0, false))
      .run(&mut t)
      .await
      .unwrap();

    let again = RecordingService::default();
    let report = UploadEngine::new(&again, &store, options(600.0, false))
      .run(&mut t)
      .await
      .unwrap();
    assert!(again.calls.lock().unwrap().is_empty());
    assert_eq!(report.requests_sent, 0);
    assert_eq!(report.form_totals["cbc"], 0);
  }

  #[tokio::test(start_paused = true)]
  async fn skip_blanks_stops_at_first_blank_event() {
    let service = RecordingService::default();
    let store = MemoryStore::default();
    let mut t = tree(vec![event("1_arm_1", ""), event("2_arm_1", ""), event("3_arm_1", "4")]);
    let report = UploadEngine::new(&service, &store, options(600.0, true))
      .run(&mut t)
      .await
      .unwrap();
    assert_eq!(report.requests_sent, 0);
    assert_eq!(t.count_with_status(EventStatus::Sent), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn rejections_are_collected_and_left_unsent() {
    let service = RecordingService {
      reject: Some("hemo_lborres".into()),
      ..Default::default()
    };
    let store = MemoryStore::default();
    let mut t = tree(vec![event("1_arm_1", "abc")]);
    let report = UploadEngine::new(&service, &store, options(600.0, false))
      .run(&mut t)
      .await
      .unwrap();
    assert_eq!(report.errors, [
      "Error writing to record 1 field hemo_lborres Value abc. Error Message: \
       bad value"
    ]);
    assert_eq!(t.count_with_status(EventStatus::Sent), 0);
    assert_eq!(report.form_totals["cbc"], 0);
    assert_eq!(store.saved_trees(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn message_only_rejection_does_not_stop_the_run() {
    let service = RecordingService {
      refuse_event: Some("1_arm_1".into()),
      ..Default::default()
    };
    let store = MemoryStore::default();
    let mut t = tree(vec![event("1_arm_1", "13.5"), event("2_arm_1", "12.0")]);
    let report = UploadEngine::new(&service, &store, options(600.0, false))
      .run(&mut t)
      .await
      .unwrap();
    assert_eq!(report.requests_sent, 2);
    assert_eq!(report.errors, [
      "Error writing to record 1. Error Message: The following fields were \
       not found in the project"
    ]);
    let statuses: Vec<_> = t.events().map(|e| e.status).collect();
    assert_eq!(statuses, [EventStatus::Unsent, EventStatus::Sent]);
    assert_eq!(report.form_totals["cbc"], 1);
  }

  #[tokio::test(start_paused = true)]
  async fn transport_failure_aborts() {
    let service = RecordingService {
      fail: true,
      ..Default::default()
    };
    let store = MemoryStore::default();
    let mut t = tree(vec![event("1_arm_1", "1")]);
    let err = UploadEngine::new(&service, &store, options(600.0, false))
      .run(&mut t)
      .await
      .unwrap_err();
    assert!(matches!(err, UploadError::Transport { event, .. } if event == "1_arm_1"));
  }

  #[test]
  fn min_interval_from_rate() {
    assert_eq!(options(60.0, false).min_interval(), Duration::from_secs(1));
    assert_eq!(options(0.0, false).min_interval(), Duration::ZERO);
  }
}
