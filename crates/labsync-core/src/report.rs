//! The end-of-run summary.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
  checkpoint::Checkpoint,
  normalize::CollectionDateSummary,
  sequence::AlertSummary,
  upload::UploadReport,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
  pub project:          String,
  pub service_uri:      String,
  pub date:             NaiveDate,
  pub upload:           UploadReport,
  pub alerts:           AlertSummary,
  pub collection_dates: CollectionDateSummary,
  pub bad_ids:          BTreeMap<String, usize>,
  /// Rule messages, included when requested in the settings.
  pub rule_errors:      Vec<String>,
}

impl RunReport {
  /// Combine an upload report with the counters held by the checkpoint.
  pub fn new(
    project: impl Into<String>,
    service_uri: impl Into<String>,
    date: NaiveDate,
    upload: UploadReport,
    checkpoint: &Checkpoint,
    include_rule_errors: bool,
  ) -> Self {
    Self {
      project: project.into(),
      service_uri: service_uri.into(),
      date,
      upload,
      alerts: checkpoint.alerts.clone(),
      collection_dates: checkpoint.collection_dates,
      bad_ids: checkpoint.bad_ids.clone(),
      rule_errors: if include_rule_errors {
        checkpoint.rule_errors.clone()
      } else {
        Vec::new()
      },
    }
  }

  /// Upload errors followed by any included rule messages.
  pub fn all_errors(&self) -> impl Iterator<Item = &str> {
    self
      .upload
      .errors
      .iter()
      .chain(&self.rule_errors)
      .map(String::as_str)
  }

  /// Sum of accepted events with data over all forms.
  pub fn total_events(&self) -> u64 { self.upload.form_totals.values().sum() }
}
