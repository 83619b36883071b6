//! Encoding and decoding helpers between labsync types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings; alerts, rule errors and bad ids are
//! compact JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use labsync_core::{
  checkpoint::Checkpoint,
  normalize::CollectionDateSummary,
  sequence::AlertSummary,
  tree::{Event, EventStatus, Field, Form, Person, PersonFormEventTree},
};

use crate::{Error, Result};

// ─── DateTime<Utc>
// ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── EventStatus ─────────────────────────────────────────────────────────────

pub fn encode_status(s: EventStatus) -> &'static str { s.as_str() }

pub fn decode_status(s: &str) -> Result<EventStatus> {
  EventStatus::parse(s).ok_or_else(|| Error::UnknownStatus(s.to_owned()))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// The `checkpoint` row as stored.
pub struct RawCheckpoint {
  pub version:          u32,
  pub created_at:       String,
  pub alerts:           String,
  pub rule_errors:      String,
  pub collection_total: i64,
  pub collection_blank: i64,
  pub bad_ids:          String,
}

impl RawCheckpoint {
  pub fn encode(checkpoint: &Checkpoint) -> Result<Self> {
    Ok(Self {
      version:          checkpoint.version,
      created_at:       encode_dt(checkpoint.created_at),
      alerts:           serde_json::to_string(&checkpoint.alerts)?,
      rule_errors:      serde_json::to_string(&checkpoint.rule_errors)?,
      collection_total: checkpoint.collection_dates.total as i64,
      collection_blank: checkpoint.collection_dates.blank as i64,
      bad_ids:          serde_json::to_string(&checkpoint.bad_ids)?,
    })
  }

  pub fn into_checkpoint(self, tree: PersonFormEventTree) -> Result<Checkpoint> {
    let alerts: AlertSummary = serde_json::from_str(&self.alerts)?;
    let bad_ids: BTreeMap<String, usize> = serde_json::from_str(&self.bad_ids)?;
    Ok(Checkpoint {
      version: self.version,
      created_at: decode_dt(&self.created_at)?,
      tree,
      alerts,
      rule_errors: serde_json::from_str(&self.rule_errors)?,
      collection_dates: CollectionDateSummary {
        total: self.collection_total.max(0) as u64,
        blank: self.collection_blank.max(0) as u64,
      },
      bad_ids,
    })
  }
}

/// Tree rows, each table ordered by its position columns.
#[derive(Default)]
pub struct RawTree {
  pub persons: Vec<String>,
  /// (person, name)
  pub forms:   Vec<(usize, String)>,
  /// (person, form, name, status)
  pub events:  Vec<(usize, usize, String, String)>,
  /// (person, form, event, name, value)
  pub fields:  Vec<(usize, usize, usize, String, String)>,
}

impl RawTree {
  /// Rebuild the tree. Rows must arrive in position order so each one can
  /// be appended to its parent.
  pub fn into_tree(self) -> Result<PersonFormEventTree> {
    let mut persons: Vec<Person> = self
      .persons
      .into_iter()
      .map(|id| Person {
        id,
        forms: Vec::new(),
      })
      .collect();

    for (p, name) in self.forms {
      persons
        .get_mut(p)
        .ok_or_else(|| corrupt("form", p))?
        .forms
        .push(Form {
          name,
          events: Vec::new(),
        });
    }

    for (p, f, name, status) in self.events {
      let form = persons
        .get_mut(p)
        .and_then(|person| person.forms.get_mut(f))
        .ok_or_else(|| corrupt("event", p))?;
      form.events.push(Event {
        name,
        status: decode_status(&status)?,
        fields: Vec::new(),
      });
    }

    for (p, f, e, name, value) in self.fields {
      let event = persons
        .get_mut(p)
        .and_then(|person| person.forms.get_mut(f))
        .and_then(|form| form.events.get_mut(e))
        .ok_or_else(|| corrupt("field", p))?;
      event.fields.push(Field { name, value });
    }

    Ok(PersonFormEventTree { persons })
  }
}

fn corrupt(row: &str, person: usize) -> Error {
  Error::Corrupt(format!("{row} row points at a missing parent (person {person})"))
}
