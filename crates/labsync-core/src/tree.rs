//! The person → form → event → field submission tree.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Whether an event has been accepted by the remote service.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
  #[default]
  Unsent,
  Sent,
}

impl EventStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Unsent => "unsent",
      Self::Sent => "sent",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "unsent" => Some(Self::Unsent),
      "sent" => Some(Self::Sent),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
  pub name:  String,
  pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
  pub name:   String,
  pub status: EventStatus,
  pub fields: Vec<Field>,
}

impl Event {
  /// `true` if any field holds a non-empty value.
  pub fn has_data(&self) -> bool {
    self.fields.iter().any(|f| !f.value.is_empty())
  }

  pub fn field(&self, name: &str) -> Option<&Field> {
    self.fields.iter().find(|f| f.name == name)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Form {
  pub name:   String,
  pub events: Vec<Event>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
  pub id:    String,
  pub forms: Vec<Form>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonFormEventTree {
  pub persons: Vec<Person>,
}

impl PersonFormEventTree {
  pub fn person(&self, id: &str) -> Option<&Person> {
    self.persons.iter().find(|p| p.id == id)
  }

  /// Every event in tree order.
  pub fn events(&self) -> impl Iterator<Item = &Event> {
    self
      .persons
      .iter()
      .flat_map(|p| p.forms.iter())
      .flat_map(|f| f.events.iter())
  }

  pub fn count_with_status(&self, status: EventStatus) -> usize {
    self.events().filter(|e| e.status == status).count()
  }

  /// Unsent events that carry at least one value.
  pub fn pending(&self) -> usize {
    self
      .events()
      .filter(|e| e.status == EventStatus::Unsent && e.has_data())
      .count()
  }
}

// ─── Index ───────────────────────────────────────────────────────────────────

/// Positions of one event in the tree, plus its fields by name.
#[derive(Debug, Clone)]
pub struct EventSlot {
  person: usize,
  form:   usize,
  event:  usize,
  fields: HashMap<String, usize>,
}

impl EventSlot {
  pub fn field_position(&self, name: &str) -> Option<usize> {
    self.fields.get(name).copied()
  }

  /// The event this slot points at. Panics if `tree` is not the tree the
  /// index was built from.
  pub fn event_mut<'t>(&self, tree: &'t mut PersonFormEventTree) -> &'t mut Event {
    &mut tree.persons[self.person].forms[self.form].events[self.event]
  }
}

/// subject → form → event → [`EventSlot`]. Valid while the tree's shape is
/// unchanged.
#[derive(Debug, Clone, Default)]
pub struct TreeIndex {
  subjects: HashMap<String, HashMap<String, HashMap<String, EventSlot>>>,
}

impl TreeIndex {
  pub fn build(tree: &PersonFormEventTree) -> Self {
    let mut subjects: HashMap<String, HashMap<String, HashMap<String, EventSlot>>> =
      HashMap::new();
    for (p, person) in tree.persons.iter().enumerate() {
      let forms = subjects.entry(person.id.clone()).or_default();
      for (f, form) in person.forms.iter().enumerate() {
        let events = forms.entry(form.name.clone()).or_default();
        for (e, event) in form.events.iter().enumerate() {
          let fields = event
            .fields
            .iter()
            .enumerate()
            .map(|(i, field)| (field.name.clone(), i))
            .collect();
          events.insert(event.name.clone(), EventSlot {
            person: p,
            form: f,
            event: e,
            fields,
          });
        }
      }
    }
    Self { subjects }
  }

  pub fn slot(&self, subject: &str, form: &str, event: &str) -> Option<&EventSlot> {
    self.subjects.get(subject)?.get(form)?.get(event)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tree() -> PersonFormEventTree {
    let event = |name: &str, value: &str| Event {
      name:   name.into(),
      status: EventStatus::Unsent,
      fields: vec![Field {
        name:  "x".into(),
        value: value.into(),
      }],
    };
    PersonFormEventTree {
      persons: vec![Person {
        id:    "1".into(),
        forms: vec![Form {
          name:   "cbc".into(),
          events: vec![event("1_arm_1", ""), event("2_arm_1", "4")],
        }],
      }],
    }
  }

  #[test]
  fn status_strings() {
    assert_eq!(EventStatus::parse(EventStatus::Sent.as_str()), Some(EventStatus::Sent));
    assert_eq!(EventStatus::parse("SENT"), None);
  }

  #[test]
  fn index_reaches_fields() {
    let mut t = tree();
    let index = TreeIndex::build(&t);
    let slot = index.slot("1", "cbc", "2_arm_1").unwrap();
    let pos = slot.field_position("x").unwrap();
    slot.event_mut(&mut t).fields[pos].value = "5".into();
    assert_eq!(t.persons[0].forms[0].events[1].fields[0].value, "5");
    assert!(index.slot("1", "cbc", "3_arm_1").is_none());
    assert!(index.slot("2", "cbc", "1_arm_1").is_none());
  }

  #[test]
  fn pending_counts_unsent_events_with_data() {
    let mut t = tree();
    assert_eq!(t.pending(), 1);
    t.persons[0].forms[0].events[1].status = EventStatus::Sent;
    assert_eq!(t.pending(), 0);
    assert_eq!(t.count_with_status(EventStatus::Unsent), 1);
  }
}
