//! The reference index: component and form tables, immutable once built.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// One row of the translation table, keyed by component code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentEntry {
  pub code:         String,
  pub name:         Option<String>,
  pub form_name:    Option<String>,
  pub value_field:  Option<String>,
  pub units_field:  Option<String>,
  pub status_field: Option<String>,
  pub status_value: Option<String>,
}

/// One form of the form-events table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormEntry {
  pub name:             String,
  pub date_field:       Option<String>,
  pub completion_field: Option<String>,
  pub completion_value: Option<String>,
  pub imported_field:   Option<String>,
  pub imported_value:   Option<String>,
  /// Event labels in declaration order.
  pub events:           Vec<String>,
}

/// Lookup tables shared by enrichment, sequencing and assembly.
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
  components:     HashMap<String, ComponentEntry>,
  forms:          Vec<FormEntry>,
  form_positions: HashMap<String, usize>,
  form_fields:    HashMap<String, Vec<String>>,
  status_links:   HashMap<String, (String, String)>,
  value_fields:   HashSet<String>,
}

impl ReferenceIndex {
  pub fn new(components: Vec<ComponentEntry>, forms: Vec<FormEntry>) -> Self {
    let mut deduped: Vec<FormEntry> = Vec::with_capacity(forms.len());
    let mut form_positions = HashMap::new();
    for form in forms {
      match form_positions.get(&form.name) {
        Some(&pos) => {
          warn!(form = %form.name, "duplicate form definition, keeping the last");
          deduped[pos] = form;
        }
        None => {
          form_positions.insert(form.name.clone(), deduped.len());
          deduped.push(form);
        }
      }
    }

    let mut form_fields: HashMap<String, Vec<String>> = HashMap::new();
    let mut status_links = HashMap::new();
    let mut value_fields = HashSet::new();

    for component in &components {
      if let Some(field) = declared(&component.value_field) {
        value_fields.insert(field.to_owned());
      }
      if let Some(status) = declared(&component.status_field) {
        let value = component.status_value.clone().unwrap_or_default();
        for field in [&component.value_field, &component.units_field] {
          if let Some(field) = declared(field) {
            status_links
              .entry(field.to_owned())
              .or_insert_with(|| (status.to_owned(), value.clone()));
          }
        }
      }
      let Some(form) = declared(&component.form_name) else {
        continue;
      };
      let fields = form_fields.entry(form.to_owned()).or_default();
      for field in [
        &component.value_field,
        &component.units_field,
        &component.status_field,
      ] {
        push_unique(fields, declared(field));
      }
    }

    for form in &deduped {
      let fields = form_fields.entry(form.name.clone()).or_default();
      for field in
        [&form.date_field, &form.completion_field, &form.imported_field]
      {
        push_unique(fields, declared(field));
      }
    }

    let mut by_code = HashMap::with_capacity(components.len());
    for component in components {
      if by_code.contains_key(&component.code) {
        warn!(code = %component.code, "duplicate component code, keeping the last");
      }
      by_code.insert(component.code.clone(), component);
    }

    Self {
      components: by_code,
      forms: deduped,
      form_positions,
      form_fields,
      status_links,
      value_fields,
    }
  }

  pub fn component(&self, code: &str) -> Option<&ComponentEntry> {
    self.components.get(code)
  }

  pub fn form(&self, name: &str) -> Option<&FormEntry> {
    self.form_positions.get(name).map(|&i| &self.forms[i])
  }

  /// Forms in declaration order.
  pub fn forms(&self) -> &[FormEntry] { &self.forms }

  /// Ordered event labels of `form`; empty for an unknown form.
  pub fn events(&self, form: &str) -> &[String] {
    self.form(form).map(|f| f.events.as_slice()).unwrap_or_default()
  }

  /// Every field a form's events carry, in first-declared order.
  pub fn form_fields(&self, form: &str) -> &[String] {
    self
      .form_fields
      .get(form)
      .map(Vec::as_slice)
      .unwrap_or_default()
  }

  /// The status field and value to set when `field` is left empty in an
  /// event that otherwise has data.
  pub fn status_link(&self, field: &str) -> Option<(&str, &str)> {
    self
      .status_links
      .get(field)
      .map(|(f, v)| (f.as_str(), v.as_str()))
  }

  /// `true` if some component stores its result in `field`.
  pub fn is_value_field(&self, field: &str) -> bool {
    self.value_fields.contains(field)
  }

  /// `true` if some form stores its collection date in `field`.
  pub fn is_date_field(&self, field: &str) -> bool {
    self
      .forms
      .iter()
      .any(|f| declared(&f.date_field) == Some(field))
  }
}

fn declared(slot: &Option<String>) -> Option<&str> {
  slot.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn push_unique(fields: &mut Vec<String>, field: Option<&str>) {
  if let Some(field) = field
    && !fields.iter().any(|f| f == field)
  {
    fields.push(field.to_owned());
  }
}
