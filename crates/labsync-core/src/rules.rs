//! Tree rules: checks and fix-ups run over the assembled tree.
//!
//! Rules are registered statically and selected by name from the run
//! settings. A failing rule never stops the run; its messages are collected,
//! prefixed with the rule name, and can be added to the report.

use std::collections::HashSet;

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;
use tracing::{info, warn};

use crate::{Error, Result, reference::ReferenceIndex, tree::PersonFormEventTree};

/// Messages produced by a failing rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{}", .messages.join("; "))]
pub struct RuleError {
  pub messages: Vec<String>,
}

/// A named transformation or check over the tree.
pub trait Rule: Send + Sync {
  fn name(&self) -> &str;

  fn apply(&self, tree: &mut PersonFormEventTree) -> Result<(), RuleError>;
}

/// Names accepted by [`rule_by_name`].
pub const BUILTIN_RULES: &[&str] = &[NumericResults::NAME, DateFormat::NAME];

/// Build a built-in rule.
pub fn rule_by_name(
  name: &str,
  index: &ReferenceIndex,
  date_format: &str,
) -> Result<Box<dyn Rule>> {
  match name {
    NumericResults::NAME => Ok(Box::new(NumericResults::new(index))),
    DateFormat::NAME => Ok(Box::new(DateFormat::new(index, date_format))),
    other => Err(Error::UnknownRule(other.to_owned())),
  }
}

/// Resolve every configured rule name, failing on the first unknown one.
pub fn build_rules(
  names: &[String],
  index: &ReferenceIndex,
  date_format: &str,
) -> Result<Vec<Box<dyn Rule>>> {
  names
    .iter()
    .map(|n| rule_by_name(n, index, date_format))
    .collect()
}

/// Run every rule in order and collect their messages.
pub fn run_rules(
  rules: &[Box<dyn Rule>],
  tree: &mut PersonFormEventTree,
) -> Vec<String> {
  let mut errors = Vec::new();
  for rule in rules {
    match rule.apply(tree) {
      Ok(()) => info!(rule = rule.name(), "rule passed"),
      Err(e) => {
        warn!(rule = rule.name(), count = e.messages.len(), "rule failed");
        errors.extend(
          e.messages
            .iter()
            .map(|m| format!("Error processing rule \"{}\". {m}", rule.name())),
        );
      }
    }
  }
  errors
}

/// Visit every non-empty field whose name is in `fields`, collecting a
/// message for each value `check` rejects.
fn check_fields(
  tree: &PersonFormEventTree,
  fields: &HashSet<String>,
  check: impl Fn(&str) -> Option<String>,
) -> Result<(), RuleError> {
  let mut messages = Vec::new();
  for person in &tree.persons {
    for form in &person.forms {
      for event in &form.events {
        for field in &event.fields {
          if field.value.is_empty() || !fields.contains(&field.name) {
            continue;
          }
          if let Some(problem) = check(&field.value) {
            messages.push(format!(
              "Subject {} form {} event {} field {}: {problem}",
              person.id, form.name, event.name, field.name
            ));
          }
        }
      }
    }
  }
  if messages.is_empty() {
    Ok(())
  } else {
    Err(RuleError { messages })
  }
}

fn all_fields(index: &ReferenceIndex, keep: impl Fn(&str) -> bool) -> HashSet<String> {
  index
    .forms()
    .iter()
    .flat_map(|f| index.form_fields(&f.name))
    .filter(|f| keep(f))
    .cloned()
    .collect()
}

// ─── Built-ins ───────────────────────────────────────────────────────────────

/// Flags result values that are not numbers.
#[derive(Debug, Clone)]
pub struct NumericResults {
  fields: HashSet<String>,
}

impl NumericResults {
  pub const NAME: &'static str = "numeric-results";

  pub fn new(index: &ReferenceIndex) -> Self {
    Self {
      fields: all_fields(index, |f| index.is_value_field(f)),
    }
  }
}

impl Rule for NumericResults {
  fn name(&self) -> &str { Self::NAME }

  fn apply(&self, tree: &mut PersonFormEventTree) -> Result<(), RuleError> {
    check_fields(tree, &self.fields, |value| {
      value
        .trim()
        .parse::<f64>()
        .is_err()
        .then(|| format!("value {value:?} is not numeric"))
    })
  }
}

/// Flags date field values that do not match the output date format.
#[derive(Debug, Clone)]
pub struct DateFormat {
  fields: HashSet<String>,
  format: String,
}

impl DateFormat {
  pub const NAME: &'static str = "date-format";

  pub fn new(index: &ReferenceIndex, format: &str) -> Self {
    Self {
      fields: all_fields(index, |f| index.is_date_field(f)),
      format: format.to_owned(),
    }
  }
}

impl Rule for DateFormat {
  fn name(&self) -> &str { Self::NAME }

  fn apply(&self, tree: &mut PersonFormEventTree) -> Result<(), RuleError> {
    check_fields(tree, &self.fields, |value| {
      let ok = NaiveDateTime::parse_from_str(value, &self.format).is_ok()
        || NaiveDate::parse_from_str(value, &self.format).is_ok();
      (!ok).then(|| format!("date {value:?} does not match {:?}", self.format))
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    test_support::cbc_index,
    tree::{Event, EventStatus, Field, Form, Person},
  };

  fn tree(fields: &[(&str, &str)]) -> PersonFormEventTree {
    PersonFormEventTree {
      persons: vec![Person {
        id:    "1".into(),
        forms: vec![Form {
          name:   "cbc".into(),
          events: vec![Event {
            name:   "1_arm_1".into(),
            status: EventStatus::Unsent,
            fields: fields
              .iter()
              .map(|(n, v)| Field {
                name:  (*n).into(),
                value: (*v).into(),
              })
              .collect(),
          }],
        }],
      }],
    }
  }

  #[test]
  fn unknown_rule_name_is_rejected() {
    let index = cbc_index();
    let names = vec!["numeric-results".to_owned(), "nope".to_owned()];
    assert!(matches!(
      build_rules(&names, &index, "%Y-%m-%d"),
      Err(Error::UnknownRule(n)) if n == "nope"
    ));
  }

  #[test]
  fn numeric_results_flags_text() {
    let index = cbc_index();
    let rules = build_rules(&["numeric-results".to_owned()], &index, "%Y-%m-%d").unwrap();
    let mut t = tree(&[
      ("hemo_lborres", "13.5"),
      ("plat_lborres", "<5"),
      ("hemo_lborresu", "g/dL"),
    ]);
    let errors = run_rules(&rules, &mut t);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Error processing rule \"numeric-results\". "));
    assert!(errors[0].contains("plat_lborres"));
  }

  #[test]
  fn date_format_accepts_matching_dates() {
    let index = cbc_index();
    let rules = build_rules(&["date-format".to_owned()], &index, "%Y-%m-%d").unwrap();
    let mut good = tree(&[("cbc_lbdtc", "2013-07-01")]);
    assert!(run_rules(&rules, &mut good).is_empty());
    let mut bad = tree(&[("cbc_lbdtc", "07/01/2013")]);
    assert_eq!(run_rules(&rules, &mut bad).len(), 1);
  }

  #[test]
  fn failing_rule_does_not_stop_later_rules() {
    struct Broken;
    impl Rule for Broken {
      fn name(&self) -> &str { "broken" }

      fn apply(&self, _: &mut PersonFormEventTree) -> Result<(), RuleError> {
        Err(RuleError {
          messages: vec!["boom".into()],
        })
      }
    }
    struct Touch;
    impl Rule for Touch {
      fn name(&self) -> &str { "touch" }

      fn apply(&self, tree: &mut PersonFormEventTree) -> Result<(), RuleError> {
        tree.persons[0].id = "touched".into();
        Ok(())
      }
    }
    let rules: Vec<Box<dyn Rule>> = vec![Box::new(Broken), Box::new(Touch)];
    let mut t = tree(&[]);
    let errors = run_rules(&rules, &mut t);
    assert_eq!(errors, ["Error processing rule \"broken\". boom"]);
    assert_eq!(t.persons[0].id, "touched");
  }
}
