//! Decoding of REDCap import rejections.
//!
//! A rejected import comes back as a 4xx with a JSON object carrying an
//! `error` member. Newer servers list the offending fields in a `records`
//! array; older ones pack them into the error string as quoted CSV lines:
//!
//! ```text
//! "1","hemo_lborres","abc","The value you provided could not be validated"
//! ```
//!
//! Any other error string is kept as a single message naming no field.

use labsync_core::upload::FieldError;
use serde_json::{Map, Value};

/// The field errors in a rejection body, or `None` if `body` is not a JSON
/// object with an `error` member.
pub fn decode(body: &str) -> Option<Vec<FieldError>> {
  let value: Value = serde_json::from_str(body).ok()?;
  let object = value.as_object()?;
  let error = object.get("error")?;

  if let Some(records) = object.get("records").and_then(Value::as_array) {
    let errors: Vec<_> = records
      .iter()
      .filter_map(Value::as_object)
      .map(|r| FieldError {
        record:     text(r, "record"),
        field_name: text(r, "field_name"),
        value:      text(r, "value"),
        message:    text(r, "message"),
      })
      .collect();
    if !errors.is_empty() {
      return Some(errors);
    }
  }

  let message = match error {
    Value::String(s) => s.trim().to_owned(),
    other => other.to_string(),
  };
  let errors = quoted_csv(&message);
  if !errors.is_empty() {
    return Some(errors);
  }
  Some(vec![FieldError {
    record: String::new(),
    field_name: String::new(),
    value: String::new(),
    message,
  }])
}

/// The `error` member of a JSON error body, falling back to the raw body.
pub fn message(body: &str) -> String {
  serde_json::from_str::<Value>(body)
    .ok()
    .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_owned))
    .unwrap_or_else(|| body.trim().to_owned())
}

/// A scalar member rendered as text; numbers are common for record ids.
pub fn text(object: &Map<String, Value>, key: &str) -> String {
  match object.get(key) {
    Some(Value::String(s)) => s.clone(),
    Some(Value::Null) | None => String::new(),
    Some(other) => other.to_string(),
  }
}

/// Four-column `record,field,value,message` rows. Text that does not start
/// with a quote is prose, not CSV.
fn quoted_csv(text: &str) -> Vec<FieldError> {
  if !text.starts_with('"') {
    return Vec::new();
  }
  csv::ReaderBuilder::new()
    .has_headers(false)
    .flexible(true)
    .from_reader(text.as_bytes())
    .deserialize::<(String, String, String, String)>()
    .filter_map(Result::ok)
    .map(|(record, field_name, value, message)| FieldError {
      record,
      field_name,
      value,
      message,
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn records_array() {
    let body = r#"{
      "error": "There were data validation errors",
      "records": [
        {"record": 1, "field_name": "hemo_lborres", "value": "abc",
         "message": "not a number"}
      ]
    }"#;
    let errors = decode(body).unwrap();
    assert_eq!(errors, [FieldError {
      record:     "1".into(),
      field_name: "hemo_lborres".into(),
      value:      "abc".into(),
      message:    "not a number".into(),
    }]);
  }

  #[test]
  fn quoted_csv_lines() {
    let body = serde_json::json!({
      "error": "\"1\",\"hemo_lborres\",\"abc\",\"The value \"\"abc\"\" is not a number\"\n\
                \"2\",\"plat_lborres\",\"x\",\"bad, really\""
    })
    .to_string();
    let errors = decode(&body).unwrap();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].message, r#"The value "abc" is not a number"#);
    assert_eq!(errors[1].record, "2");
    assert_eq!(errors[1].message, "bad, really");
  }

  #[test]
  fn prose_error_becomes_one_message() {
    let errors = decode(
      r#"{"error": "The following fields were not found in the project as real data fields: hemo_lborres"}"#,
    )
    .unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].field_name.is_empty());
    assert!(errors[0].message.ends_with("hemo_lborres"));
  }

  #[test]
  fn bodies_without_error_member_are_not_rejections() {
    assert!(decode("<html>bad gateway</html>").is_none());
    assert!(decode(r#"{"count": 1}"#).is_none());
    assert!(decode(r#"["error"]"#).is_none());
  }

  #[test]
  fn message_prefers_error_member() {
    assert_eq!(message(r#"{"error": "no token"}"#), "no token");
    assert_eq!(message("  gateway timeout \n"), "gateway timeout");
  }

  #[test]
  fn short_csv_rows_are_skipped() {
    let errors = quoted_csv("\"1\",\"a\"\n\"2\",\"b\",\"c\",\"d\"");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].record, "2");
  }
}
