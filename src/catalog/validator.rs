//! Error-accumulating field checks shared by both catalog schema versions.
//!
//! Every helper records what went wrong and returns `None` instead of bailing
//! out, so a single pass over the raw description reports every defect.

use super::error::ValidationError;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

#[derive(Debug, Default)]
pub(crate) struct Validator {
    errors: Vec<ValidationError>,
}

impl Validator {
    pub fn push(&mut self, error: ValidationError) {
        tracing::debug!("Catalog validation: {}", error);
        self.errors.push(error);
    }

    pub fn into_errors(self) -> Vec<ValidationError> {
        self.errors
    }

    pub fn required<'a>(&mut self, value: Option<&'a Value>, path: &str) -> Option<&'a Value> {
        match value {
            Some(Value::Null) | None => {
                self.push(ValidationError::MissingRequiredParameter {
                    path: path.to_string(),
                });
                None
            }
            Some(value) => Some(value),
        }
    }

    pub fn object<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a Map<String, Value>> {
        match value {
            Value::Object(map) => Some(map),
            other => {
                self.mismatch(path, "object", other);
                None
            }
        }
    }

    pub fn array<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a Vec<Value>> {
        match value {
            Value::Array(items) => Some(items),
            other => {
                self.mismatch(path, "array", other);
                None
            }
        }
    }

    pub fn string<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a str> {
        match value {
            Value::String(text) => Some(text),
            other => {
                self.mismatch(path, "string", other);
                None
            }
        }
    }

    pub fn required_object<'a>(
        &mut self,
        value: Option<&'a Value>,
        path: &str,
    ) -> Option<&'a Map<String, Value>> {
        let value = self.required(value, path)?;
        self.object(value, path)
    }

    pub fn required_array<'a>(
        &mut self,
        value: Option<&'a Value>,
        path: &str,
    ) -> Option<&'a Vec<Value>> {
        let value = self.required(value, path)?;
        self.array(value, path)
    }

    pub fn required_string<'a>(&mut self, value: Option<&'a Value>, path: &str) -> Option<&'a str> {
        let value = self.required(value, path)?;
        self.string(value, path)
    }

    /// Optional list of strings (plugin names). Missing means empty.
    pub fn string_list(&mut self, value: Option<&Value>, path: &str) -> Option<Vec<String>> {
        let items = match value {
            None | Some(Value::Null) => return Some(Vec::new()),
            Some(value) => self.array(value, path)?,
        };
        let mut result = Vec::with_capacity(items.len());
        let mut valid = true;
        for (index, item) in items.iter().enumerate() {
            match self.string(item, &format!("{}[{}]", path, index)) {
                Some(text) => result.push(text.to_string()),
                None => valid = false,
            }
        }
        valid.then_some(result)
    }

    pub fn date(&mut self, value: Option<&Value>, path: &str) -> Option<DateTime<Utc>> {
        let text = self.required_string(value, path)?;
        match parse_date(text) {
            Some(date) => Some(date),
            None => {
                self.push(ValidationError::InvalidDate {
                    path: path.to_string(),
                    value: text.to_string(),
                });
                None
            }
        }
    }

    /// Required number (integer or float), zero or larger.
    pub fn non_negative_number(&mut self, value: Option<&Value>, path: &str) -> Option<f64> {
        let value = self.required(value, path)?;
        let Some(number) = value.as_f64() else {
            self.mismatch(path, "number", value);
            return None;
        };
        if number < 0.0 {
            self.push(ValidationError::NegativeNumber {
                path: path.to_string(),
                value: number,
            });
            return None;
        }
        Some(number)
    }

    /// Required integer, zero or larger.
    pub fn non_negative_integer(&mut self, value: Option<&Value>, path: &str) -> Option<u64> {
        let number = self.integer(value, path)?;
        if number < 0 {
            self.push(ValidationError::NegativeNumber {
                path: path.to_string(),
                value: number as f64,
            });
            return None;
        }
        Some(number as u64)
    }

    /// Required integer, one or larger.
    pub fn one_or_larger_integer(&mut self, value: Option<&Value>, path: &str) -> Option<u64> {
        let number = self.integer(value, path)?;
        if number < 1 {
            self.push(ValidationError::SmallerThanOne {
                path: path.to_string(),
                value: number,
            });
            return None;
        }
        Some(number as u64)
    }

    /// Required value that must equal one of `allowed`.
    pub fn one_of(&mut self, value: Option<&Value>, path: &str, allowed: &[&str]) -> Option<String> {
        let value = self.required(value, path)?;
        match value.as_str() {
            Some(text) if allowed.contains(&text) => Some(text.to_string()),
            _ => {
                self.push(ValidationError::UnsupportedValue {
                    path: path.to_string(),
                    value: value.to_string(),
                });
                None
            }
        }
    }

    fn integer(&mut self, value: Option<&Value>, path: &str) -> Option<i64> {
        let value = self.required(value, path)?;
        match value.as_i64() {
            Some(number) => Some(number),
            None => {
                self.mismatch(path, "integer", value);
                None
            }
        }
    }

    fn mismatch(&mut self, path: &str, expected: &str, actual: &Value) {
        self.push(ValidationError::MismatchedType {
            path: path.to_string(),
            expected: expected.to_string(),
            actual: type_name(actual).to_string(),
        });
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(number) if number.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Accepts RFC 3339, RFC 2822, `YYYY-MM-DD HH:MM:SS` and bare dates (UTC).
pub(crate) fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(text) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(date.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date| date.and_utc())
}
