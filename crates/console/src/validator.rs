//! Schema-driven document validation.
//!
//! Walks a protocol's fields in schema order against the current document
//! state. Hidden fields are skipped entirely, required or not. A visible
//! field yields at most one error (first failing rule wins) and a failure
//! never aborts the remaining fields; the caller always receives the full
//! list. An empty list means the document is valid.

use std::net::{Ipv4Addr, Ipv6Addr};

use serde_json::Value;

use crate::document;
use crate::schema::{FieldKind, FieldSchema, ProtocolSchema, Rule};

/// Minimum secret length accepted by the password rule.
const PASSWORD_MIN_LEN: usize = 8;

/// One field-level validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Path of the offending field.
    pub path: String,
    /// Human-readable message.
    pub message: String,
}

impl FieldError {
    fn new(field: &FieldSchema, message: impl Into<String>) -> Self {
        Self {
            path: field.path.as_str().to_string(),
            message: message.into(),
        }
    }
}

/// Validates `document` against `schema`, returning all field errors.
pub fn validate(schema: &ProtocolSchema, document: &Value) -> Vec<FieldError> {
    let mut errors = Vec::new();

    for field in &schema.fields {
        if let Some(condition) = &field.condition {
            if !condition.evaluate(document) {
                continue;
            }
        }

        let value = document::get(document, &field.path);

        if is_empty(value) {
            if field.required {
                errors.push(FieldError::new(field, format!("{} is required", field.label)));
            }
            continue;
        }
        let Some(value) = value else {
            continue;
        };

        if let Some(error) = check_kind(field, value)
            .or_else(|| check_range(field, value))
            .or_else(|| field.rule.and_then(|rule| check_rule(field, rule, value)))
        {
            errors.push(error);
        }
    }

    errors
}

/// Empty means absent, null, empty string, or empty array; `false` and `0`
/// are present values.
fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

fn check_kind(field: &FieldSchema, value: &Value) -> Option<FieldError> {
    match field.kind {
        FieldKind::Text | FieldKind::Textarea => match value {
            Value::String(_) | Value::Array(_) => None,
            _ => Some(FieldError::new(
                field,
                format!("{} must be text", field.label),
            )),
        },
        FieldKind::Integer => {
            if as_integer(value).is_some() {
                None
            } else {
                Some(FieldError::new(
                    field,
                    format!("{} must be a number", field.label),
                ))
            }
        }
        FieldKind::Switch => match value {
            Value::Bool(_) => None,
            _ => Some(FieldError::new(
                field,
                format!("{} must be a boolean", field.label),
            )),
        },
        FieldKind::Select => match value.as_str() {
            Some(candidate) if field.options.iter().any(|o| *o == candidate) => None,
            _ => Some(FieldError::new(
                field,
                format!(
                    "{} must be one of: {}",
                    field.label,
                    field.options.join(", ")
                ),
            )),
        },
        FieldKind::MultiSelect => {
            let all_allowed = value.as_array().is_some_and(|items| {
                items.iter().all(|item| {
                    item.as_str()
                        .map(|s| field.options.iter().any(|o| *o == s))
                        .unwrap_or(false)
                })
            });
            if all_allowed {
                None
            } else {
                Some(FieldError::new(
                    field,
                    format!(
                        "{} entries must be one of: {}",
                        field.label,
                        field.options.join(", ")
                    ),
                ))
            }
        }
    }
}

fn check_range(field: &FieldSchema, value: &Value) -> Option<FieldError> {
    if field.kind != FieldKind::Integer {
        return None;
    }
    let number = as_integer(value)?;
    let below = field.min.map(|min| number < min).unwrap_or(false);
    let above = field.max.map(|max| number > max).unwrap_or(false);
    if below || above {
        Some(FieldError::new(
            field,
            format!(
                "{} must be between {} and {}",
                field.label,
                field.min.unwrap_or(i64::MIN),
                field.max.unwrap_or(i64::MAX)
            ),
        ))
    } else {
        None
    }
}

fn check_rule(field: &FieldSchema, rule: Rule, value: &Value) -> Option<FieldError> {
    let fail = |message: String| Some(FieldError::new(field, message));
    match rule {
        Rule::Port => match as_integer(value) {
            Some(port) if (1..=65535).contains(&port) => None,
            Some(_) => fail(format!("{} must be between 1 and 65535", field.label)),
            None => fail(format!("{} must be a number", field.label)),
        },
        Rule::Uuid => {
            let s = value.as_str().unwrap_or_default();
            if is_uuid(s) {
                None
            } else {
                fail(format!(
                    "{} must be a UUID (xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx)",
                    field.label
                ))
            }
        }
        Rule::Ipv4 => check_parse::<Ipv4Addr>(field, value, "an IPv4 address"),
        Rule::Ipv6 => check_parse::<Ipv6Addr>(field, value, "an IPv6 address"),
        Rule::Ip => {
            let s = value.as_str().unwrap_or_default();
            if s.parse::<Ipv4Addr>().is_ok() || s.parse::<Ipv6Addr>().is_ok() {
                None
            } else {
                fail(format!("{} must be an IP address", field.label))
            }
        }
        Rule::Domain => {
            let s = value.as_str().unwrap_or_default();
            if is_domain(s) {
                None
            } else {
                fail(format!("{} must be a domain name", field.label))
            }
        }
        Rule::AbsolutePath => {
            let s = value.as_str().unwrap_or_default();
            if s.starts_with('/') {
                None
            } else {
                fail(format!("{} must start with /", field.label))
            }
        }
        Rule::Base64 => {
            let s = value.as_str().unwrap_or_default();
            if is_base64(s) {
                None
            } else {
                fail(format!("{} must be base64", field.label))
            }
        }
        Rule::Password => {
            let s = value.as_str().unwrap_or_default();
            if s.len() >= PASSWORD_MIN_LEN {
                None
            } else {
                fail(format!(
                    "{} must be at least {PASSWORD_MIN_LEN} characters",
                    field.label
                ))
            }
        }
        Rule::PositiveInteger => match as_integer(value) {
            Some(n) if n > 0 => None,
            Some(_) => fail(format!("{} must be a positive integer", field.label)),
            None => fail(format!("{} must be a number", field.label)),
        },
    }
}

fn check_parse<T: std::str::FromStr>(
    field: &FieldSchema,
    value: &Value,
    expected: &str,
) -> Option<FieldError> {
    let s = value.as_str().unwrap_or_default();
    if s.parse::<T>().is_ok() {
        None
    } else {
        Some(FieldError::new(
            field,
            format!("{} must be {expected}", field.label),
        ))
    }
}

/// Integers arrive either as JSON numbers or as numeric form strings.
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_uuid(s: &str) -> bool {
    let groups = [8usize, 4, 4, 4, 12];
    let mut parts = s.split('-');
    for expected_len in groups {
        let Some(part) = parts.next() else {
            return false;
        };
        if part.len() != expected_len || !part.chars().all(|c| c.is_ascii_hexdigit()) {
            return false;
        }
    }
    parts.next().is_none()
}

fn is_domain(s: &str) -> bool {
    // Wildcard prefix (*.example.com) is allowed.
    let s = s.strip_prefix("*.").unwrap_or(s);
    let labels: Vec<&str> = s.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    let Some(tld) = labels.last() else {
        return false;
    };
    if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return false;
    }
    labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

fn is_base64(s: &str) -> bool {
    let trimmed = s.trim_end_matches('=');
    !trimmed.is_empty()
        && s.len() - trimmed.len() <= 2
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/')
}
