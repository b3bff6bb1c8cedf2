use crate::error::{ErrorKind, FieldError};
use crate::schema::{FieldKind, FieldSpec};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

type Cleaned = Result<Option<Value>, FieldError>;

const FALSE_STRINGS: [&str; 8] = ["0", "false", "False", "no", "f", "n", "N", "F"];

/// Coerce an incoming value into the representation the field stores.
///
/// `Ok(None)` means the field is cleared. Required-ness is checked by the
/// caller before this runs; custom validators run after it.
pub(crate) fn clean(spec: &FieldSpec, value: Value) -> Cleaned {
    if value.is_null() {
        return Ok(None);
    }

    let cleaned = match &spec.kind {
        FieldKind::Char => Value::String(clean_char(spec, &value)?),
        FieldKind::Integer | FieldKind::AutoIncrement { .. } => {
            return Ok(clean_integer(spec, &value)?.map(Value::from))
        }
        FieldKind::Float => return Ok(clean_float(spec, &value)?.map(Value::from)),
        FieldKind::Boolean => Value::Bool(clean_bool(&value)?),
        FieldKind::Date | FieldKind::Timestamp => Value::String(format_datetime(&clean_date(&value)?)),
        FieldKind::Geo => return clean_geo(value),
        FieldKind::Choice(choices) => {
            let s = clean_char(spec, &value)?;
            if !choices.iter().any(|choice| choice.value == s) {
                return Err(FieldError::new(
                    ErrorKind::InvalidChoice,
                    format!("{s} is not a valid option"),
                ));
            }
            Value::String(s)
        }
        FieldKind::Regex { pattern, message } => {
            let s = clean_char(spec, &value)?;
            if !pattern.is_match(&s) {
                return Err(FieldError::new(
                    ErrorKind::PatternMismatch,
                    message
                        .clone()
                        .unwrap_or_else(|| format!("{s}: pattern not found")),
                ));
            }
            Value::String(s)
        }
        FieldKind::Email => {
            let s = clean_char(spec, &value)?;
            if !email_pattern().is_match(&s) {
                return Err(FieldError::new(
                    ErrorKind::PatternMismatch,
                    "Invalid Email Address",
                ));
            }
            Value::String(s)
        }
        FieldKind::Phone { append_plus_one } => {
            let s = clean_char(spec, &value)?;
            let phone = parse_phone(&s, *append_plus_one)
                .ok_or_else(|| FieldError::coercion(format!("{s} is not a valid format")))?;
            Value::String(phone)
        }
        FieldKind::DocumentId { .. } => Value::String(clean_document_id(&value)?),
        FieldKind::Object => value,
    };

    Ok(Some(cleaned))
}

fn clean_char(spec: &FieldSpec, value: &Value) -> Result<String, FieldError> {
    let s = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => {
            return Err(FieldError::coercion(format!(
                "{} is not a valid string",
                display(value)
            )))
        }
    };
    check_bounds(spec, s.chars().count() as f64)?;
    Ok(s)
}

fn clean_integer(spec: &FieldSpec, value: &Value) -> Result<Option<i64>, FieldError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    let n = parsed.ok_or_else(|| {
        FieldError::coercion(format!("{} is not a valid integer", display(value)))
    })?;
    check_bounds(spec, n as f64)?;
    Ok(Some(n))
}

fn clean_float(spec: &FieldSpec, value: &Value) -> Result<Option<f64>, FieldError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let f = parsed.filter(|f| f.is_finite()).ok_or_else(|| {
        FieldError::coercion(format!("{} is not a valid float", display(value)))
    })?;
    check_bounds(spec, f)?;
    Ok(Some(f))
}

fn check_bounds(spec: &FieldSpec, measured: f64) -> Result<(), FieldError> {
    if let Some(max) = spec.max {
        if measured > max {
            return Err(FieldError::max(max));
        }
    }
    if let Some(min) = spec.min {
        if measured < min {
            return Err(FieldError::min(min));
        }
    }
    Ok(())
}

fn clean_bool(value: &Value) -> Result<bool, FieldError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => Ok(!FALSE_STRINGS.contains(&s.as_str())),
        Value::Number(n) => Ok(n.as_f64().map_or(false, |f| f != 0.0)),
        _ => Err(FieldError::coercion(format!(
            "{} invalid boolean",
            display(value)
        ))),
    }
}

fn clean_date(value: &Value) -> Result<DateTime<Utc>, FieldError> {
    value
        .as_str()
        .and_then(parse_datetime)
        .ok_or_else(|| FieldError::coercion(format!("{}: invalid datetime", display(value))))
}

/// Parse RFC 3339, a naive ISO date-time (taken as UTC), or a bare date.
pub(crate) fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// The stored form of every date and timestamp.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn clean_geo(value: Value) -> Cleaned {
    match &value {
        Value::Array(items) if items.len() == 2 && items.iter().all(Value::is_number) => {
            Ok(Some(value))
        }
        Value::Array(items) if items.len() != 2 => Err(FieldError::coercion(format!(
            "too many values: {}",
            display(&value)
        ))),
        _ => Err(FieldError::coercion(format!(
            "{} must be array",
            display(&value)
        ))),
    }
}

fn clean_document_id(value: &Value) -> Result<String, FieldError> {
    let id = match value {
        Value::String(s) => s.trim(),
        Value::Object(map) => map.get("_id").and_then(Value::as_str).unwrap_or(""),
        _ => {
            return Err(FieldError::coercion(format!(
                "{} is not a valid document id",
                display(value)
            )))
        }
    };
    if id.is_empty() {
        return Err(FieldError::coercion("value cannot be empty"));
    }
    Ok(id.to_string())
}

/// Normalize a North American phone number: area code, trunk, line and an
/// optional extension, separated by anything.
pub(crate) fn parse_phone(number: &str, append_plus_one: bool) -> Option<String> {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    let pattern = PHONE.get_or_init(|| {
        Regex::new(r"(\d{3})\D*(\d{3})\D*(\d{4})\D*(\d*)$").expect("static phone pattern")
    });

    let caps = pattern.captures(number)?;
    let digits: String = (1..=4)
        .filter_map(|i| caps.get(i))
        .map(|m| m.as_str())
        .collect();

    Some(match (append_plus_one, digits.starts_with('1')) {
        (false, _) => digits,
        (true, true) => format!("+{digits}"),
        (true, false) => format!("+1{digits}"),
    })
}

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(
            r"(?i)^[-!#$%&'*/=?^_`{}|~0-9A-Z]+(\.[-!#$%&'*/=?^_`{}|~0-9A-Z]+)*@(?:[A-Z0-9-]+\.)+[A-Z]{2,6}$",
        )
        .expect("static email pattern")
    })
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
