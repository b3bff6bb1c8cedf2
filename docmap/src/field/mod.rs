// Leaf fields - cleaning, baseline tracking, per-field errors

mod clean;

pub(crate) use clean::{format_datetime, parse_datetime};

use crate::document::is_empty_value;
use crate::driver::Counters;
use crate::error::{FieldError, Result};
use crate::schema::{FieldKind, FieldSpec};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

/// A typed scalar slot with a clean baseline and a current value.
#[derive(Debug, Clone)]
pub struct Field {
    spec: Arc<FieldSpec>,
    value: Option<Value>,
    baseline: Option<Value>,
    error: Option<FieldError>,
}

impl Field {
    pub fn new(spec: Arc<FieldSpec>) -> Self {
        let mut field = Field {
            spec,
            value: None,
            baseline: None,
            error: None,
        };
        if let Some(default) = field.spec.default.clone() {
            match clean::clean(&field.spec, default) {
                Ok(value) => {
                    field.baseline = value.clone();
                    field.value = value;
                }
                Err(e) => field.error = Some(e),
            }
        }
        field
    }

    pub fn spec(&self) -> &FieldSpec {
        &self.spec
    }

    pub fn kind(&self) -> &FieldKind {
        &self.spec.kind
    }

    /// Assign a new value. A failure leaves the field exactly as it was.
    pub fn assign(&mut self, value: Value) -> std::result::Result<(), FieldError> {
        self.apply(value, false)
    }

    /// Map a value coming from storage. Failures are recorded on the field
    /// instead of being returned.
    pub fn map(&mut self, value: Value, initial: bool) {
        if let Err(e) = self.apply(value.clone(), initial) {
            if initial {
                // The store holds the raw value, so any later fix must diff.
                self.baseline = Some(value);
            }
            self.error = Some(e);
        }
    }

    fn apply(&mut self, value: Value, initial: bool) -> std::result::Result<(), FieldError> {
        if self.spec.required && is_empty_value(&value) {
            return Err(FieldError::required());
        }
        let cleaned = match (clean::clean(&self.spec, value)?, &self.spec.validator) {
            (Some(value), Some(validator)) => Some(validator.validate(value)?),
            (cleaned, _) => cleaned,
        };

        self.error = None;
        if initial {
            self.baseline = cleaned.clone();
        }
        self.value = cleaned;
        Ok(())
    }

    pub fn get(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value.as_ref().and_then(Value::as_str)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.value.as_ref().and_then(Value::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_ref().and_then(Value::as_f64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_ref().and_then(Value::as_bool)
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        self.as_str().and_then(parse_datetime)
    }

    /// The stored form of this field, `null` when unset.
    pub fn to_json(&self) -> Value {
        self.value.clone().unwrap_or(Value::Null)
    }

    pub fn is_dirty(&self) -> bool {
        self.value != self.baseline
    }

    /// The update entry for this field, if it changed since the baseline.
    pub fn diff(&self, path: &str) -> Option<(String, Value)> {
        self.is_dirty().then(|| (path.to_string(), self.to_json()))
    }

    /// The recorded mapping error, or a missing required value.
    pub fn validate(&self) -> Option<FieldError> {
        if let Some(e) = &self.error {
            return Some(e.clone());
        }
        let missing = match &self.value {
            None => !self.spec.kind.is_filled_on_save(),
            Some(value) => is_empty_value(value),
        };
        (self.spec.required && missing).then(FieldError::required)
    }

    /// Fill values that are only produced at save time.
    pub fn prepare(&mut self, counters: &dyn Counters, key: &str) -> Result<()> {
        if self.value.is_some() {
            return Ok(());
        }
        match &self.spec.kind {
            FieldKind::Timestamp => {
                self.value = Some(Value::String(format_datetime(&Utc::now())));
            }
            FieldKind::AutoIncrement { sequence } => {
                let next = counters.next_value(sequence.as_deref(), key)?;
                self.value = Some(Value::from(next));
            }
            _ => {}
        }
        Ok(())
    }

    pub fn rebaseline(&mut self) {
        self.baseline = self.value.clone();
    }

    pub fn error(&self) -> Option<&FieldError> {
        self.error.as_ref()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{Bound, ErrorKind};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-process counters for tests that exercise save-time filling.
    #[derive(Default)]
    pub(crate) struct TestCounters(Mutex<HashMap<String, i64>>);

    impl Counters for TestCounters {
        fn next_value(&self, sequence: Option<&str>, key: &str) -> Result<i64> {
            let mut map = self.0.lock().unwrap();
            let slot = map
                .entry(format!("{}/{key}", sequence.unwrap_or("sequence")))
                .or_insert(0);
            *slot += 1;
            Ok(*slot)
        }
    }

    fn field(spec: FieldSpec) -> Field {
        Field::new(Arc::new(spec))
    }

    #[test]
    fn test_initial_map_is_clean() {
        let mut f = field(FieldSpec::char());
        f.map(json!("Alice"), true);
        assert_eq!(f.diff("name"), None);

        f.assign(json!("Bob")).unwrap();
        assert_eq!(f.diff("name"), Some(("name".to_string(), json!("Bob"))));
    }

    #[test]
    fn test_required_rejects_empty_values() {
        let mut f = field(FieldSpec::char().required());
        f.map(json!("keep"), true);
        for empty in [json!(""), json!(" "), Value::Null, json!("None")] {
            let err = f.assign(empty).unwrap_err();
            assert_eq!(err.kind, ErrorKind::RequiredFieldMissing);
            assert_eq!(f.get(), Some(&json!("keep")));
        }
        // Direct assignment failures are not recorded.
        assert!(f.error().is_none());
    }

    #[test]
    fn test_integer_bounds() {
        let mut f = field(FieldSpec::integer().min(1.0).max(10.0));
        let err = f.assign(json!(11)).unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::BoundViolation {
                bound: Bound::Max,
                limit: 10.0
            }
        );
        assert_eq!(f.get(), None);

        f.assign(json!(5)).unwrap();
        assert_eq!(f.as_i64(), Some(5));
    }

    #[test]
    fn test_default_is_baseline() {
        let f = field(FieldSpec::integer().default(3));
        assert_eq!(f.as_i64(), Some(3));
        assert!(!f.is_dirty());
    }

    #[test]
    fn test_mapping_failure_is_recorded() {
        let mut f = field(FieldSpec::integer());
        f.map(json!("twelve"), true);
        assert_eq!(
            f.validate().map(|e| e.kind),
            Some(ErrorKind::TypeCoercionFailed)
        );

        f.assign(json!(12)).unwrap();
        assert!(f.validate().is_none());
        assert_eq!(f.diff("n"), Some(("n".to_string(), json!(12))));
    }

    #[test]
    fn test_clearing_a_value_diffs_to_null() {
        let mut f = field(FieldSpec::char());
        f.map(json!("x"), true);
        f.assign(Value::Null).unwrap();
        assert_eq!(f.diff("a.b"), Some(("a.b".to_string(), Value::Null)));
    }

    #[test]
    fn test_validator_can_rewrite_and_reject() {
        let mut f = field(FieldSpec::char().validator(|v: Value| match v.as_str() {
            Some("forbidden") => Err(FieldError::invalid("not allowed")),
            Some(s) => Ok(Value::String(s.to_uppercase())),
            None => Ok(v),
        }));
        f.assign(json!("abc")).unwrap();
        assert_eq!(f.as_str(), Some("ABC"));

        let err = f.assign(json!("forbidden")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validator);
        assert_eq!(f.as_str(), Some("ABC"));
    }

    #[test]
    fn test_required_timestamp_is_filled_on_save() {
        let counters = TestCounters::default();
        let mut f = field(FieldSpec::timestamp().required());
        assert!(f.validate().is_none());

        f.prepare(&counters, "stamp").unwrap();
        assert!(f.as_datetime().is_some());
        assert!(f.is_dirty());
    }

    #[test]
    fn test_auto_increment_draws_once() {
        let counters = TestCounters::default();
        let mut f = field(FieldSpec::auto_increment(None));
        f.prepare(&counters, "number").unwrap();
        assert_eq!(f.as_i64(), Some(1));
        f.rebaseline();

        f.prepare(&counters, "number").unwrap();
        assert_eq!(f.as_i64(), Some(1));
        assert!(!f.is_dirty());

        let mut other = field(FieldSpec::auto_increment(None));
        other.prepare(&counters, "number").unwrap();
        assert_eq!(other.as_i64(), Some(2));
    }
}
