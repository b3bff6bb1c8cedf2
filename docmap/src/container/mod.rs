// Ordered, typed, length-bounded sequences of fields or composites

use crate::composite::Composite;
use crate::database::Database;
use crate::document::{join_path, Delta};
use crate::driver::Counters;
use crate::error::{ErrorKind, ErrorReport, FieldError, Result};
use crate::field::Field;
use crate::schema::{ElementSpec, ListSpec};
use serde_json::Value;
use std::sync::Arc;

/// One element of a container.
#[derive(Debug, Clone)]
pub enum Element {
    Field(Field),
    Composite(Composite),
    /// A stored value none of the declared element types accepted.
    Raw { value: Value, original: Value },
}

impl Element {
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Element::Field(field) => Some(field.kind().type_name()),
            Element::Composite(composite) => Some(composite.name()),
            Element::Raw { .. } => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Element::Field(field) => field.to_json(),
            Element::Composite(composite) => Value::Object(composite.to_json()),
            Element::Raw { value, .. } => value.clone(),
        }
    }

    pub fn as_field(&self) -> Option<&Field> {
        match self {
            Element::Field(field) => Some(field),
            _ => None,
        }
    }

    pub fn as_composite(&self) -> Option<&Composite> {
        match self {
            Element::Composite(composite) => Some(composite),
            _ => None,
        }
    }

    pub fn as_composite_mut(&mut self) -> Option<&mut Composite> {
        match self {
            Element::Composite(composite) => Some(composite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Container {
    spec: Arc<ListSpec>,
    elements: Vec<Element>,
    baseline_len: usize,
    /// Whether the stored document holds an array for this container.
    stored: bool,
    /// Set by a bulk assignment or a removal; the next diff rewrites the
    /// whole array.
    replaced: bool,
    error: Option<FieldError>,
}

impl Container {
    pub fn new(spec: Arc<ListSpec>) -> Self {
        Container {
            spec,
            elements: Vec::new(),
            baseline_len: 0,
            stored: false,
            replaced: false,
            error: None,
        }
    }

    pub fn spec(&self) -> &ListSpec {
        &self.spec
    }

    /// Append an element after checking its type and the length limit.
    pub fn append(&mut self, element: Element) -> std::result::Result<(), FieldError> {
        let element = self.admit(element)?;
        self.check_length(self.elements.len() + 1)?;
        self.elements.push(element);
        Ok(())
    }

    /// Elements built from a declared element spec go in as they are. Any
    /// other element of an accepted type is rebuilt through the declared
    /// specs of that type, so their bounds and patterns apply.
    fn admit(&self, element: Element) -> std::result::Result<Element, FieldError> {
        let Some(type_name) = element
            .type_name()
            .filter(|name| self.spec.accepts(name))
            .map(str::to_string)
        else {
            return Err(FieldError::new(
                ErrorKind::ContainerTypeMismatch,
                format!(
                    "{} is not an allowed type",
                    element.type_name().unwrap_or("raw value")
                ),
            ));
        };

        let declared = self.spec.items.iter().any(|item| match (item, &element) {
            (ElementSpec::Field(spec), Element::Field(field)) => {
                std::ptr::eq(spec.as_ref(), field.spec())
            }
            (ElementSpec::Composite(schema), Element::Composite(composite)) => {
                Arc::ptr_eq(schema, composite.schema())
            }
            _ => false,
        });
        if declared {
            return Ok(element);
        }
        self.build_as(&element.to_json(), false, Some(&type_name))
    }

    /// Build an element from a plain value and append it.
    pub fn push(&mut self, value: Value) -> std::result::Result<(), FieldError> {
        let element = self.build(&value, false)?;
        self.append(element)
    }

    /// Replace every element. Nothing changes unless all values are accepted.
    pub fn assign(&mut self, value: Value) -> std::result::Result<(), FieldError> {
        let items = match value {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                return Err(FieldError::new(
                    ErrorKind::ContainerTypeMismatch,
                    format!("{other} must be an array"),
                ))
            }
        };
        self.check_length(items.len())?;
        let elements = items
            .iter()
            .map(|item| self.build(item, false))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.elements = elements;
        self.replaced = true;
        self.error = None;
        Ok(())
    }

    /// Map a stored array. Elements no declared type accepts are kept raw.
    pub fn map(&mut self, value: &Value, initial: bool) {
        let items: &[Value] = match value {
            Value::Array(items) => items,
            Value::Null => &[],
            other => {
                self.error = Some(FieldError::new(
                    ErrorKind::ContainerTypeMismatch,
                    format!("{other} must be an array"),
                ));
                return;
            }
        };

        self.elements = items
            .iter()
            .map(|item| {
                self.build(item, initial).unwrap_or_else(|e| {
                    log::warn!("Keeping list element as a raw value: {e}");
                    Element::Raw {
                        value: item.clone(),
                        original: item.clone(),
                    }
                })
            })
            .collect();
        self.error = None;
        if initial {
            self.baseline_len = self.elements.len();
            self.stored = value.is_array();
            self.replaced = false;
        } else {
            self.replaced = true;
        }
    }

    fn build(&self, value: &Value, initial: bool) -> std::result::Result<Element, FieldError> {
        self.build_as(value, initial, None)
    }

    /// Try each declared element type in order, or only those named `only`.
    fn build_as(
        &self,
        value: &Value,
        initial: bool,
        only: Option<&str>,
    ) -> std::result::Result<Element, FieldError> {
        let mut last_error = None;
        let items = self
            .spec
            .items
            .iter()
            .filter(|item| only.map_or(true, |name| item.type_name() == name));
        for item in items {
            match item {
                ElementSpec::Field(spec) => {
                    let mut field = Field::new(spec.clone());
                    match field.assign(value.clone()) {
                        Ok(()) => {
                            if initial {
                                field.rebaseline();
                            }
                            return Ok(Element::Field(field));
                        }
                        Err(e) => last_error = Some(e),
                    }
                }
                ElementSpec::Composite(schema) if value.is_object() => {
                    let mut composite = Composite::new(schema.clone());
                    composite.map(value, initial);
                    return Ok(Element::Composite(composite));
                }
                ElementSpec::Composite(schema) => {
                    last_error = Some(FieldError::new(
                        ErrorKind::ContainerTypeMismatch,
                        format!("{} must be an object", schema.name()),
                    ));
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            FieldError::new(ErrorKind::ContainerTypeMismatch, "no element types declared")
        }))
    }

    fn check_length(&self, len: usize) -> std::result::Result<(), FieldError> {
        match self.spec.length {
            Some(limit) if len > limit => Err(FieldError::new(
                ErrorKind::ContainerLengthExceeded { limit },
                format!("exceeds maximum length of {limit}"),
            )),
            _ => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Element> {
        self.elements.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Element> {
        self.elements.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Element> {
        self.elements.iter()
    }

    /// Removing shifts later elements off their stored indexes, so the
    /// next diff rewrites the whole array.
    pub fn remove(&mut self, index: usize) -> Option<Element> {
        let removed = (index < self.elements.len()).then(|| self.elements.remove(index));
        if removed.is_some() {
            self.replaced = true;
        }
        removed
    }

    pub fn truncate(&mut self, len: usize) {
        if len < self.elements.len() {
            self.elements.truncate(len);
            self.replaced = true;
        }
    }

    pub fn clear(&mut self) {
        self.truncate(0);
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.elements.iter().map(Element::to_json).collect())
    }

    /// Update entries under `path`: per index, or the whole array when it
    /// was replaced, lost elements, or has no stored array to index into.
    pub fn diff(&self, path: &str) -> Delta {
        let mut delta = Delta::new();
        let unstored = !self.stored && !self.elements.is_empty();
        if self.replaced || unstored || self.elements.len() < self.baseline_len {
            delta.insert(path.to_string(), self.to_json());
            return delta;
        }

        for (index, element) in self.elements.iter().enumerate() {
            let element_path = join_path(Some(path), &index.to_string());
            match element {
                Element::Field(field) => {
                    if let Some((key, value)) = field.diff(&element_path) {
                        delta.insert(key, value);
                    }
                }
                Element::Composite(composite) if composite.is_inited() => {
                    delta.extend(composite.save_delta(Some(&element_path)));
                }
                Element::Composite(composite) => {
                    delta.insert(element_path, Value::Object(composite.to_json()));
                }
                Element::Raw { value, original } => {
                    if value != original {
                        delta.insert(element_path, value.clone());
                    }
                }
            }
        }
        delta
    }

    pub fn validate(&self, path: &str) -> ErrorReport {
        let mut report = ErrorReport::new();
        if let Some(e) = &self.error {
            report.insert(path.to_string(), e.clone());
        }
        if let Err(e) = self.check_length(self.elements.len()) {
            report.insert(path.to_string(), e);
        }
        for (index, element) in self.elements.iter().enumerate() {
            let element_path = join_path(Some(path), &index.to_string());
            match element {
                Element::Field(field) => {
                    if let Some(e) = field.validate() {
                        report.insert(element_path, e);
                    }
                }
                Element::Composite(composite) => {
                    report.extend(composite.collect_errors(Some(&element_path)));
                }
                Element::Raw { .. } => {}
            }
        }
        report
    }

    pub fn prepare(&mut self, counters: &dyn Counters, key: &str) -> Result<()> {
        for element in &mut self.elements {
            match element {
                Element::Field(field) => field.prepare(counters, key)?,
                Element::Composite(composite) => composite.prepare(counters)?,
                Element::Raw { .. } => {}
            }
        }
        Ok(())
    }

    pub(crate) fn cascade(&mut self, db: &Database) -> Result<()> {
        for element in &mut self.elements {
            if let Element::Composite(composite) = element {
                composite.cascade(db)?;
            }
        }
        Ok(())
    }

    pub fn rebaseline(&mut self) {
        for element in &mut self.elements {
            match element {
                Element::Field(field) => field.rebaseline(),
                Element::Composite(composite) => composite.rebaseline(),
                Element::Raw { value, original } => *original = value.clone(),
            }
        }
        self.baseline_len = self.elements.len();
        self.stored = true;
        self.replaced = false;
    }
}

impl<'a> IntoIterator for &'a Container {
    type Item = &'a Element;
    type IntoIter = std::slice::Iter<'a, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CompositeSchema, FieldSpec};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn point() -> Arc<CompositeSchema> {
        CompositeSchema::builder("point")
            .field("x", FieldSpec::integer())
            .field("y", FieldSpec::integer())
            .build()
            .unwrap()
    }

    fn tags() -> Container {
        Container::new(Arc::new(ListSpec::of_fields(FieldSpec::char()).length(3)))
    }

    fn points() -> Container {
        Container::new(Arc::new(ListSpec::of_composites(point())))
    }

    #[test]
    fn test_append_rejects_other_types() {
        let mut list = points();
        list.push(json!({ "x": 1, "y": 2 })).unwrap();

        let field = Field::new(Arc::new(FieldSpec::char()));
        let err = list.append(Element::Field(field)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContainerTypeMismatch);
        assert_eq!(list.len(), 1);

        let raw = Element::Raw {
            value: json!(1),
            original: json!(1),
        };
        assert!(list.append(raw).is_err());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_append_respects_length() {
        let mut list = tags();
        for tag in ["a", "b", "c"] {
            list.push(json!(tag)).unwrap();
        }
        let err = list.push(json!("d")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContainerLengthExceeded { limit: 3 });
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_assign_is_all_or_nothing() {
        let mut list = Container::new(Arc::new(ListSpec::of_fields(FieldSpec::integer())));
        list.map(&json!([1, 2]), true);

        assert!(list.assign(json!([3, "four"])).is_err());
        assert_eq!(list.to_json(), json!([1, 2]));

        list.assign(json!([3, 4])).unwrap();
        assert_eq!(list.diff("nums"), Delta::from_iter([("nums".to_string(), json!([3, 4]))]));
    }

    #[test]
    fn test_map_keeps_malformed_elements_raw() {
        let mut list = points();
        list.map(&json!([{ "x": 1, "y": 2 }, "garbage"]), true);

        assert_eq!(list.len(), 2);
        assert!(matches!(list.get(1), Some(Element::Raw { .. })));
        assert!(list.validate("pts").is_empty());
        assert!(list.diff("pts").is_empty());
        assert_eq!(list.to_json(), json!([{ "x": 1, "y": 2 }, "garbage"]));
    }

    #[test]
    fn test_map_non_array_is_reported() {
        let mut list = tags();
        list.map(&json!("nope"), true);
        let report = list.validate("tags");
        assert_eq!(
            report.get("tags").map(|e| e.kind.clone()),
            Some(ErrorKind::ContainerTypeMismatch)
        );
    }

    #[test]
    fn test_diff_per_index() {
        let mut list = points();
        list.map(&json!([{ "x": 1, "y": 2 }, { "x": 3, "y": 4 }]), true);

        list.get_mut(1)
            .and_then(Element::as_composite_mut)
            .unwrap()
            .set("y", json!(5))
            .unwrap();
        list.push(json!({ "x": 6, "y": 7 })).unwrap();

        let delta = list.diff("pts");
        assert_eq!(
            delta,
            Delta::from_iter([
                ("pts.1.y".to_string(), json!(5)),
                ("pts.2".to_string(), json!({ "x": 6, "y": 7 })),
            ])
        );
    }

    #[test]
    fn test_shrinking_rewrites_whole_array() {
        let mut list = tags();
        list.map(&json!(["a", "b", "c"]), true);
        list.remove(0);
        assert_eq!(
            list.diff("tags"),
            Delta::from_iter([("tags".to_string(), json!(["b", "c"]))])
        );

        list.rebaseline();
        assert!(list.diff("tags").is_empty());
    }

    #[test]
    fn test_stored_overlong_array_is_reported() {
        let mut list = tags();
        list.map(&json!(["a", "b", "c", "d"]), true);
        assert_eq!(list.len(), 4);
        let report = list.validate("tags");
        assert_eq!(
            report.get("tags").map(|e| e.kind.clone()),
            Some(ErrorKind::ContainerLengthExceeded { limit: 3 })
        );
    }

    #[test]
    fn test_raw_edit_is_diffed() {
        let mut list = Container::new(Arc::new(ListSpec::of_fields(FieldSpec::integer())));
        list.map(&json!([1, "x"]), true);
        if let Some(Element::Raw { value, .. }) = list.get_mut(1) {
            *value = json!("y");
        }
        assert_eq!(
            list.diff("n"),
            Delta::from_iter([("n.1".to_string(), json!("y"))])
        );
    }

    #[test]
    fn test_remove_then_push_rewrites_whole_array() {
        let mut list = tags();
        list.map(&json!(["a", "b", "c"]), true);
        list.remove(0);
        list.push(json!("x")).unwrap();

        assert_eq!(list.len(), 3);
        assert_eq!(
            list.diff("tags"),
            Delta::from_iter([("tags".to_string(), json!(["b", "c", "x"]))])
        );
    }

    #[test]
    fn test_clear_then_refill_rewrites_whole_array() {
        let mut list = tags();
        list.map(&json!(["a", "b"]), true);
        list.clear();
        list.push(json!("c")).unwrap();
        list.push(json!("d")).unwrap();
        assert_eq!(
            list.diff("tags"),
            Delta::from_iter([("tags".to_string(), json!(["c", "d"]))])
        );

        // Nothing removed, nothing to rewrite.
        let mut list = tags();
        list.map(&json!(["a"]), true);
        list.truncate(5);
        assert!(list.diff("tags").is_empty());
    }

    #[test]
    fn test_push_without_stored_array_writes_whole_array() {
        let mut list = tags();
        assert!(list.diff("tags").is_empty());
        list.push(json!("a")).unwrap();
        assert_eq!(
            list.diff("tags"),
            Delta::from_iter([("tags".to_string(), json!(["a"]))])
        );

        let mut list = tags();
        list.map(&Value::Null, true);
        list.push(json!("a")).unwrap();
        assert_eq!(
            list.diff("tags"),
            Delta::from_iter([("tags".to_string(), json!(["a"]))])
        );

        // Once written, later pushes go per index again.
        list.rebaseline();
        list.push(json!("b")).unwrap();
        assert_eq!(
            list.diff("tags"),
            Delta::from_iter([("tags.1".to_string(), json!("b"))])
        );
    }

    #[test]
    fn test_append_applies_declared_bounds() {
        let mut list = Container::new(Arc::new(ListSpec::of_fields(FieldSpec::char().max(3.0))));

        let mut loose = Field::new(Arc::new(FieldSpec::char()));
        loose.assign(json!("far too long")).unwrap();
        let err = list.append(Element::Field(loose)).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::BoundViolation { .. }));
        assert!(list.is_empty());

        let mut short = Field::new(Arc::new(FieldSpec::char()));
        short.assign(json!("ok")).unwrap();
        list.append(Element::Field(short)).unwrap();
        assert_eq!(list.to_json(), json!(["ok"]));
        assert!(list.validate("t").is_empty());
    }

    #[test]
    fn test_append_rebuilds_foreign_composites() {
        let mut list = points();
        let mut other = Composite::new(point());
        other.set("x", json!(1)).unwrap();
        list.append(Element::Composite(other)).unwrap();
        assert_eq!(list.len(), 1);
        assert!(Arc::ptr_eq(
            list.get(0).and_then(Element::as_composite).unwrap().schema(),
            match &list.spec().items[0] {
                ElementSpec::Composite(schema) => schema,
                ElementSpec::Field(_) => unreachable!(),
            }
        ));
    }
}
