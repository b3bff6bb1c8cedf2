// References to other top-level documents: eager by id, lazy by query

use crate::database::{Cursor, Database};
use crate::document::{is_empty_value, Filter};
use crate::entity::Entity;
use crate::error::{DocMapError, ErrorKind, FieldError, Result};
use crate::schema::{LazySpec, RelationSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// The stored form of an eager reference: `{"type": tag, "id": id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(rename = "type")]
    pub tag: String,
    pub id: String,
}

impl Reference {
    pub fn new(tag: impl Into<String>, id: impl Into<String>) -> Self {
        Reference {
            tag: tag.into(),
            id: id.into(),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({ "type": self.tag, "id": self.id })
    }
}

/// An eager reference slot. The referenced entity is loaded on first
/// dereference and cached until the stored id changes.
#[derive(Debug, Clone)]
pub struct Relation {
    spec: Arc<RelationSpec>,
    reference: Option<Reference>,
    baseline: Value,
    cached: Option<Box<Entity>>,
    error: Option<FieldError>,
}

impl Relation {
    pub fn new(spec: Arc<RelationSpec>) -> Self {
        Relation {
            spec,
            reference: None,
            baseline: Value::Null,
            cached: None,
            error: None,
        }
    }

    pub fn spec(&self) -> &RelationSpec {
        &self.spec
    }

    pub fn reference(&self) -> Option<&Reference> {
        self.reference.as_ref()
    }

    pub fn id(&self) -> Option<&str> {
        self.reference.as_ref().map(|r| r.id.as_str())
    }

    /// Point at a `{"type", "id"}` object, or a bare id when the target type
    /// is declared. `null` clears the reference.
    pub fn assign(&mut self, value: Value) -> std::result::Result<(), FieldError> {
        let reference = self.parse(value)?;
        self.point_at(reference);
        self.error = None;
        Ok(())
    }

    /// Point at a saved entity, which becomes the cached instance.
    pub fn set_entity(&mut self, entity: Entity) -> std::result::Result<(), FieldError> {
        let Some(id) = entity.id() else {
            return Err(FieldError::new(
                ErrorKind::UnsavedReferenceUsedAsKey,
                format!("{} has not been saved", entity.tag()),
            ));
        };
        let reference = Reference::new(entity.tag(), id);
        self.check_target(&reference.tag)?;

        self.reference = Some(reference);
        self.cached = Some(Box::new(entity));
        self.error = None;
        Ok(())
    }

    pub fn map(&mut self, value: &Value, initial: bool) {
        match self.parse(value.clone()) {
            Ok(reference) => {
                self.point_at(reference);
                self.error = None;
                if initial {
                    self.baseline = self.to_json();
                }
            }
            Err(e) => {
                if initial {
                    self.baseline = value.clone();
                }
                self.error = Some(e);
            }
        }
    }

    fn point_at(&mut self, reference: Option<Reference>) {
        let stale = match (&self.cached, &reference) {
            (Some(cached), Some(reference)) => {
                cached.id() != Some(reference.id.as_str()) || cached.tag() != reference.tag
            }
            _ => true,
        };
        if stale {
            self.cached = None;
        }
        self.reference = reference;
    }

    fn parse(&self, value: Value) -> std::result::Result<Option<Reference>, FieldError> {
        if is_empty_value(&value) {
            return match self.spec.required {
                true => Err(FieldError::required()),
                false => Ok(None),
            };
        }

        let reference = match &value {
            Value::Object(map) => {
                let tag = map.get("type").and_then(Value::as_str);
                let id = map.get("id").and_then(Value::as_str);
                match (tag, id) {
                    (Some(tag), Some(id)) if !id.is_empty() => Reference::new(tag, id),
                    _ => {
                        return Err(FieldError::coercion(format!(
                            "{value} is not a valid reference"
                        )))
                    }
                }
            }
            Value::String(id) => match &self.spec.target {
                Some(target) => Reference::new(target.as_str(), id.as_str()),
                None => {
                    return Err(FieldError::coercion(format!(
                        "{id}: a bare id needs a target type"
                    )))
                }
            },
            other => {
                return Err(FieldError::coercion(format!(
                    "{other} is not a valid reference"
                )))
            }
        };
        self.check_target(&reference.tag)?;
        Ok(Some(reference))
    }

    fn check_target(&self, tag: &str) -> std::result::Result<(), FieldError> {
        match &self.spec.target {
            Some(target) if target != tag => Err(FieldError::coercion(format!(
                "expected a reference to {target}, got {tag}"
            ))),
            _ => Ok(()),
        }
    }

    /// Load the referenced entity, or return the cached one.
    pub fn dereference(&mut self, db: &Database) -> Result<&mut Entity> {
        let Some(reference) = &self.reference else {
            return Err(DocMapError::UnresolvedReference(
                "reference has no id".to_string(),
            ));
        };

        let cached = self.cached.as_ref().map_or(false, |entity| {
            entity.id() == Some(reference.id.as_str()) && entity.tag() == reference.tag
        });
        if !cached {
            let entity = db.get(&reference.tag, &reference.id)?.ok_or_else(|| {
                DocMapError::UnresolvedReference(format!("{}/{}", reference.tag, reference.id))
            })?;
            self.cached = Some(Box::new(entity));
        }

        self.cached
            .as_deref_mut()
            .ok_or_else(|| DocMapError::UnresolvedReference("reference has no id".to_string()))
    }

    pub fn cached(&self) -> Option<&Entity> {
        self.cached.as_deref()
    }

    pub fn to_json(&self) -> Value {
        self.reference
            .as_ref()
            .map_or(Value::Null, Reference::to_json)
    }

    pub fn diff(&self, path: &str) -> Option<(String, Value)> {
        let current = self.to_json();
        (current != self.baseline).then(|| (path.to_string(), current))
    }

    pub fn validate(&self) -> Option<FieldError> {
        if let Some(e) = &self.error {
            return Some(e.clone());
        }
        (self.spec.required && self.reference.is_none()).then(FieldError::required)
    }

    /// Save the cached entity first when it has unsaved changes.
    pub(crate) fn cascade(&mut self, db: &Database) -> Result<()> {
        if let Some(entity) = self.cached.as_deref_mut() {
            if entity.is_dirty() {
                log::debug!(
                    "Cascading save to {}/{}",
                    entity.tag(),
                    entity.id().unwrap_or_default()
                );
                entity.save(db)?;
            }
        }
        Ok(())
    }

    pub fn rebaseline(&mut self) {
        self.baseline = self.to_json();
    }
}

/// A query-derived, read-only view onto documents whose foreign key holds
/// the owner's id. Never stored, diffed or validated.
#[derive(Debug, Clone)]
pub struct Lazy {
    spec: Arc<LazySpec>,
}

impl Lazy {
    pub fn new(spec: Arc<LazySpec>) -> Self {
        Lazy { spec }
    }

    pub fn spec(&self) -> &LazySpec {
        &self.spec
    }

    /// The base query plus `extra`, constrained to the owner's id.
    pub fn filter(&self, owner_id: Option<&str>, extra: Filter) -> Result<Filter> {
        let owner_id = owner_id.ok_or_else(|| {
            DocMapError::UnsavedReferenceUsedAsKey(format!(
                "{}.{} needs a saved owner",
                self.spec.target, self.spec.key
            ))
        })?;

        let mut filter = self.spec.query.clone();
        filter.extend(extra);
        filter.insert(self.spec.key.clone(), Value::String(owner_id.to_string()));
        Ok(filter)
    }

    pub fn resolve(&self, db: &Database, owner_id: Option<&str>, extra: Filter) -> Result<Cursor> {
        db.find(&self.spec.target, self.filter(owner_id, extra)?)
    }
}
