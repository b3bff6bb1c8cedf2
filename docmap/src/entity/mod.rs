// Top-level documents - identity, incremental assembly, save/remove

use crate::composite::Composite;
use crate::container::Container;
use crate::database::{Cursor, Database};
use crate::document::{
    self, Delta, Document, Filter, ACTIVE_KEY, CREATED_AT_KEY, ID_KEY, MODIFIED_AT_KEY,
};
use crate::error::{DocMapError, ErrorReport, Result};
use crate::field::{format_datetime, parse_datetime, Field};
use crate::relation::Relation;
use crate::schema::{EntitySchema, FieldKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Where an entity is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    /// Constructed, never loaded or saved.
    New,
    /// Receiving stored pairs; not every declared key has arrived yet.
    AwaitingFields,
    Loaded,
    /// Loaded or saved, with unsaved changes.
    Dirty,
    Persisted,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    New,
    Awaiting,
    Loaded,
    Persisted,
    Removed,
}

/// A composite with identity, metadata and a lifecycle.
#[derive(Debug, Clone)]
pub struct Entity {
    schema: Arc<EntitySchema>,
    root: Composite,
    id: Option<String>,
    created_at: Option<String>,
    modified_at: Option<String>,
    active: bool,
    phase: Phase,
    buffered: Document,
}

impl Entity {
    pub fn new(schema: Arc<EntitySchema>) -> Self {
        let root = Composite::new(schema.root().clone());
        Entity {
            schema,
            root,
            id: None,
            created_at: None,
            modified_at: None,
            active: true,
            phase: Phase::New,
            buffered: Document::new(),
        }
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    pub fn tag(&self) -> &str {
        self.schema.tag()
    }

    pub fn collection(&self) -> &str {
        self.schema.collection()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at.as_deref().and_then(parse_datetime)
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.modified_at.as_deref().and_then(parse_datetime)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn state(&self) -> EntityState {
        match self.phase {
            Phase::New => EntityState::New,
            Phase::Awaiting => EntityState::AwaitingFields,
            Phase::Removed => EntityState::Removed,
            Phase::Loaded | Phase::Persisted if self.root.is_dirty() => EntityState::Dirty,
            Phase::Loaded => EntityState::Loaded,
            Phase::Persisted => EntityState::Persisted,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.phase, Phase::Loaded | Phase::Persisted)
    }

    /// Whether saving would write anything.
    pub fn is_dirty(&self) -> bool {
        self.id.is_none() || self.root.is_dirty()
    }

    /// Accept one stored key/value pair.
    ///
    /// Pairs are buffered until every declared key has been seen and the id
    /// is known; the buffer is then mapped as the initial state, exactly once.
    /// Later pairs are mapped one at a time.
    pub fn receive(&mut self, key: &str, value: Value) {
        match key {
            ID_KEY => {
                self.id = match value {
                    Value::String(id) => Some(id),
                    Value::Null => None,
                    other => Some(other.to_string()),
                };
            }
            CREATED_AT_KEY => self.created_at = value.as_str().map(str::to_string),
            MODIFIED_AT_KEY => self.modified_at = value.as_str().map(str::to_string),
            ACTIVE_KEY => self.active = value.as_bool().unwrap_or(self.active),
            _ if self.is_loaded() => {
                if !self.root.map_key(key, &value, true) {
                    log::debug!("Ignoring undeclared key '{key}' for {}", self.tag());
                }
            }
            _ => {
                self.buffered.insert(key.to_string(), value);
            }
        }

        if self.phase == Phase::New {
            self.phase = Phase::Awaiting;
        }
        if self.phase == Phase::Awaiting && self.id.is_some() && self.has_declared_keys() {
            self.complete();
        }
    }

    fn has_declared_keys(&self) -> bool {
        self.schema
            .declared_keys()
            .iter()
            .all(|key| self.buffered.contains_key(key))
    }

    fn complete(&mut self) {
        let raw = Value::Object(std::mem::take(&mut self.buffered));
        self.root.map(&raw, true);
        self.phase = Phase::Loaded;
    }

    /// Map whatever was buffered, for stored documents missing some keys.
    pub fn finish(&mut self) {
        if self.phase == Phase::Awaiting {
            self.complete();
        }
    }

    /// Map a complete stored document.
    pub fn load(&mut self, document: Document) {
        for (key, value) in document::to_pairs(document) {
            self.receive(&key, value);
        }
        self.finish();
    }

    pub fn root(&self) -> &Composite {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Composite {
        &mut self.root
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            ID_KEY => self.id.clone().map(Value::String),
            _ => self.root.get(name),
        }
    }

    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        self.root.set(name, value)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.root.field(name)
    }

    pub fn composite(&self, name: &str) -> Option<&Composite> {
        self.root.composite(name)
    }

    pub fn composite_mut(&mut self, name: &str) -> Option<&mut Composite> {
        self.root.composite_mut(name)
    }

    pub fn container(&self, name: &str) -> Option<&Container> {
        self.root.container(name)
    }

    pub fn container_mut(&mut self, name: &str) -> Option<&mut Container> {
        self.root.container_mut(name)
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.root.relation(name)
    }

    pub fn relation_mut(&mut self, name: &str) -> Option<&mut Relation> {
        self.root.relation_mut(name)
    }

    /// Load (or return the cached) entity an eager reference points at.
    pub fn dereference(&mut self, name: &str, db: &Database) -> Result<&mut Entity> {
        let owner = self.tag().to_string();
        self.root
            .relation_mut(name)
            .ok_or_else(|| DocMapError::UnknownField {
                owner,
                field: name.to_string(),
            })?
            .dereference(db)
    }

    /// Load the document a `document_id` field names, using the field's
    /// target type. `Ok(None)` when the field is unset.
    pub fn resolve_id(&self, name: &str, db: &Database) -> Result<Option<Entity>> {
        let field = self.root.field(name).ok_or_else(|| self.unknown(name))?;
        let FieldKind::DocumentId { target } = field.kind() else {
            return Err(self.unknown(name));
        };
        let Some(id) = field.as_str() else {
            return Ok(None);
        };
        let target = target.as_deref().ok_or_else(|| {
            DocMapError::UnresolvedReference(format!("{}.{name} has no target type", self.tag()))
        })?;
        match db.get(target, id)? {
            Some(entity) => Ok(Some(entity)),
            None => Err(DocMapError::UnresolvedReference(format!("{target}/{id}"))),
        }
    }

    /// Documents of a lazy relation, filtered to this entity's id.
    pub fn lazy(&self, name: &str, db: &Database, extra: Filter) -> Result<Cursor> {
        self.root
            .lazy(name)
            .ok_or_else(|| self.unknown(name))?
            .resolve(db, self.id(), extra)
    }

    fn unknown(&self, name: &str) -> DocMapError {
        DocMapError::UnknownField {
            owner: self.tag().to_string(),
            field: name.to_string(),
        }
    }

    pub fn validate(&self) -> ErrorReport {
        self.root.collect_errors(None)
    }

    /// The partial update a save would issue now, before save-time filling.
    pub fn save_delta(&self) -> Delta {
        let mut delta = self.root.save_delta(None);
        if !delta.is_empty() {
            delta.insert(
                MODIFIED_AT_KEY.to_string(),
                Value::String(format_datetime(&Utc::now())),
            );
        }
        delta
    }

    /// The full stored form, including reserved keys.
    pub fn to_document(&self) -> Document {
        let mut doc = self.root.to_json();
        if let Some(id) = &self.id {
            doc.insert(ID_KEY.to_string(), Value::String(id.clone()));
        }
        if let Some(created_at) = &self.created_at {
            doc.insert(CREATED_AT_KEY.to_string(), Value::String(created_at.clone()));
        }
        if let Some(modified_at) = &self.modified_at {
            doc.insert(MODIFIED_AT_KEY.to_string(), Value::String(modified_at.clone()));
        }
        doc.insert(ACTIVE_KEY.to_string(), Value::Bool(self.active));
        doc
    }

    /// Validate, then insert or write the changed paths. Returns the id.
    pub fn save(&mut self, db: &Database) -> Result<String> {
        if self.phase == Phase::Removed {
            return Err(DocMapError::EntityRemoved {
                collection: self.collection().to_string(),
                id: self.id.clone().unwrap_or_default(),
            });
        }
        self.finish();

        let report = self.validate();
        if !report.is_empty() {
            let err = DocMapError::AggregateValidationFailed(report);
            log::error!("Refusing to save {}: {err}", self.tag());
            return Err(err);
        }

        self.root.cascade(db)?;
        self.root.prepare(db)?;

        let now = format_datetime(&Utc::now());
        let id = match self.id.clone() {
            None => {
                let mut doc = self.root.to_json();
                doc.insert(CREATED_AT_KEY.to_string(), Value::String(now.clone()));
                doc.insert(MODIFIED_AT_KEY.to_string(), Value::String(now.clone()));
                doc.insert(ACTIVE_KEY.to_string(), Value::Bool(true));
                let id = db.driver().insert(self.collection(), doc)?;
                self.id = Some(id.clone());
                self.created_at = Some(now.clone());
                self.modified_at = Some(now);
                self.active = true;
                id
            }
            Some(id) => {
                let mut delta = self.root.save_delta(None);
                if delta.is_empty() {
                    return Ok(id);
                }
                delta.insert(MODIFIED_AT_KEY.to_string(), Value::String(now.clone()));
                db.driver().update(self.collection(), &id, &delta)?;
                self.modified_at = Some(now);
                id
            }
        };

        self.root.rebaseline();
        self.phase = Phase::Persisted;
        Ok(id)
    }

    /// Delete the stored document. The entity is inert afterwards.
    pub fn remove(&mut self, db: &Database) -> Result<()> {
        let Some(id) = &self.id else {
            return Err(DocMapError::NotPersisted(self.tag().to_string()));
        };
        db.driver().delete(self.collection(), id)?;
        self.phase = Phase::Removed;
        Ok(())
    }
}
