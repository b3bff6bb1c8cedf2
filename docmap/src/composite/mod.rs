// Named mappings of child slots built from a composite schema

use crate::container::Container;
use crate::database::Database;
use crate::document::{join_path, Delta, Document};
use crate::driver::Counters;
use crate::error::{DocMapError, ErrorReport, FieldError, Result};
use crate::field::Field;
use crate::relation::{Lazy, Relation};
use crate::schema::{CompositeSchema, SlotDef, SlotKind};
use serde_json::{Map, Value};
use std::sync::Arc;

/// The live state of one declared slot.
#[derive(Debug, Clone)]
pub enum Slot {
    Field(Field),
    List(Container),
    Relation(Relation),
    Composite(Composite),
    Lazy(Lazy),
}

impl Slot {
    fn new(kind: &SlotKind) -> Self {
        match kind {
            SlotKind::Field(spec) => Slot::Field(Field::new(spec.clone())),
            SlotKind::List(spec) => Slot::List(Container::new(spec.clone())),
            SlotKind::Relation(spec) => Slot::Relation(Relation::new(spec.clone())),
            SlotKind::Composite(schema) => Slot::Composite(Composite::new(schema.clone())),
            SlotKind::Lazy(spec) => Slot::Lazy(Lazy::new(spec.clone())),
        }
    }

    fn map(&mut self, value: &Value, initial: bool) {
        match self {
            Slot::Field(field) => field.map(value.clone(), initial),
            Slot::List(list) => list.map(value, initial),
            Slot::Relation(relation) => relation.map(value, initial),
            Slot::Composite(composite) => composite.map(value, initial),
            Slot::Lazy(_) => {}
        }
    }

    /// The stored form, `None` for lazy relations.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Slot::Field(field) => Some(field.to_json()),
            Slot::List(list) => Some(list.to_json()),
            Slot::Relation(relation) => Some(relation.to_json()),
            Slot::Composite(composite) => Some(Value::Object(composite.to_json())),
            Slot::Lazy(_) => None,
        }
    }
}

/// A composite built fresh from its schema: every instance owns its slots.
#[derive(Debug, Clone)]
pub struct Composite {
    schema: Arc<CompositeSchema>,
    slots: Vec<Slot>,
    /// Ad hoc properties set under undeclared names. Never stored.
    extras: Map<String, Value>,
    inited: bool,
}

impl Composite {
    pub fn new(schema: Arc<CompositeSchema>) -> Self {
        let slots = schema.slots().iter().map(|def| Slot::new(&def.kind)).collect();
        Composite {
            schema,
            slots,
            extras: Map::new(),
            inited: false,
        }
    }

    pub fn schema(&self) -> &Arc<CompositeSchema> {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    /// Whether this composite has a stored baseline (loaded or saved).
    pub fn is_inited(&self) -> bool {
        self.inited
    }

    fn defs(&self) -> impl Iterator<Item = (&SlotDef, &Slot)> + '_ {
        self.schema.slots().iter().zip(&self.slots)
    }

    /// Map a stored object onto the declared slots. Missing keys are skipped
    /// and per-slot failures stay on the slot.
    pub fn map(&mut self, raw: &Value, initial: bool) {
        let Some(raw) = raw.as_object() else {
            log::debug!("Not mapping {}: stored value is not an object", self.name());
            return;
        };
        for (def, slot) in self.schema.slots().iter().zip(&mut self.slots) {
            if let Some(value) = raw.get(def.wire_key()) {
                slot.map(value, initial);
            }
        }
        if initial {
            self.inited = true;
        }
    }

    /// Map one stored key. Returns false when no slot uses that key.
    pub fn map_key(&mut self, key: &str, value: &Value, initial: bool) -> bool {
        let position = self
            .schema
            .slots()
            .iter()
            .position(|def| !def.is_lazy() && def.wire_key() == key);
        match position {
            Some(position) => {
                self.slots[position].map(value, initial);
                true
            }
            None => false,
        }
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.schema.position(name).map(|i| &self.slots[i])
    }

    pub fn slot_mut(&mut self, name: &str) -> Option<&mut Slot> {
        self.schema.position(name).map(|i| &mut self.slots[i])
    }

    /// Assign to a declared slot, or store an ad hoc property. A dotted name
    /// reaches into embedded composites.
    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        if let Some((head, rest)) = name.split_once('.') {
            let owner = self.name().to_string();
            return match self.slot_mut(head) {
                Some(Slot::Composite(child)) => {
                    child.set(rest, value).map_err(|e| under(head, e))
                }
                _ => Err(DocMapError::UnknownField {
                    owner,
                    field: name.to_string(),
                }),
            };
        }

        let result = match self.slot_mut(name) {
            Some(Slot::Field(field)) => field.assign(value),
            Some(Slot::List(list)) => list.assign(value),
            Some(Slot::Relation(relation)) => relation.assign(value),
            Some(Slot::Composite(child)) => match value {
                Value::Object(object) => {
                    return child.assign(object).map_err(|e| under(name, e));
                }
                other => Err(FieldError::coercion(format!("{other} must be an object"))),
            },
            Some(Slot::Lazy(_)) => Err(FieldError::coercion("lazy relations are read-only")),
            None => {
                self.extras.insert(name.to_string(), value);
                Ok(())
            }
        };
        result.map_err(|e| DocMapError::field(name, e))
    }

    /// Set every key of `object`, all or nothing. Keys may be slot names or
    /// stored keys.
    fn assign(&mut self, object: Map<String, Value>) -> Result<()> {
        let mut updated = self.clone();
        for (key, value) in object {
            let name = match self.schema.position(&key) {
                Some(_) => key,
                None => self
                    .schema
                    .slots()
                    .iter()
                    .find(|def| def.wire_key() == key)
                    .map_or(key, |def| def.name.clone()),
            };
            updated.set(&name, value)?;
        }
        *self = updated;
        Ok(())
    }

    /// Read a leaf value, a slot's stored form, or an ad hoc property.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some((head, rest)) = name.split_once('.') {
            return match self.slot(head) {
                Some(Slot::Composite(child)) => child.get(rest),
                _ => None,
            };
        }
        match self.slot(name) {
            Some(Slot::Field(field)) => field.get().cloned(),
            Some(slot) => slot.to_json(),
            None => self.extras.get(name).cloned(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        match self.slot(name)? {
            Slot::Field(field) => Some(field),
            _ => None,
        }
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        match self.slot_mut(name)? {
            Slot::Field(field) => Some(field),
            _ => None,
        }
    }

    pub fn composite(&self, name: &str) -> Option<&Composite> {
        match self.slot(name)? {
            Slot::Composite(child) => Some(child),
            _ => None,
        }
    }

    pub fn composite_mut(&mut self, name: &str) -> Option<&mut Composite> {
        match self.slot_mut(name)? {
            Slot::Composite(child) => Some(child),
            _ => None,
        }
    }

    pub fn container(&self, name: &str) -> Option<&Container> {
        match self.slot(name)? {
            Slot::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn container_mut(&mut self, name: &str) -> Option<&mut Container> {
        match self.slot_mut(name)? {
            Slot::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        match self.slot(name)? {
            Slot::Relation(relation) => Some(relation),
            _ => None,
        }
    }

    pub fn relation_mut(&mut self, name: &str) -> Option<&mut Relation> {
        match self.slot_mut(name)? {
            Slot::Relation(relation) => Some(relation),
            _ => None,
        }
    }

    pub fn lazy(&self, name: &str) -> Option<&Lazy> {
        match self.slot(name)? {
            Slot::Lazy(lazy) => Some(lazy),
            _ => None,
        }
    }

    pub fn extras(&self) -> &Map<String, Value> {
        &self.extras
    }

    /// Every declared, non-lazy slot under its wire key.
    pub fn to_json(&self) -> Document {
        self.defs()
            .filter_map(|(def, slot)| Some((def.wire_key().to_string(), slot.to_json()?)))
            .collect()
    }

    /// Changed paths under `namespace`, ready for a `$set` update.
    pub fn save_delta(&self, namespace: Option<&str>) -> Delta {
        let mut delta = Delta::new();
        for (def, slot) in self.defs() {
            let path = join_path(namespace, def.wire_key());
            match slot {
                Slot::Field(field) => delta.extend(field.diff(&path)),
                Slot::List(list) => delta.extend(list.diff(&path)),
                Slot::Relation(relation) => delta.extend(relation.diff(&path)),
                Slot::Composite(child) if child.is_inited() => {
                    delta.extend(child.save_delta(Some(&path)));
                }
                Slot::Composite(child) => {
                    // Never stored: write it whole once anything is set.
                    if !child.save_delta(None).is_empty() {
                        delta.insert(path, Value::Object(child.to_json()));
                    }
                }
                Slot::Lazy(_) => {}
            }
        }
        delta
    }

    pub fn is_dirty(&self) -> bool {
        !self.save_delta(None).is_empty()
    }

    /// Every slot error, keyed by dotted path under `namespace`.
    pub fn collect_errors(&self, namespace: Option<&str>) -> ErrorReport {
        let mut report = ErrorReport::new();
        for (def, slot) in self.defs() {
            let path = join_path(namespace, def.wire_key());
            match slot {
                Slot::Field(field) => report.extend(field.validate().map(|e| (path, e))),
                Slot::List(list) => report.extend(list.validate(&path)),
                Slot::Relation(relation) => report.extend(relation.validate().map(|e| (path, e))),
                Slot::Composite(child) => report.extend(child.collect_errors(Some(&path))),
                Slot::Lazy(_) => {}
            }
        }
        report
    }

    /// Fill save-time values such as timestamps and auto-increments.
    pub fn prepare(&mut self, counters: &dyn Counters) -> Result<()> {
        for (def, slot) in self.schema.slots().iter().zip(&mut self.slots) {
            match slot {
                Slot::Field(field) => field.prepare(counters, def.wire_key())?,
                Slot::List(list) => list.prepare(counters, def.wire_key())?,
                Slot::Composite(child) => child.prepare(counters)?,
                Slot::Relation(_) | Slot::Lazy(_) => {}
            }
        }
        Ok(())
    }

    /// Save referenced entities with pending changes, depth first.
    pub(crate) fn cascade(&mut self, db: &Database) -> Result<()> {
        for slot in &mut self.slots {
            match slot {
                Slot::Relation(relation) => relation.cascade(db)?,
                Slot::List(list) => list.cascade(db)?,
                Slot::Composite(child) => child.cascade(db)?,
                Slot::Field(_) | Slot::Lazy(_) => {}
            }
        }
        Ok(())
    }

    pub fn rebaseline(&mut self) {
        for slot in &mut self.slots {
            match slot {
                Slot::Field(field) => field.rebaseline(),
                Slot::List(list) => list.rebaseline(),
                Slot::Relation(relation) => relation.rebaseline(),
                Slot::Composite(child) => child.rebaseline(),
                Slot::Lazy(_) => {}
            }
        }
        self.inited = true;
    }
}

/// Re-root a field failure under the slot `head`.
fn under(head: &str, error: DocMapError) -> DocMapError {
    match error {
        DocMapError::Field { path, source } => {
            DocMapError::field(join_path(Some(head), &path), source)
        }
        other => other,
    }
}
