use crate::document::{is_reserved, Filter};
use crate::error::{DocMapError, FieldError, Result};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

/// Custom validation hook run after a field's own cleaning.
///
/// Receives the cleaned value and returns the value to store, which may be
/// rewritten. Any closure `Fn(Value) -> Result<Value, FieldError>` qualifies.
pub trait Validator: Send + Sync {
    fn validate(&self, value: Value) -> std::result::Result<Value, FieldError>;
}

impl<F> Validator for F
where
    F: Fn(Value) -> std::result::Result<Value, FieldError> + Send + Sync,
{
    fn validate(&self, value: Value) -> std::result::Result<Value, FieldError> {
        self(value)
    }
}

/// One allowed value of a choice field, optionally with a display label.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub value: String,
    pub label: Option<String>,
}

impl Choice {
    pub fn new(value: impl Into<String>) -> Self {
        Choice {
            value: value.into(),
            label: None,
        }
    }

    pub fn labeled(value: impl Into<String>, label: impl Into<String>) -> Self {
        Choice {
            value: value.into(),
            label: Some(label.into()),
        }
    }
}

/// The cleaning rules a leaf field applies.
#[derive(Debug, Clone)]
pub enum FieldKind {
    Char,
    Integer,
    Float,
    Boolean,
    Date,
    /// A date stamped with the save time when still unset.
    Timestamp,
    /// A `[x, y]` coordinate pair.
    Geo,
    Choice(Vec<Choice>),
    Regex {
        pattern: Regex,
        message: Option<String>,
    },
    Email,
    Phone {
        append_plus_one: bool,
    },
    /// The id of another document, optionally of a known type.
    DocumentId {
        target: Option<String>,
    },
    /// An integer drawn from an atomic counter on first save.
    AutoIncrement {
        sequence: Option<String>,
    },
    /// Any JSON value, stored as given.
    Object,
}

impl FieldKind {
    /// Stable name used for container element typing and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Char => "char",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "date",
            FieldKind::Timestamp => "timestamp",
            FieldKind::Geo => "geo",
            FieldKind::Choice(_) => "choice",
            FieldKind::Regex { .. } => "regex",
            FieldKind::Email => "email",
            FieldKind::Phone { .. } => "phone",
            FieldKind::DocumentId { .. } => "document_id",
            FieldKind::AutoIncrement { .. } => "auto_increment",
            FieldKind::Object => "object",
        }
    }

    /// Whether a save fills this field in when it is still empty.
    pub fn is_filled_on_save(&self) -> bool {
        matches!(self, FieldKind::Timestamp | FieldKind::AutoIncrement { .. })
    }
}

/// Static configuration of a leaf field.
#[derive(Clone)]
pub struct FieldSpec {
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub validator: Option<Arc<dyn Validator>>,
}

impl FieldSpec {
    pub fn new(kind: FieldKind) -> Self {
        FieldSpec {
            kind,
            required: false,
            default: None,
            min: None,
            max: None,
            validator: None,
        }
    }

    pub fn char() -> Self {
        Self::new(FieldKind::Char)
    }

    pub fn integer() -> Self {
        Self::new(FieldKind::Integer)
    }

    pub fn float() -> Self {
        Self::new(FieldKind::Float)
    }

    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    pub fn date() -> Self {
        Self::new(FieldKind::Date)
    }

    pub fn timestamp() -> Self {
        Self::new(FieldKind::Timestamp)
    }

    pub fn geo() -> Self {
        Self::new(FieldKind::Geo)
    }

    pub fn choice(choices: impl IntoIterator<Item = Choice>) -> Self {
        Self::new(FieldKind::Choice(choices.into_iter().collect()))
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| DocMapError::Schema(format!("Invalid pattern '{pattern}': {e}")))?;
        Ok(Self::new(FieldKind::Regex {
            pattern,
            message: None,
        }))
    }

    pub fn email() -> Self {
        Self::new(FieldKind::Email)
    }

    pub fn phone() -> Self {
        Self::new(FieldKind::Phone {
            append_plus_one: true,
        })
    }

    pub fn document_id(target: Option<&str>) -> Self {
        Self::new(FieldKind::DocumentId {
            target: target.map(str::to_string),
        })
    }

    pub fn auto_increment(sequence: Option<&str>) -> Self {
        Self::new(FieldKind::AutoIncrement {
            sequence: sequence.map(str::to_string),
        })
    }

    pub fn object() -> Self {
        Self::new(FieldKind::Object)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Replace the message reported when a regex field does not match.
    pub fn message(mut self, text: impl Into<String>) -> Self {
        if let FieldKind::Regex { message, .. } = &mut self.kind {
            *message = Some(text.into());
        }
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("default", &self.default)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

/// A type an ordered container accepts.
#[derive(Debug, Clone)]
pub enum ElementSpec {
    Field(Arc<FieldSpec>),
    Composite(Arc<CompositeSchema>),
}

impl ElementSpec {
    pub fn type_name(&self) -> &str {
        match self {
            ElementSpec::Field(spec) => spec.kind.type_name(),
            ElementSpec::Composite(schema) => schema.name(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListSpec {
    pub items: Vec<ElementSpec>,
    pub length: Option<usize>,
}

impl ListSpec {
    pub fn of(item: ElementSpec) -> Self {
        ListSpec {
            items: vec![item],
            length: None,
        }
    }

    pub fn of_fields(spec: FieldSpec) -> Self {
        Self::of(ElementSpec::Field(Arc::new(spec)))
    }

    pub fn of_composites(schema: Arc<CompositeSchema>) -> Self {
        Self::of(ElementSpec::Composite(schema))
    }

    pub fn or(mut self, item: ElementSpec) -> Self {
        self.items.push(item);
        self
    }

    pub fn length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    pub fn accepts(&self, type_name: &str) -> bool {
        self.items.iter().any(|item| item.type_name() == type_name)
    }
}

/// An eager reference to another top-level document.
#[derive(Debug, Clone, Default)]
pub struct RelationSpec {
    /// Restricts references to one type tag.
    pub target: Option<String>,
    pub required: bool,
}

impl RelationSpec {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn to(target: &str) -> Self {
        RelationSpec {
            target: Some(target.to_string()),
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A query-derived view onto documents whose `key` holds the owner's id.
#[derive(Debug, Clone)]
pub struct LazySpec {
    pub target: String,
    pub key: String,
    pub query: Filter,
}

impl LazySpec {
    pub fn new(target: &str, key: &str) -> Self {
        LazySpec {
            target: target.to_string(),
            key: key.to_string(),
            query: Filter::new(),
        }
    }

    pub fn query(mut self, query: Filter) -> Self {
        self.query = query;
        self
    }
}

#[derive(Debug, Clone)]
pub enum SlotKind {
    Field(Arc<FieldSpec>),
    List(Arc<ListSpec>),
    Relation(Arc<RelationSpec>),
    Composite(Arc<CompositeSchema>),
    Lazy(Arc<LazySpec>),
}

/// A named slot in a composite, with its optional wire alias.
#[derive(Debug, Clone)]
pub struct SlotDef {
    pub name: String,
    pub dbkey: Option<String>,
    pub kind: SlotKind,
}

impl SlotDef {
    /// The key this slot is stored under in the wire document.
    pub fn wire_key(&self) -> &str {
        self.dbkey.as_deref().unwrap_or(&self.name)
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self.kind, SlotKind::Lazy(_))
    }
}

/// The declared shape of a document or embedded sub-document.
#[derive(Debug)]
pub struct CompositeSchema {
    name: String,
    slots: Vec<SlotDef>,
}

impl CompositeSchema {
    pub fn builder(name: &str) -> CompositeBuilder {
        CompositeBuilder {
            name: name.to_string(),
            slots: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slots(&self) -> &[SlotDef] {
        &self.slots
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|slot| slot.name == name)
    }

    pub fn slot(&self, name: &str) -> Option<&SlotDef> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    /// Wire keys a stored document is expected to carry (lazy slots excluded).
    pub fn wire_keys(&self) -> BTreeSet<String> {
        self.slots
            .iter()
            .filter(|slot| !slot.is_lazy())
            .map(|slot| slot.wire_key().to_string())
            .collect()
    }
}

/// Declares the slots of a composite, in order.
#[derive(Debug)]
pub struct CompositeBuilder {
    name: String,
    slots: Vec<SlotDef>,
}

impl CompositeBuilder {
    pub fn slot(mut self, name: &str, kind: SlotKind) -> Self {
        self.slots.push(SlotDef {
            name: name.to_string(),
            dbkey: None,
            kind,
        });
        self
    }

    pub fn field(self, name: &str, spec: FieldSpec) -> Self {
        self.slot(name, SlotKind::Field(Arc::new(spec)))
    }

    pub fn list(self, name: &str, spec: ListSpec) -> Self {
        self.slot(name, SlotKind::List(Arc::new(spec)))
    }

    pub fn reference(self, name: &str, spec: RelationSpec) -> Self {
        self.slot(name, SlotKind::Relation(Arc::new(spec)))
    }

    pub fn embedded(self, name: &str, schema: Arc<CompositeSchema>) -> Self {
        self.slot(name, SlotKind::Composite(schema))
    }

    pub fn lazy(self, name: &str, spec: LazySpec) -> Self {
        self.slot(name, SlotKind::Lazy(Arc::new(spec)))
    }

    /// Store the named slot under a different key in the wire document.
    pub fn dbkey(mut self, name: &str, key: &str) -> Self {
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.name == name) {
            slot.dbkey = Some(key.to_string());
        }
        self
    }

    pub fn build(self) -> Result<Arc<CompositeSchema>> {
        let mut names = HashSet::new();
        let mut keys = HashSet::new();
        for slot in &self.slots {
            if !names.insert(slot.name.as_str()) {
                return Err(DocMapError::Schema(format!(
                    "'{}' declares '{}' twice",
                    self.name, slot.name
                )));
            }
            if slot.wire_key().is_empty() || slot.wire_key().contains('.') {
                return Err(DocMapError::Schema(format!(
                    "'{}.{}' has an invalid key '{}'",
                    self.name,
                    slot.name,
                    slot.wire_key()
                )));
            }
            if !slot.is_lazy() && !keys.insert(slot.wire_key()) {
                return Err(DocMapError::Schema(format!(
                    "'{}' maps two slots to the key '{}'",
                    self.name,
                    slot.wire_key()
                )));
            }
        }
        Ok(Arc::new(CompositeSchema {
            name: self.name,
            slots: self.slots,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrder {
    Ascending,
    Descending,
}

/// An index applied to an entity's collection at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub fields: Vec<(String, IndexOrder)>,
    pub unique: bool,
    pub sparse: bool,
}

impl IndexSpec {
    pub fn new(name: &str) -> Self {
        IndexSpec {
            name: name.to_string(),
            fields: Vec::new(),
            unique: false,
            sparse: false,
        }
    }

    pub fn asc(mut self, path: &str) -> Self {
        self.fields.push((path.to_string(), IndexOrder::Ascending));
        self
    }

    pub fn desc(mut self, path: &str) -> Self {
        self.fields.push((path.to_string(), IndexOrder::Descending));
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }
}

/// The registered shape of a top-level document type.
#[derive(Debug)]
pub struct EntitySchema {
    tag: String,
    collection: String,
    root: Arc<CompositeSchema>,
    indexes: Vec<IndexSpec>,
    declared_keys: BTreeSet<String>,
}

impl EntitySchema {
    pub fn builder(tag: &str) -> EntityBuilder {
        EntityBuilder {
            tag: tag.to_string(),
            collection: None,
            root: CompositeSchema::builder(tag),
            indexes: Vec::new(),
        }
    }

    pub fn new(
        tag: &str,
        collection: &str,
        root: Arc<CompositeSchema>,
        indexes: Vec<IndexSpec>,
    ) -> Result<Arc<Self>> {
        if let Some(slot) = root
            .slots()
            .iter()
            .find(|slot| is_reserved(slot.wire_key()))
        {
            return Err(DocMapError::Schema(format!(
                "'{tag}.{}' uses the reserved key '{}'",
                slot.name,
                slot.wire_key()
            )));
        }
        for index in &indexes {
            if index.fields.is_empty() {
                return Err(DocMapError::Schema(format!(
                    "Index '{}' on '{tag}' has no fields",
                    index.name
                )));
            }
        }

        let declared_keys = root.wire_keys();
        Ok(Arc::new(EntitySchema {
            tag: tag.to_string(),
            collection: collection.to_string(),
            root,
            indexes,
            declared_keys,
        }))
    }

    /// The stable type tag references and the registry use.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn root(&self) -> &Arc<CompositeSchema> {
        &self.root
    }

    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    /// Keys that must all be observed before incremental assembly completes.
    pub fn declared_keys(&self) -> &BTreeSet<String> {
        &self.declared_keys
    }
}

/// Declares an entity type: its collection, root slots and indexes.
#[derive(Debug)]
pub struct EntityBuilder {
    tag: String,
    collection: Option<String>,
    root: CompositeBuilder,
    indexes: Vec<IndexSpec>,
}

impl EntityBuilder {
    pub fn collection(mut self, collection: &str) -> Self {
        self.collection = Some(collection.to_string());
        self
    }

    pub fn field(mut self, name: &str, spec: FieldSpec) -> Self {
        self.root = self.root.field(name, spec);
        self
    }

    pub fn list(mut self, name: &str, spec: ListSpec) -> Self {
        self.root = self.root.list(name, spec);
        self
    }

    pub fn reference(mut self, name: &str, spec: RelationSpec) -> Self {
        self.root = self.root.reference(name, spec);
        self
    }

    pub fn embedded(mut self, name: &str, schema: Arc<CompositeSchema>) -> Self {
        self.root = self.root.embedded(name, schema);
        self
    }

    pub fn lazy(mut self, name: &str, spec: LazySpec) -> Self {
        self.root = self.root.lazy(name, spec);
        self
    }

    pub fn dbkey(mut self, name: &str, key: &str) -> Self {
        self.root = self.root.dbkey(name, key);
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn build(self) -> Result<Arc<EntitySchema>> {
        let collection = self.collection.unwrap_or_else(|| self.tag.clone());
        let root = self.root.build()?;
        EntitySchema::new(&self.tag, &collection, root, self.indexes)
    }
}
