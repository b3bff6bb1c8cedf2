use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Slot definitions by name, in declaration order.
pub type FieldMap = IndexMap<String, FieldDefinition>;

/// Top-level schema definition parsed from schema.yaml. Maps keep the
/// order the file declares them in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Reusable embedded document shapes, referenced by name from `type:`
    #[serde(default)]
    pub types: IndexMap<String, FieldMap>,
    #[serde(default)]
    pub entities: IndexMap<String, EntityDefinition>,
}

/// Definition of a top-level document type, keyed by its type tag
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityDefinition {
    /// Collection the documents live in; defaults to the type tag
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub fields: FieldMap,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
}

/// Definition of a single slot in an entity or reusable type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    /// Key used in the stored document when it differs from the slot name
    #[serde(default)]
    pub dbkey: Option<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub choices: Option<Vec<ChoiceDefinition>>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub items: Option<ItemType>,
    /// Maximum number of list elements
    #[serde(default)]
    pub length: Option<usize>,
    #[serde(default)]
    pub target: Option<String>,
    /// Foreign key on the target type (lazy relations)
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub query: Option<Map<String, Value>>,
    /// Counter scope for auto_increment fields
    #[serde(default)]
    pub sequence: Option<String>,
    #[serde(default)]
    pub append_plus_one: Option<bool>,
}

impl FieldDefinition {
    pub fn of(field_type: FieldType) -> Self {
        FieldDefinition {
            field_type,
            required: false,
            default: None,
            dbkey: None,
            min: None,
            max: None,
            choices: None,
            pattern: None,
            message: None,
            items: None,
            length: None,
            target: None,
            key: None,
            query: None,
            sequence: None,
            append_plus_one: None,
        }
    }
}

/// Field type enumeration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Char,
    Integer,
    Float,
    Boolean,
    Date,
    Timestamp,
    Geo,
    Choice,
    Regex,
    Email,
    Phone,
    DocumentId,
    AutoIncrement,
    Object,
    List,
    Ref,
    Lazy,
    #[serde(untagged)]
    Custom(std::string::String),
}

/// A choice given either as a bare value or with a label
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChoiceDefinition {
    Value(String),
    Labeled { value: String, label: String },
}

/// Item type(s) for lists
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemType {
    Simple(String),
    Multiple(Vec<String>),
    Complex(Box<FieldDefinition>),
}

/// Index declaration; a field prefixed with `-` sorts descending
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub sparse: bool,
}
