use super::descriptor::{
    Choice, CompositeBuilder, CompositeSchema, ElementSpec, EntitySchema, FieldKind, FieldSpec,
    IndexSpec, LazySpec, ListSpec, RelationSpec, SlotKind,
};
use super::types::{
    ChoiceDefinition, EntityDefinition, FieldDefinition, FieldType, IndexDefinition, ItemType,
    SchemaDefinition,
};
use crate::error::{DocMapError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// Compile a parsed schema file into entity descriptors, one per declared type tag.
///
/// Reusable types are compiled once and shared between every slot that names
/// them. A type that (directly or indirectly) embeds itself is rejected, as is
/// a reference to an undeclared type.
pub fn compile(schema: &SchemaDefinition) -> Result<Vec<Arc<EntitySchema>>> {
    let mut compiler = Compiler {
        schema,
        compiled: HashMap::new(),
        visiting: Vec::new(),
    };
    schema
        .entities
        .iter()
        .map(|(tag, def)| compiler.entity(tag, def))
        .collect()
}

struct Compiler<'a> {
    schema: &'a SchemaDefinition,
    compiled: HashMap<String, Arc<CompositeSchema>>,
    visiting: Vec<String>,
}

impl Compiler<'_> {
    fn entity(&mut self, tag: &str, def: &EntityDefinition) -> Result<Arc<EntitySchema>> {
        let mut builder = CompositeSchema::builder(tag);
        for (name, field) in &def.fields {
            builder = self.slot(builder, tag, name, field)?;
        }
        let root = builder.build()?;
        let indexes = def.indexes.iter().map(index_spec).collect();
        EntitySchema::new(tag, def.collection.as_deref().unwrap_or(tag), root, indexes)
    }

    fn custom_type(&mut self, name: &str) -> Result<Arc<CompositeSchema>> {
        if let Some(schema) = self.compiled.get(name) {
            return Ok(schema.clone());
        }
        if self.visiting.iter().any(|t| t == name) {
            return Err(DocMapError::Schema(format!(
                "Type '{name}' embeds itself ({} -> {name})",
                self.visiting.join(" -> ")
            )));
        }
        let fields = self
            .schema
            .types
            .get(name)
            .ok_or_else(|| DocMapError::Schema(format!("Unknown type '{name}'")))?;

        self.visiting.push(name.to_string());
        let mut builder = CompositeSchema::builder(name);
        for (field_name, field) in fields {
            builder = self.slot(builder, name, field_name, field)?;
        }
        self.visiting.pop();

        let schema = builder.build()?;
        self.compiled.insert(name.to_string(), schema.clone());
        Ok(schema)
    }

    fn slot(
        &mut self,
        builder: CompositeBuilder,
        owner: &str,
        name: &str,
        def: &FieldDefinition,
    ) -> Result<CompositeBuilder> {
        let kind = match &def.field_type {
            FieldType::List => SlotKind::List(Arc::new(self.list_spec(owner, name, def)?)),
            FieldType::Ref => {
                if let Some(target) = &def.target {
                    self.check_entity(owner, name, target)?;
                }
                SlotKind::Relation(Arc::new(RelationSpec {
                    target: def.target.clone(),
                    required: def.required,
                }))
            }
            FieldType::Lazy => {
                let target = def.target.as_deref().ok_or_else(|| {
                    DocMapError::Schema(format!("Lazy '{owner}.{name}' needs a target"))
                })?;
                let key = def.key.as_deref().ok_or_else(|| {
                    DocMapError::Schema(format!("Lazy '{owner}.{name}' needs a key"))
                })?;
                self.check_entity(owner, name, target)?;
                SlotKind::Lazy(Arc::new(
                    LazySpec::new(target, key).query(def.query.clone().unwrap_or_default()),
                ))
            }
            FieldType::Custom(type_name) => SlotKind::Composite(self.custom_type(type_name)?),
            _ => SlotKind::Field(Arc::new(self.leaf(owner, name, def)?)),
        };

        let mut builder = builder.slot(name, kind);
        if let Some(key) = &def.dbkey {
            builder = builder.dbkey(name, key);
        }
        Ok(builder)
    }

    fn list_spec(&mut self, owner: &str, name: &str, def: &FieldDefinition) -> Result<ListSpec> {
        let defs: Vec<FieldDefinition> = match &def.items {
            Some(ItemType::Simple(item)) => vec![FieldDefinition::of(item_type(item))],
            Some(ItemType::Multiple(items)) => items
                .iter()
                .map(|item| FieldDefinition::of(item_type(item)))
                .collect(),
            Some(ItemType::Complex(inner)) => vec![(**inner).clone()],
            None => {
                return Err(DocMapError::Schema(format!(
                    "List '{owner}.{name}' needs items"
                )))
            }
        };

        let items = defs
            .iter()
            .map(|item| self.element(owner, name, item))
            .collect::<Result<Vec<_>>>()?;
        Ok(ListSpec {
            items,
            length: def.length,
        })
    }

    fn element(&mut self, owner: &str, name: &str, def: &FieldDefinition) -> Result<ElementSpec> {
        match &def.field_type {
            FieldType::List | FieldType::Ref | FieldType::Lazy => Err(DocMapError::Schema(
                format!("List '{owner}.{name}' can only hold fields or types"),
            )),
            FieldType::Custom(type_name) => Ok(ElementSpec::Composite(self.custom_type(type_name)?)),
            _ => Ok(ElementSpec::Field(Arc::new(self.leaf(owner, name, def)?))),
        }
    }

    fn leaf(&self, owner: &str, name: &str, def: &FieldDefinition) -> Result<FieldSpec> {
        if let (FieldType::DocumentId, Some(target)) = (&def.field_type, &def.target) {
            self.check_entity(owner, name, target)?;
        }
        field_spec(owner, name, def)
    }

    fn check_entity(&self, owner: &str, name: &str, target: &str) -> Result<()> {
        if self.schema.entities.contains_key(target) {
            Ok(())
        } else {
            Err(DocMapError::Schema(format!(
                "'{owner}.{name}' targets unknown entity '{target}'"
            )))
        }
    }
}

fn item_type(name: &str) -> FieldType {
    serde_json::from_value(serde_json::Value::String(name.to_string()))
        .unwrap_or_else(|_| FieldType::Custom(name.to_string()))
}

fn field_spec(owner: &str, name: &str, def: &FieldDefinition) -> Result<FieldSpec> {
    let kind = match &def.field_type {
        FieldType::Char => FieldKind::Char,
        FieldType::Integer => FieldKind::Integer,
        FieldType::Float => FieldKind::Float,
        FieldType::Boolean => FieldKind::Boolean,
        FieldType::Date => FieldKind::Date,
        FieldType::Timestamp => FieldKind::Timestamp,
        FieldType::Geo => FieldKind::Geo,
        FieldType::Choice => {
            let choices = def.choices.as_ref().ok_or_else(|| {
                DocMapError::Schema(format!("Choice '{owner}.{name}' needs choices"))
            })?;
            FieldKind::Choice(
                choices
                    .iter()
                    .map(|choice| match choice {
                        ChoiceDefinition::Value(value) => Choice::new(value.clone()),
                        ChoiceDefinition::Labeled { value, label } => {
                            Choice::labeled(value.clone(), label.clone())
                        }
                    })
                    .collect(),
            )
        }
        FieldType::Regex => {
            let pattern = def.pattern.as_deref().ok_or_else(|| {
                DocMapError::Schema(format!("Regex '{owner}.{name}' needs a pattern"))
            })?;
            FieldKind::Regex {
                pattern: Regex::new(pattern).map_err(|e| {
                    DocMapError::Schema(format!("Invalid pattern for '{owner}.{name}': {e}"))
                })?,
                message: def.message.clone(),
            }
        }
        FieldType::Email => FieldKind::Email,
        FieldType::Phone => FieldKind::Phone {
            append_plus_one: def.append_plus_one.unwrap_or(true),
        },
        FieldType::DocumentId => FieldKind::DocumentId {
            target: def.target.clone(),
        },
        FieldType::AutoIncrement => FieldKind::AutoIncrement {
            sequence: def.sequence.clone(),
        },
        FieldType::Object => FieldKind::Object,
        FieldType::List | FieldType::Ref | FieldType::Lazy | FieldType::Custom(_) => {
            return Err(DocMapError::Schema(format!(
                "'{owner}.{name}' is not a leaf field"
            )))
        }
    };

    let mut spec = FieldSpec::new(kind);
    spec.required = def.required;
    spec.default = def.default.clone();
    spec.min = def.min;
    spec.max = def.max;
    Ok(spec)
}

fn index_spec(def: &IndexDefinition) -> IndexSpec {
    let mut spec = IndexSpec::new(&def.name);
    for field in &def.fields {
        spec = match field.strip_prefix('-') {
            Some(path) => spec.desc(path),
            None => spec.asc(field),
        };
    }
    spec.unique = def.unique;
    spec.sparse = def.sparse;
    spec
}
