// Type tag -> entity schema registry

use crate::entity::Entity;
use crate::error::{DocMapError, Result};
use crate::schema::{self, EntitySchema, SchemaDefinition};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The registered entity types, keyed by type tag. Doubles as the factory
/// that references and cursors use to build empty entities.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    types: BTreeMap<String, Arc<EntitySchema>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile every entity a schema file declares.
    pub fn from_definition(definition: &SchemaDefinition) -> Result<Self> {
        let mut registry = Registry::new();
        for entity in schema::compile(definition)? {
            registry.register(entity)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, schema: Arc<EntitySchema>) -> Result<()> {
        if self.types.contains_key(schema.tag()) {
            return Err(DocMapError::Schema(format!(
                "Type '{}' is registered twice",
                schema.tag()
            )));
        }
        self.types.insert(schema.tag().to_string(), schema);
        Ok(())
    }

    pub fn get(&self, tag: &str) -> Result<&Arc<EntitySchema>> {
        self.types
            .get(tag)
            .ok_or_else(|| DocMapError::UnknownType(tag.to_string()))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.types.contains_key(tag)
    }

    /// A fresh, empty entity of the given type.
    pub fn create(&self, tag: &str) -> Result<Entity> {
        Ok(Entity::new(self.get(tag)?.clone()))
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Arc<EntitySchema>> {
        self.types.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{parse_schema_str, FieldSpec};

    #[test]
    fn test_register_and_create() {
        let mut registry = Registry::new();
        let users = EntitySchema::builder("users")
            .field("name", FieldSpec::char())
            .build()
            .unwrap();
        registry.register(users.clone()).unwrap();

        assert!(registry.register(users).is_err());
        let entity = registry.create("users").unwrap();
        assert_eq!(entity.tag(), "users");
        assert!(matches!(
            registry.create("ghosts"),
            Err(DocMapError::UnknownType(_))
        ));
    }

    #[test]
    fn test_from_definition() {
        let yaml = r#"
entities:
  users:
    fields:
      name: { type: char, required: true }
  posts:
    collection: articles
    fields:
      author: { type: ref, target: users }
"#;
        let registry = Registry::from_definition(&parse_schema_str(yaml).unwrap()).unwrap();
        assert_eq!(registry.tags().collect::<Vec<_>>(), vec!["posts", "users"]);
        assert_eq!(registry.get("posts").unwrap().collection(), "articles");
    }
}
