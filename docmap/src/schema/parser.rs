use super::types::{EntityDefinition, SchemaDefinition};
use crate::error::{DocMapError, Result};
use std::path::Path;

/// Read and parse a schema.yaml file. Failures name the file.
pub fn parse_schema(path: &Path) -> Result<SchemaDefinition> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DocMapError::Schema(format!("Cannot read {}: {e}", path.display()))
    })?;
    parse_schema_str(&content).map_err(|e| match e {
        DocMapError::Yaml(e) => DocMapError::Schema(format!("{}: {e}", path.display())),
        other => other,
    })
}

/// Parse schema YAML and check its shape. Whether names resolve is left to
/// [`compile`](super::compile).
pub fn parse_schema_str(content: &str) -> Result<SchemaDefinition> {
    let schema: SchemaDefinition = serde_yaml::from_str(content)?;
    for (tag, entity) in &schema.entities {
        check_entity(tag, entity)?;
    }
    Ok(schema)
}

fn check_entity(tag: &str, entity: &EntityDefinition) -> Result<()> {
    if tag.trim().is_empty() {
        return Err(DocMapError::Schema("Entity tags cannot be empty".into()));
    }
    if entity.collection.as_deref().is_some_and(|c| c.trim().is_empty()) {
        return Err(DocMapError::Schema(format!(
            "Entity '{tag}' has an empty collection name"
        )));
    }
    for index in &entity.indexes {
        if index.fields.is_empty() {
            return Err(DocMapError::Schema(format!(
                "Index '{}' on '{tag}' has no fields",
                index.name
            )));
        }
        if let Some(field) = index
            .fields
            .iter()
            .find(|f| f.trim_start_matches('-').is_empty())
        {
            return Err(DocMapError::Schema(format!(
                "Index '{}' on '{tag}' has an empty field '{field}'",
                index.name
            )));
        }
    }
    Ok(())
}
