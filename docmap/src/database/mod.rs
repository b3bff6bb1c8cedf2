// The database handle: driver + registry, reads, startup index application

use crate::config::{Config, DriverKind, DEFAULT_SEQUENCE};
use crate::document::{Filter, RawDocument, ID_KEY};
use crate::driver::{Counters, Driver, MemoryDriver};
use crate::entity::Entity;
use crate::error::Result;
use crate::registry::Registry;
use crate::schema::{parse_schema, EntitySchema};
use crate::sqlite::SqliteDriver;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// The process-wide handle entities are loaded through and saved with.
/// Cheap to clone; clones share the driver and registry.
#[derive(Clone)]
pub struct Database {
    driver: Arc<dyn Driver>,
    registry: Arc<Registry>,
    sequence: String,
}

impl Database {
    /// Wrap a driver and apply every declared index. An index that cannot be
    /// created fails construction.
    pub fn new(driver: Arc<dyn Driver>, registry: Registry) -> Result<Self> {
        let db = Database {
            driver,
            registry: Arc::new(registry),
            sequence: DEFAULT_SEQUENCE.to_string(),
        };
        db.ensure_indexes()?;
        Ok(db)
    }

    pub fn in_memory(registry: Registry) -> Result<Self> {
        Self::new(Arc::new(MemoryDriver::new()), registry)
    }

    /// Parse the configured schema, open the configured driver, apply indexes.
    pub fn open(config: &Config) -> Result<Self> {
        let definition = parse_schema(&config.schema_path())?;
        let registry = Registry::from_definition(&definition)?;
        let driver: Arc<dyn Driver> = match config.driver {
            DriverKind::Memory => Arc::new(MemoryDriver::with_id_strategy(config.id_strategy)),
            DriverKind::Sqlite => Arc::new(SqliteDriver::open(
                &config.database_path()?,
                config.id_strategy,
            )?),
        };
        Ok(Self::new(driver, registry)?.with_sequence(&config.sequence))
    }

    /// Counter scope used by auto-increment fields that do not name one.
    pub fn with_sequence(mut self, sequence: &str) -> Self {
        self.sequence = sequence.to_string();
        self
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn ensure_indexes(&self) -> Result<()> {
        for schema in self.registry.schemas() {
            for index in schema.indexes() {
                log::debug!("Ensuring index '{}' on {}", index.name, schema.collection());
                self.driver.ensure_index(schema.collection(), index)?;
            }
        }
        Ok(())
    }

    /// A new, unsaved entity of the given type.
    pub fn create(&self, tag: &str) -> Result<Entity> {
        self.registry.create(tag)
    }

    /// Every stored entity of a type matching the filter. Entities are
    /// assembled as the cursor is advanced.
    pub fn find(&self, tag: &str, filter: Filter) -> Result<Cursor> {
        let schema = self.registry.get(tag)?.clone();
        let documents = self.driver.find(schema.collection(), &filter)?;
        Ok(Cursor::new(schema, documents))
    }

    pub fn find_one(&self, tag: &str, filter: Filter) -> Result<Option<Entity>> {
        let schema = self.registry.get(tag)?.clone();
        let document = self.driver.find_one(schema.collection(), &filter)?;
        Ok(document.map(|pairs| assemble(&schema, pairs)))
    }

    pub fn get(&self, tag: &str, id: &str) -> Result<Option<Entity>> {
        let mut filter = Filter::new();
        filter.insert(ID_KEY.to_string(), Value::String(id.to_string()));
        self.find_one(tag, filter)
    }
}

impl Counters for Database {
    fn next_value(&self, sequence: Option<&str>, key: &str) -> Result<i64> {
        self.driver
            .increment(sequence.unwrap_or(self.sequence.as_str()), key)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("registry", &self.registry)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

fn assemble(schema: &Arc<EntitySchema>, pairs: RawDocument) -> Entity {
    let mut entity = Entity::new(schema.clone());
    for (key, value) in pairs {
        entity.receive(&key, value);
    }
    entity.finish();
    entity
}

/// Stored documents of one type, turned into entities one at a time.
#[derive(Debug)]
pub struct Cursor {
    schema: Arc<EntitySchema>,
    documents: std::vec::IntoIter<RawDocument>,
}

impl Cursor {
    fn new(schema: Arc<EntitySchema>, documents: Vec<RawDocument>) -> Self {
        Cursor {
            schema,
            documents: documents.into_iter(),
        }
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }
}

impl Iterator for Cursor {
    type Item = Entity;

    fn next(&mut self) -> Option<Entity> {
        let pairs = self.documents.next()?;
        Some(assemble(&self.schema, pairs))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.documents.size_hint()
    }
}

impl ExactSizeIterator for Cursor {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityState;
    use crate::error::DocMapError;
    use crate::schema::{FieldSpec, IndexSpec};
    use serde_json::json;
    use tempfile::TempDir;

    const SCHEMA: &str = r#"
entities:
  users:
    fields:
      name: { type: char, required: true }
      email: { type: email, dbkey: mail }
      number: { type: auto_increment }
    indexes:
      - { name: users_mail, fields: [mail], unique: true }
"#;

    fn users() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(
                EntitySchema::builder("users")
                    .field("name", FieldSpec::char())
                    .field("mail", FieldSpec::email())
                    .index(IndexSpec::new("users_mail").asc("mail").unique())
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
    }

    fn write_project(dir: &TempDir, config: &str) -> Config {
        std::fs::write(dir.path().join("schema.yaml"), SCHEMA).unwrap();
        let path = dir.path().join("docmap.yaml");
        std::fs::write(&path, config).unwrap();
        Config::load(&path).unwrap()
    }

    #[test]
    fn test_find_assembles_loaded_entities() {
        let db = Database::in_memory(users()).unwrap();
        for name in ["Alice", "Bob"] {
            let mut user = db.create("users").unwrap();
            user.set("name", json!(name)).unwrap();
            user.save(&db).unwrap();
        }

        let cursor = db.find("users", Filter::new()).unwrap();
        assert_eq!(cursor.len(), 2);
        let entities: Vec<Entity> = cursor.collect();
        assert!(entities
            .iter()
            .all(|entity| entity.state() == EntityState::Loaded));

        let mut filter = Filter::new();
        filter.insert("name".into(), json!("Bob"));
        let bob = db.find_one("users", filter).unwrap().unwrap();
        assert_eq!(bob.get("name"), Some(json!("Bob")));
        assert!(db.get("users", "nope").unwrap().is_none());
    }

    #[test]
    fn test_unknown_type() {
        let db = Database::in_memory(users()).unwrap();
        assert!(matches!(
            db.find("ghosts", Filter::new()),
            Err(DocMapError::UnknownType(_))
        ));
    }

    #[test]
    fn test_unique_index_applied_at_startup() {
        let db = Database::in_memory(users()).unwrap();
        let mut first = db.create("users").unwrap();
        first.set("mail", json!("a@test.com")).unwrap();
        first.save(&db).unwrap();

        let mut second = db.create("users").unwrap();
        second.set("mail", json!("a@test.com")).unwrap();
        assert!(matches!(
            second.save(&db),
            Err(DocMapError::StorageOperationFailed(_))
        ));
        assert_eq!(second.state(), EntityState::New);
    }

    #[test]
    fn test_open_memory_config() {
        let tmp = TempDir::new().unwrap();
        let config = write_project(&tmp, "schema: schema.yaml\nsequence: numbers\n");
        let db = Database::open(&config).unwrap();

        let mut user = db.create("users").unwrap();
        user.set("name", json!("Alice")).unwrap();
        user.save(&db).unwrap();
        assert_eq!(user.get("number"), Some(json!(1)));
        assert_eq!(db.driver().increment("numbers", "number").unwrap(), 2);
    }

    #[test]
    fn test_open_sqlite_config_persists() {
        let tmp = TempDir::new().unwrap();
        let config = write_project(&tmp, "schema: schema.yaml\ndriver: sqlite\npath: app.db\n");

        let id = {
            let db = Database::open(&config).unwrap();
            let mut user = db.create("users").unwrap();
            user.set("name", json!("Alice")).unwrap();
            user.set("email", json!("alice@test.com")).unwrap();
            user.save(&db).unwrap()
        };

        let db = Database::open(&config).unwrap();
        let user = db.get("users", &id).unwrap().unwrap();
        assert_eq!(user.get("email"), Some(json!("alice@test.com")));
        assert_eq!(user.to_document()["mail"], json!("alice@test.com"));
    }

    #[test]
    fn test_open_fails_on_bad_schema() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("schema.yaml"), "entities: [").unwrap();
        let config = Config::new(tmp.path().join("schema.yaml"));
        assert!(Database::open(&config).is_err());
    }
}
