pub mod schema;
pub mod document;
pub mod field;
pub mod container;
pub mod relation;
pub mod composite;
pub mod entity;
pub mod registry;
pub mod driver;
pub mod sqlite;
pub mod database;
pub mod config;
pub mod error;

pub use composite::Composite;
pub use config::Config;
pub use container::{Container, Element};
pub use database::{Cursor, Database};
pub use document::{Delta, Document, Filter};
pub use driver::{Driver, IdStrategy, MemoryDriver};
pub use entity::{Entity, EntityState};
pub use error::{DocMapError, ErrorKind, ErrorReport, FieldError, Result};
pub use field::Field;
pub use registry::Registry;
pub use relation::{Lazy, Reference, Relation};
pub use schema::{EntitySchema, SchemaDefinition};
pub use sqlite::SqliteDriver;
