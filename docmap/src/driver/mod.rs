// Storage driver interface, id strategies, counters

mod memory;

pub use memory::MemoryDriver;

use crate::document::{Delta, Document, Filter, RawDocument};
use crate::error::Result;
use crate::schema::IndexSpec;
use serde::{Deserialize, Serialize};

/// The storage engine seen by the mapping layer.
///
/// Documents go in as nested JSON maps keyed by wire keys and come back as
/// ordered key/value pairs, which is what entity assembly consumes.
pub trait Driver: Send + Sync {
    /// Insert a full document and return its id. A document that already
    /// carries `_id` keeps it; otherwise the driver generates one.
    fn insert(&self, collection: &str, document: Document) -> Result<String>;

    /// Apply a `$set`-style partial update to the document with this id.
    fn update(&self, collection: &str, id: &str, delta: &Delta) -> Result<()>;

    /// Delete by id. Deleting a missing document is not an error.
    fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// All documents matching an equality filter, in storage order.
    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<RawDocument>>;

    fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<RawDocument>> {
        Ok(self.find(collection, filter)?.into_iter().next())
    }

    /// Atomically increment and return the counter for `key` in `sequence`.
    fn increment(&self, sequence: &str, key: &str) -> Result<i64>;

    /// Create the index if it does not already exist.
    fn ensure_index(&self, collection: &str, index: &IndexSpec) -> Result<()>;
}

/// Source of auto-increment values at save time.
pub trait Counters {
    /// Next value for `key`; `sequence` falls back to the configured default.
    fn next_value(&self, sequence: Option<&str>, key: &str) -> Result<i64>;
}

/// How drivers generate ids for documents inserted without one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    #[default]
    Ulid,
    Uuid,
    Nanoid,
}

impl IdStrategy {
    pub fn generate(&self) -> String {
        match self {
            IdStrategy::Ulid => ulid::Ulid::new().to_string().to_lowercase(),
            IdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            IdStrategy::Nanoid => nanoid::nanoid!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_strategies() {
        let ulid = IdStrategy::Ulid.generate();
        assert_eq!(ulid.len(), 26);
        assert_eq!(ulid, ulid.to_lowercase());

        let uuid = IdStrategy::Uuid.generate();
        assert_eq!(uuid.len(), 36);

        let nanoid = IdStrategy::Nanoid.generate();
        assert_eq!(nanoid.len(), 21);

        assert_ne!(IdStrategy::Ulid.generate(), IdStrategy::Ulid.generate());
    }

    #[test]
    fn test_strategy_names() {
        let strategy: IdStrategy = serde_yaml::from_str("nanoid").unwrap();
        assert_eq!(strategy, IdStrategy::Nanoid);
        assert_eq!(IdStrategy::default(), IdStrategy::Ulid);
    }
}
