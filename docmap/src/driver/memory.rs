use super::{Driver, IdStrategy};
use crate::document::{self, Delta, Document, Filter, RawDocument, ID_KEY};
use crate::error::{DocMapError, Result};
use crate::schema::IndexSpec;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, Vec<Value>>,
    indexes: HashMap<String, Vec<IndexSpec>>,
    counters: HashMap<(String, String), i64>,
}

/// An in-process driver. Every operation holds one lock for its duration.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    ids: IdStrategy,
    state: Mutex<State>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id_strategy(ids: IdStrategy) -> Self {
        MemoryDriver {
            ids,
            state: Mutex::default(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| DocMapError::StorageOperationFailed("memory store lock poisoned".into()))
    }
}

impl Driver for MemoryDriver {
    fn insert(&self, collection: &str, mut document: Document) -> Result<String> {
        let id = match document.get(ID_KEY).and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => self.ids.generate(),
        };
        document.insert(ID_KEY.to_string(), Value::String(id.clone()));
        let document = Value::Object(document);

        let mut state = self.lock()?;
        let State {
            collections,
            indexes,
            ..
        } = &mut *state;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|doc| id_of(doc) == Some(id.as_str())) {
            return Err(DocMapError::StorageOperationFailed(format!(
                "Duplicate id '{id}' in {collection}"
            )));
        }
        check_unique(indexes.get(collection), docs, &document, None)?;
        docs.push(document);
        Ok(id)
    }

    fn update(&self, collection: &str, id: &str, delta: &Delta) -> Result<()> {
        let mut state = self.lock()?;
        let State {
            collections,
            indexes,
            ..
        } = &mut *state;
        let docs = collections.entry(collection.to_string()).or_default();
        let position = docs
            .iter()
            .position(|doc| id_of(doc) == Some(id))
            .ok_or_else(|| {
                DocMapError::StorageOperationFailed(format!("No document {collection}/{id}"))
            })?;

        let mut updated = docs[position].clone();
        document::apply_delta(&mut updated, delta);
        check_unique(indexes.get(collection), docs, &updated, Some(position))?;
        docs[position] = updated;
        Ok(())
    }

    fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(docs) = state.collections.get_mut(collection) {
            docs.retain(|doc| id_of(doc) != Some(id));
        }
        Ok(())
    }

    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<RawDocument>> {
        let state = self.lock()?;
        let found = state
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| document::matches(doc, filter))
                    .filter_map(|doc| doc.as_object().cloned())
                    .map(document::to_pairs)
                    .collect()
            })
            .unwrap_or_default();
        Ok(found)
    }

    fn increment(&self, sequence: &str, key: &str) -> Result<i64> {
        let mut state = self.lock()?;
        let counter = state
            .counters
            .entry((sequence.to_string(), key.to_string()))
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    fn ensure_index(&self, collection: &str, index: &IndexSpec) -> Result<()> {
        let mut state = self.lock()?;
        let State {
            collections,
            indexes,
            ..
        } = &mut *state;
        let declared = indexes.entry(collection.to_string()).or_default();
        if declared.iter().any(|existing| existing.name == index.name) {
            return Ok(());
        }

        if index.unique {
            let docs = collections.get(collection).map(Vec::as_slice).unwrap_or(&[]);
            for (position, doc) in docs.iter().enumerate() {
                check_unique(Some(&vec![index.clone()]), &docs[..position], doc, None)?;
            }
        }
        declared.push(index.clone());
        Ok(())
    }
}

fn id_of(doc: &Value) -> Option<&str> {
    doc.get(ID_KEY).and_then(Value::as_str)
}

/// The indexed values of a document, or `None` when any part is missing
/// (missing values never collide, as in SQL).
fn index_key<'a>(index: &IndexSpec, doc: &'a Value) -> Option<Vec<&'a Value>> {
    index
        .fields
        .iter()
        .map(|(path, _)| document::get_path(doc, path).filter(|v| !v.is_null()))
        .collect()
}

fn check_unique(
    indexes: Option<&Vec<IndexSpec>>,
    docs: &[Value],
    candidate: &Value,
    skip: Option<usize>,
) -> Result<()> {
    for index in indexes.into_iter().flatten().filter(|index| index.unique) {
        let Some(key) = index_key(index, candidate) else {
            continue;
        };
        let clash = docs
            .iter()
            .enumerate()
            .filter(|(position, _)| Some(*position) != skip)
            .any(|(_, doc)| index_key(index, doc).as_ref() == Some(&key));
        if clash {
            return Err(DocMapError::StorageOperationFailed(format!(
                "Duplicate key for unique index '{}'",
                index.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn filter(value: Value) -> Filter {
        doc(value)
    }

    #[test]
    fn test_insert_generates_id_and_find_streams_pairs() {
        let driver = MemoryDriver::new();
        let id = driver
            .insert("users", doc(json!({ "name": "Alice", "age": 30 })))
            .unwrap();

        let found = driver.find("users", &Filter::new()).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].contains(&(ID_KEY.to_string(), json!(id))));
        assert!(found[0].contains(&("name".to_string(), json!("Alice"))));
    }

    #[test]
    fn test_insert_keeps_given_id() {
        let driver = MemoryDriver::new();
        let id = driver
            .insert("users", doc(json!({ "_id": "u1", "name": "Alice" })))
            .unwrap();
        assert_eq!(id, "u1");
        assert!(driver
            .insert("users", doc(json!({ "_id": "u1" })))
            .is_err());
    }

    #[test]
    fn test_update_sets_dotted_paths() {
        let driver = MemoryDriver::new();
        let id = driver
            .insert("users", doc(json!({ "home": { "city": "Paris", "zip": "75" } })))
            .unwrap();
        driver
            .update("users", &id, &doc(json!({ "home.city": "Lyon" })))
            .unwrap();

        let found = driver
            .find_one("users", &filter(json!({ "home.city": "Lyon" })))
            .unwrap()
            .unwrap();
        let home = found.iter().find(|(k, _)| k == "home").unwrap();
        assert_eq!(home.1, json!({ "city": "Lyon", "zip": "75" }));
    }

    #[test]
    fn test_update_missing_document_fails() {
        let driver = MemoryDriver::new();
        let result = driver.update("users", "nope", &doc(json!({ "a": 1 })));
        assert!(matches!(result, Err(DocMapError::StorageOperationFailed(_))));
    }

    #[test]
    fn test_delete_and_filter() {
        let driver = MemoryDriver::new();
        let a = driver.insert("posts", doc(json!({ "author": "u1" }))).unwrap();
        driver.insert("posts", doc(json!({ "author": "u2" }))).unwrap();

        let by_u1 = driver.find("posts", &filter(json!({ "author": "u1" }))).unwrap();
        assert_eq!(by_u1.len(), 1);

        driver.delete("posts", &a).unwrap();
        driver.delete("posts", &a).unwrap();
        assert_eq!(driver.find("posts", &Filter::new()).unwrap().len(), 1);
    }

    #[test]
    fn test_counters_are_scoped() {
        let driver = MemoryDriver::new();
        assert_eq!(driver.increment("sequence", "number").unwrap(), 1);
        assert_eq!(driver.increment("sequence", "number").unwrap(), 2);
        assert_eq!(driver.increment("invoices", "number").unwrap(), 1);
    }

    #[test]
    fn test_unique_index_enforced() {
        let driver = MemoryDriver::new();
        driver
            .ensure_index("users", &IndexSpec::new("users_mail").asc("mail").unique())
            .unwrap();
        driver.insert("users", doc(json!({ "mail": "a@x.io" }))).unwrap();
        driver.insert("users", doc(json!({ "name": "no mail" }))).unwrap();
        driver.insert("users", doc(json!({ "name": "no mail" }))).unwrap();

        let dup = driver.insert("users", doc(json!({ "mail": "a@x.io" })));
        assert!(dup.is_err());

        let other = driver.insert("users", doc(json!({ "mail": "b@x.io" }))).unwrap();
        let clash = driver.update("users", &other, &doc(json!({ "mail": "a@x.io" })));
        assert!(clash.is_err());
    }

    #[test]
    fn test_unique_index_over_existing_duplicates_fails() {
        let driver = MemoryDriver::new();
        driver.insert("users", doc(json!({ "mail": "a@x.io" }))).unwrap();
        driver.insert("users", doc(json!({ "mail": "a@x.io" }))).unwrap();
        let result = driver.ensure_index("users", &IndexSpec::new("m").asc("mail").unique());
        assert!(result.is_err());
    }
}
