use crate::document::{self, Delta, Document, Filter, RawDocument, ID_KEY};
use crate::driver::{Driver, IdStrategy};
use crate::error::{DocMapError, Result};
use crate::schema::{IndexOrder, IndexSpec};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// A driver that keeps JSON documents and counters in one SQLite file.
pub struct SqliteDriver {
    conn: Mutex<Connection>,
    ids: IdStrategy,
}

impl SqliteDriver {
    /// Open or create the database at the given path.
    pub fn open(path: &Path, ids: IdStrategy) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, ids)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, IdStrategy::default())
    }

    fn with_connection(conn: Connection, ids: IdStrategy) -> Result<Self> {
        initialize_tables(&conn)?;
        Ok(SqliteDriver {
            conn: Mutex::new(conn),
            ids,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DocMapError::StorageOperationFailed("sqlite connection lock poisoned".into()))
    }
}

fn initialize_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            data_json TEXT NOT NULL,
            PRIMARY KEY (collection, id)
        );

        CREATE TABLE IF NOT EXISTS counters (
            sequence TEXT NOT NULL,
            key TEXT NOT NULL,
            value INTEGER NOT NULL,
            PRIMARY KEY (sequence, key)
        );
        ",
    )?;
    Ok(())
}

impl Driver for SqliteDriver {
    fn insert(&self, collection: &str, mut document: Document) -> Result<String> {
        let id = match document.get(ID_KEY).and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => self.ids.generate(),
        };
        document.insert(ID_KEY.to_string(), Value::String(id.clone()));
        let data_json = serde_json::to_string(&document)?;

        self.lock()?.execute(
            "INSERT INTO documents (collection, id, data_json) VALUES (?1, ?2, ?3)",
            params![collection, id, data_json],
        )?;
        Ok(id)
    }

    fn update(&self, collection: &str, id: &str, delta: &Delta) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let data_json: Option<String> = tx
            .query_row(
                "SELECT data_json FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        let data_json = data_json.ok_or_else(|| {
            DocMapError::StorageOperationFailed(format!("No document {collection}/{id}"))
        })?;

        let mut doc: Value = serde_json::from_str(&data_json)?;
        document::apply_delta(&mut doc, delta);
        tx.execute(
            "UPDATE documents SET data_json = ?3 WHERE collection = ?1 AND id = ?2",
            params![collection, id, serde_json::to_string(&doc)?],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.lock()?.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        Ok(())
    }

    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<RawDocument>> {
        // An id lookup narrows in SQL; the rest of the filter is matched here.
        let id = filter.get(ID_KEY).and_then(Value::as_str);
        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(
                "SELECT data_json FROM documents
                 WHERE collection = ?1 AND (?2 IS NULL OR id = ?2)
                 ORDER BY rowid",
            )?;
            let rows = stmt.query_map(params![collection, id], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()?
        };

        let mut found = Vec::new();
        for data_json in rows {
            let doc: Value = serde_json::from_str(&data_json)?;
            if !document::matches(&doc, filter) {
                continue;
            }
            if let Value::Object(map) = doc {
                found.push(document::to_pairs(map));
            }
        }
        Ok(found)
    }

    fn increment(&self, sequence: &str, key: &str) -> Result<i64> {
        let value = self.lock()?.query_row(
            "INSERT INTO counters (sequence, key, value) VALUES (?1, ?2, 1)
             ON CONFLICT (sequence, key) DO UPDATE SET value = value + 1
             RETURNING value",
            params![sequence, key],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    fn ensure_index(&self, collection: &str, index: &IndexSpec) -> Result<()> {
        let sql = index_sql(collection, index);
        log::debug!("{sql}");
        self.lock()?.execute_batch(&sql)?;
        Ok(())
    }
}

/// A partial expression index over the collection's rows.
fn index_sql(collection: &str, index: &IndexSpec) -> String {
    let columns = index
        .fields
        .iter()
        .map(|(path, order)| {
            let order = match order {
                IndexOrder::Ascending => "ASC",
                IndexOrder::Descending => "DESC",
            };
            format!("{} {order}", extract(path))
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut condition = format!("collection = {}", quote_literal(collection));
    if index.sparse {
        for (path, _) in &index.fields {
            condition.push_str(&format!(" AND {} IS NOT NULL", extract(path)));
        }
    }

    format!(
        "CREATE {unique}INDEX IF NOT EXISTS \"{name}\" ON documents ({columns}) WHERE {condition}",
        unique = if index.unique { "UNIQUE " } else { "" },
        name = index_name(collection, &index.name),
    )
}

fn extract(path: &str) -> String {
    format!("json_extract(data_json, {})", quote_literal(&json_path(path)))
}

/// `a.0.b` -> `$."a"[0]."b"`
fn json_path(path: &str) -> String {
    let mut out = String::from("$");
    for segment in path.split('.') {
        if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
            out.push_str(&format!("[{segment}]"));
        } else {
            out.push_str(&format!(".\"{}\"", segment.replace('"', "\\\"")));
        }
    }
    out
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn index_name(collection: &str, name: &str) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    };
    format!("idx_{}_{}", sanitize(collection), sanitize(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn field<'a>(pairs: &'a RawDocument, key: &str) -> Option<&'a Value> {
        pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    #[test]
    fn test_insert_and_find() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        let id = driver
            .insert("users", doc(json!({ "name": "Alice", "home": { "city": "Paris" } })))
            .unwrap();
        driver.insert("users", doc(json!({ "name": "Bob" }))).unwrap();
        driver.insert("posts", doc(json!({ "name": "Alice" }))).unwrap();

        let all = driver.find("users", &Filter::new()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(field(&all[0], "name"), Some(&json!("Alice")));

        let mut filter = Filter::new();
        filter.insert(ID_KEY.into(), json!(id));
        let one = driver.find_one("users", &filter).unwrap().unwrap();
        assert_eq!(field(&one, "home"), Some(&json!({ "city": "Paris" })));
    }

    #[test]
    fn test_update_applies_dotted_paths() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        let id = driver
            .insert("users", doc(json!({ "home": { "city": "Paris" }, "tags": ["a"] })))
            .unwrap();
        driver
            .update(
                "users",
                &id,
                &doc(json!({ "home.city": "Lyon", "tags.1": "b", "modified_at": "now" })),
            )
            .unwrap();

        let mut filter = Filter::new();
        filter.insert("home.city".into(), json!("Lyon"));
        let found = driver.find("users", &filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(field(&found[0], "tags"), Some(&json!(["a", "b"])));
        assert_eq!(field(&found[0], "modified_at"), Some(&json!("now")));
    }

    #[test]
    fn test_update_missing_document() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        let result = driver.update("users", "nope", &doc(json!({ "a": 1 })));
        assert!(matches!(result, Err(DocMapError::StorageOperationFailed(_))));
    }

    #[test]
    fn test_delete() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        let id = driver.insert("users", doc(json!({ "name": "Alice" }))).unwrap();
        driver.delete("users", &id).unwrap();
        assert!(driver.find("users", &Filter::new()).unwrap().is_empty());
    }

    #[test]
    fn test_counters() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        assert_eq!(driver.increment("sequence", "number").unwrap(), 1);
        assert_eq!(driver.increment("sequence", "number").unwrap(), 2);
        assert_eq!(driver.increment("sequence", "other").unwrap(), 1);
    }

    #[test]
    fn test_unique_index() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        let index = IndexSpec::new("users_mail").asc("mail").unique();
        driver.ensure_index("users", &index).unwrap();
        driver.ensure_index("users", &index).unwrap();

        driver.insert("users", doc(json!({ "mail": "a@x.io" }))).unwrap();
        driver.insert("users", doc(json!({ "name": "no mail" }))).unwrap();
        driver.insert("users", doc(json!({ "name": "no mail" }))).unwrap();
        // Other collections are not covered by the index.
        driver.insert("admins", doc(json!({ "mail": "a@x.io" }))).unwrap();

        assert!(driver.insert("users", doc(json!({ "mail": "a@x.io" }))).is_err());
    }

    #[test]
    fn test_index_sql() {
        let index = IndexSpec::new("by date").desc("meta.created").asc("tags.0").sparse();
        let sql = index_sql("o'rders", &index);
        assert!(sql.starts_with("CREATE INDEX IF NOT EXISTS \"idx_o_rders_by_date\""));
        assert!(sql.contains("json_extract(data_json, '$.\"meta\".\"created\"') DESC"));
        assert!(sql.contains("json_extract(data_json, '$.\"tags\"[0]') ASC"));
        assert!(sql.contains("WHERE collection = 'o''rders' AND"));
        assert!(sql.ends_with("IS NOT NULL"));
    }

    #[test]
    fn test_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("docmap.db");
        let id = {
            let driver = SqliteDriver::open(&path, IdStrategy::Uuid).unwrap();
            driver.increment("sequence", "n").unwrap();
            driver.insert("users", doc(json!({ "name": "Alice" }))).unwrap()
        };
        assert_eq!(id.len(), 36);

        let driver = SqliteDriver::open(&path, IdStrategy::Uuid).unwrap();
        assert_eq!(driver.find("users", &Filter::new()).unwrap().len(), 1);
        assert_eq!(driver.increment("sequence", "n").unwrap(), 2);
    }
}
