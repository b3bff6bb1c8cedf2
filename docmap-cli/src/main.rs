use clap::{Parser, Subcommand, ValueEnum};
use docmap::config::DriverKind;
use docmap::document::Document;
use docmap::{Config, Database, DocMapError, Entity, Filter};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process;

/// docmap CLI: validate, diff and edit documents against a docmap schema
#[derive(Parser)]
#[command(name = "docmap", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = docmap::config::CONFIG_FILE)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Map a JSON document onto a type and print its error report
    Check {
        /// Type tag
        tag: String,
        /// Read the document from a file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Map a stored document, apply changes, print the partial update
    Delta {
        /// Type tag
        tag: String,
        /// The stored (baseline) document
        #[arg(long)]
        baseline: PathBuf,
        /// Changed values by dotted name (e.g. --field home.city=Lyon)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Apply index declarations and list them
    Indexes,

    /// Get a single document by ID
    Get {
        /// Type tag
        tag: String,
        /// Document ID
        id: String,
    },

    /// List documents matching equality filters
    Find {
        /// Type tag
        tag: String,
        /// Dotted-path filters (e.g. --filter home.city=Paris)
        #[arg(long = "filter", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
    },

    /// Insert a new document
    Insert {
        /// Type tag
        tag: String,
        /// Field values (e.g. --field name="Alice Chen")
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Change fields of an existing document
    Set {
        /// Type tag
        tag: String,
        /// Document ID
        id: String,
        /// Field values to update (e.g. --field age=31)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Remove a document
    Remove {
        /// Type tag
        tag: String,
        /// Document ID
        id: String,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(&cli.config)?;
    check_persistent(&config.driver, &cli.command)?;
    let db = Database::open(&config)?;
    log::debug!("Opened {:?}", db);

    let output = match cli.command {
        Command::Check { tag, file } => {
            let mut entity = db.create(&tag)?;
            entity.load(read_document(file)?);
            let report = entity.validate();
            json!({ "valid": report.is_empty(), "errors": report })
        }

        Command::Delta {
            tag,
            baseline,
            fields,
        } => {
            let mut entity = db.create(&tag)?;
            entity.load(read_document(Some(baseline))?);
            apply_fields(&mut entity, &fields)?;
            Value::Object(entity.save_delta())
        }

        Command::Indexes => {
            let indexes: Vec<Value> = db
                .registry()
                .schemas()
                .flat_map(|schema| {
                    schema.indexes().iter().map(move |index| {
                        json!({
                            "type": schema.tag(),
                            "collection": schema.collection(),
                            "name": index.name,
                            "fields": index
                                .fields
                                .iter()
                                .map(|(path, order)| json!({
                                    "path": path,
                                    "order": format!("{order:?}").to_lowercase(),
                                }))
                                .collect::<Vec<_>>(),
                            "unique": index.unique,
                            "sparse": index.sparse,
                        })
                    })
                })
                .collect();
            Value::Array(indexes)
        }

        Command::Get { tag, id } => Value::Object(fetch(&db, &tag, &id)?.to_document()),

        Command::Find { tag, filters } => {
            let filter: Filter = filters
                .iter()
                .map(|(key, val)| (key.clone(), parse_value(val)))
                .collect();
            let docs: Vec<Value> = db
                .find(&tag, filter)?
                .map(|entity| Value::Object(entity.to_document()))
                .collect();
            Value::Array(docs)
        }

        Command::Insert { tag, fields } => {
            let mut entity = db.create(&tag)?;
            apply_fields(&mut entity, &fields)?;
            let id = entity.save(&db)?;
            json!({ "id": id })
        }

        Command::Set { tag, id, fields } => {
            let mut entity = fetch(&db, &tag, &id)?;
            apply_fields(&mut entity, &fields)?;
            let delta = entity.save_delta();
            entity.save(&db)?;
            json!({ "ok": true, "id": id, "delta": delta })
        }

        Command::Remove { tag, id } => {
            fetch(&db, &tag, &id)?.remove(&db)?;
            json!({ "ok": true, "removed": id })
        }
    };

    print_output(&output, &cli.format)
}

/// Writes through the memory driver vanish when the process exits.
fn check_persistent(driver: &DriverKind, command: &Command) -> Result<(), String> {
    let name = match command {
        Command::Insert { .. } => "insert",
        Command::Set { .. } => "set",
        Command::Remove { .. } => "remove",
        _ => return Ok(()),
    };
    if matches!(driver, DriverKind::Memory) {
        log::warn!("Refusing '{name}' on the memory driver");
        return Err(format!(
            "'{name}' needs a persistent store; set `driver: sqlite` in the config file"
        ));
    }
    Ok(())
}

fn fetch(db: &Database, tag: &str, id: &str) -> Result<Entity, DocMapError> {
    db.get(tag, id)?
        .ok_or_else(|| DocMapError::UnresolvedReference(format!("{tag}/{id}")))
}

fn apply_fields(entity: &mut Entity, fields: &[(String, String)]) -> Result<(), DocMapError> {
    for (key, val) in fields {
        entity.set(key, parse_value(val))?;
    }
    Ok(())
}

/// Numbers, booleans, arrays and objects parse as JSON; anything else is a string.
fn parse_value(val: &str) -> Value {
    serde_json::from_str(val).unwrap_or_else(|_| Value::String(val.to_string()))
}

fn read_document(file: Option<PathBuf>) -> Result<Document, Box<dyn std::error::Error>> {
    let content = match file {
        Some(path) => std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read '{}': {e}", path.display()))?,
        None => {
            use std::io::Read;
            let mut content = String::new();
            std::io::stdin().read_to_string(&mut content)?;
            content
        }
    };
    match serde_json::from_str(&content)? {
        Value::Object(doc) => Ok(doc),
        other => Err(format!("Expected a JSON object, got {other}").into()),
    }
}

fn print_output(value: &Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert() -> Command {
        Command::Insert {
            tag: "users".to_string(),
            fields: vec![("name".to_string(), "Alice".to_string())],
        }
    }

    #[test]
    fn test_writes_need_a_persistent_driver() {
        let err = check_persistent(&DriverKind::Memory, &insert()).unwrap_err();
        assert!(err.contains("insert"));
        assert!(err.contains("sqlite"));

        let remove = Command::Remove {
            tag: "users".to_string(),
            id: "u1".to_string(),
        };
        assert!(check_persistent(&DriverKind::Memory, &remove).is_err());
        assert!(check_persistent(&DriverKind::Sqlite, &insert()).is_ok());
    }

    #[test]
    fn test_reads_work_on_any_driver() {
        let check = Command::Check {
            tag: "users".to_string(),
            file: None,
        };
        assert!(check_persistent(&DriverKind::Memory, &check).is_ok());
        assert!(check_persistent(&DriverKind::Memory, &Command::Indexes).is_ok());
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("home.city=Lyon=2").unwrap(),
            ("home.city".to_string(), "Lyon=2".to_string())
        );
        assert!(parse_key_value("name").is_err());
        assert_eq!(parse_value("31"), json!(31));
        assert_eq!(parse_value("Alice"), json!("Alice"));
    }
}
