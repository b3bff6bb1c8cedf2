//! docmap code generation - typed entity wrappers from schema.yaml at build time.
//!
//! The main entry point is [`generate_from_schema`], which reads a schema.yaml file
//! and writes a Rust source file with one wrapper struct per entity type, an enum
//! per choice field, and a `DatabaseExt` trait with typed constructors.
//!
//! The generated code depends on `docmap`, `serde_json` and `chrono`.

mod enum_gen;
mod generator;
mod store_gen;
mod struct_gen;
pub mod type_utils;

use std::path::Path;

/// Generate typed wrappers from a schema.yaml file.
///
/// Reads the schema at `schema_path`, checks that it compiles, and writes the
/// generated code to `output_path`. This is intended to be called from a
/// `build.rs` build script.
///
/// # Example
///
/// ```no_run
/// // In build.rs:
/// docmap_codegen::generate_from_schema("schema.yaml", "src/generated.rs").unwrap();
/// ```
pub fn generate_from_schema(
    schema_path: &str,
    output_path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let schema = docmap::schema::parse_schema(Path::new(schema_path))?;
    let formatted = generate(&schema)?;
    std::fs::write(output_path, formatted)?;
    Ok(())
}

/// Generate typed wrappers from a schema YAML string.
///
/// Like [`generate_from_schema`] but takes the schema content directly
/// instead of reading from a file. Useful for testing.
pub fn generate_from_schema_str(
    schema_yaml: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let schema = docmap::schema::parse_schema_str(schema_yaml)?;
    generate(&schema)
}

fn generate(
    schema: &docmap::schema::SchemaDefinition,
) -> Result<String, Box<dyn std::error::Error>> {
    // Unknown types, bad patterns and the like fail here rather than in the generated code
    docmap::schema::compile(schema)?;
    let tokens = generator::generate_all(schema);
    Ok(generator::format_token_stream(&tokens)?)
}
