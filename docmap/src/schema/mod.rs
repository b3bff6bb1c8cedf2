//! Schema declarations: the YAML file format, its parser, and the static
//! descriptor tables every entity instance is constructed from.

mod compile;
mod descriptor;
mod parser;
mod types;

pub use compile::compile;
pub use descriptor::*;
pub use parser::{parse_schema, parse_schema_str};
pub use types::*;
