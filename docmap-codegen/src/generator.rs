use docmap::schema::SchemaDefinition;
use proc_macro2::TokenStream;
use quote::quote;

use crate::{enum_gen, store_gen, struct_gen};

/// Generate the complete module: choice enums, entity wrappers and the
/// `DatabaseExt` trait. Entities are visited in tag order, so the output is
/// deterministic.
pub fn generate_all(schema: &SchemaDefinition) -> TokenStream {
    let enums = enum_gen::generate_enums(schema);
    let structs = struct_gen::generate_structs(schema);
    let database_ext = store_gen::generate_database_ext(schema);

    quote! {
        #enums
        #structs
        #database_ext
    }
}

/// Pretty-print generated tokens as a source file.
pub fn format_token_stream(tokens: &TokenStream) -> Result<String, syn::Error> {
    let file = syn::parse2::<syn::File>(tokens.clone())?;
    Ok(format!(
        "// @generated by docmap-codegen. Do not edit.\n\n{}",
        prettyplease::unparse(&file)
    ))
}
