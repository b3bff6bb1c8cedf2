use docmap::schema::SchemaDefinition;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use crate::type_utils::{entity_method_name, entity_struct_name, singularize};

/// Generate the DatabaseExt trait with typed constructors and lookups.
pub fn generate_database_ext(schema: &SchemaDefinition) -> TokenStream {
    let mut trait_methods = Vec::new();
    let mut impl_methods = Vec::new();

    for tag in schema.entities.keys() {
        let struct_ident = format_ident!("{}", entity_struct_name(tag));
        let method_name = entity_method_name(tag);
        let new_ident = format_ident!("new_{}", singularize(&method_name));
        let get_ident = format_ident!("get_{}", singularize(&method_name));
        let find_ident = format_ident!("find_{}", method_name);

        trait_methods.push(quote! {
            fn #new_ident(&self) -> docmap::Result<#struct_ident>;
            fn #get_ident(&self, id: &str) -> docmap::Result<Option<#struct_ident>>;
            fn #find_ident(&self, filter: docmap::Filter) -> docmap::Result<Vec<#struct_ident>>;
        });

        impl_methods.push(quote! {
            fn #new_ident(&self) -> docmap::Result<#struct_ident> {
                #struct_ident::from_entity(self.create(#tag)?)
            }

            fn #get_ident(&self, id: &str) -> docmap::Result<Option<#struct_ident>> {
                self.get(#tag, id)?.map(#struct_ident::from_entity).transpose()
            }

            fn #find_ident(&self, filter: docmap::Filter) -> docmap::Result<Vec<#struct_ident>> {
                self.find(#tag, filter)?.map(#struct_ident::from_entity).collect()
            }
        });
    }

    quote! {
        /// Extension trait providing typed constructors and lookups.
        pub trait DatabaseExt {
            #(#trait_methods)*
        }

        impl DatabaseExt for docmap::Database {
            #(#impl_methods)*
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmap::schema::EntityDefinition;

    #[test]
    fn test_generate_database_ext() {
        let mut schema = SchemaDefinition::default();
        schema
            .entities
            .insert("users".to_string(), EntityDefinition::default());
        schema
            .entities
            .insert("blog_posts".to_string(), EntityDefinition::default());

        let code = generate_database_ext(&schema).to_string();

        assert!(code.contains("pub trait DatabaseExt"));
        assert!(code.contains("impl DatabaseExt for docmap :: Database"));
        assert!(code.contains("fn new_user (& self) -> docmap :: Result < User >"));
        assert!(code.contains("fn get_blog_post (& self , id : & str)"));
        assert!(code.contains("fn find_users"));
        assert!(code.contains("self . create (\"users\")"));
    }
}
