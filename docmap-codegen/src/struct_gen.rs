use docmap::schema::{EntityDefinition, FieldDefinition, FieldType, SchemaDefinition};
use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use crate::type_utils::{
    entity_struct_name, getter_ident, prefixed_ident, scalar_access, suffixed_ident,
};

/// Generate a typed wrapper struct for every entity type.
pub fn generate_structs(schema: &SchemaDefinition) -> TokenStream {
    let mut tokens = TokenStream::new();
    for (tag, entity_def) in &schema.entities {
        tokens.extend(generate_entity_struct(tag, entity_def));
    }
    tokens
}

/// Generate the wrapper for one entity type: lifecycle delegation plus one
/// set of accessors per declared slot.
fn generate_entity_struct(tag: &str, entity_def: &EntityDefinition) -> TokenStream {
    let struct_ident = format_ident!("{}", entity_struct_name(tag));
    let doc_comment = format!(
        " A `{}` entity, stored in the `{}` collection.",
        tag,
        entity_def.collection.as_deref().unwrap_or(tag)
    );

    let accessors: Vec<_> = entity_def
        .fields
        .iter()
        .map(|(field_name, field_def)| generate_accessors(tag, field_name, field_def))
        .collect();

    quote! {
        #[doc = #doc_comment]
        #[derive(Debug, Clone)]
        pub struct #struct_ident {
            entity: docmap::Entity,
        }

        impl #struct_ident {
            pub const TAG: &'static str = #tag;

            /// Wrap an entity, checking that it has the right type.
            pub fn from_entity(entity: docmap::Entity) -> docmap::Result<Self> {
                if entity.tag() != Self::TAG {
                    return Err(docmap::DocMapError::UnknownType(format!(
                        "expected {}, got {}",
                        Self::TAG,
                        entity.tag()
                    )));
                }
                Ok(Self { entity })
            }

            pub fn entity(&self) -> &docmap::Entity {
                &self.entity
            }

            pub fn entity_mut(&mut self) -> &mut docmap::Entity {
                &mut self.entity
            }

            pub fn into_entity(self) -> docmap::Entity {
                self.entity
            }

            pub fn id(&self) -> Option<&str> {
                self.entity.id()
            }

            pub fn state(&self) -> docmap::EntityState {
                self.entity.state()
            }

            pub fn validate(&self) -> docmap::ErrorReport {
                self.entity.validate()
            }

            pub fn save_delta(&self) -> docmap::Delta {
                self.entity.save_delta()
            }

            pub fn to_document(&self) -> docmap::Document {
                self.entity.to_document()
            }

            pub fn save(&mut self, db: &docmap::Database) -> docmap::Result<String> {
                self.entity.save(db)
            }

            pub fn remove(&mut self, db: &docmap::Database) -> docmap::Result<()> {
                self.entity.remove(db)
            }

            #(#accessors)*
        }

        impl From<#struct_ident> for docmap::Entity {
            fn from(wrapper: #struct_ident) -> Self {
                wrapper.entity
            }
        }
    }
}

/// Accessors for a single slot, chosen by the slot's kind.
fn generate_accessors(owner: &str, field_name: &str, field_def: &FieldDefinition) -> TokenStream {
    let getter = getter_ident(field_name);
    let setter = prefixed_ident("set", field_name);
    let getter_mut = suffixed_ident(field_name, "mut");

    if let Some(access) = scalar_access(field_def, owner, field_name) {
        let getter_type = access.getter_type;
        let read = access.read;
        let setter_type = access.setter_type;
        let write = access.write;
        return quote! {
            pub fn #getter(&self) -> #getter_type {
                let field = self.entity.field(#field_name);
                #read
            }

            pub fn #setter(&mut self, value: #setter_type) -> docmap::Result<()> {
                self.entity.set(#field_name, #write)
            }
        };
    }

    match &field_def.field_type {
        FieldType::List => quote! {
            pub fn #getter(&self) -> Option<&docmap::Container> {
                self.entity.container(#field_name)
            }

            pub fn #getter_mut(&mut self) -> Option<&mut docmap::Container> {
                self.entity.container_mut(#field_name)
            }

            /// Replace every element at once.
            pub fn #setter(&mut self, items: Vec<serde_json::Value>) -> docmap::Result<()> {
                self.entity.set(#field_name, serde_json::Value::Array(items))
            }
        },
        FieldType::Ref => {
            let fetch = prefixed_ident("fetch", field_name);
            quote! {
                pub fn #getter(&self) -> Option<&docmap::Relation> {
                    self.entity.relation(#field_name)
                }

                pub fn #getter_mut(&mut self) -> Option<&mut docmap::Relation> {
                    self.entity.relation_mut(#field_name)
                }

                pub fn #setter(&mut self, reference: docmap::Reference) -> docmap::Result<()> {
                    self.entity.set(#field_name, reference.to_json())
                }

                /// Load the referenced entity, or return the cached one.
                pub fn #fetch(&mut self, db: &docmap::Database) -> docmap::Result<&mut docmap::Entity> {
                    self.entity.dereference(#field_name, db)
                }
            }
        }
        FieldType::Lazy => quote! {
            pub fn #getter(
                &self,
                db: &docmap::Database,
                filter: docmap::Filter,
            ) -> docmap::Result<docmap::Cursor> {
                self.entity.lazy(#field_name, db, filter)
            }
        },
        FieldType::Custom(_) => quote! {
            pub fn #getter(&self) -> Option<&docmap::Composite> {
                self.entity.composite(#field_name)
            }

            pub fn #getter_mut(&mut self) -> Option<&mut docmap::Composite> {
                self.entity.composite_mut(#field_name)
            }
        },
        _ => TokenStream::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> EntityDefinition {
        let mut fields = docmap::schema::FieldMap::new();
        let mut name = FieldDefinition::of(FieldType::Char);
        name.required = true;
        fields.insert("name".to_string(), name);
        fields.insert("age".to_string(), FieldDefinition::of(FieldType::Integer));
        fields.insert("joined".to_string(), FieldDefinition::of(FieldType::Timestamp));
        fields.insert("tags".to_string(), FieldDefinition::of(FieldType::List));
        fields.insert("home".to_string(), FieldDefinition::of(FieldType::Custom("address".into())));
        fields.insert("manager".to_string(), FieldDefinition::of(FieldType::Ref));
        fields.insert("posts".to_string(), FieldDefinition::of(FieldType::Lazy));
        EntityDefinition {
            collection: Some("people".to_string()),
            fields,
            indexes: Vec::new(),
        }
    }

    #[test]
    fn test_generate_entity_struct() {
        let code = generate_entity_struct("users", &user()).to_string();

        assert!(code.contains("pub struct User"));
        assert!(code.contains("stored in the `people` collection"));
        assert!(code.contains("pub const TAG : & 'static str = \"users\""));
        assert!(code.contains("pub fn name (& self) -> Option < & str >"));
        assert!(code.contains("pub fn set_age (& mut self , value : i64)"));
        assert!(code.contains("chrono :: DateTime < chrono :: Utc >"));
        assert!(code.contains("pub fn tags_mut"));
        assert!(code.contains("pub fn home (& self) -> Option < & docmap :: Composite >"));
        assert!(code.contains("pub fn fetch_manager"));
        assert!(code.contains("self . entity . lazy (\"posts\" , db , filter)"));
    }

    #[test]
    fn test_slot_named_like_wrapper_method() {
        let mut def = user();
        def.fields
            .insert("state".to_string(), FieldDefinition::of(FieldType::Char));
        let code = generate_entity_struct("users", &def).to_string();

        assert!(code.contains("pub fn get_state (& self) -> Option < & str >"));
        assert!(code.contains("pub fn set_state"));
    }
}
