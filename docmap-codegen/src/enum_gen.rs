use docmap::schema::{FieldDefinition, FieldType, SchemaDefinition};
use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use crate::type_utils::{choice_enum_name, choice_values, enum_variant_ident};

/// Generate an enum for every `choice` field declared directly on an entity
/// (e.g. UserRole, OrderStatus).
pub fn generate_enums(schema: &SchemaDefinition) -> TokenStream {
    let mut tokens = TokenStream::new();

    for (tag, entity_def) in &schema.entities {
        for (field_name, field_def) in &entity_def.fields {
            if field_def.field_type == FieldType::Choice {
                tokens.extend(generate_choice_enum(tag, field_name, field_def));
            }
        }
    }

    tokens
}

/// Generate a choice enum with its wire conversions.
fn generate_choice_enum(owner: &str, field_name: &str, field_def: &FieldDefinition) -> TokenStream {
    let type_ident = format_ident!("{}", choice_enum_name(owner, field_name));
    let values = choice_values(field_def);
    let variants: Vec<_> = values.iter().map(|v| enum_variant_ident(v)).collect();
    let doc = format!(" Values of `{owner}.{field_name}`.");

    let default_impl = field_def
        .default
        .as_ref()
        .and_then(|value| value.as_str())
        .filter(|value| values.iter().any(|v| v == value))
        .map(|value| {
            let variant = enum_variant_ident(value);
            quote! {
                impl Default for #type_ident {
                    fn default() -> Self {
                        Self::#variant
                    }
                }
            }
        });

    quote! {
        #[doc = #doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum #type_ident {
            #(#variants),*
        }

        impl #type_ident {
            /// The value as stored in documents.
            pub fn as_str(&self) -> &'static str {
                match self {
                    #(Self::#variants => #values),*
                }
            }

            pub fn from_wire(value: &str) -> Option<Self> {
                match value {
                    #(#values => Some(Self::#variants),)*
                    _ => None,
                }
            }
        }

        #default_impl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmap::schema::ChoiceDefinition;

    fn role_field() -> FieldDefinition {
        let mut field = FieldDefinition::of(FieldType::Choice);
        field.choices = Some(vec![
            ChoiceDefinition::Value("admin".into()),
            ChoiceDefinition::Labeled {
                value: "member".into(),
                label: "Member".into(),
            },
            ChoiceDefinition::Value("in_review".into()),
        ]);
        field
    }

    #[test]
    fn test_generate_choice_enum_with_default() {
        let mut field = role_field();
        field.default = Some(serde_json::json!("member"));

        let code = generate_choice_enum("users", "role", &field).to_string();

        assert!(code.contains("pub enum UserRole"));
        assert!(code.contains("Admin"));
        assert!(code.contains("InReview"));
        assert!(code.contains("Self :: InReview => \"in_review\""));
        assert!(code.contains("\"member\" => Some (Self :: Member)"));
        assert!(code.contains("impl Default for UserRole"));
    }

    #[test]
    fn test_unknown_default_is_ignored() {
        let mut field = role_field();
        field.default = Some(serde_json::json!("owner"));

        let code = generate_choice_enum("users", "role", &field).to_string();
        assert!(!code.contains("impl Default"));
    }
}
