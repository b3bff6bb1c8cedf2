use docmap::schema::{ChoiceDefinition, FieldDefinition, FieldType};
use heck::{ToPascalCase, ToSnakeCase};
use proc_macro2::{Ident, TokenStream};
use quote::{format_ident, quote};

/// Method names every generated wrapper already defines. A slot with one of
/// these names gets a `get_` prefixed getter instead.
const WRAPPER_METHODS: &[&str] = &[
    "new",
    "id",
    "entity",
    "entity_mut",
    "into_entity",
    "from_entity",
    "state",
    "validate",
    "save",
    "remove",
    "save_delta",
    "to_document",
];

/// Convert a type tag to its singular PascalCase struct name.
/// e.g. "users" -> "User", "blog_posts" -> "BlogPost"
pub fn entity_struct_name(tag: &str) -> String {
    singularize(&tag.to_snake_case()).to_pascal_case()
}

/// Convert a type tag to a snake_case method suffix.
/// e.g. "Users" -> "users", "BlogPost" -> "blog_post"
pub fn entity_method_name(tag: &str) -> String {
    tag.to_snake_case()
}

/// Generate an enum name from the owner's singular name + slot name.
/// e.g. ("users", "role") -> "UserRole"
pub fn choice_enum_name(owner: &str, field_name: &str) -> String {
    format!(
        "{}{}",
        entity_struct_name(owner),
        field_name.to_pascal_case()
    )
}

/// Naive singularization of English words.
pub fn singularize(word: &str) -> String {
    let w = word.to_lowercase();
    if w.ends_with("ies") {
        format!("{}y", &w[..w.len() - 3])
    } else if w.ends_with("ses") || w.ends_with("xes") || w.ends_with("zes") {
        w[..w.len() - 2].to_string()
    } else if w.ends_with("ves") {
        format!("{}f", &w[..w.len() - 3])
    } else if w.ends_with('s') && !w.ends_with("ss") {
        w[..w.len() - 1].to_string()
    } else {
        w
    }
}

fn is_keyword(name: &str) -> bool {
    matches!(
        name,
        "type" | "struct" | "enum" | "fn" | "let" | "mut" | "ref" | "super"
            | "mod" | "use" | "pub" | "impl" | "trait" | "for" | "loop" | "while" | "if" | "else"
            | "match" | "return" | "break" | "continue" | "as" | "in" | "where" | "async"
            | "await" | "dyn" | "move" | "static" | "const" | "unsafe" | "extern" | "true"
            | "false" | "abstract" | "become" | "box" | "do" | "final" | "macro" | "override"
            | "priv" | "typeof" | "unsized" | "virtual" | "yield" | "try"
    )
}

/// Check if a slot name is a Rust keyword and needs raw identifier syntax.
pub fn safe_field_ident(name: &str) -> Ident {
    let snake = name.to_snake_case();
    match snake.as_str() {
        // Not valid even as raw identifiers
        "self" | "crate" | "Self" => format_ident!("{}_", snake),
        s if is_keyword(s) => format_ident!("r#{}", s),
        _ => format_ident!("{}", snake),
    }
}

/// The getter name for a slot, stepping aside for the wrapper's own methods.
pub fn getter_ident(name: &str) -> Ident {
    let snake = name.to_snake_case();
    if WRAPPER_METHODS.contains(&snake.as_str()) {
        format_ident!("get_{}", snake)
    } else {
        safe_field_ident(name)
    }
}

/// `<prefix>_<slot>` / `<slot>_<suffix>`; never a keyword, so never raw.
pub fn prefixed_ident(prefix: &str, name: &str) -> Ident {
    format_ident!("{}_{}", prefix, name.to_snake_case())
}

pub fn suffixed_ident(name: &str, suffix: &str) -> Ident {
    format_ident!("{}_{}", name.to_snake_case(), suffix)
}

/// Turn a stored choice value into an enum variant. Values that do not start
/// with a letter get a `V` prefix.
/// e.g. "in_progress" -> "InProgress", "1" -> "V1"
pub fn enum_variant_ident(value: &str) -> Ident {
    let name = value.to_pascal_case();
    match name.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => format_ident!("{}", name),
        Some(_) => format_ident!("V{}", name),
        None => format_ident!("Empty"),
    }
}

/// The stored values of a choice field, in declaration order.
pub fn choice_values(field: &FieldDefinition) -> Vec<String> {
    field
        .choices
        .iter()
        .flatten()
        .map(|choice| match choice {
            ChoiceDefinition::Value(value) => value.clone(),
            ChoiceDefinition::Labeled { value, .. } => value.clone(),
        })
        .collect()
}

/// How a scalar field is read from and written to the entity.
pub struct ScalarAccess {
    /// Getter return type (already wrapped in `Option`)
    pub getter_type: TokenStream,
    /// Expression turning `Option<&docmap::Field>` bound as `field` into the getter value
    pub read: TokenStream,
    /// Setter parameter type
    pub setter_type: TokenStream,
    /// Expression turning the setter parameter `value` into a `serde_json::Value`
    pub write: TokenStream,
}

/// Map a scalar field kind to its Rust-side accessors. Returns `None` for
/// slots that are not plain fields (lists, references, lazy relations and
/// embedded types).
pub fn scalar_access(field: &FieldDefinition, owner: &str, field_name: &str) -> Option<ScalarAccess> {
    let access = match &field.field_type {
        FieldType::Char
        | FieldType::Regex
        | FieldType::Email
        | FieldType::Phone
        | FieldType::DocumentId => ScalarAccess {
            getter_type: quote! { Option<&str> },
            read: quote! { field.and_then(docmap::Field::as_str) },
            setter_type: quote! { impl Into<String> },
            write: quote! { serde_json::Value::String(value.into()) },
        },
        FieldType::Integer | FieldType::AutoIncrement => ScalarAccess {
            getter_type: quote! { Option<i64> },
            read: quote! { field.and_then(docmap::Field::as_i64) },
            setter_type: quote! { i64 },
            write: quote! { serde_json::Value::from(value) },
        },
        FieldType::Float => ScalarAccess {
            getter_type: quote! { Option<f64> },
            read: quote! { field.and_then(docmap::Field::as_f64) },
            setter_type: quote! { f64 },
            write: quote! { serde_json::Value::from(value) },
        },
        FieldType::Boolean => ScalarAccess {
            getter_type: quote! { Option<bool> },
            read: quote! { field.and_then(docmap::Field::as_bool) },
            setter_type: quote! { bool },
            write: quote! { serde_json::Value::Bool(value) },
        },
        FieldType::Date | FieldType::Timestamp => ScalarAccess {
            getter_type: quote! { Option<chrono::DateTime<chrono::Utc>> },
            read: quote! { field.and_then(docmap::Field::as_datetime) },
            setter_type: quote! { chrono::DateTime<chrono::Utc> },
            write: quote! { serde_json::Value::String(value.to_rfc3339()) },
        },
        FieldType::Geo | FieldType::Object => ScalarAccess {
            getter_type: quote! { Option<&serde_json::Value> },
            read: quote! { field.and_then(docmap::Field::get) },
            setter_type: quote! { serde_json::Value },
            write: quote! { value },
        },
        FieldType::Choice => {
            let ident = format_ident!("{}", choice_enum_name(owner, field_name));
            ScalarAccess {
                getter_type: quote! { Option<#ident> },
                read: quote! { field.and_then(docmap::Field::as_str).and_then(#ident::from_wire) },
                setter_type: quote! { #ident },
                write: quote! { serde_json::Value::String(value.as_str().to_string()) },
            }
        }
        FieldType::List | FieldType::Ref | FieldType::Lazy | FieldType::Custom(_) => return None,
    };
    Some(access)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("users"), "user");
        assert_eq!(singularize("posts"), "post");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("addresses"), "address");
        assert_eq!(singularize("person"), "person");
    }

    #[test]
    fn test_entity_struct_name() {
        assert_eq!(entity_struct_name("users"), "User");
        assert_eq!(entity_struct_name("blog_posts"), "BlogPost");
        assert_eq!(entity_struct_name("Account"), "Account");
    }

    #[test]
    fn test_choice_enum_name() {
        assert_eq!(choice_enum_name("users", "role"), "UserRole");
        assert_eq!(choice_enum_name("orders", "pay_state"), "OrderPayState");
    }

    #[test]
    fn test_safe_field_ident() {
        assert_eq!(safe_field_ident("type").to_string(), "r#type");
        assert_eq!(safe_field_ident("self").to_string(), "self_");
        assert_eq!(safe_field_ident("firstName").to_string(), "first_name");
    }

    #[test]
    fn test_getter_ident_avoids_wrapper_methods() {
        assert_eq!(getter_ident("id").to_string(), "get_id");
        assert_eq!(getter_ident("save").to_string(), "get_save");
        assert_eq!(getter_ident("name").to_string(), "name");
    }

    #[test]
    fn test_enum_variant_ident() {
        assert_eq!(enum_variant_ident("in_progress").to_string(), "InProgress");
        assert_eq!(enum_variant_ident("1").to_string(), "V1");
        assert_eq!(enum_variant_ident("").to_string(), "Empty");
    }

    #[test]
    fn test_scalar_access() {
        let char_field = FieldDefinition::of(FieldType::Char);
        let access = scalar_access(&char_field, "users", "name").unwrap();
        assert_eq!(access.getter_type.to_string(), "Option < & str >");

        let choice = FieldDefinition::of(FieldType::Choice);
        let access = scalar_access(&choice, "users", "role").unwrap();
        assert!(access.read.to_string().contains("UserRole :: from_wire"));

        assert!(scalar_access(&FieldDefinition::of(FieldType::List), "users", "tags").is_none());
    }
}
