//! Converter definitions stored in column comments.
//!
//! A converter tells downstream tooling how to interpret a column's raw value
//! (for example, which integer stands for which enum variant) using nothing but
//! the database catalog.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::Result;

/// Key marking a comment as a machine-readable converter definition.
const AUTO_CONVERT_KEY: &str = "autoConvert";

/// Typed metadata describing how a column's values convert.
#[derive(Debug, Clone, PartialEq)]
pub enum ConverterDefinition {
    /// Integer-backed enum: variant name to stored value.
    Enum(BTreeMap<String, i64>),
    /// Any other converter, identified by its `type` with free-form options.
    Custom {
        /// Converter type name.
        kind: String,
        /// Additional options, serialized next to `type`.
        options: Map<String, Value>,
    },
}

impl ConverterDefinition {
    /// Builds an enum converter from `(variant, value)` pairs.
    #[must_use]
    pub fn enumeration<'a>(values: impl IntoIterator<Item = (&'a str, i64)>) -> Self {
        Self::Enum(
            values
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        )
    }

    /// Serializes to the pretty-printed JSON stored as the column comment.
    ///
    /// # Errors
    ///
    /// Fails only if serde cannot serialize the options.
    pub fn to_comment(&self) -> Result<String> {
        let mut object = Map::new();
        object.insert(AUTO_CONVERT_KEY.to_string(), Value::Bool(true));
        match self {
            Self::Enum(values) => {
                object.insert("type".to_string(), Value::from("enum"));
                object.insert("values".to_string(), serde_json::to_value(values)?);
            }
            Self::Custom { kind, options } => {
                for (key, value) in options {
                    object.insert(key.clone(), value.clone());
                }
                object.insert("type".to_string(), Value::from(kind.as_str()));
            }
        }
        Ok(serde_json::to_string_pretty(&Value::Object(object))?)
    }

    /// Recovers a definition from a column comment.
    ///
    /// Returns `None` for comments that are not converter definitions.
    #[must_use]
    pub fn from_comment(comment: &str) -> Option<Self> {
        let Value::Object(mut object) = serde_json::from_str::<Value>(comment).ok()? else {
            return None;
        };
        if object.remove(AUTO_CONVERT_KEY) != Some(Value::Bool(true)) {
            return None;
        }
        let kind = match object.remove("type")? {
            Value::String(kind) => kind,
            _ => return None,
        };
        if kind == "enum" {
            let values = serde_json::from_value(object.remove("values")?).ok()?;
            return Some(Self::Enum(values));
        }
        Some(Self::Custom {
            kind,
            options: object,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_comment() {
        let def = ConverterDefinition::enumeration([("active", 1), ("banned", 2)]);
        let comment = def.to_comment().unwrap();
        assert_eq!(
            comment,
            "{\n  \"autoConvert\": true,\n  \"type\": \"enum\",\n  \"values\": {\n    \"active\": 1,\n    \"banned\": 2\n  }\n}"
        );
    }

    #[test]
    fn test_custom_comment_keeps_type() {
        let mut options = Map::new();
        options.insert("type".to_string(), Value::from("overridden"));
        options.insert("unit".to_string(), Value::from("cents"));
        let def = ConverterDefinition::Custom {
            kind: "money".to_string(),
            options,
        };
        let comment = def.to_comment().unwrap();
        assert!(comment.contains("\"type\": \"money\""));
        assert!(comment.contains("\"unit\": \"cents\""));
    }

    #[test]
    fn test_recover_from_comment() {
        let def = ConverterDefinition::enumeration([("low", 0), ("high", 10)]);
        let comment = def.to_comment().unwrap();
        assert_eq!(ConverterDefinition::from_comment(&comment), Some(def));
    }

    #[test]
    fn test_plain_comment_is_not_converter() {
        assert_eq!(ConverterDefinition::from_comment("user's email"), None);
        assert_eq!(ConverterDefinition::from_comment("{\"type\": \"enum\"}"), None);
    }
}
