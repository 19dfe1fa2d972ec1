//! Schema and Field — the ordered, self-describing column list every
//! packet carries alongside its data.

use crate::error::{Result, TdtpError};
use crate::value::TdtpType;
use serde::{Deserialize, Serialize};

/// A single column definition. `length` follows the §3.1 convention that a
/// value `<= 0` means "unbounded" (used for TEXT subtypes like uuid/json/inet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub length: Option<i64>,
    #[serde(default)]
    pub precision: Option<u32>,
    #[serde(default)]
    pub scale: Option<u32>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub key: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: TdtpType) -> Self {
        Self {
            name: name.into(),
            type_name: ty.canonical_name().to_string(),
            length: None,
            precision: None,
            scale: None,
            timezone: None,
            key: false,
        }
    }

    pub fn with_key(mut self, key: bool) -> Self {
        self.key = key;
        self
    }

    pub fn with_precision_scale(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    /// Resolve this field's type name into its canonical form.
    pub fn normalized_type(&self) -> Result<TdtpType> {
        TdtpType::normalize(&self.type_name)
    }

    /// An unbounded-length subtype, per §3.1 (`length <= 0`).
    pub fn is_unbounded(&self) -> bool {
        matches!(self.length, Some(n) if n <= 0)
    }
}

/// An ordered sequence of fields, with the packet-level invariants:
/// at most one primary key, no duplicate names, at least one field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        let schema = Self { fields };
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(TdtpError::validation("schema", "schema must declare at least one field"));
        }

        let mut seen = std::collections::HashSet::new();
        for f in &self.fields {
            if !seen.insert(&f.name) {
                return Err(TdtpError::validation(
                    "schema",
                    format!("duplicate field name '{}'", f.name),
                ));
            }
            // Validates the type name eagerly so malformed schemas fail at
            // construction rather than at first row-parse.
            f.normalized_type()?;
        }

        let key_count = self.fields.iter().filter(|f| f.key).count();
        if key_count > 1 {
            return Err(TdtpError::validation(
                "schema",
                format!("schema declares {key_count} primary-key fields, at most one is allowed"),
            ));
        }

        Ok(())
    }

    pub fn primary_key_field(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.key)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_schema() {
        assert!(Schema::new(vec![]).is_err());
    }

    #[test]
    fn rejects_duplicate_names() {
        let fields = vec![Field::new("id", TdtpType::Integer), Field::new("id", TdtpType::Text)];
        assert!(Schema::new(fields).is_err());
    }

    #[test]
    fn rejects_multiple_keys() {
        let fields = vec![
            Field::new("id", TdtpType::Integer).with_key(true),
            Field::new("other_id", TdtpType::Integer).with_key(true),
        ];
        assert!(Schema::new(fields).is_err());
    }

    #[test]
    fn accepts_single_key_schema() {
        let fields = vec![
            Field::new("id", TdtpType::Integer).with_key(true),
            Field::new("name", TdtpType::Text),
        ];
        let schema = Schema::new(fields).unwrap();
        assert_eq!(schema.primary_key_field().unwrap().name, "id");
    }
}
