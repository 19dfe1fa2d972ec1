//! Canonical TDTP types and the text `Converter` that parses/formats them
//! to and from the row encoding described by the packet wire format.

use crate::error::{Result, TdtpError};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// The nine canonical TDTP field types. Synonyms (`INT`, `FLOAT`, `DOUBLE`,
/// `VARCHAR`, `CHAR`, `STRING`, `BOOL`) normalize to one of these via
/// [`TdtpType::normalize`]; all schema validation compares normalized forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TdtpType {
    Integer,
    Real,
    Decimal,
    Text,
    Boolean,
    Date,
    DateTime,
    Timestamp,
    Blob,
}

impl TdtpType {
    /// Parse a type name, folding known synonyms into their canonical form.
    pub fn normalize(name: &str) -> Result<Self> {
        let upper = name.trim().to_ascii_uppercase();
        Ok(match upper.as_str() {
            "INTEGER" | "INT" => TdtpType::Integer,
            "REAL" | "FLOAT" | "DOUBLE" => TdtpType::Real,
            "DECIMAL" => TdtpType::Decimal,
            "TEXT" | "VARCHAR" | "CHAR" | "STRING" => TdtpType::Text,
            "BOOLEAN" | "BOOL" => TdtpType::Boolean,
            "DATE" => TdtpType::Date,
            "DATETIME" => TdtpType::DateTime,
            "TIMESTAMP" => TdtpType::Timestamp,
            "BLOB" => TdtpType::Blob,
            other => {
                return Err(TdtpError::validation(
                    "value",
                    format!("unknown field type '{other}'"),
                ))
            }
        })
    }

    pub fn canonical_name(&self) -> &'static str {
        match self {
            TdtpType::Integer => "INTEGER",
            TdtpType::Real => "REAL",
            TdtpType::Decimal => "DECIMAL",
            TdtpType::Text => "TEXT",
            TdtpType::Boolean => "BOOLEAN",
            TdtpType::Date => "DATE",
            TdtpType::DateTime => "DATETIME",
            TdtpType::Timestamp => "TIMESTAMP",
            TdtpType::Blob => "BLOB",
        }
    }

    /// Whether the empty-field sentinel means NULL for this type. Only TEXT
    /// treats the empty string as a valid (non-NULL) value.
    pub fn empty_field_is_null(&self) -> bool {
        !matches!(self, TdtpType::Text)
    }
}

impl fmt::Display for TdtpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_name())
    }
}

/// Default DECIMAL precision/scale when a field omits them (§3.2).
pub const DEFAULT_DECIMAL_PRECISION: u32 = 18;
pub const DEFAULT_DECIMAL_SCALE: u32 = 2;

/// An in-memory typed value, the Converter's output and the executor/diff/
/// merge layers' comparison unit.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Integer(i64),
    Real(f64),
    Decimal(Decimal),
    Text(String),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
    Timestamp(DateTime<Utc>),
    Blob(Vec<u8>),
    Null,
}

impl TypedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }
}

/// Parses and formats [`TypedValue`]s per the encoding rules in §3.1.
pub struct Converter;

impl Converter {
    /// Parse a single decoded field string (escapes already removed) into a
    /// typed value per the declared field type, precision, and scale.
    pub fn parse(
        raw: &str,
        ty: TdtpType,
        precision: Option<u32>,
        scale: Option<u32>,
    ) -> Result<TypedValue> {
        if raw.is_empty() && ty.empty_field_is_null() {
            return Ok(TypedValue::Null);
        }

        match ty {
            TdtpType::Integer => raw
                .parse::<i64>()
                .map(TypedValue::Integer)
                .map_err(|e| TdtpError::validation("value", format!("invalid INTEGER '{raw}': {e}"))),

            TdtpType::Real => raw
                .parse::<f64>()
                .map(TypedValue::Real)
                .map_err(|e| TdtpError::validation("value", format!("invalid REAL '{raw}': {e}"))),

            TdtpType::Decimal => {
                let d = Decimal::from_str(raw)
                    .map_err(|e| TdtpError::validation("value", format!("invalid DECIMAL '{raw}': {e}")))?;
                let scale = scale.unwrap_or(DEFAULT_DECIMAL_SCALE);
                let precision = precision.unwrap_or(DEFAULT_DECIMAL_PRECISION);
                if d.scale() > scale {
                    return Err(TdtpError::validation(
                        "value",
                        format!("DECIMAL '{raw}' scale {} exceeds declared scale {scale}", d.scale()),
                    ));
                }
                let digits = d.mantissa().unsigned_abs().to_string().len() as u32;
                if digits > precision {
                    return Err(TdtpError::validation(
                        "value",
                        format!("DECIMAL '{raw}' exceeds declared precision {precision}"),
                    ));
                }
                Ok(TypedValue::Decimal(d))
            }

            TdtpType::Text => Ok(TypedValue::Text(raw.to_string())),

            TdtpType::Boolean => match raw {
                "0" => Ok(TypedValue::Boolean(false)),
                "1" => Ok(TypedValue::Boolean(true)),
                other => Err(TdtpError::validation("value", format!("invalid BOOLEAN '{other}', expected 0 or 1"))),
            },

            TdtpType::Date => {
                if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
                    Ok(TypedValue::Date(d))
                } else if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
                    Ok(TypedValue::Date(ts.date_naive()))
                } else {
                    Err(TdtpError::validation("value", format!("invalid DATE '{raw}'")))
                }
            }

            TdtpType::DateTime => DateTime::parse_from_rfc3339(raw)
                .map(TypedValue::DateTime)
                .map_err(|e| TdtpError::validation("value", format!("invalid DATETIME '{raw}': {e}"))),

            TdtpType::Timestamp => DateTime::parse_from_rfc3339(raw)
                .map(|dt| TypedValue::Timestamp(dt.with_timezone(&Utc)))
                .map_err(|e| TdtpError::validation("value", format!("invalid TIMESTAMP '{raw}': {e}"))),

            TdtpType::Blob => base64::Engine::decode(&base64::engine::general_purpose::STANDARD, raw)
                .map(TypedValue::Blob)
                .map_err(|e| TdtpError::validation("value", format!("invalid BLOB base64: {e}"))),
        }
    }

    /// Format a typed value back to its wire-field text (pre-escaping).
    pub fn format(value: &TypedValue) -> String {
        match value {
            TypedValue::Integer(i) => i.to_string(),
            TypedValue::Real(r) => format_shortest_round_trip(*r),
            TypedValue::Decimal(d) => d.to_string(),
            TypedValue::Text(s) => s.clone(),
            TypedValue::Boolean(b) => if *b { "1".to_string() } else { "0".to_string() },
            TypedValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            TypedValue::DateTime(dt) => dt.to_rfc3339(),
            TypedValue::Timestamp(ts) => ts.to_rfc3339(),
            TypedValue::Blob(b) => base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b),
            TypedValue::Null => String::new(),
        }
    }
}

/// Rust's default `f64::to_string` already produces the shortest
/// round-trippable decimal representation (ryu-based since 1.x's fmt rewrite).
fn format_shortest_round_trip(v: f64) -> String {
    v.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_synonyms() {
        assert_eq!(TdtpType::normalize("int").unwrap(), TdtpType::Integer);
        assert_eq!(TdtpType::normalize("VARCHAR").unwrap(), TdtpType::Text);
        assert_eq!(TdtpType::normalize("Bool").unwrap(), TdtpType::Boolean);
        assert_eq!(TdtpType::normalize("double").unwrap(), TdtpType::Real);
    }

    #[test]
    fn unknown_type_is_validation_error() {
        assert!(TdtpType::normalize("NOT_A_TYPE").is_err());
    }

    #[test]
    fn empty_integer_is_null_empty_text_is_not() {
        assert_eq!(Converter::parse("", TdtpType::Integer, None, None).unwrap(), TypedValue::Null);
        assert_eq!(
            Converter::parse("", TdtpType::Text, None, None).unwrap(),
            TypedValue::Text(String::new())
        );
    }

    #[test]
    fn decimal_rejects_excess_scale() {
        let err = Converter::parse("12.345", TdtpType::Decimal, Some(18), Some(2));
        assert!(err.is_err());
    }

    #[test]
    fn timestamp_normalizes_to_utc() {
        let v = Converter::parse("2024-01-01T10:00:00+02:00", TdtpType::Timestamp, None, None).unwrap();
        match v {
            TypedValue::Timestamp(ts) => assert_eq!(ts.to_rfc3339(), "2024-01-01T08:00:00+00:00"),
            _ => panic!("expected Timestamp"),
        }
    }

    #[test]
    fn boolean_round_trip() {
        let v = Converter::parse("1", TdtpType::Boolean, None, None).unwrap();
        assert_eq!(Converter::format(&v), "1");
    }

    #[test]
    fn date_accepts_full_rfc3339_and_discards_time() {
        let v = Converter::parse("2024-03-05T10:00:00Z", TdtpType::Date, None, None).unwrap();
        assert_eq!(Converter::format(&v), "2024-03-05");
    }
}
