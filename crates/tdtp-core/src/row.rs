//! Pipe-delimited row encoding (§3.1 row encoding invariant).
//!
//! `|` separates fields. Within a field a literal pipe is written `\|` and a
//! literal backslash `\\`. Escaping must be applied *last* during encoding
//! (so the escape bytes themselves are never re-escaped) and undone *first*
//! during decoding.

use crate::error::{Result, TdtpError};

/// Escape a single field value for inclusion in a pipe-delimited row.
/// Order matters: backslash first, then pipe, so `\|` in the output always
/// means "escaped pipe" and never "escaped-backslash followed by a raw pipe".
pub fn escape_field(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\|"),
            other => out.push(other),
        }
    }
    out
}

/// Join already-escaped field values with `|`.
pub fn encode_row(escaped_fields: &[String]) -> String {
    escaped_fields.join("|")
}

/// Serialize raw (unescaped) typed field strings into one row blob.
pub fn format_row(fields: &[String]) -> String {
    let escaped: Vec<String> = fields.iter().map(|f| escape_field(f)).collect();
    encode_row(&escaped)
}

/// Split a row blob into its decoded (unescaped) field values, honoring the
/// `\|`/`\\` escapes. A lone trailing backslash is a parse error.
pub fn split_row(row: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = row.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some('\\') => current.push('\\'),
                Some('|') => current.push('|'),
                Some(other) => {
                    return Err(TdtpError::validation(
                        "row",
                        format!("illegal escape '\\{other}'"),
                    ));
                }
                None => {
                    return Err(TdtpError::validation(
                        "row",
                        "row ends with a lone backslash (invalid escape)",
                    ));
                }
            },
            '|' => {
                fields.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    fields.push(current);
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_in_field_round_trips() {
        let formatted = format_row(&["a|b".to_string(), "c".to_string()]);
        assert_eq!(formatted, "a\\|b|c");
        let parsed = split_row(&formatted).unwrap();
        assert_eq!(parsed, vec!["a|b".to_string(), "c".to_string()]);
    }

    #[test]
    fn backslash_in_field_round_trips() {
        let formatted = format_row(&["a\\b".to_string()]);
        assert_eq!(formatted, "a\\\\b");
        let parsed = split_row(&formatted).unwrap();
        assert_eq!(parsed, vec!["a\\b".to_string()]);
    }

    #[test]
    fn escaping_is_applied_last_so_backslash_pipe_combo_is_unambiguous() {
        // raw field is a single backslash followed by a pipe character
        let raw = "\\|";
        let formatted = format_row(&[raw.to_string()]);
        // backslash escapes to \\, pipe escapes to \|, giving \\\|
        assert_eq!(formatted, "\\\\\\|");
        let parsed = split_row(&formatted).unwrap();
        assert_eq!(parsed, vec![raw.to_string()]);
    }

    #[test]
    fn lone_trailing_backslash_is_error() {
        assert!(split_row("abc\\").is_err());
    }

    #[test]
    fn backslash_followed_by_non_escape_char_is_error() {
        assert!(split_row("a\\xb").is_err());
    }

    #[test]
    fn only_pipe_decodes_to_pipe() {
        let parsed = split_row("\\|").unwrap();
        assert_eq!(parsed, vec!["|".to_string()]);
    }

    #[test]
    fn empty_field_decodes_to_empty_string() {
        let parsed = split_row("a||b").unwrap();
        assert_eq!(parsed, vec!["a".to_string(), "".to_string(), "b".to_string()]);
    }
}
