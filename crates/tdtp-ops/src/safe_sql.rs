//! Safe-mode SQL validator (§6): a gate applied to SQL text before it's
//! handed to the translator or the pipeline workspace, when a pipeline's
//! `security.safe_mode` is enabled.

use tdtp_core::error::{Result, TdtpError};

const SUBSYSTEM: &str = "safe_sql";

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "TRUNCATE", "MERGE", "DROP", "CREATE", "ALTER", "RENAME", "GRANT",
    "REVOKE", "EXECUTE", "EXEC", "CALL", "PRAGMA", "ATTACH", "DETACH", "BEGIN", "COMMIT", "ROLLBACK",
];

fn tokenize(sql: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in sql.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            current.push(ch);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Validates `sql` against the safe-mode rules. Returns `Ok(())` when the
/// statement is allowed, otherwise a `permission`-class error naming the
/// violation.
pub fn validate(sql: &str) -> Result<()> {
    if sql.contains("--") {
        return Err(reject("SQL comments are not permitted in safe mode"));
    }
    if sql.contains("/*") || sql.contains("*/") {
        return Err(reject("SQL block comments are not permitted in safe mode"));
    }

    let trimmed = sql.trim_end();
    let semicolon_positions: Vec<usize> = sql.match_indices(';').map(|(i, _)| i).collect();
    if !semicolon_positions.is_empty() {
        let last_non_whitespace = trimmed.len().saturating_sub(1);
        let only_trailing = semicolon_positions.len() == 1 && semicolon_positions[0] == last_non_whitespace;
        if !only_trailing {
            return Err(reject("a semicolon may only appear as the final character of the statement"));
        }
    }

    let tokens = tokenize(sql);
    let first = tokens
        .first()
        .ok_or_else(|| reject("empty statement is not permitted in safe mode"))?;
    let first_upper = first.to_ascii_uppercase();
    if first_upper != "SELECT" && first_upper != "WITH" {
        return Err(reject("statement must begin with SELECT or WITH in safe mode"));
    }

    for token in &tokens {
        let upper = token.to_ascii_uppercase();
        if FORBIDDEN_KEYWORDS.contains(&upper.as_str()) {
            return Err(reject(format!("keyword '{upper}' is not permitted in safe mode")));
        }
    }

    Ok(())
}

fn reject(message: impl Into<String>) -> TdtpError {
    TdtpError::permission(SUBSYSTEM, message).with_code("SAFE_MODE_SQL_REJECTED")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_select() {
        assert!(validate("SELECT * FROM Users WHERE IsActive = 1").is_ok());
    }

    #[test]
    fn accepts_with_cte() {
        assert!(validate("WITH active AS (SELECT * FROM Users) SELECT * FROM active").is_ok());
    }

    #[test]
    fn rejects_non_select_first_token() {
        assert!(validate("DELETE FROM Users").is_err());
    }

    #[test]
    fn rejects_forbidden_keyword_anywhere() {
        assert!(validate("SELECT * FROM Users; DROP TABLE Users").is_err());
    }

    #[test]
    fn rejects_line_comment() {
        assert!(validate("SELECT * FROM Users -- sneaky").is_err());
    }

    #[test]
    fn rejects_block_comment() {
        assert!(validate("SELECT * FROM Users /* sneaky */").is_err());
    }

    #[test]
    fn rejects_non_trailing_semicolon() {
        assert!(validate("SELECT * FROM Users; SELECT * FROM Accounts").is_err());
    }

    #[test]
    fn accepts_trailing_semicolon() {
        assert!(validate("SELECT * FROM Users;").is_ok());
    }

    #[test]
    fn rejects_bare_begin() {
        assert!(validate("BEGIN").is_err());
    }
}
