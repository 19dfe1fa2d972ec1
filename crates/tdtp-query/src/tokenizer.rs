//! Lexer for the restricted SELECT grammar (§4.2). Every token carries the
//! byte offset it started at, so the parser can report a precise syntax-error
//! location instead of a bare message.

use tdtp_core::error::{Result, TdtpError};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Select,
    From,
    Where,
    Order,
    By,
    Asc,
    Desc,
    Limit,
    Offset,
    And,
    Or,
    Not,
    In,
    Between,
    Like,
    Is,
    Null,
    Ident(String),
    Number(String),
    StringLiteral(String),
    Star,
    Comma,
    LParen,
    RParen,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

fn syntax_error(offset: usize, message: impl Into<String>) -> TdtpError {
    TdtpError::validation("query", format!("syntax error at offset {offset}: {}", message.into()))
}

pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i] as char;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let start = i;

        match c {
            '*' => {
                tokens.push(Token { kind: TokenKind::Star, offset: start });
                i += 1;
            }
            ',' => {
                tokens.push(Token { kind: TokenKind::Comma, offset: start });
                i += 1;
            }
            '(' => {
                tokens.push(Token { kind: TokenKind::LParen, offset: start });
                i += 1;
            }
            ')' => {
                tokens.push(Token { kind: TokenKind::RParen, offset: start });
                i += 1;
            }
            '=' => {
                tokens.push(Token { kind: TokenKind::Eq, offset: start });
                i += 1;
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'>') {
                    tokens.push(Token { kind: TokenKind::Ne, offset: start });
                    i += 2;
                } else if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Le, offset: start });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Lt, offset: start });
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Ge, offset: start });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Gt, offset: start });
                    i += 1;
                }
            }
            '\'' => {
                let (literal, next) = read_string_literal(input, i)?;
                tokens.push(Token { kind: TokenKind::StringLiteral(literal), offset: start });
                i = next;
            }
            '"' => {
                let (ident, next) = read_quoted_ident(input, i)?;
                tokens.push(Token { kind: TokenKind::Ident(ident), offset: start });
                i = next;
            }
            _ if c.is_ascii_digit() => {
                let (num, next) = read_number(input, i);
                tokens.push(Token { kind: TokenKind::Number(num), offset: start });
                i = next;
            }
            _ if c.is_alphabetic() || c == '_' => {
                let (word, next) = read_word(input, i);
                let kind = keyword_or_ident(&word);
                tokens.push(Token { kind, offset: start });
                i = next;
            }
            other => return Err(syntax_error(start, format!("unexpected character '{other}'"))),
        }
    }

    tokens.push(Token { kind: TokenKind::Eof, offset: bytes.len() });
    Ok(tokens)
}

fn read_string_literal(input: &str, start: usize) -> Result<(String, usize)> {
    let bytes = input.as_bytes();
    let mut i = start + 1;
    let mut out = String::new();
    loop {
        if i >= bytes.len() {
            return Err(syntax_error(start, "unterminated string literal"));
        }
        let c = bytes[i] as char;
        if c == '\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                out.push('\'');
                i += 2;
                continue;
            }
            return Ok((out, i + 1));
        }
        out.push(c);
        i += 1;
    }
}

fn read_quoted_ident(input: &str, start: usize) -> Result<(String, usize)> {
    let bytes = input.as_bytes();
    let mut i = start + 1;
    let mut out = String::new();
    loop {
        if i >= bytes.len() {
            return Err(syntax_error(start, "unterminated quoted identifier"));
        }
        let c = bytes[i] as char;
        if c == '"' {
            return Ok((out, i + 1));
        }
        out.push(c);
        i += 1;
    }
}

fn read_number(input: &str, start: usize) -> (String, usize) {
    let bytes = input.as_bytes();
    let mut i = start;
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
    }
    (input[start..i].to_string(), i)
}

fn read_word(input: &str, start: usize) -> (String, usize) {
    let bytes = input.as_bytes();
    let mut i = start;
    while i < bytes.len() && ((bytes[i] as char).is_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    (input[start..i].to_string(), i)
}

fn keyword_or_ident(word: &str) -> TokenKind {
    match word.to_ascii_uppercase().as_str() {
        "SELECT" => TokenKind::Select,
        "FROM" => TokenKind::From,
        "WHERE" => TokenKind::Where,
        "ORDER" => TokenKind::Order,
        "BY" => TokenKind::By,
        "ASC" => TokenKind::Asc,
        "DESC" => TokenKind::Desc,
        "LIMIT" => TokenKind::Limit,
        "OFFSET" => TokenKind::Offset,
        "AND" => TokenKind::And,
        "OR" => TokenKind::Or,
        "NOT" => TokenKind::Not,
        "IN" => TokenKind::In,
        "BETWEEN" => TokenKind::Between,
        "LIKE" => TokenKind::Like,
        "IS" => TokenKind::Is,
        "NULL" => TokenKind::Null,
        _ => TokenKind::Ident(word.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_basic_select() {
        let tokens = tokenize("SELECT * FROM Users WHERE IsActive = 1").unwrap();
        assert_eq!(tokens.first().unwrap().kind, TokenKind::Select);
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Star));
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Eq));
    }

    #[test]
    fn handles_quoted_literal_with_escaped_quote() {
        let tokens = tokenize("SELECT * FROM T WHERE Name = 'O''Brien'").unwrap();
        assert!(tokens.iter().any(|t| t.kind == TokenKind::StringLiteral("O'Brien".to_string())));
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(tokenize("SELECT * FROM T WHERE X = 'abc").is_err());
    }

    #[test]
    fn recognizes_comparison_operators() {
        let tokens = tokenize("<> <= >= < >").unwrap();
        let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![TokenKind::Ne, TokenKind::Le, TokenKind::Ge, TokenKind::Lt, TokenKind::Gt, TokenKind::Eof]
        );
    }
}
