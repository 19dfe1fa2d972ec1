//! Recursive-descent parser for the restricted SELECT grammar (§4.2):
//!
//! ```text
//! SELECT <list> FROM <t> [WHERE <bool-expr>] [ORDER BY <f> {ASC|DESC} (,…)]
//!        [LIMIT n] [OFFSET n]
//! ```
//!
//! Precedence `NOT > AND > OR`; parenthesised groups override it.

use crate::tokenizer::{tokenize, Token, TokenKind};
use tdtp_core::error::{Result, TdtpError};
use tdtp_core::query::SortDirection;

#[derive(Debug, Clone, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// An unquoted/unescaped literal straight off the token stream. The
/// translator is responsible for turning it into the row-encoded string a
/// [`tdtp_core::query::Filter`] carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(String),
    String(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Compare { field: String, op: CompareOp, value: Literal },
    In { field: String, values: Vec<Literal>, negated: bool },
    Between { field: String, low: Literal, high: Literal },
    Like { field: String, pattern: String },
    IsNull { field: String, negated: bool },
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Star,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub projection: Projection,
    pub table: String,
    pub where_clause: Option<Expr>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

fn syntax_error(offset: usize, message: impl Into<String>) -> TdtpError {
    TdtpError::validation("query", format!("syntax error at offset {offset}: {}", message.into()))
}

pub fn parse(sql: &str) -> Result<SelectStatement> {
    let tokens = tokenize(sql)?;
    let mut parser = Parser { tokens, pos: 0 };
    let stmt = parser.parse_select()?;
    parser.expect(TokenKind::Eof)?;
    Ok(stmt)
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.peek().kind == kind {
            Ok(self.advance())
        } else {
            Err(syntax_error(
                self.peek().offset,
                format!("expected {kind:?}, found {:?}", self.peek().kind),
            ))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(syntax_error(self.peek().offset, format!("expected identifier, found {other:?}"))),
        }
    }

    fn parse_select(&mut self) -> Result<SelectStatement> {
        self.expect(TokenKind::Select)?;
        let projection = self.parse_projection()?;
        self.expect(TokenKind::From)?;
        let table = self.expect_ident()?;

        let where_clause = if self.peek().kind == TokenKind::Where {
            self.advance();
            Some(self.parse_or_expr()?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if self.peek().kind == TokenKind::Order {
            self.advance();
            self.expect(TokenKind::By)?;
            loop {
                let field = self.expect_ident()?;
                let direction = match self.peek().kind {
                    TokenKind::Asc => {
                        self.advance();
                        SortDirection::Asc
                    }
                    TokenKind::Desc => {
                        self.advance();
                        SortDirection::Desc
                    }
                    _ => SortDirection::Asc,
                };
                order_by.push(OrderByItem { field, direction });
                if self.peek().kind == TokenKind::Comma {
                    self.advance();
                    continue;
                }
                break;
            }
        }

        let limit = if self.peek().kind == TokenKind::Limit {
            self.advance();
            Some(self.parse_number_literal()?)
        } else {
            None
        };

        let offset = if self.peek().kind == TokenKind::Offset {
            self.advance();
            Some(self.parse_number_literal()?)
        } else {
            None
        };

        Ok(SelectStatement { projection, table, where_clause, order_by, limit, offset })
    }

    fn parse_number_literal(&mut self) -> Result<u64> {
        match self.peek().kind.clone() {
            TokenKind::Number(n) => {
                self.advance();
                n.parse::<u64>()
                    .map_err(|_| syntax_error(self.peek().offset, format!("expected non-negative integer, found '{n}'")))
            }
            other => Err(syntax_error(self.peek().offset, format!("expected integer literal, found {other:?}"))),
        }
    }

    fn parse_projection(&mut self) -> Result<Projection> {
        if self.peek().kind == TokenKind::Star {
            self.advance();
            return Ok(Projection::Star);
        }
        let mut columns = vec![self.expect_ident()?];
        while self.peek().kind == TokenKind::Comma {
            self.advance();
            columns.push(self.expect_ident()?);
        }
        Ok(Projection::Columns(columns))
    }

    // or_expr ::= and_expr (OR and_expr)*
    fn parse_or_expr(&mut self) -> Result<Expr> {
        let mut terms = vec![self.parse_and_expr()?];
        while self.peek().kind == TokenKind::Or {
            self.advance();
            terms.push(self.parse_and_expr()?);
        }
        Ok(if terms.len() == 1 { terms.remove(0) } else { Expr::Or(terms) })
    }

    // and_expr ::= not_expr (AND not_expr)*
    fn parse_and_expr(&mut self) -> Result<Expr> {
        let mut terms = vec![self.parse_not_expr()?];
        while self.peek().kind == TokenKind::And {
            self.advance();
            terms.push(self.parse_not_expr()?);
        }
        Ok(if terms.len() == 1 { terms.remove(0) } else { Expr::And(terms) })
    }

    // not_expr ::= NOT not_expr | primary
    fn parse_not_expr(&mut self) -> Result<Expr> {
        if self.peek().kind == TokenKind::Not {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_not_expr()?)));
        }
        self.parse_primary()
    }

    // primary ::= '(' or_expr ')' | predicate
    fn parse_primary(&mut self) -> Result<Expr> {
        if self.peek().kind == TokenKind::LParen {
            self.advance();
            let inner = self.parse_or_expr()?;
            self.expect(TokenKind::RParen)?;
            return Ok(inner);
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Expr> {
        let field = self.expect_ident()?;

        match self.peek().kind.clone() {
            TokenKind::Eq => {
                self.advance();
                Ok(Expr::Compare { field, op: CompareOp::Eq, value: self.parse_literal()? })
            }
            TokenKind::Ne => {
                self.advance();
                Ok(Expr::Compare { field, op: CompareOp::Ne, value: self.parse_literal()? })
            }
            TokenKind::Lt => {
                self.advance();
                Ok(Expr::Compare { field, op: CompareOp::Lt, value: self.parse_literal()? })
            }
            TokenKind::Le => {
                self.advance();
                Ok(Expr::Compare { field, op: CompareOp::Le, value: self.parse_literal()? })
            }
            TokenKind::Gt => {
                self.advance();
                Ok(Expr::Compare { field, op: CompareOp::Gt, value: self.parse_literal()? })
            }
            TokenKind::Ge => {
                self.advance();
                Ok(Expr::Compare { field, op: CompareOp::Ge, value: self.parse_literal()? })
            }
            TokenKind::In => {
                self.advance();
                Ok(Expr::In { field, values: self.parse_literal_list()?, negated: false })
            }
            TokenKind::Not => {
                self.advance();
                match self.peek().kind {
                    TokenKind::In => {
                        self.advance();
                        Ok(Expr::In { field, values: self.parse_literal_list()?, negated: true })
                    }
                    TokenKind::Between => {
                        self.advance();
                        let (low, high) = self.parse_between_bounds()?;
                        Ok(Expr::Not(Box::new(Expr::Between { field, low, high })))
                    }
                    TokenKind::Like => {
                        Err(syntax_error(self.peek().offset, "NOT LIKE is not representable in TDTQL"))
                    }
                    other => Err(syntax_error(self.peek().offset, format!("expected IN/BETWEEN after NOT, found {other:?}"))),
                }
            }
            TokenKind::Between => {
                self.advance();
                let (low, high) = self.parse_between_bounds()?;
                Ok(Expr::Between { field, low, high })
            }
            TokenKind::Like => {
                self.advance();
                match self.peek().kind.clone() {
                    TokenKind::StringLiteral(pat) => {
                        self.advance();
                        Ok(Expr::Like { field, pattern: pat })
                    }
                    other => Err(syntax_error(self.peek().offset, format!("expected string literal after LIKE, found {other:?}"))),
                }
            }
            TokenKind::Is => {
                self.advance();
                let negated = if self.peek().kind == TokenKind::Not {
                    self.advance();
                    true
                } else {
                    false
                };
                self.expect(TokenKind::Null)?;
                Ok(Expr::IsNull { field, negated })
            }
            other => Err(syntax_error(self.peek().offset, format!("expected comparison operator, found {other:?}"))),
        }
    }

    fn parse_between_bounds(&mut self) -> Result<(Literal, Literal)> {
        let low = self.parse_literal()?;
        self.expect(TokenKind::And)?;
        let high = self.parse_literal()?;
        Ok((low, high))
    }

    fn parse_literal_list(&mut self) -> Result<Vec<Literal>> {
        self.expect(TokenKind::LParen)?;
        let mut values = vec![self.parse_literal()?];
        while self.peek().kind == TokenKind::Comma {
            self.advance();
            values.push(self.parse_literal()?);
        }
        self.expect(TokenKind::RParen)?;
        Ok(values)
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        match self.peek().kind.clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Literal::Number(n))
            }
            TokenKind::StringLiteral(s) => {
                self.advance();
                Ok(Literal::String(s))
            }
            other => Err(syntax_error(self.peek().offset, format!("expected literal, found {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scenario_2_query() {
        let stmt = parse("SELECT * FROM Users WHERE IsActive = 1 AND Balance > 1000 ORDER BY Balance DESC LIMIT 2").unwrap();
        assert_eq!(stmt.table, "Users");
        assert_eq!(stmt.projection, Projection::Star);
        assert_eq!(stmt.limit, Some(2));
        assert_eq!(stmt.order_by, vec![OrderByItem { field: "Balance".into(), direction: SortDirection::Desc }]);
        match stmt.where_clause.unwrap() {
            Expr::And(terms) => assert_eq!(terms.len(), 2),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn parses_parenthesised_or_inside_and() {
        let stmt = parse("SELECT * FROM T WHERE A = 1 AND (B = 2 OR C = 3)").unwrap();
        match stmt.where_clause.unwrap() {
            Expr::And(terms) => {
                assert_eq!(terms.len(), 2);
                assert!(matches!(terms[1], Expr::Or(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_not_precedence_over_and() {
        // NOT binds tighter than AND: `NOT A = 1 AND B = 2` == `(NOT A=1) AND B=2`
        let stmt = parse("SELECT * FROM T WHERE NOT A = 1 AND B = 2").unwrap();
        match stmt.where_clause.unwrap() {
            Expr::And(terms) => {
                assert!(matches!(terms[0], Expr::Not(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reports_syntax_error_with_offset() {
        let err = parse("SELECT * FROM T WHERE A ===").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("syntax error at offset"));
    }

    #[test]
    fn parses_between_in_like_is_null() {
        let stmt = parse(
            "SELECT id FROM T WHERE age BETWEEN 18 AND 65 OR name IN ('a','b') OR tag LIKE 'x%' OR note IS NOT NULL",
        )
        .unwrap();
        match stmt.where_clause.unwrap() {
            Expr::Or(terms) => assert_eq!(terms.len(), 4),
            other => panic!("unexpected {other:?}"),
        }
    }
}
