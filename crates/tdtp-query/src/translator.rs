//! SQL → TDTQL translation (§4.2). The projection list is parsed for syntax
//! validity but never semantically bound — TDTQL always returns every column
//! of the source schema; projection is a receiver concern.

use crate::parser::{parse, CompareOp, Expr, Literal, OrderByItem, Projection};
use tdtp_core::error::Result;
use tdtp_core::query::{Filter, FilterNode, Operator, OrderBy, Query};

fn literal_text(lit: &Literal) -> String {
    match lit {
        Literal::Number(n) => n.clone(),
        Literal::String(s) => s.clone(),
    }
}

fn flip(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Eq => CompareOp::Ne,
        CompareOp::Ne => CompareOp::Eq,
        CompareOp::Lt => CompareOp::Ge,
        CompareOp::Le => CompareOp::Gt,
        CompareOp::Gt => CompareOp::Le,
        CompareOp::Ge => CompareOp::Lt,
    }
}

fn compare_operator(op: &CompareOp) -> Operator {
    match op {
        CompareOp::Eq => Operator::Eq,
        CompareOp::Ne => Operator::Ne,
        CompareOp::Lt => Operator::Lt,
        CompareOp::Le => Operator::Le,
        CompareOp::Gt => Operator::Gt,
        CompareOp::Ge => Operator::Ge,
    }
}

/// Lowers a parsed `Expr` into a `FilterNode`, pushing NOT inward (De Morgan)
/// so the output tree only ever uses the canonical non-negated operators of
/// §3.3. `NOT BETWEEN a AND b` becomes `field < a OR field > b`; `NOT LIKE`
/// has already been rejected by the parser (no canonical `not_like` token).
fn lower(expr: &Expr, negate: bool) -> FilterNode {
    match expr {
        Expr::Compare { field, op, value } => {
            let op = if negate { flip(op.clone()) } else { op.clone() };
            FilterNode::Leaf(Filter {
                field: field.clone(),
                operator: compare_operator(&op),
                value: Some(literal_text(value)),
                values: None,
                low: None,
                high: None,
            })
        }
        Expr::In { field, values, negated } => {
            let negated = negated ^ negate;
            FilterNode::Leaf(Filter {
                field: field.clone(),
                operator: if negated { Operator::NotIn } else { Operator::In },
                value: None,
                values: Some(values.iter().map(literal_text).collect()),
                low: None,
                high: None,
            })
        }
        Expr::Between { field, low, high } => {
            if negate {
                FilterNode::Or(vec![
                    FilterNode::Leaf(Filter {
                        field: field.clone(),
                        operator: Operator::Lt,
                        value: Some(literal_text(low)),
                        values: None,
                        low: None,
                        high: None,
                    }),
                    FilterNode::Leaf(Filter {
                        field: field.clone(),
                        operator: Operator::Gt,
                        value: Some(literal_text(high)),
                        values: None,
                        low: None,
                        high: None,
                    }),
                ])
            } else {
                FilterNode::Leaf(Filter {
                    field: field.clone(),
                    operator: Operator::Between,
                    value: None,
                    values: None,
                    low: Some(literal_text(low)),
                    high: Some(literal_text(high)),
                })
            }
        }
        Expr::Like { field, pattern } => {
            // The parser already rejects `NOT LIKE`, so `negate` is always
            // false here; kept as a plain Like leaf.
            debug_assert!(!negate, "NOT LIKE should have been rejected during parsing");
            FilterNode::Leaf(Filter {
                field: field.clone(),
                operator: Operator::Like,
                value: Some(pattern.clone()),
                values: None,
                low: None,
                high: None,
            })
        }
        Expr::IsNull { field, negated } => {
            let is_not_null = negated ^ negate;
            FilterNode::Leaf(Filter {
                field: field.clone(),
                operator: if is_not_null { Operator::IsNotNull } else { Operator::IsNull },
                value: None,
                values: None,
                low: None,
                high: None,
            })
        }
        Expr::Not(inner) => lower(inner, !negate),
        Expr::And(terms) => {
            let children: Vec<FilterNode> = terms.iter().map(|t| lower(t, negate)).collect();
            if negate {
                FilterNode::Or(children)
            } else {
                FilterNode::And(children)
            }
        }
        Expr::Or(terms) => {
            let children: Vec<FilterNode> = terms.iter().map(|t| lower(t, negate)).collect();
            if negate {
                FilterNode::And(children)
            } else {
                FilterNode::Or(children)
            }
        }
    }
}

fn order_by(items: &[OrderByItem]) -> Vec<OrderBy> {
    items.iter().map(|i| OrderBy { field: i.field.clone(), direction: i.direction }).collect()
}

/// Translate a restricted SELECT statement into a TDTQL `Query`. The
/// `<list>` projection is validated for syntax but dropped: TDTQL carries no
/// column-projection concept (§4.2).
pub fn translate(sql: &str) -> Result<Query> {
    let stmt = parse(sql)?;
    let _ = match &stmt.projection {
        Projection::Star => Vec::new(),
        Projection::Columns(cols) => cols.clone(),
    };

    Ok(Query {
        language: "tdtql".to_string(),
        filters: stmt.where_clause.as_ref().map(|e| lower(e, false)),
        order_by: order_by(&stmt.order_by),
        limit: stmt.limit.unwrap_or(0),
        offset: stmt.offset.unwrap_or(0),
    })
}

/// Also returns the table name and raw column list, for callers (the
/// pipeline engine, adapters) that need them alongside the translated query.
pub fn translate_with_table(sql: &str) -> Result<(String, Query)> {
    let stmt = parse(sql)?;
    let query = translate(sql)?;
    Ok((stmt.table, query))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_scenario_2_query() {
        let query = translate(
            "SELECT * FROM Users WHERE IsActive = 1 AND Balance > 1000 ORDER BY Balance DESC LIMIT 2",
        )
        .unwrap();
        assert_eq!(query.limit, 2);
        assert_eq!(query.offset, 0);
        assert_eq!(query.order_by.len(), 1);
        match query.filters.unwrap() {
            FilterNode::And(children) => assert_eq!(children.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn not_between_becomes_or_of_lt_gt() {
        let query = translate("SELECT * FROM T WHERE NOT age BETWEEN 18 AND 65").unwrap();
        match query.filters.unwrap() {
            FilterNode::Or(children) => {
                assert_eq!(children.len(), 2);
                match (&children[0], &children[1]) {
                    (FilterNode::Leaf(a), FilterNode::Leaf(b)) => {
                        assert_eq!(a.operator, Operator::Lt);
                        assert_eq!(b.operator, Operator::Gt);
                    }
                    _ => panic!("expected two leaves"),
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn double_negation_cancels() {
        let query = translate("SELECT * FROM T WHERE NOT NOT x = 1").unwrap();
        match query.filters.unwrap() {
            FilterNode::Leaf(f) => assert_eq!(f.operator, Operator::Eq),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn not_in_negates_to_not_in_operator() {
        let query = translate("SELECT * FROM T WHERE x NOT IN (1,2,3)").unwrap();
        match query.filters.unwrap() {
            FilterNode::Leaf(f) => assert_eq!(f.operator, Operator::NotIn),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_anything_past_a_valid_statement() {
        assert!(translate("SELECT * FROM T WHERE x = 1 GARBAGE").is_err());
    }
}
