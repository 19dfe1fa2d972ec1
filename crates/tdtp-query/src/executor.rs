//! Executes a translated `Query` against an in-memory row slice (§4.2),
//! yielding the filtered/ordered/limited rows plus the `ExecutionResults`
//! counters a `response` packet's `QueryContext` records (§3.3).

use std::cmp::Ordering;
use tdtp_core::error::{Result, TdtpError};
use tdtp_core::field::Schema;
use tdtp_core::query::{ExecutionResults, Filter, FilterNode, Operator, Query, SortDirection};
use tdtp_core::value::{Converter, TypedValue};

fn field_value<'a>(schema: &Schema, row: &'a [TypedValue], name: &str) -> Result<&'a TypedValue> {
    let idx = schema
        .field_index(name)
        .ok_or_else(|| TdtpError::validation("query", format!("unknown field '{name}' referenced by query")))?;
    row.get(idx)
        .ok_or_else(|| TdtpError::validation("query", format!("row has fewer columns than schema (missing '{name}')")))
}

fn parse_literal(schema: &Schema, name: &str, raw: &str) -> Result<TypedValue> {
    let field = schema
        .field(name)
        .ok_or_else(|| TdtpError::validation("query", format!("unknown field '{name}' referenced by query")))?;
    Converter::parse(raw, field.normalized_type()?, field.precision, field.scale)
}

/// Three-way comparison between two typed values of the same declared field
/// type. `Null` is incomparable and handled by the caller before reaching
/// here for ordering purposes; for equality-style operators `Null` never
/// equals anything, including another `Null` (use `is_null`/`is_not_null`).
fn compare_typed(a: &TypedValue, b: &TypedValue) -> Option<Ordering> {
    match (a, b) {
        (TypedValue::Integer(x), TypedValue::Integer(y)) => x.partial_cmp(y),
        (TypedValue::Real(x), TypedValue::Real(y)) => x.partial_cmp(y),
        (TypedValue::Decimal(x), TypedValue::Decimal(y)) => x.partial_cmp(y),
        (TypedValue::Text(x), TypedValue::Text(y)) => x.partial_cmp(y),
        (TypedValue::Boolean(x), TypedValue::Boolean(y)) => x.partial_cmp(y),
        (TypedValue::Date(x), TypedValue::Date(y)) => x.partial_cmp(y),
        (TypedValue::DateTime(x), TypedValue::DateTime(y)) => x.partial_cmp(y),
        (TypedValue::Timestamp(x), TypedValue::Timestamp(y)) => x.partial_cmp(y),
        (TypedValue::Blob(x), TypedValue::Blob(y)) => x.partial_cmp(y),
        _ => None,
    }
}

/// SQL-style `LIKE`: `%` matches any run of characters, `_` matches exactly
/// one. Matching is on the value's formatted wire-text representation.
fn like_matches(value: &TypedValue, pattern: &str) -> bool {
    let text = Converter::format(value);
    wildcard_match(&text, pattern)
}

fn wildcard_match(text: &str, pattern: &str) -> bool {
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    let mut memo = vec![vec![None; p.len() + 1]; t.len() + 1];
    wildcard_match_rec(&t, &p, 0, 0, &mut memo)
}

fn wildcard_match_rec(t: &[char], p: &[char], ti: usize, pi: usize, memo: &mut Vec<Vec<Option<bool>>>) -> bool {
    if let Some(cached) = memo[ti][pi] {
        return cached;
    }
    let result = if pi == p.len() {
        ti == t.len()
    } else if p[pi] == '%' {
        (ti..=t.len()).any(|k| wildcard_match_rec(t, p, k, pi + 1, memo))
    } else if ti < t.len() && (p[pi] == '_' || p[pi] == t[ti]) {
        wildcard_match_rec(t, p, ti + 1, pi + 1, memo)
    } else {
        false
    };
    memo[ti][pi] = Some(result);
    result
}

fn eval_filter(schema: &Schema, row: &[TypedValue], f: &Filter) -> Result<bool> {
    let value = field_value(schema, row, &f.field)?;

    match f.operator {
        Operator::IsNull => Ok(value.is_null()),
        Operator::IsNotNull => Ok(!value.is_null()),
        _ if value.is_null() => Ok(false),
        Operator::Eq => {
            let lit = parse_literal(schema, &f.field, require(&f.value, "value")?)?;
            Ok(compare_typed(value, &lit) == Some(Ordering::Equal))
        }
        Operator::Ne => {
            let lit = parse_literal(schema, &f.field, require(&f.value, "value")?)?;
            Ok(compare_typed(value, &lit) != Some(Ordering::Equal))
        }
        Operator::Lt => {
            let lit = parse_literal(schema, &f.field, require(&f.value, "value")?)?;
            Ok(compare_typed(value, &lit) == Some(Ordering::Less))
        }
        Operator::Le => {
            let lit = parse_literal(schema, &f.field, require(&f.value, "value")?)?;
            Ok(matches!(compare_typed(value, &lit), Some(Ordering::Less) | Some(Ordering::Equal)))
        }
        Operator::Gt => {
            let lit = parse_literal(schema, &f.field, require(&f.value, "value")?)?;
            Ok(compare_typed(value, &lit) == Some(Ordering::Greater))
        }
        Operator::Ge => {
            let lit = parse_literal(schema, &f.field, require(&f.value, "value")?)?;
            Ok(matches!(compare_typed(value, &lit), Some(Ordering::Greater) | Some(Ordering::Equal)))
        }
        Operator::In | Operator::NotIn => {
            let raws = f
                .values
                .as_ref()
                .ok_or_else(|| TdtpError::validation("query", "IN/NOT IN filter missing 'values'"))?;
            let mut found = false;
            for raw in raws {
                let lit = parse_literal(schema, &f.field, raw)?;
                if compare_typed(value, &lit) == Some(Ordering::Equal) {
                    found = true;
                    break;
                }
            }
            Ok(if f.operator == Operator::In { found } else { !found })
        }
        Operator::Between => {
            let low = parse_literal(schema, &f.field, require(&f.low, "low")?)?;
            let high = parse_literal(schema, &f.field, require(&f.high, "high")?)?;
            let ge_low = matches!(compare_typed(value, &low), Some(Ordering::Greater) | Some(Ordering::Equal));
            let le_high = matches!(compare_typed(value, &high), Some(Ordering::Less) | Some(Ordering::Equal));
            Ok(ge_low && le_high)
        }
        Operator::Like => Ok(like_matches(value, require(&f.value, "value")?)),
    }
}

fn require<'a>(opt: &'a Option<String>, what: &str) -> Result<&'a str> {
    opt.as_deref()
        .ok_or_else(|| TdtpError::validation("query", format!("filter missing required '{what}'")))
}

fn eval_node(schema: &Schema, row: &[TypedValue], node: &FilterNode) -> Result<bool> {
    match node {
        FilterNode::Leaf(f) => eval_filter(schema, row, f),
        FilterNode::And(children) => {
            for c in children {
                if !eval_node(schema, row, c)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        FilterNode::Or(children) => {
            for c in children {
                if eval_node(schema, row, c)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

/// NULL sorts first on ASC, last on DESC (§4.2).
fn order_key_cmp(a: &TypedValue, b: &TypedValue, direction: SortDirection) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => if direction == SortDirection::Asc { Ordering::Less } else { Ordering::Greater },
        (false, true) => if direction == SortDirection::Asc { Ordering::Greater } else { Ordering::Less },
        (false, false) => {
            let ord = compare_typed(a, b).unwrap_or(Ordering::Equal);
            if direction == SortDirection::Desc {
                ord.reverse()
            } else {
                ord
            }
        }
    }
}

pub struct ExecutionOutput {
    pub rows: Vec<Vec<TypedValue>>,
    pub stats: ExecutionResults,
}

/// Execute `query` against `rows` (already typed per `schema`). `rows` is
/// taken to represent the full table, matching how `total_records_in_table`
/// is reported in `ExecutionResults`.
pub fn execute(schema: &Schema, rows: &[Vec<TypedValue>], query: &Query) -> Result<ExecutionOutput> {
    let total_records_in_table = rows.len() as u64;

    let mut filtered: Vec<&Vec<TypedValue>> = Vec::with_capacity(rows.len());
    for row in rows {
        let keep = match &query.filters {
            Some(node) => eval_node(schema, row, node)?,
            None => true,
        };
        if keep {
            filtered.push(row);
        }
    }

    if !query.order_by.is_empty() {
        let mut indices: Vec<usize> = (0..filtered.len()).collect();
        indices.sort_by(|&i, &j| {
            for ob in &query.order_by {
                let idx = match schema.field_index(&ob.field) {
                    Some(idx) => idx,
                    None => continue,
                };
                let ord = order_key_cmp(&filtered[i][idx], &filtered[j][idx], ob.direction);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        filtered = indices.into_iter().map(|i| filtered[i]).collect();
    }

    let records_after_filters = filtered.len() as u64;
    let offset = query.offset.min(filtered.len() as u64) as usize;
    let remaining = &filtered[offset..];
    let take = if query.limit == 0 { remaining.len() } else { (query.limit as usize).min(remaining.len()) };
    let page = &remaining[..take];

    let records_returned = page.len() as u64;
    let next_offset = query.offset + records_returned;
    let more_data_available = next_offset < records_after_filters;

    Ok(ExecutionOutput {
        rows: page.iter().map(|r| (**r).clone()).collect(),
        stats: ExecutionResults {
            total_records_in_table,
            records_after_filters,
            records_returned,
            more_data_available,
            next_offset,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translator::translate;
    use tdtp_core::field::Field;
    use tdtp_core::value::TdtpType;

    fn users_schema() -> Schema {
        Schema::new(vec![
            Field::new("Id", TdtpType::Integer).with_key(true),
            Field::new("Name", TdtpType::Text),
            Field::new("Balance", TdtpType::Integer),
            Field::new("IsActive", TdtpType::Boolean),
        ])
        .unwrap()
    }

    fn users_rows() -> Vec<Vec<TypedValue>> {
        let row = |id: i64, name: &str, balance: i64, active: bool| {
            vec![
                TypedValue::Integer(id),
                TypedValue::Text(name.to_string()),
                TypedValue::Integer(balance),
                TypedValue::Boolean(active),
            ]
        };
        vec![
            row(1, "John", 1500, true),
            row(2, "Jane", 2000, true),
            row(3, "Bob", 500, false),
            row(4, "Alice", 2500, true),
            row(5, "Charlie", 800, true),
        ]
    }

    #[test]
    fn scenario_2_filtered_export() {
        let schema = users_schema();
        let rows = users_rows();
        let query = translate("SELECT * FROM Users WHERE IsActive = 1 AND Balance > 1000 ORDER BY Balance DESC LIMIT 2").unwrap();
        let out = execute(&schema, &rows, &query).unwrap();
        let names: Vec<&str> = out
            .rows
            .iter()
            .map(|r| match &r[1] {
                TypedValue::Text(s) => s.as_str(),
                _ => panic!("expected text"),
            })
            .collect();
        assert_eq!(names, vec!["Alice", "Jane"]);
        assert_eq!(out.stats.total_records_in_table, 5);
        assert_eq!(out.stats.records_after_filters, 3);
        assert_eq!(out.stats.records_returned, 2);
        assert!(out.stats.more_data_available);
        assert_eq!(out.stats.next_offset, 2);
    }

    #[test]
    fn offset_equal_to_filtered_count_is_empty_and_not_more() {
        let schema = users_schema();
        let rows = users_rows();
        let mut query = translate("SELECT * FROM Users WHERE IsActive = 1").unwrap();
        query.offset = 4; // exactly |rows after filter|
        let out = execute(&schema, &rows, &query).unwrap();
        assert!(out.rows.is_empty());
        assert!(!out.stats.more_data_available);
    }

    #[test]
    fn null_sorts_first_asc_last_desc() {
        let schema = users_schema();
        let mut rows = users_rows();
        rows[2][2] = TypedValue::Null; // Bob's Balance -> NULL
        let asc = translate("SELECT * FROM Users ORDER BY Balance ASC").unwrap();
        let out = execute(&schema, &rows, &asc).unwrap();
        assert!(out.rows[0][2].is_null());

        let desc = translate("SELECT * FROM Users ORDER BY Balance DESC").unwrap();
        let out = execute(&schema, &rows, &desc).unwrap();
        assert!(out.rows.last().unwrap()[2].is_null());
    }

    #[test]
    fn like_wildcard_matches() {
        let schema = users_schema();
        let rows = users_rows();
        let query = translate("SELECT * FROM Users WHERE Name LIKE 'J%'").unwrap();
        let out = execute(&schema, &rows, &query).unwrap();
        assert_eq!(out.rows.len(), 2);
    }
}
