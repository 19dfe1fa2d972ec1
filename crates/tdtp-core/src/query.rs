//! TDTQL query AST and QueryContext provenance (§3.3).
//!
//! This module defines the tree shape only; `tdtp-query` builds it from SQL
//! and executes it against in-memory rows.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Between,
    Like,
    IsNull,
    IsNotNull,
}

/// A single comparison against a field. Which of `value`/`values`/`(low,high)`
/// is populated depends on `operator` (`in`/`not_in` use `values`, `between`
/// uses `low`+`high`, the rest use `value`; `is_null`/`is_not_null` use neither).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<String>,
}

/// A node in the filter tree: either a leaf comparison or a logical group.
/// Groups nest arbitrarily; evaluation is short-circuit left-to-right.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterNode {
    Leaf(Filter),
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterNode>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

impl Query {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            filters: None,
            order_by: Vec::new(),
            limit: 0,
            offset: 0,
        }
    }
}

/// Execution counters attached to a `response` packet's QueryContext,
/// letting a receiver paginate or audit what actually happened server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResults {
    pub total_records_in_table: u64,
    pub records_after_filters: u64,
    pub records_returned: u64,
    pub more_data_available: bool,
    pub next_offset: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryContext {
    pub original_query: Query,
    pub execution_results: ExecutionResults,
}
