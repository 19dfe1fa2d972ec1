//! TDTQL (§2 L2, §3.3, §4.2): the SQL tokenizer/parser/translator producing
//! `tdtp_core::query::Query` trees, and the in-memory executor that applies
//! one against a typed row slice.

pub mod executor;
pub mod parser;
pub mod tokenizer;
pub mod translator;

pub use executor::{execute, ExecutionOutput};
pub use parser::{parse, Expr, Projection, SelectStatement};
pub use translator::{translate, translate_with_table};
