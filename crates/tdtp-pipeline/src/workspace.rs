//! Embedded SQL workspace (§4.5 steps 2-4): a single-process DataFusion
//! `SessionContext` that sources are loaded into as named tables, the
//! transform SQL runs against, and the result is read back as typed rows.
//!
//! Every source column maps to one of a small set of Arrow types
//! (`Int64`/`Float64`/`Boolean`/`Utf8`); DECIMAL/DATE/DATETIME/TIMESTAMP/BLOB
//! all travel as their wire-format text in a `Utf8` column. That's enough
//! for filtering, ordering, and projecting — the workspace is not a general
//! numeric engine for those subtypes — and it matches §4.5 step 4's "schema
//! inferred from the workspace", not from the original source schema.

use datafusion::arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use datafusion::arrow::compute::cast;
use datafusion::arrow::compute::concat_batches;
use datafusion::arrow::datatypes::{DataType, Field as ArrowField, Schema as ArrowSchema};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::prelude::SessionContext;
use std::sync::Arc;
use tdtp_core::error::{Result, TdtpError};
use tdtp_core::field::{Field, Schema};
use tdtp_core::value::{Converter, TdtpType, TypedValue};

const SUBSYSTEM: &str = "workspace";

fn arrow_type_for(ty: TdtpType) -> DataType {
    match ty {
        TdtpType::Integer => DataType::Int64,
        TdtpType::Real => DataType::Float64,
        TdtpType::Boolean => DataType::Boolean,
        TdtpType::Decimal | TdtpType::Text | TdtpType::Date | TdtpType::DateTime | TdtpType::Timestamp | TdtpType::Blob => {
            DataType::Utf8
        }
    }
}

fn df_err(e: impl std::fmt::Display) -> TdtpError {
    TdtpError::fatal(SUBSYSTEM, format!("workspace error: {e}"))
}

/// Decodes `rows` per `schema` and builds an Arrow `RecordBatch` suitable
/// for `SessionContext::register_batch`.
fn rows_to_record_batch(schema: &Schema, rows: &[Vec<String>]) -> Result<RecordBatch> {
    let mut arrow_fields = Vec::with_capacity(schema.fields.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.fields.len());

    for (idx, field) in schema.fields.iter().enumerate() {
        let ty = field.normalized_type()?;
        let arrow_ty = arrow_type_for(ty);
        arrow_fields.push(ArrowField::new(&field.name, arrow_ty.clone(), true));

        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let raw = row.get(idx).ok_or_else(|| {
                TdtpError::validation(SUBSYSTEM, format!("row missing column {idx} ('{}')", field.name))
            })?;
            values.push(Converter::parse(raw, ty, field.precision, field.scale)?);
        }

        let array: ArrayRef = match arrow_ty {
            DataType::Int64 => Arc::new(Int64Array::from(
                values.iter().map(|v| if let TypedValue::Integer(i) = v { Some(*i) } else { None }).collect::<Vec<_>>(),
            )),
            DataType::Float64 => Arc::new(Float64Array::from(
                values.iter().map(|v| if let TypedValue::Real(r) = v { Some(*r) } else { None }).collect::<Vec<_>>(),
            )),
            DataType::Boolean => Arc::new(BooleanArray::from(
                values.iter().map(|v| if let TypedValue::Boolean(b) = v { Some(*b) } else { None }).collect::<Vec<_>>(),
            )),
            _ => Arc::new(StringArray::from(
                values.iter().map(|v| if v.is_null() { None } else { Some(Converter::format(v)) }).collect::<Vec<Option<String>>>(),
            )),
        };
        arrays.push(array);
    }

    let arrow_schema = Arc::new(ArrowSchema::new(arrow_fields));
    RecordBatch::try_new(arrow_schema, arrays).map_err(df_err)
}

fn column_to_strings(array: &ArrayRef, data_type: &DataType) -> Result<Vec<Option<String>>> {
    if let DataType::Boolean = data_type {
        let booleans = array
            .as_any()
            .downcast_ref::<BooleanArray>()
            .ok_or_else(|| TdtpError::fatal(SUBSYSTEM, "expected boolean array"))?;
        return Ok((0..booleans.len())
            .map(|i| if booleans.is_null(i) { None } else { Some(if booleans.value(i) { "1" } else { "0" }.to_string()) })
            .collect());
    }

    let as_utf8 = cast(array, &DataType::Utf8).map_err(df_err)?;
    let strings = as_utf8
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| TdtpError::fatal(SUBSYSTEM, "cast to Utf8 did not produce a StringArray"))?;
    Ok((0..strings.len()).map(|i| if strings.is_null(i) { None } else { Some(strings.value(i).to_string()) }).collect())
}

fn arrow_type_to_tdtp(data_type: &DataType) -> TdtpType {
    match data_type {
        DataType::Boolean => TdtpType::Boolean,
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 | DataType::UInt8 | DataType::UInt16
        | DataType::UInt32 | DataType::UInt64 => TdtpType::Integer,
        DataType::Float16 | DataType::Float32 | DataType::Float64 => TdtpType::Real,
        _ => TdtpType::Text,
    }
}

fn record_batch_to_rows(batch: &RecordBatch) -> Result<(Schema, Vec<Vec<String>>)> {
    let arrow_schema = batch.schema();
    let mut fields = Vec::with_capacity(arrow_schema.fields().len());
    let mut columns: Vec<Vec<Option<String>>> = Vec::with_capacity(arrow_schema.fields().len());

    for (idx, arrow_field) in arrow_schema.fields().iter().enumerate() {
        fields.push(Field::new(arrow_field.name(), arrow_type_to_tdtp(arrow_field.data_type())));
        columns.push(column_to_strings(batch.column(idx), arrow_field.data_type())?);
    }

    let schema = Schema::new(fields)?;
    let row_count = batch.num_rows();
    let mut rows = Vec::with_capacity(row_count);
    for r in 0..row_count {
        rows.push(columns.iter().map(|col| col[r].clone().unwrap_or_default()).collect());
    }
    Ok((schema, rows))
}

/// One embedded SQL workspace per pipeline run.
pub struct Workspace {
    ctx: SessionContext,
}

impl Workspace {
    pub fn new() -> Self {
        Self { ctx: SessionContext::new() }
    }

    /// Loads a source's decoded rows as a named table.
    pub fn register_source(&self, name: &str, schema: &Schema, rows: &[Vec<String>]) -> Result<()> {
        let batch = rows_to_record_batch(schema, rows)?;
        self.ctx.register_batch(name, batch).map_err(df_err)?;
        Ok(())
    }

    /// Executes `sql` and returns the inferred schema plus decoded rows of
    /// the (possibly multi-batch) result, concatenated into one set.
    pub async fn execute(&self, sql: &str) -> Result<(Schema, Vec<Vec<String>>)> {
        let df = self.ctx.sql(sql).await.map_err(df_err)?;
        let batches = df.collect().await.map_err(df_err)?;
        if batches.is_empty() {
            return Err(TdtpError::fatal(SUBSYSTEM, "transform produced no result batches"));
        }
        let arrow_schema = batches[0].schema();
        let combined = concat_batches(&arrow_schema, &batches).map_err(df_err)?;
        record_batch_to_rows(&combined)
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdtp_core::field::Field as TdtpField;

    fn customers_schema() -> Schema {
        Schema::new(vec![
            TdtpField::new("id", TdtpType::Integer).with_key(true),
            TdtpField::new("name", TdtpType::Text),
            TdtpField::new("balance", TdtpType::Real),
            TdtpField::new("is_active", TdtpType::Boolean),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn filters_and_orders_through_sql() {
        let workspace = Workspace::new();
        let schema = customers_schema();
        let rows = vec![
            vec!["1".to_string(), "John".to_string(), "1500".to_string(), "1".to_string()],
            vec!["2".to_string(), "Jane".to_string(), "2000".to_string(), "1".to_string()],
            vec!["3".to_string(), "Bob".to_string(), "500".to_string(), "0".to_string()],
            vec!["4".to_string(), "Alice".to_string(), "2500".to_string(), "1".to_string()],
        ];
        workspace.register_source("customers", &schema, &rows).unwrap();

        let (result_schema, result_rows) = workspace
            .execute("SELECT * FROM customers WHERE is_active = true AND balance > 1000 ORDER BY balance DESC")
            .await
            .unwrap();

        assert_eq!(result_schema.fields.len(), 4);
        assert_eq!(result_rows.len(), 3);
        assert_eq!(result_rows[0][1], "Alice");
        assert_eq!(result_rows[1][1], "Jane");
        assert_eq!(result_rows[2][1], "John");
    }
}
