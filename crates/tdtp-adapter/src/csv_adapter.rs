//! A file-backed CSV adapter (§1 "spreadsheet files" endpoints, treated as a
//! format adapter over the same Packet contract). Grounded on the teacher's
//! glob-based multi-file CSV source (`rde-io::source_csv`): the DSN is a glob
//! pattern, every matching file is a logical partition of one table.

use crate::contract::{Adapter, AdapterConfig, ImportStrategy, IncrementalConfig, Transaction, ViewInfo};
use async_trait::async_trait;
use std::path::PathBuf;
use tdtp_core::error::{Result, TdtpError};
use tdtp_core::field::{Field, Schema};
use tdtp_core::packet::{DataPacket, Generator};
use tdtp_core::query::Query;
use tdtp_core::value::{Converter, TdtpType, TypedValue};
use tdtp_query::execute;

const SUBSYSTEM: &str = "csv_adapter";

/// `dsn` is a glob pattern, e.g. `data/exports/*.csv`; the table name is the
/// file stem with any `*` collapsed, so a single-file glob names one table.
pub struct CsvAdapter {
    glob_pattern: String,
    max_rows_per_part: usize,
}

impl CsvAdapter {
    pub fn new(cfg: &AdapterConfig) -> Self {
        Self { glob_pattern: cfg.dsn.clone(), max_rows_per_part: 1000 }
    }

    fn matching_files(&self) -> Result<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = glob::glob(&self.glob_pattern)
            .map_err(|e| TdtpError::validation(SUBSYSTEM, format!("invalid glob '{}': {e}", self.glob_pattern)))?
            .filter_map(|entry| entry.ok())
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn table_file(&self, table: &str) -> Result<PathBuf> {
        self.matching_files()?
            .into_iter()
            .find(|p| p.file_stem().and_then(|s| s.to_str()) == Some(table))
            .ok_or_else(|| TdtpError::validation(SUBSYSTEM, format!("no CSV file matches table '{table}'")))
    }

    fn infer_schema(headers: &csv::StringRecord, sample: &[csv::StringRecord]) -> Schema {
        let fields = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let ty = sample
                    .iter()
                    .filter_map(|row| row.get(idx))
                    .find(|v| !v.is_empty())
                    .map(infer_column_type)
                    .unwrap_or(TdtpType::Text);
                Field::new(name, ty)
            })
            .collect();
        Schema::new(fields).expect("CSV headers always yield at least one non-empty, unique-named field")
    }

    fn read_rows(&self, table: &str) -> Result<(Schema, Vec<Vec<String>>)> {
        let path = self.table_file(table)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .map_err(|e| TdtpError::transient(SUBSYSTEM, format!("opening {}: {e}", path.display())))?;

        let headers = reader
            .headers()
            .map_err(|e| TdtpError::validation(SUBSYSTEM, format!("reading headers: {e}")))?
            .clone();
        let records: Vec<csv::StringRecord> = reader
            .records()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| TdtpError::validation(SUBSYSTEM, format!("reading rows: {e}")))?;

        let schema = Self::infer_schema(&headers, &records);
        let rows: Vec<Vec<String>> =
            records.iter().map(|r| r.iter().map(|f| f.to_string()).collect()).collect();
        Ok((schema, rows))
    }
}

fn infer_column_type(sample: &str) -> TdtpType {
    if sample.parse::<i64>().is_ok() {
        TdtpType::Integer
    } else if sample.parse::<f64>().is_ok() {
        TdtpType::Real
    } else if sample == "0" || sample == "1" {
        TdtpType::Boolean
    } else {
        TdtpType::Text
    }
}

#[async_trait]
impl Adapter for CsvAdapter {
    fn database_type(&self) -> &str {
        "csv"
    }

    async fn connect(&mut self) -> Result<()> {
        // Files are opened lazily per operation; nothing to pool.
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.matching_files().map(|_| ())
    }

    async fn get_table_names(&self) -> Result<Vec<String>> {
        Ok(self
            .matching_files()?
            .into_iter()
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect())
    }

    async fn get_view_names(&self) -> Result<Vec<ViewInfo>> {
        Ok(Vec::new())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.table_file(table).is_ok())
    }

    async fn get_table_schema(&self, table: &str) -> Result<Schema> {
        Ok(self.read_rows(table)?.0)
    }

    async fn export_table(&self, table: &str, max_rows_per_part: usize) -> Result<Vec<DataPacket>> {
        let (schema, row_values) = self.read_rows(table)?;
        let rows: Vec<String> = row_values.iter().map(|v| tdtp_core::row::format_row(v)).collect();
        Generator { max_rows_per_part }.generate_reference(table, &schema, &rows)
    }

    async fn export_table_with_query(
        &self,
        table: &str,
        query: &Query,
        sender: Option<&str>,
        recipient: Option<&str>,
    ) -> Result<Vec<DataPacket>> {
        let (schema, row_values) = self.read_rows(table)?;
        let typed_rows: Vec<Vec<TypedValue>> = row_values
            .into_iter()
            .map(|fields| {
                fields
                    .into_iter()
                    .zip(schema.fields.iter())
                    .map(|(raw, field)| Converter::parse(&raw, field.normalized_type()?, field.precision, field.scale))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        let output = execute(&schema, &typed_rows, query)?;
        let rows: Vec<String> = output
            .rows
            .iter()
            .map(|row| tdtp_core::row::format_row(&row.iter().map(Converter::format).collect::<Vec<_>>()))
            .collect();

        let generator = Generator::new(self.max_rows_per_part);
        let mut packet = generator.generate_request(table, &schema, query.clone(), sender, recipient)?;
        packet.data = tdtp_core::packet::Data::uncompressed(rows);
        packet.header.records_in_part = packet.data.rows.len() as u32;
        packet.query_context = Some(tdtp_core::query::QueryContext {
            original_query: query.clone(),
            execution_results: output.stats,
        });
        Ok(vec![packet])
    }

    async fn export_table_incremental(
        &self,
        _table: &str,
        _inc: &IncrementalConfig,
    ) -> Result<(Vec<DataPacket>, Option<String>)> {
        // A flat CSV file has no durable row ordering guarantee across
        // re-reads beyond file order; incremental tracking is adapter-backend
        // work this format does not support.
        Err(TdtpError::fatal(SUBSYSTEM, "incremental export is not supported by the CSV adapter"))
    }

    async fn import_packet(&self, packet: &DataPacket, strategy: ImportStrategy) -> Result<u64> {
        self.import_packets(std::slice::from_ref(packet), strategy).await
    }

    async fn import_packets(&self, packets: &[DataPacket], strategy: ImportStrategy) -> Result<u64> {
        let strategy = if strategy == ImportStrategy::Copy {
            tracing::warn!(subsystem = SUBSYSTEM, "copy strategy unsupported on csv, falling back to fail");
            ImportStrategy::Fail
        } else {
            strategy
        };
        if !matches!(strategy, ImportStrategy::Fail) {
            // `replace`/`ignore` require a primary-key index CSV doesn't
            // maintain; only an append-style import ("fail" on no collision
            // possible, since files are not deduplicated) is honored.
            return Err(TdtpError::fatal(
                SUBSYSTEM,
                format!("import strategy '{strategy:?}' is not supported by the CSV adapter"),
            ));
        }

        let mut total = 0u64;
        for packet in packets {
            let table = &packet.header.table_name;
            let path = PathBuf::from(format!("{}.csv", table));
            let file_exists = path.exists();
            let mut writer = csv::WriterBuilder::new()
                .has_headers(!file_exists)
                .from_writer(
                    std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&path)
                        .map_err(|e| TdtpError::transient(SUBSYSTEM, format!("opening {}: {e}", path.display())))?,
                );
            if !file_exists {
                let headers: Vec<&str> = packet.schema.fields.iter().map(|f| f.name.as_str()).collect();
                writer.write_record(&headers).map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("writing header: {e}")))?;
            }
            for fields in packet.row_values()? {
                writer.write_record(&fields).map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("writing row: {e}")))?;
                total += 1;
            }
            writer.flush().map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("flushing {}: {e}", path.display())))?;
        }
        Ok(total)
    }

    async fn begin_tx(&self) -> Result<Box<dyn Transaction>> {
        Err(TdtpError::fatal(SUBSYSTEM, "the CSV adapter has no transactional boundary"))
    }

    async fn get_database_version(&self) -> Result<String> {
        // No versioned file format to report; the adapter itself is the contract.
        Ok("csv-adapter-1".to_string())
    }

    fn supports_bulk_copy(&self) -> bool {
        false
    }
}
