//! The reference SQLite adapter (§4.3/§4.4): a `rusqlite` + `r2d2` connection
//! pool behind the `Adapter` contract. SQLite has no native `COPY FROM`, so
//! the `copy` import strategy falls back to `fail` per §4.4's fallback rule.

use crate::contract::{Adapter, AdapterConfig, ImportStrategy, IncrementalConfig, Transaction, ViewInfo};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use tdtp_core::error::{Result, TdtpError};
use tdtp_core::field::{Field, Schema};
use tdtp_core::packet::{DataPacket, Generator};
use tdtp_core::query::Query;
use tdtp_core::value::{Converter, TdtpType};
use tdtp_query::execute;

const SUBSYSTEM: &str = "sqlite_adapter";

fn pool_err(e: impl std::fmt::Display) -> TdtpError {
    TdtpError::transient(SUBSYSTEM, format!("pool error: {e}"))
}

fn sql_err(e: rusqlite::Error) -> TdtpError {
    TdtpError::transient(SUBSYSTEM, format!("sqlite error: {e}"))
}

fn sqlite_type_to_tdtp(decl_type: &str) -> TdtpType {
    let upper = decl_type.to_ascii_uppercase();
    if upper.contains("INT") {
        TdtpType::Integer
    } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        TdtpType::Real
    } else if upper.contains("DECIMAL") || upper.contains("NUMERIC") {
        TdtpType::Decimal
    } else if upper.contains("BOOL") {
        TdtpType::Boolean
    } else if upper.contains("BLOB") {
        TdtpType::Blob
    } else {
        TdtpType::Text
    }
}

fn tdtp_type_to_sqlite(ty: TdtpType) -> &'static str {
    match ty {
        TdtpType::Integer => "INTEGER",
        TdtpType::Real => "REAL",
        TdtpType::Decimal => "TEXT",
        TdtpType::Text => "TEXT",
        TdtpType::Boolean => "INTEGER",
        TdtpType::Date => "TEXT",
        TdtpType::DateTime => "TEXT",
        TdtpType::Timestamp => "TEXT",
        TdtpType::Blob => "BLOB",
    }
}

pub struct SqliteAdapter {
    max_rows_per_part: usize,
    pool: Option<Pool<SqliteConnectionManager>>,
    dsn: String,
    max_conns: u32,
}

impl SqliteAdapter {
    /// `dsn` is a rusqlite-native path (`:memory:` or a filesystem path).
    pub fn new(cfg: &AdapterConfig) -> Self {
        Self { max_rows_per_part: 1000, pool: None, dsn: cfg.dsn.clone(), max_conns: cfg.max_conns.max(1) }
    }

    fn pool(&self) -> Result<&Pool<SqliteConnectionManager>> {
        self.pool
            .as_ref()
            .ok_or_else(|| TdtpError::fatal(SUBSYSTEM, "adapter used before connect()"))
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool()?.get().map_err(pool_err)
    }

    fn table_schema_sync(conn: &Connection, table: &str) -> Result<Schema> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .map_err(sql_err)?;
        let mut fields = Vec::new();
        let rows = stmt
            .query_map([], |row| {
                let name: String = row.get(1)?;
                let decl_type: String = row.get(2)?;
                let not_null: i64 = row.get(3)?;
                let pk: i64 = row.get(5)?;
                Ok((name, decl_type, not_null != 0, pk != 0))
            })
            .map_err(sql_err)?;
        for r in rows {
            let (name, decl_type, _not_null, pk) = r.map_err(sql_err)?;
            let ty = sqlite_type_to_tdtp(&decl_type);
            fields.push(Field::new(name, ty).with_key(pk));
        }
        if fields.is_empty() {
            return Err(TdtpError::validation(SUBSYSTEM, format!("table '{table}' not found")));
        }
        Schema::new(fields)
    }

    fn rows_to_packets(
        &self,
        table: &str,
        schema: &Schema,
        row_values: Vec<Vec<String>>,
        query: Option<Query>,
        query_context: Option<tdtp_core::query::QueryContext>,
        sender: Option<&str>,
        recipient: Option<&str>,
    ) -> Result<Vec<DataPacket>> {
        let rows: Vec<String> = row_values.iter().map(|v| tdtp_core::row::format_row(v)).collect();
        let generator = Generator::new(self.max_rows_per_part);
        if let Some(query) = query {
            let mut packet = generator.generate_request(table, schema, query, sender, recipient)?;
            packet.data = tdtp_core::packet::Data::uncompressed(rows);
            packet.header.records_in_part = packet.data.rows.len() as u32;
            packet.query_context = query_context;
            Ok(vec![packet])
        } else {
            generator.generate_reference(table, schema, &rows)
        }
    }
}

#[async_trait]
impl Adapter for SqliteAdapter {
    fn database_type(&self) -> &str {
        "sqlite"
    }

    async fn connect(&mut self) -> Result<()> {
        let manager = SqliteConnectionManager::file(&self.dsn);
        let pool = Pool::builder().max_size(self.max_conns).build(manager).map_err(pool_err)?;
        self.pool = Some(pool);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.pool = None;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let conn = self.conn()?;
        tokio::task::spawn_blocking(move || conn.execute_batch("SELECT 1"))
            .await
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("join error: {e}")))?
            .map_err(sql_err)
    }

    async fn get_table_names(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
                .map_err(sql_err)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(sql_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(sql_err)?;
            Ok(names)
        })
        .await
        .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("join error: {e}")))?
    }

    async fn get_view_names(&self) -> Result<Vec<ViewInfo>> {
        let conn = self.conn()?;
        tokio::task::spawn_blocking(move || -> Result<Vec<ViewInfo>> {
            let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='view'").map_err(sql_err)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(sql_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(sql_err)?;
            // SQLite views are always read-only from this adapter's standpoint:
            // it never attempts INSTEAD OF triggers.
            Ok(names.into_iter().map(|name| ViewInfo { name, updatable: false }).collect())
        })
        .await
        .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("join error: {e}")))?
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.get_table_names().await?.iter().any(|t| t == table))
    }

    async fn get_table_schema(&self, table: &str) -> Result<Schema> {
        let conn = self.conn()?;
        let table = table.to_string();
        tokio::task::spawn_blocking(move || Self::table_schema_sync(&conn, &table))
            .await
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("join error: {e}")))?
    }

    async fn export_table(&self, table: &str, max_rows_per_part: usize) -> Result<Vec<DataPacket>> {
        let schema = self.get_table_schema(table).await?;
        let conn = self.conn()?;
        let table_owned = table.to_string();
        let schema_clone = schema.clone();
        let row_values = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<String>>> {
            let cols: Vec<String> = schema_clone.fields.iter().map(|f| f.name.clone()).collect();
            let sql = format!("SELECT {} FROM {}", cols.join(", "), table_owned);
            let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
            let n = cols.len();
            let rows = stmt
                .query_map([], |row| {
                    (0..n).map(|i| row.get::<_, Option<String>>(i).map(|v| v.unwrap_or_default())).collect()
                })
                .map_err(sql_err)?
                .collect::<std::result::Result<Vec<Vec<String>>, _>>()
                .map_err(sql_err)?;
            Ok(rows)
        })
        .await
        .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("join error: {e}")))??;

        let generator = Generator { max_rows_per_part };
        let rows: Vec<String> = row_values.iter().map(|v| tdtp_core::row::format_row(v)).collect();
        generator.generate_reference(table, &schema, &rows)
    }

    async fn export_table_with_query(
        &self,
        table: &str,
        query: &Query,
        sender: Option<&str>,
        recipient: Option<&str>,
    ) -> Result<Vec<DataPacket>> {
        let schema = self.get_table_schema(table).await?;
        let all_rows = self.export_table(table, usize::MAX).await?;
        let mut raw_rows: Vec<Vec<String>> = Vec::new();
        for packet in &all_rows {
            raw_rows.extend(packet.row_values()?);
        }
        let typed_rows: Vec<Vec<_>> = raw_rows
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
        let row_values: Vec<Vec<String>> =
            output.rows.iter().map(|row| row.iter().map(Converter::format).collect()).collect();

        let query_context = tdtp_core::query::QueryContext { original_query: query.clone(), execution_results: output.stats };
        self.rows_to_packets(table, &schema, row_values, Some(query.clone()), Some(query_context), sender, recipient)
    }

    async fn export_table_incremental(
        &self,
        table: &str,
        inc: &IncrementalConfig,
    ) -> Result<(Vec<DataPacket>, Option<String>)> {
        let schema = self.get_table_schema(table).await?;
        if schema.field(&inc.tracking_field).is_none() {
            return Err(TdtpError::validation(
                SUBSYSTEM,
                format!("tracking field '{}' not present on table '{table}'", inc.tracking_field),
            ));
        }

        let conn = self.conn()?;
        let table_owned = table.to_string();
        let tracking_field = inc.tracking_field.clone();
        let last_value = inc.last_value.clone();
        let batch_size = inc.batch_size;
        let schema_clone = schema.clone();
        let row_values = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<String>>> {
            let cols: Vec<String> = schema_clone.fields.iter().map(|f| f.name.clone()).collect();
            let sql = match &last_value {
                Some(_) => format!(
                    "SELECT {} FROM {} WHERE {} > ?1 ORDER BY {} ASC LIMIT {}",
                    cols.join(", "), table_owned, tracking_field, tracking_field, batch_size
                ),
                None => format!(
                    "SELECT {} FROM {} ORDER BY {} ASC LIMIT {}",
                    cols.join(", "), table_owned, tracking_field, batch_size
                ),
            };
            let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
            let n = cols.len();
            let map_row = |row: &rusqlite::Row| -> rusqlite::Result<Vec<String>> {
                (0..n).map(|i| row.get::<_, Option<String>>(i).map(|v| v.unwrap_or_default())).collect()
            };
            let rows = match &last_value {
                Some(v) => stmt
                    .query_map(params_from_iter([v.clone()]), map_row)
                    .map_err(sql_err)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(sql_err)?,
                None => stmt
                    .query_map([], map_row)
                    .map_err(sql_err)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(sql_err)?,
            };
            Ok(rows)
        })
        .await
        .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("join error: {e}")))??;

        let tracking_idx = schema.field_index(&inc.tracking_field).expect("checked above");
        let new_last_value = row_values.last().map(|r| r[tracking_idx].clone()).or(inc.last_value.clone());

        if row_values.is_empty() {
            return Ok((Vec::new(), new_last_value));
        }

        let rows: Vec<String> = row_values.iter().map(|v| tdtp_core::row::format_row(v)).collect();
        let generator = Generator::new(self.max_rows_per_part);
        let packets = generator.generate_reference(table, &schema, &rows)?;
        Ok((packets, new_last_value))
    }

    async fn import_packet(&self, packet: &DataPacket, strategy: ImportStrategy) -> Result<u64> {
        self.import_packets(std::slice::from_ref(packet), strategy).await
    }

    async fn import_packets(&self, packets: &[DataPacket], strategy: ImportStrategy) -> Result<u64> {
        let strategy = if strategy == ImportStrategy::Copy {
            // SQLite has no bulk-COPY path; announce the fallback per §4.4.
            tracing::warn!(subsystem = SUBSYSTEM, "copy strategy unsupported on sqlite, falling back to fail");
            ImportStrategy::Fail
        } else {
            strategy
        };

        let mut conn = self.conn()?;
        let packets = packets.to_vec();
        tokio::task::spawn_blocking(move || -> Result<u64> {
            let tx = conn.transaction().map_err(sql_err)?;
            let mut total = 0u64;
            for packet in &packets {
                total += import_one_packet(&tx, packet, strategy)?;
            }
            tx.commit().map_err(sql_err)?;
            Ok(total)
        })
        .await
        .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("join error: {e}")))?
    }

    async fn begin_tx(&self) -> Result<Box<dyn Transaction>> {
        let conn = self.conn()?;
        let conn = tokio::task::spawn_blocking(move || -> Result<_> {
            conn.execute_batch("BEGIN").map_err(sql_err)?;
            Ok(conn)
        })
        .await
        .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("join error: {e}")))??;
        Ok(Box::new(SqliteTransaction { conn: Some(conn) }))
    }

    async fn get_database_version(&self) -> Result<String> {
        let conn = self.conn()?;
        tokio::task::spawn_blocking(move || {
            conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0)).map_err(sql_err)
        })
        .await
        .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("join error: {e}")))?
    }

    fn supports_bulk_copy(&self) -> bool {
        false
    }
}

fn ensure_table(tx: &rusqlite::Transaction, table: &str, schema: &Schema) -> Result<()> {
    let exists: Option<i64> = tx
        .query_row("SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1", [table], |row| row.get(0))
        .optional()
        .map_err(sql_err)?;
    if exists.is_some() {
        return Ok(());
    }

    let cols: Vec<String> = schema
        .fields
        .iter()
        .map(|f| {
            let ty = f.normalized_type().unwrap_or(TdtpType::Text);
            let sql_ty = tdtp_type_to_sqlite(ty);
            if f.key {
                format!("{} {} PRIMARY KEY", f.name, sql_ty)
            } else {
                format!("{} {}", f.name, sql_ty)
            }
        })
        .collect();
    let ddl = format!("CREATE TABLE {} ({})", table, cols.join(", "));
    tx.execute(&ddl, []).map_err(sql_err)?;
    Ok(())
}

fn import_one_packet(tx: &rusqlite::Transaction, packet: &DataPacket, strategy: ImportStrategy) -> Result<u64> {
    ensure_table(tx, &packet.header.table_name, &packet.schema)?;

    let cols: Vec<&str> = packet.schema.fields.iter().map(|f| f.name.as_str()).collect();
    let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("?{i}")).collect();
    let key_field = packet.schema.primary_key_field().map(|f| f.name.clone());

    let insert_sql = match (strategy, &key_field) {
        (ImportStrategy::Replace, Some(_)) => {
            format!("INSERT OR REPLACE INTO {} ({}) VALUES ({})", packet.header.table_name, cols.join(", "), placeholders.join(", "))
        }
        (ImportStrategy::Ignore, _) => {
            format!("INSERT OR IGNORE INTO {} ({}) VALUES ({})", packet.header.table_name, cols.join(", "), placeholders.join(", "))
        }
        _ => {
            format!("INSERT INTO {} ({}) VALUES ({})", packet.header.table_name, cols.join(", "), placeholders.join(", "))
        }
    };

    let row_values = packet.row_values()?;
    let mut affected = 0u64;
    for fields in row_values {
        let params: Vec<&str> = fields.iter().map(|s| s.as_str()).collect();
        match tx.execute(&insert_sql, params_from_iter(params)) {
            Ok(n) => affected += n as u64,
            Err(e) if strategy == ImportStrategy::Fail => {
                return Err(TdtpError::validation(SUBSYSTEM, format!("row collision under 'fail' strategy: {e}")))
            }
            Err(e) => return Err(sql_err(e)),
        }
    }
    Ok(affected)
}

struct SqliteTransaction {
    conn: Option<r2d2::PooledConnection<SqliteConnectionManager>>,
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            tokio::task::spawn_blocking(move || conn.execute_batch("COMMIT"))
                .await
                .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("join error: {e}")))?
                .map_err(sql_err)?;
        }
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            tokio::task::spawn_blocking(move || conn.execute_batch("ROLLBACK"))
                .await
                .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("join error: {e}")))?
                .map_err(sql_err)?;
        }
        Ok(())
    }
}
