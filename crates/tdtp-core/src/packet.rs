//! `DataPacket` — the transport unit: protocol tag, version, header, schema,
//! data block, optional query/query-context, and a transport UUID (§3.1).

use crate::error::{Result, TdtpError};
use crate::field::Schema;
use crate::header::{Header, PacketType};
use crate::query::{Query, QueryContext};
use crate::row::{format_row, split_row};
use chrono::Utc;
use uuid::Uuid;

pub const PROTOCOL_TAG: &str = "TDTP";
pub const PROTOCOL_VERSION: &str = "1.0";

/// A block of rows. Each `Row` is the pipe-delimited blob for one record in
/// schema order. If `compression` is set, `rows` contains exactly one Row
/// whose value is the compressed-then-base64 payload of the original rows
/// (§3.1); `tdtp-pipeline::processors::CompressProcessor` is responsible for
/// applying/undoing that transform, this struct only carries the flag.
#[derive(Debug, Clone, Default)]
pub struct Data {
    pub rows: Vec<String>,
    pub compression: Option<String>,
}

impl Data {
    pub fn uncompressed(rows: Vec<String>) -> Self {
        Self { rows, compression: None }
    }
}

#[derive(Debug, Clone)]
pub struct DataPacket {
    pub protocol: String,
    pub version: String,
    pub header: Header,
    pub schema: Schema,
    pub data: Data,
    pub query: Option<Query>,
    pub query_context: Option<QueryContext>,
    pub uuid: Uuid,
}

impl DataPacket {
    /// Decode every row in this packet into its ordered field-value strings
    /// (still text; the typed Converter parses further). Mirrors the
    /// parser's `GetRowValues` (§4.1).
    pub fn row_values(&self) -> Result<Vec<Vec<String>>> {
        self.data
            .rows
            .iter()
            .map(|r| split_row(r))
            .collect::<Result<Vec<_>>>()
    }

    /// Structural validation beyond what `Header::validate`/`Schema::validate`
    /// already cover: `recordsInPart == |rows|` (skipped for compressed
    /// blocks, which always carry exactly one physical row by design).
    pub fn validate_structure(&self) -> Result<()> {
        self.header
            .validate()
            .map_err(|m| TdtpError::validation("packet", m))?;
        self.schema.validate()?;

        if self.data.compression.is_none() && self.data.rows.len() as u32 != self.header.records_in_part {
            return Err(TdtpError::validation(
                "packet",
                format!(
                    "recordsInPart {} does not match actual row count {}",
                    self.header.records_in_part,
                    self.data.rows.len()
                ),
            ));
        }
        Ok(())
    }
}

/// Builds rows for a single record from ordered typed-value strings,
/// applying §3.1 escaping.
pub fn build_row(field_values: &[String]) -> String {
    format_row(field_values)
}

/// Plans how a full `rows` table splits into N equal-or-smaller parts no
/// larger than `max_rows_per_part`, returning `(part_number, total_parts,
/// row_slice)` triples in order. Shared by every `Generate*` function so
/// that siblings agree on `totalParts`/`recordsInPart` (§4.1).
pub fn plan_chunks(row_count: usize, max_rows_per_part: usize) -> Vec<(u32, u32, std::ops::Range<usize>)> {
    if row_count == 0 {
        return vec![(1, 1, 0..0)];
    }
    let max = max_rows_per_part.max(1);
    let total_parts = row_count.div_ceil(max) as u32;
    (0..total_parts)
        .map(|i| {
            let start = i as usize * max;
            let end = (start + max).min(row_count);
            (i + 1, total_parts, start..end)
        })
        .collect()
}

/// The Generator (§4.1): builds one or more packets, of a given `PacketType`,
/// from a schema + row table, sharing `message_id` across siblings.
pub struct Generator {
    pub max_rows_per_part: usize,
}

impl Generator {
    pub fn new(max_rows_per_part: usize) -> Self {
        Self { max_rows_per_part }
    }

    fn message_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn base_header(
        &self,
        packet_type: PacketType,
        table_name: &str,
        message_id: &str,
        in_reply_to: Option<&str>,
        part_number: u32,
        total_parts: u32,
        records_in_part: u32,
        sender: Option<&str>,
        recipient: Option<&str>,
    ) -> Header {
        Header {
            packet_type,
            table_name: table_name.to_string(),
            message_id: message_id.to_string(),
            in_reply_to: in_reply_to.map(|s| s.to_string()),
            part_number,
            total_parts,
            records_in_part,
            timestamp: Utc::now(),
            sender: sender.map(|s| s.to_string()),
            recipient: recipient.map(|s| s.to_string()),
        }
    }

    /// A self-publishing `reference` emission.
    pub fn generate_reference(
        &self,
        table_name: &str,
        schema: &Schema,
        rows: &[String],
    ) -> Result<Vec<DataPacket>> {
        self.generate_chunked(PacketType::Reference, table_name, schema, rows, None, None)
    }

    /// A single `request` packet carrying a query and no data.
    pub fn generate_request(
        &self,
        table_name: &str,
        schema: &Schema,
        query: Query,
        sender: Option<&str>,
        recipient: Option<&str>,
    ) -> Result<DataPacket> {
        schema.validate()?;
        let message_id = Self::message_id();
        let header = self.base_header(
            PacketType::Request,
            table_name,
            &message_id,
            None,
            1,
            1,
            0,
            sender,
            recipient,
        );
        Ok(DataPacket {
            protocol: PROTOCOL_TAG.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            header,
            schema: schema.clone(),
            data: Data::default(),
            query: Some(query),
            query_context: None,
            uuid: Uuid::new_v4(),
        })
    }

    /// N `response` packets sharing the given `in_reply_to` correlation id.
    #[allow(clippy::too_many_arguments)]
    pub fn generate_response(
        &self,
        table_name: &str,
        in_reply_to: &str,
        schema: &Schema,
        rows: &[String],
        query_context: Option<QueryContext>,
        sender: Option<&str>,
        recipient: Option<&str>,
    ) -> Result<Vec<DataPacket>> {
        let mut packets =
            self.generate_chunked(PacketType::Response, table_name, schema, rows, Some(in_reply_to), query_context)?;
        for p in &mut packets {
            p.header.sender = sender.map(|s| s.to_string());
            p.header.recipient = recipient.map(|s| s.to_string());
        }
        Ok(packets)
    }

    fn generate_chunked(
        &self,
        packet_type: PacketType,
        table_name: &str,
        schema: &Schema,
        rows: &[String],
        in_reply_to: Option<&str>,
        query_context: Option<QueryContext>,
    ) -> Result<Vec<DataPacket>> {
        schema.validate()?;
        let message_id = Self::message_id();
        let plan = plan_chunks(rows.len(), self.max_rows_per_part);

        let packets = plan
            .into_iter()
            .map(|(part_number, total_parts, range)| {
                let part_rows = rows[range].to_vec();
                let header = self.base_header(
                    packet_type,
                    table_name,
                    &message_id,
                    in_reply_to,
                    part_number,
                    total_parts,
                    part_rows.len() as u32,
                    None,
                    None,
                );
                DataPacket {
                    protocol: PROTOCOL_TAG.to_string(),
                    version: PROTOCOL_VERSION.to_string(),
                    header,
                    schema: schema.clone(),
                    data: Data::uncompressed(part_rows),
                    query: None,
                    query_context: query_context.clone(),
                    uuid: Uuid::new_v4(),
                }
            })
            .collect();
        Ok(packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use crate::value::TdtpType;

    fn sample_schema() -> Schema {
        Schema::new(vec![
            Field::new("id", TdtpType::Integer).with_key(true),
            Field::new("name", TdtpType::Text),
        ])
        .unwrap()
    }

    #[test]
    fn chunk_plan_covers_all_rows_with_consistent_totals() {
        let plan = plan_chunks(11, 5);
        assert_eq!(plan.len(), 3);
        let total: usize = plan.iter().map(|(_, _, r)| r.len()).sum();
        assert_eq!(total, 11);
        for (part, total_parts, _) in &plan {
            assert_eq!(*total_parts, 3);
            assert!(*part >= 1 && *part <= *total_parts);
        }
    }

    #[test]
    fn reference_generation_shares_message_id_and_sequential_parts() {
        let schema = sample_schema();
        let rows: Vec<String> = (0..7).map(|i| format!("{i}|name{i}")).collect();
        let gen = Generator::new(3);
        let packets = gen.generate_reference("users", &schema, &rows).unwrap();
        assert_eq!(packets.len(), 3);
        let message_id = &packets[0].header.message_id;
        for (i, p) in packets.iter().enumerate() {
            assert_eq!(&p.header.message_id, message_id);
            assert_eq!(p.header.part_number, (i + 1) as u32);
            assert_eq!(p.header.total_parts, 3);
        }
        let sum: u32 = packets.iter().map(|p| p.header.records_in_part).sum();
        assert_eq!(sum, 7);
    }

    #[test]
    fn request_packet_has_empty_data_and_populated_query() {
        let schema = sample_schema();
        let gen = Generator::new(100);
        let query = Query::new("tdtql");
        let packet = gen
            .generate_request("users", &schema, query, Some("a"), Some("b"))
            .unwrap();
        assert_eq!(packet.header.packet_type, PacketType::Request);
        assert!(packet.data.rows.is_empty());
        assert!(packet.query.is_some());
    }
}
