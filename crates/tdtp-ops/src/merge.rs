//! Packet merge (§4.8): combine several packets sharing a schema into one,
//! per a chosen conflict-resolution strategy.

use std::collections::HashMap;
use tdtp_core::error::{Result, TdtpError};
use tdtp_core::header::Header;
use tdtp_core::packet::{Data, DataPacket};

const SUBSYSTEM: &str = "merge";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Union of all keys; on collision the first packet to introduce the key wins.
    Union,
    /// Only keys present in every input packet survive.
    Intersection,
    /// Union of all keys; on collision the leftmost (first) packet always wins.
    LeftPriority,
    /// Union of all keys; on collision the rightmost (last) packet always wins.
    RightPriority,
    /// Plain concatenation. No dedup, no key required.
    Append,
}

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub strategy: MergeStrategy,
    /// Required for every strategy except `Append`. Defaults to the schema's
    /// primary key when `None`.
    pub key_fields: Option<Vec<String>>,
    pub case_sensitive: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self { strategy: MergeStrategy::Union, key_fields: None, case_sensitive: true }
    }
}

fn normalize(value: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        value.to_string()
    } else {
        value.to_lowercase()
    }
}

fn key_field_indices(packet: &DataPacket, options: &MergeOptions) -> Result<Vec<usize>> {
    let names: Vec<String> = match &options.key_fields {
        Some(fields) => fields.clone(),
        None => vec![packet
            .schema
            .primary_key_field()
            .ok_or_else(|| TdtpError::validation(SUBSYSTEM, "no key fields given and schema declares no primary key"))?
            .name
            .clone()],
    };
    names
        .iter()
        .map(|name| {
            packet
                .schema
                .field_index(name)
                .ok_or_else(|| TdtpError::validation(SUBSYSTEM, format!("key field '{name}' not in schema")))
        })
        .collect()
}

fn row_key(row: &[String], key_indices: &[usize], case_sensitive: bool) -> Vec<String> {
    key_indices.iter().map(|&i| normalize(&row[i], case_sensitive)).collect()
}

fn assert_identical_schemas(packets: &[DataPacket]) -> Result<()> {
    let first: Vec<&str> = packets[0].schema.fields.iter().map(|f| f.name.as_str()).collect();
    for packet in &packets[1..] {
        let names: Vec<&str> = packet.schema.fields.iter().map(|f| f.name.as_str()).collect();
        if names != first {
            return Err(TdtpError::validation(SUBSYSTEM, "merge requires identical schemas across all inputs"));
        }
    }
    Ok(())
}

fn build_output(first: &DataPacket, rows: Vec<Vec<String>>) -> DataPacket {
    let header = Header {
        packet_type: first.header.packet_type,
        table_name: first.header.table_name.clone(),
        message_id: first.header.message_id.clone(),
        in_reply_to: None,
        part_number: 1,
        total_parts: 1,
        records_in_part: rows.len() as u32,
        timestamp: first.header.timestamp,
        sender: first.header.sender.clone(),
        recipient: first.header.recipient.clone(),
    };
    let encoded = rows.into_iter().map(|fields| tdtp_core::row::format_row(&fields)).collect();
    DataPacket {
        protocol: first.protocol.clone(),
        version: first.version.clone(),
        header,
        schema: first.schema.clone(),
        data: Data::uncompressed(encoded),
        query: None,
        query_context: None,
        uuid: uuid::Uuid::new_v4(),
    }
}

/// Merges `packets` (in order) into one, per `options.strategy`. Requires at
/// least one input and (for every strategy but `Append`) identical schemas.
pub fn merge(packets: &[DataPacket], options: &MergeOptions) -> Result<DataPacket> {
    if packets.is_empty() {
        return Err(TdtpError::validation(SUBSYSTEM, "merge requires at least one input packet"));
    }
    assert_identical_schemas(packets)?;

    if options.strategy == MergeStrategy::Append {
        let mut rows = Vec::new();
        for packet in packets {
            rows.extend(packet.row_values()?);
        }
        return Ok(build_output(&packets[0], rows));
    }

    let mut per_packet_rows = Vec::with_capacity(packets.len());
    for packet in packets {
        per_packet_rows.push(packet.row_values()?);
    }
    let key_indices = key_field_indices(&packets[0], options)?;

    match options.strategy {
        MergeStrategy::Union | MergeStrategy::LeftPriority => {
            let mut order: Vec<Vec<String>> = Vec::new();
            let mut winners: HashMap<Vec<String>, Vec<String>> = HashMap::new();
            for rows in &per_packet_rows {
                for row in rows {
                    let key = row_key(row, &key_indices, options.case_sensitive);
                    if !winners.contains_key(&key) {
                        order.push(key.clone());
                        winners.insert(key, row.clone());
                    }
                }
            }
            let rows = order.into_iter().map(|key| winners.remove(&key).unwrap()).collect();
            Ok(build_output(&packets[0], rows))
        }
        MergeStrategy::RightPriority => {
            let mut order: Vec<Vec<String>> = Vec::new();
            let mut winners: HashMap<Vec<String>, Vec<String>> = HashMap::new();
            for rows in &per_packet_rows {
                for row in rows {
                    let key = row_key(row, &key_indices, options.case_sensitive);
                    if !winners.contains_key(&key) {
                        order.push(key.clone());
                    }
                    winners.insert(key, row.clone());
                }
            }
            let rows = order.into_iter().map(|key| winners.remove(&key).unwrap()).collect();
            Ok(build_output(&packets[0], rows))
        }
        MergeStrategy::Intersection => {
            let mut counts: HashMap<Vec<String>, usize> = HashMap::new();
            for rows in &per_packet_rows {
                let mut seen_in_packet = std::collections::HashSet::new();
                for row in rows {
                    let key = row_key(row, &key_indices, options.case_sensitive);
                    seen_in_packet.insert(key);
                }
                for key in seen_in_packet {
                    *counts.entry(key).or_insert(0) += 1;
                }
            }
            let required = per_packet_rows.len();
            let mut order: Vec<Vec<String>> = Vec::new();
            let mut chosen: HashMap<Vec<String>, Vec<String>> = HashMap::new();
            for rows in &per_packet_rows {
                for row in rows {
                    let key = row_key(row, &key_indices, options.case_sensitive);
                    if counts.get(&key).copied().unwrap_or(0) == required && !chosen.contains_key(&key) {
                        order.push(key.clone());
                        chosen.insert(key, row.clone());
                    }
                }
            }
            let rows = order.into_iter().map(|key| chosen.remove(&key).unwrap()).collect();
            Ok(build_output(&packets[0], rows))
        }
        MergeStrategy::Append => unreachable!("handled above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdtp_core::field::{Field, Schema};
    use tdtp_core::header::PacketType;
    use tdtp_core::packet::{PROTOCOL_TAG, PROTOCOL_VERSION};
    use tdtp_core::value::TdtpType;

    fn packet(table: &str, rows: Vec<&str>) -> DataPacket {
        let schema = Schema::new(vec![
            Field::new("id", TdtpType::Integer).with_key(true),
            Field::new("name", TdtpType::Text),
        ])
        .unwrap();
        DataPacket {
            protocol: PROTOCOL_TAG.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            header: Header {
                packet_type: PacketType::Reference,
                table_name: table.to_string(),
                message_id: "m".to_string(),
                in_reply_to: None,
                part_number: 1,
                total_parts: 1,
                records_in_part: rows.len() as u32,
                timestamp: chrono::Utc::now(),
                sender: None,
                recipient: None,
            },
            schema,
            data: Data::uncompressed(rows.into_iter().map(|s| s.to_string()).collect()),
            query: None,
            query_context: None,
            uuid: uuid::Uuid::new_v4(),
        }
    }

    #[test]
    fn union_keeps_first_seen_on_collision() {
        let a = packet("t", vec!["1|John", "2|Jane"]);
        let b = packet("t", vec!["2|Janet", "3|Bob"]);
        let options = MergeOptions { strategy: MergeStrategy::Union, ..MergeOptions::default() };
        let merged = merge(&[a, b], &options).unwrap();
        let rows = merged.row_values().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][1], "Jane");
    }

    #[test]
    fn right_priority_keeps_last_seen_on_collision() {
        let a = packet("t", vec!["1|John", "2|Jane"]);
        let b = packet("t", vec!["2|Janet", "3|Bob"]);
        let options = MergeOptions { strategy: MergeStrategy::RightPriority, ..MergeOptions::default() };
        let merged = merge(&[a, b], &options).unwrap();
        let rows = merged.row_values().unwrap();
        let jane_row = rows.iter().find(|r| r[0] == "2").unwrap();
        assert_eq!(jane_row[1], "Janet");
    }

    #[test]
    fn intersection_keeps_only_shared_keys() {
        let a = packet("t", vec!["1|John", "2|Jane"]);
        let b = packet("t", vec!["2|Janet", "3|Bob"]);
        let options = MergeOptions { strategy: MergeStrategy::Intersection, ..MergeOptions::default() };
        let merged = merge(&[a, b], &options).unwrap();
        let rows = merged.row_values().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], "2");
    }

    #[test]
    fn append_concatenates_without_dedup() {
        let a = packet("t", vec!["1|John"]);
        let b = packet("t", vec!["1|John"]);
        let options = MergeOptions { strategy: MergeStrategy::Append, ..MergeOptions::default() };
        let merged = merge(&[a, b], &options).unwrap();
        assert_eq!(merged.row_values().unwrap().len(), 2);
    }

    #[test]
    fn output_inherits_table_name_from_first_input() {
        let a = packet("customers", vec!["1|John"]);
        let b = packet("customers_copy", vec!["2|Jane"]);
        let options = MergeOptions { strategy: MergeStrategy::Union, ..MergeOptions::default() };
        let merged = merge(&[a, b], &options).unwrap();
        assert_eq!(merged.header.table_name, "customers");
    }
}
