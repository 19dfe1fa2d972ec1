//! Packet diff (§4.8): row-level added/removed/modified comparison between
//! two packets sharing a schema.

use std::collections::{HashMap, HashSet};
use tdtp_core::error::{Result, TdtpError};
use tdtp_core::packet::DataPacket;

const SUBSYSTEM: &str = "diff";

#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Defaults to the schema's declared primary key when `None`.
    pub key_fields: Option<Vec<String>>,
    pub ignore_fields: HashSet<String>,
    /// When `false`, values are lowercased solely for equality comparison;
    /// the rows carried in the result keep their original casing.
    pub case_sensitive: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self { key_fields: None, ignore_fields: HashSet::new(), case_sensitive: true }
    }
}

#[derive(Debug, Clone)]
pub struct FieldChange {
    pub field: String,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone)]
pub struct ModifiedRow {
    pub key: Vec<String>,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    pub added: Vec<Vec<String>>,
    pub removed: Vec<Vec<String>>,
    pub modified: Vec<ModifiedRow>,
}

fn normalize(value: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        value.to_string()
    } else {
        value.to_lowercase()
    }
}

fn key_field_indices(packet: &DataPacket, options: &DiffOptions) -> Result<Vec<usize>> {
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

/// Diffs two packets assumed to share a schema (by field name). `A` is the
/// "before" side, `B` the "after" side.
pub fn diff(a: &DataPacket, b: &DataPacket, options: &DiffOptions) -> Result<DiffResult> {
    let a_names: Vec<&str> = a.schema.fields.iter().map(|f| f.name.as_str()).collect();
    let b_names: Vec<&str> = b.schema.fields.iter().map(|f| f.name.as_str()).collect();
    if a_names != b_names {
        return Err(TdtpError::validation(SUBSYSTEM, "diff requires identical schemas on both packets"));
    }

    let key_indices = key_field_indices(a, options)?;
    let a_rows = a.row_values()?;
    let b_rows = b.row_values()?;

    let mut a_by_key: HashMap<Vec<String>, &Vec<String>> = HashMap::new();
    for row in &a_rows {
        a_by_key.insert(row_key(row, &key_indices, options.case_sensitive), row);
    }
    let mut b_by_key: HashMap<Vec<String>, &Vec<String>> = HashMap::new();
    for row in &b_rows {
        b_by_key.insert(row_key(row, &key_indices, options.case_sensitive), row);
    }

    let mut result = DiffResult::default();

    for (key, a_row) in &a_by_key {
        match b_by_key.get(key) {
            None => result.removed.push((*a_row).clone()),
            Some(b_row) => {
                let mut changes = Vec::new();
                for (idx, field) in a.schema.fields.iter().enumerate() {
                    if options.ignore_fields.contains(&field.name) {
                        continue;
                    }
                    let a_val = normalize(&a_row[idx], options.case_sensitive);
                    let b_val = normalize(&b_row[idx], options.case_sensitive);
                    if a_val != b_val {
                        changes.push(FieldChange {
                            field: field.name.clone(),
                            before: a_row[idx].clone(),
                            after: b_row[idx].clone(),
                        });
                    }
                }
                if !changes.is_empty() {
                    result.modified.push(ModifiedRow { key: key.clone(), changes });
                }
            }
        }
    }

    for (key, b_row) in &b_by_key {
        if !a_by_key.contains_key(key) {
            result.added.push((*b_row).clone());
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdtp_core::field::{Field, Schema};
    use tdtp_core::header::{Header, PacketType};
    use tdtp_core::packet::{Data, DataPacket, PROTOCOL_TAG, PROTOCOL_VERSION};
    use uuid::Uuid;

    fn packet(rows: Vec<&str>) -> DataPacket {
        let schema = Schema::new(vec![
            Field::new("id", tdtp_core::value::TdtpType::Integer).with_key(true),
            Field::new("name", tdtp_core::value::TdtpType::Text),
        ])
        .unwrap();
        DataPacket {
            protocol: PROTOCOL_TAG.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            header: Header {
                packet_type: PacketType::Reference,
                table_name: "t".to_string(),
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
            uuid: Uuid::new_v4(),
        }
    }

    #[test]
    fn classifies_added_removed_modified() {
        let a = packet(vec!["1|John", "2|Jane", "3|Bob"]);
        let b = packet(vec!["1|John", "2|Janet", "4|Alice"]);
        let result = diff(&a, &b, &DiffOptions::default()).unwrap();

        assert_eq!(result.removed.len(), 1);
        assert_eq!(result.removed[0][0], "3");

        assert_eq!(result.added.len(), 1);
        assert_eq!(result.added[0][0], "4");

        assert_eq!(result.modified.len(), 1);
        assert_eq!(result.modified[0].key, vec!["2".to_string()]);
        assert_eq!(result.modified[0].changes[0].field, "name");
        assert_eq!(result.modified[0].changes[0].before, "Jane");
        assert_eq!(result.modified[0].changes[0].after, "Janet");
    }

    #[test]
    fn case_insensitive_mode_ignores_case_only_differences() {
        let a = packet(vec!["1|JOHN"]);
        let b = packet(vec!["1|john"]);
        let options = DiffOptions { case_sensitive: false, ..DiffOptions::default() };
        let result = diff(&a, &b, &options).unwrap();
        assert!(result.modified.is_empty());
    }
}
