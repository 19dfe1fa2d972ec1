//! Pre/post processors (§2 data-flow, SPEC_FULL §4.5 [ADD]): masking,
//! normalization, schema/safe-SQL validation, checksumming, and gzip
//! compression applied to a packet's decoded rows before/after the
//! workspace stage.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use tdtp_core::error::{Result, TdtpError};
use tdtp_core::field::Schema;
use tdtp_core::packet::Data;

const SUBSYSTEM: &str = "processors";

// ---------------------------------------------------------------------
// Mask
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskRule {
    /// Reveal the first character of the local part, mask the rest with a
    /// fixed three-asterisk run, keep the domain as-is. `jdoe@x.com -> j***@x.com`.
    Partial,
    /// NANP-style phone formatting: country code and area code revealed,
    /// the exchange fully masked, the line number's leading digit masked.
    Middle,
    /// Reveal the first two and last two digits of the full digit string,
    /// mask everything between, re-grouped in runs of four.
    First2Last2,
}

#[derive(Debug, Clone)]
pub struct MaskFieldRule {
    pub field: String,
    pub rule: MaskRule,
}

#[derive(Debug, Clone, Default)]
pub struct MaskProcessor {
    pub rules: Vec<MaskFieldRule>,
}

impl MaskProcessor {
    pub fn apply(&self, schema: &Schema, rows: &mut [Vec<String>]) -> Result<()> {
        for rule in &self.rules {
            let idx = schema
                .field_index(&rule.field)
                .ok_or_else(|| TdtpError::validation(SUBSYSTEM, format!("mask rule references unknown field '{}'", rule.field)))?;
            for row in rows.iter_mut() {
                row[idx] = mask_value(&row[idx], rule.rule);
            }
        }
        Ok(())
    }
}

fn mask_value(raw: &str, rule: MaskRule) -> String {
    if raw.is_empty() {
        return raw.to_string();
    }
    match rule {
        MaskRule::Partial => mask_email_partial(raw),
        MaskRule::Middle => mask_phone_middle(raw),
        MaskRule::First2Last2 => mask_card_first2_last2(raw),
    }
}

fn mask_email_partial(raw: &str) -> String {
    match raw.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().unwrap_or_default();
            format!("{first}***@{domain}")
        }
        None => raw.to_string(),
    }
}

/// Expects `+<country>-<area>-<prefix>-<line>`, e.g. `+1-555-123-4567`.
/// Falls back to returning the input unchanged if it doesn't match that shape.
fn mask_phone_middle(raw: &str) -> String {
    let groups: Vec<&str> = raw.split('-').collect();
    if groups.len() != 4 || !groups[0].starts_with('+') {
        return raw.to_string();
    }
    let (country, area, prefix, line) = (groups[0], groups[1], groups[2], groups[3]);
    if line.len() < 2 {
        return raw.to_string();
    }
    let masked_prefix: String = "X".repeat(prefix.len());
    let masked_line = format!("X{}", &line[1..]);
    format!("{country} ({area}) {masked_prefix}-{masked_line}")
}

fn mask_card_first2_last2(raw: &str) -> String {
    let digits: Vec<char> = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let n = digits.len();
    if n < 4 {
        return raw.to_string();
    }
    let masked: Vec<char> = digits
        .iter()
        .enumerate()
        .map(|(i, &c)| if i < 2 || i >= n - 2 { c } else { '*' })
        .collect();
    masked.chunks(4).map(|chunk| chunk.iter().collect::<String>()).collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------
// Normalize
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseFold {
    Lower,
    Upper,
    Title,
}

#[derive(Debug, Clone)]
pub struct NormalizeFieldRule {
    pub field: String,
    pub trim: bool,
    pub case: Option<CaseFold>,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizeProcessor {
    pub rules: Vec<NormalizeFieldRule>,
}

impl NormalizeProcessor {
    pub fn apply(&self, schema: &Schema, rows: &mut [Vec<String>]) -> Result<()> {
        for rule in &self.rules {
            let idx = schema
                .field_index(&rule.field)
                .ok_or_else(|| TdtpError::validation(SUBSYSTEM, format!("normalize rule references unknown field '{}'", rule.field)))?;
            for row in rows.iter_mut() {
                let mut value = row[idx].clone();
                if rule.trim {
                    value = value.trim().to_string();
                }
                value = match rule.case {
                    Some(CaseFold::Lower) => value.to_lowercase(),
                    Some(CaseFold::Upper) => value.to_uppercase(),
                    Some(CaseFold::Title) => title_case(&value),
                    None => value,
                };
                row[idx] = value;
            }
        }
        Ok(())
    }
}

fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ValidateProcessor {
    pub safe_mode: bool,
}

impl ValidateProcessor {
    /// Checks every row decodes cleanly against `schema` and, if safe mode
    /// is on, that `sql` (when present) passes the safe-mode gate.
    pub fn apply(&self, schema: &Schema, rows: &[Vec<String>], sql: Option<&str>) -> Result<()> {
        for (row_idx, row) in rows.iter().enumerate() {
            for (field_idx, field) in schema.fields.iter().enumerate() {
                let ty = field.normalized_type()?;
                tdtp_core::value::Converter::parse(&row[field_idx], ty, field.precision, field.scale).map_err(|e| {
                    TdtpError::validation(SUBSYSTEM, format!("row {row_idx} field '{}': {e}", field.name))
                })?;
            }
        }
        if self.safe_mode {
            if let Some(sql) = sql {
                tdtp_ops::validate_safe_sql(sql)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Checksum
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgo {
    Crc32,
    Sha256,
}

#[derive(Debug, Clone, Copy)]
pub struct ChecksumProcessor {
    pub algo: ChecksumAlgo,
}

impl ChecksumProcessor {
    /// Computes one digest over all rows' encoded content, in row order.
    pub fn digest(&self, rows: &[String]) -> String {
        let joined = rows.join("\n");
        match self.algo {
            ChecksumAlgo::Crc32 => format!("{:08x}", crc32fast::hash(joined.as_bytes())),
            ChecksumAlgo::Sha256 => {
                use sha2::{Digest, Sha256};
                let mut hasher = Sha256::new();
                hasher.update(joined.as_bytes());
                format!("{:x}", hasher.finalize())
            }
        }
    }
}

// ---------------------------------------------------------------------
// Compress
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct CompressProcessor;

impl CompressProcessor {
    /// Gzips the joined encoded rows and base64-encodes the result into a
    /// single-row `Data` block, per §3.1's "compressed-then-base64" layout.
    pub fn compress(&self, rows: &[String]) -> Result<Data> {
        let joined = rows.join("\n");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(joined.as_bytes())
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("gzip compression failed: {e}")))?;
        let compressed = encoder
            .finish()
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("gzip compression failed: {e}")))?;
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, compressed);
        Ok(Data { rows: vec![encoded], compression: Some("gzip".to_string()) })
    }

    pub fn decompress(&self, data: &Data) -> Result<Vec<String>> {
        if data.compression.as_deref() != Some("gzip") {
            return Err(TdtpError::validation(SUBSYSTEM, "data block is not gzip-compressed"));
        }
        let row = data
            .rows
            .first()
            .ok_or_else(|| TdtpError::validation(SUBSYSTEM, "compressed data block has no rows"))?;
        let compressed = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, row)
            .map_err(|e| TdtpError::validation(SUBSYSTEM, format!("invalid base64 in compressed block: {e}")))?;
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut joined = String::new();
        decoder
            .read_to_string(&mut joined)
            .map_err(|e| TdtpError::validation(SUBSYSTEM, format!("gzip decompression failed: {e}")))?;
        Ok(joined.split('\n').map(|s| s.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdtp_core::field::Field;
    use tdtp_core::value::TdtpType;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", TdtpType::Integer).with_key(true),
            Field::new("name", TdtpType::Text),
            Field::new("email", TdtpType::Text),
            Field::new("phone", TdtpType::Text),
            Field::new("card", TdtpType::Text),
        ])
        .unwrap()
    }

    #[test]
    fn masking_matches_the_exact_scenario_literal() {
        let schema = schema();
        let mut rows = vec![vec![
            "1".to_string(),
            "John Doe".to_string(),
            "john.doe@example.com".to_string(),
            "+1-555-123-4567".to_string(),
            "4532-1234-5678-9010".to_string(),
        ]];
        let processor = MaskProcessor {
            rules: vec![
                MaskFieldRule { field: "email".to_string(), rule: MaskRule::Partial },
                MaskFieldRule { field: "phone".to_string(), rule: MaskRule::Middle },
                MaskFieldRule { field: "card".to_string(), rule: MaskRule::First2Last2 },
            ],
        };
        processor.apply(&schema, &mut rows).unwrap();
        assert_eq!(rows[0][2], "j***@example.com");
        assert_eq!(rows[0][3], "+1 (555) XXX-X567");
        assert_eq!(rows[0][4], "45** **** **** **10");
    }

    #[test]
    fn compress_round_trips() {
        let processor = CompressProcessor;
        let rows = vec!["1|John".to_string(), "2|Jane".to_string()];
        let data = processor.compress(&rows).unwrap();
        assert_eq!(data.rows.len(), 1);
        let restored = processor.decompress(&data).unwrap();
        assert_eq!(restored, rows);
    }

    #[test]
    fn checksum_is_stable_for_identical_input() {
        let processor = ChecksumProcessor { algo: ChecksumAlgo::Sha256 };
        let rows = vec!["1|John".to_string()];
        assert_eq!(processor.digest(&rows), processor.digest(&rows));
    }

    #[test]
    fn normalize_trims_and_lowercases() {
        let schema = schema();
        let mut rows = vec![vec![
            "1".to_string(),
            "  JOHN DOE  ".to_string(),
            "x@y.com".to_string(),
            "p".to_string(),
            "c".to_string(),
        ]];
        let processor = NormalizeProcessor {
            rules: vec![NormalizeFieldRule { field: "name".to_string(), trim: true, case: Some(CaseFold::Title) }],
        };
        processor.apply(&schema, &mut rows).unwrap();
        assert_eq!(rows[0][1], "John Doe");
    }
}
