//! Packet header: routing, chunking, and correlation metadata (§3.1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketType {
    Reference,
    Request,
    Response,
    Error,
}

impl PacketType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "reference" => Some(PacketType::Reference),
            "request" => Some(PacketType::Request),
            "response" => Some(PacketType::Response),
            "error" => Some(PacketType::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PacketType::Reference => "reference",
            PacketType::Request => "request",
            PacketType::Response => "response",
            PacketType::Error => "error",
        }
    }
}

/// Chunking + routing metadata. `partNumber`/`totalParts`/`recordsInPart`
/// describe this packet's position within a multi-part emission sharing
/// `messageId`; `inReplyTo` correlates a `response` back to its `request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "type")]
    pub packet_type: PacketType,
    pub table_name: String,
    pub message_id: String,
    #[serde(default)]
    pub in_reply_to: Option<String>,
    pub part_number: u32,
    pub total_parts: u32,
    pub records_in_part: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub recipient: Option<String>,
}

impl Header {
    pub fn validate(&self) -> Result<(), String> {
        if self.total_parts == 0 {
            return Err("totalParts must be >= 1".to_string());
        }
        if self.part_number < 1 || self.part_number > self.total_parts {
            return Err(format!(
                "partNumber {} out of range [1, {}]",
                self.part_number, self.total_parts
            ));
        }
        Ok(())
    }
}
