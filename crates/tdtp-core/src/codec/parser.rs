//! Parses the canonical XML wire form back into a [`DataPacket`] (§4.1).
//!
//! Failures name the offending part/row where possible, per the parser's
//! failure model: malformed XML, schema/row arity mismatch, and illegal
//! escapes are all surfaced as [`crate::error::TdtpError::Validation`].

use crate::error::{Result, TdtpError};
use crate::field::{Field, Schema};
use crate::header::{Header, PacketType};
use crate::packet::{Data, DataPacket};
use crate::query::{ExecutionResults, Filter, FilterNode, Operator, OrderBy, Query, QueryContext, SortDirection};
use chrono::DateTime;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::HashMap;
use uuid::Uuid;

type Attrs = HashMap<String, String>;

fn err(message: impl Into<String>) -> TdtpError {
    TdtpError::validation("codec", message.into())
}

fn read_attrs(tag: &BytesStart) -> Result<Attrs> {
    let mut map = HashMap::new();
    for attr in tag.attributes() {
        let attr = attr.map_err(|e| err(format!("bad attribute: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| err(format!("bad attribute value: {e}")))?
            .to_string();
        map.insert(key, value);
    }
    Ok(map)
}

fn required<'a>(attrs: &'a Attrs, key: &str, context: &str) -> Result<&'a str> {
    attrs
        .get(key)
        .map(|s| s.as_str())
        .ok_or_else(|| err(format!("{context}: missing required attribute '{key}'")))
}

/// Parse a packet from an XML byte buffer (also accepts `&str`).
pub fn from_xml(xml: &str) -> Result<DataPacket> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| err(format!("xml parse error: {e}")))? {
            Event::Start(ref tag) if tag.local_name().as_ref() == b"DataPacket" => {
                return parse_packet(&mut reader, tag);
            }
            Event::Eof => return Err(err("xml ended before a DataPacket element was found")),
            _ => {}
        }
        buf.clear();
    }
}

fn parse_packet(reader: &mut Reader<&[u8]>, root: &BytesStart) -> Result<DataPacket> {
    let attrs = read_attrs(root)?;
    let protocol = required(&attrs, "protocol", "DataPacket")?.to_string();
    let version = required(&attrs, "version", "DataPacket")?.to_string();
    let uuid = match attrs.get("uuid") {
        Some(s) => Uuid::parse_str(s).map_err(|e| err(format!("invalid packet uuid: {e}")))?,
        None => Uuid::new_v4(),
    };

    let mut header: Option<Header> = None;
    let mut schema: Option<Schema> = None;
    let mut data = Data::default();
    let mut query: Option<Query> = None;
    let mut query_context: Option<QueryContext> = None;

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| err(format!("xml parse error: {e}")))? {
            Event::Empty(tag) if tag.local_name().as_ref() == b"Data" => {
                let attrs = read_attrs(&tag)?;
                data = Data { rows: Vec::new(), compression: attrs.get("compression").cloned() };
            }
            Event::Start(tag) | Event::Empty(tag) => {
                let name = tag.local_name().as_ref().to_vec();
                match name.as_slice() {
                    b"Header" => header = Some(parse_header(&tag)?),
                    b"Schema" => schema = Some(parse_schema(reader)?),
                    b"Data" => data = parse_data(reader, &tag)?,
                    b"Query" => query = Some(parse_query(reader, &tag, "Query")?),
                    b"QueryContext" => query_context = Some(parse_query_context(reader)?),
                    other => {
                        return Err(err(format!(
                            "unexpected element '{}' inside DataPacket",
                            String::from_utf8_lossy(other)
                        )))
                    }
                }
            }
            Event::End(tag) if tag.local_name().as_ref() == b"DataPacket" => break,
            Event::Eof => return Err(err("xml ended inside DataPacket")),
            _ => {}
        }
        buf.clear();
    }

    let header = header.ok_or_else(|| err("DataPacket missing Header"))?;
    let schema = schema.ok_or_else(|| err("DataPacket missing Schema"))?;

    let packet = DataPacket { protocol, version, header, schema, data, query, query_context, uuid };
    packet.validate_structure()?;
    Ok(packet)
}

fn parse_header(tag: &BytesStart) -> Result<Header> {
    let attrs = read_attrs(tag)?;
    let type_str = required(&attrs, "type", "Header")?;
    let packet_type = PacketType::parse(type_str)
        .ok_or_else(|| err(format!("Header: unknown type '{type_str}'")))?;
    let table_name = required(&attrs, "tableName", "Header")?.to_string();
    let message_id = required(&attrs, "messageId", "Header")?.to_string();
    let in_reply_to = attrs.get("inReplyTo").cloned();
    let part_number: u32 = required(&attrs, "partNumber", "Header")?
        .parse()
        .map_err(|_| err("Header: partNumber is not a valid integer"))?;
    let total_parts: u32 = required(&attrs, "totalParts", "Header")?
        .parse()
        .map_err(|_| err("Header: totalParts is not a valid integer"))?;
    let records_in_part: u32 = required(&attrs, "recordsInPart", "Header")?
        .parse()
        .map_err(|_| err("Header: recordsInPart is not a valid integer"))?;
    let timestamp = DateTime::parse_from_rfc3339(required(&attrs, "timestamp", "Header")?)
        .map_err(|e| err(format!("Header: invalid timestamp: {e}")))?
        .with_timezone(&chrono::Utc);
    let sender = attrs.get("sender").cloned();
    let recipient = attrs.get("recipient").cloned();

    let header = Header {
        packet_type,
        table_name,
        message_id,
        in_reply_to,
        part_number,
        total_parts,
        records_in_part,
        timestamp,
        sender,
        recipient,
    };
    header.validate().map_err(err)?;
    Ok(header)
}

fn parse_schema(reader: &mut Reader<&[u8]>) -> Result<Schema> {
    let mut fields = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| err(format!("xml parse error: {e}")))? {
            Event::Start(tag) | Event::Empty(tag) if tag.local_name().as_ref() == b"Field" => {
                fields.push(parse_field(&tag)?);
            }
            Event::End(tag) if tag.local_name().as_ref() == b"Schema" => break,
            Event::Eof => return Err(err("xml ended inside Schema")),
            _ => {}
        }
        buf.clear();
    }
    Schema::new(fields)
}

fn parse_field(tag: &BytesStart) -> Result<Field> {
    let attrs = read_attrs(tag)?;
    let name = required(&attrs, "name", "Field")?.to_string();
    let type_name = required(&attrs, "type", "Field")?.to_string();
    let length = attrs.get("length").map(|s| s.parse::<i64>()).transpose().map_err(|_| err("Field: invalid length"))?;
    let precision = attrs.get("precision").map(|s| s.parse::<u32>()).transpose().map_err(|_| err("Field: invalid precision"))?;
    let scale = attrs.get("scale").map(|s| s.parse::<u32>()).transpose().map_err(|_| err("Field: invalid scale"))?;
    let timezone = attrs.get("timezone").cloned();
    let key = attrs.get("key").map(|s| s == "true").unwrap_or(false);
    Ok(Field { name, type_name, length, precision, scale, timezone, key })
}

fn parse_data(reader: &mut Reader<&[u8]>, open_tag: &BytesStart) -> Result<Data> {
    let attrs = read_attrs(open_tag)?;
    let compression = attrs.get("compression").cloned();

    let mut rows = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| err(format!("xml parse error: {e}")))? {
            Event::Start(tag) if tag.local_name().as_ref() == b"R" => {
                let text = read_element_text(reader)?;
                rows.push(text);
            }
            Event::Empty(tag) if tag.local_name().as_ref() == b"R" => {
                rows.push(String::new());
            }
            Event::End(tag) if tag.local_name().as_ref() == b"Data" => break,
            Event::Eof => return Err(err("xml ended inside Data")),
            _ => {}
        }
        buf.clear();
    }
    Ok(Data { rows, compression })
}

fn read_element_text(reader: &mut Reader<&[u8]>) -> Result<String> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| err(format!("xml parse error: {e}")))? {
            Event::Text(t) => {
                text.push_str(&t.unescape().map_err(|e| err(format!("bad text content: {e}")))?);
            }
            Event::End(_) => break,
            Event::Eof => return Err(err("xml ended inside an element's text content")),
            _ => {}
        }
        buf.clear();
    }
    Ok(text)
}

fn parse_query(reader: &mut Reader<&[u8]>, open_tag: &BytesStart, closing_name: &str) -> Result<Query> {
    let attrs = read_attrs(open_tag)?;
    let language = required(&attrs, "language", "Query")?.to_string();
    let limit = attrs.get("limit").map(|s| s.parse::<u64>()).transpose().map_err(|_| err("Query: invalid limit"))?.unwrap_or(0);
    let offset = attrs.get("offset").map(|s| s.parse::<u64>()).transpose().map_err(|_| err("Query: invalid offset"))?.unwrap_or(0);

    let mut filters = None;
    let mut order_by = Vec::new();
    let closing = closing_name.as_bytes().to_vec();

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| err(format!("xml parse error: {e}")))? {
            Event::Start(tag) if tag.local_name().as_ref() == b"Filters" => {
                filters = Some(parse_filters_container(reader)?);
            }
            Event::Start(tag) | Event::Empty(tag) if tag.local_name().as_ref() == b"OrderBy" => {
                order_by.push(parse_order_by(&tag)?);
            }
            Event::End(tag) if tag.local_name().as_ref() == closing.as_slice() => break,
            Event::Eof => return Err(err("xml ended inside Query")),
            _ => {}
        }
        buf.clear();
    }

    Ok(Query { language, filters, order_by, limit, offset })
}

fn parse_order_by(tag: &BytesStart) -> Result<OrderBy> {
    let attrs = read_attrs(tag)?;
    let field = required(&attrs, "field", "OrderBy")?.to_string();
    let direction_str = required(&attrs, "direction", "OrderBy")?;
    let direction = match direction_str.to_ascii_uppercase().as_str() {
        "ASC" => SortDirection::Asc,
        "DESC" => SortDirection::Desc,
        other => return Err(err(format!("OrderBy: unknown direction '{other}'"))),
    };
    Ok(OrderBy { field, direction })
}

/// Parses the contents of the `<Filters>` wrapper: exactly one child node
/// (a `Filter`, `And`, or `Or`) which is the tree root.
fn parse_filters_container(reader: &mut Reader<&[u8]>) -> Result<FilterNode> {
    let mut root: Option<FilterNode> = None;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| err(format!("xml parse error: {e}")))? {
            Event::Start(tag) if tag.local_name().as_ref() == b"And" => {
                root = Some(FilterNode::And(parse_filter_children(reader, "And")?));
            }
            Event::Start(tag) if tag.local_name().as_ref() == b"Or" => {
                root = Some(FilterNode::Or(parse_filter_children(reader, "Or")?));
            }
            Event::Start(tag) | Event::Empty(tag) if tag.local_name().as_ref() == b"Filter" => {
                root = Some(FilterNode::Leaf(parse_filter(&tag)?));
            }
            Event::End(tag) if tag.local_name().as_ref() == b"Filters" => break,
            Event::Eof => return Err(err("xml ended inside Filters")),
            _ => {}
        }
        buf.clear();
    }
    root.ok_or_else(|| err("Filters element had no filter tree"))
}

fn parse_filter_children(reader: &mut Reader<&[u8]>, closing: &str) -> Result<Vec<FilterNode>> {
    let mut children = Vec::new();
    let mut buf = Vec::new();
    let closing_bytes = closing.as_bytes();
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| err(format!("xml parse error: {e}")))? {
            Event::Start(tag) if tag.local_name().as_ref() == b"And" => {
                children.push(FilterNode::And(parse_filter_children(reader, "And")?));
            }
            Event::Start(tag) if tag.local_name().as_ref() == b"Or" => {
                children.push(FilterNode::Or(parse_filter_children(reader, "Or")?));
            }
            Event::Start(tag) | Event::Empty(tag) if tag.local_name().as_ref() == b"Filter" => {
                children.push(FilterNode::Leaf(parse_filter(&tag)?));
            }
            Event::End(tag) if tag.local_name().as_ref() == closing_bytes => break,
            Event::Eof => return Err(err(format!("xml ended inside {closing}"))),
            _ => {}
        }
        buf.clear();
    }
    Ok(children)
}

fn parse_filter(tag: &BytesStart) -> Result<Filter> {
    let attrs = read_attrs(tag)?;
    let field = required(&attrs, "field", "Filter")?.to_string();
    let operator_str = required(&attrs, "operator", "Filter")?;
    let operator = match operator_str {
        "eq" => Operator::Eq,
        "ne" => Operator::Ne,
        "lt" => Operator::Lt,
        "le" => Operator::Le,
        "gt" => Operator::Gt,
        "ge" => Operator::Ge,
        "in" => Operator::In,
        "not_in" => Operator::NotIn,
        "between" => Operator::Between,
        "like" => Operator::Like,
        "is_null" => Operator::IsNull,
        "is_not_null" => Operator::IsNotNull,
        other => return Err(err(format!("Filter: unknown operator '{other}'"))),
    };
    let value = attrs.get("value").cloned();
    let values = attrs.get("values").map(|s| s.split(',').map(|v| v.to_string()).collect());
    let low = attrs.get("low").cloned();
    let high = attrs.get("high").cloned();
    Ok(Filter { field, operator, value, values, low, high })
}

fn parse_query_context(reader: &mut Reader<&[u8]>) -> Result<QueryContext> {
    let mut original_query = None;
    let mut execution_results = None;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| err(format!("xml parse error: {e}")))? {
            Event::Start(tag) if tag.local_name().as_ref() == b"OriginalQuery" => {
                original_query = Some(parse_query(reader, &tag, "OriginalQuery")?);
            }
            Event::Start(tag) | Event::Empty(tag) if tag.local_name().as_ref() == b"ExecutionResults" => {
                execution_results = Some(parse_execution_results(&tag)?);
            }
            Event::End(tag) if tag.local_name().as_ref() == b"QueryContext" => break,
            Event::Eof => return Err(err("xml ended inside QueryContext")),
            _ => {}
        }
        buf.clear();
    }
    Ok(QueryContext {
        original_query: original_query.ok_or_else(|| err("QueryContext missing OriginalQuery"))?,
        execution_results: execution_results.ok_or_else(|| err("QueryContext missing ExecutionResults"))?,
    })
}

fn parse_execution_results(tag: &BytesStart) -> Result<ExecutionResults> {
    let attrs = read_attrs(tag)?;
    let parse_u64 = |key: &str| -> Result<u64> {
        required(&attrs, key, "ExecutionResults")?
            .parse()
            .map_err(|_| err(format!("ExecutionResults: invalid {key}")))
    };
    Ok(ExecutionResults {
        total_records_in_table: parse_u64("totalRecordsInTable")?,
        records_after_filters: parse_u64("recordsAfterFilters")?,
        records_returned: parse_u64("recordsReturned")?,
        more_data_available: required(&attrs, "moreDataAvailable", "ExecutionResults")? == "true",
        next_offset: parse_u64("nextOffset")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::generator::to_xml;
    use crate::field::Field;
    use crate::header::Header;
    use crate::packet::Generator;
    use crate::value::TdtpType;

    fn sample_packet() -> DataPacket {
        let schema = Schema::new(vec![
            Field::new("id", TdtpType::Integer).with_key(true),
            Field::new("name", TdtpType::Text),
        ])
        .unwrap();
        let rows = vec!["1|John".to_string(), "2|Ja\\|ne".to_string()];
        let gen = Generator::new(100);
        gen.generate_reference("users", &schema, &rows).unwrap().remove(0)
    }

    #[test]
    fn round_trips_indented_and_compact_identically() {
        let packet = sample_packet();
        let compact = to_xml(&packet, false).unwrap();
        let pretty = to_xml(&packet, true).unwrap();
        let parsed_compact = from_xml(&compact).unwrap();
        let parsed_pretty = from_xml(&pretty).unwrap();
        assert_eq!(parsed_compact.data.rows, parsed_pretty.data.rows);
        assert_eq!(parsed_compact.header.message_id, parsed_pretty.header.message_id);
        assert_eq!(parsed_compact.schema.fields.len(), parsed_pretty.schema.fields.len());
    }

    #[test]
    fn round_trips_rows_bit_for_bit() {
        let packet = sample_packet();
        let xml = to_xml(&packet, true).unwrap();
        let parsed = from_xml(&xml).unwrap();
        assert_eq!(parsed.data.rows, packet.data.rows);
        assert_eq!(parsed.header.part_number, packet.header.part_number);
        assert_eq!(parsed.header.total_parts, packet.header.total_parts);
    }

    #[test]
    fn rejects_unknown_header_type() {
        let xml = r#"<DataPacket protocol="TDTP" version="1.0"><Header type="bogus" tableName="t" messageId="m" partNumber="1" totalParts="1" recordsInPart="0" timestamp="2024-01-01T00:00:00Z"/><Schema><Field name="id" type="INTEGER"/></Schema><Data/></DataPacket>"#;
        assert!(from_xml(xml).is_err());
    }

    #[test]
    fn rejects_records_in_part_mismatch() {
        let xml = r#"<DataPacket protocol="TDTP" version="1.0"><Header type="reference" tableName="t" messageId="m" partNumber="1" totalParts="1" recordsInPart="5" timestamp="2024-01-01T00:00:00Z"/><Schema><Field name="id" type="INTEGER"/></Schema><Data><R>1</R></Data></DataPacket>"#;
        assert!(from_xml(xml).is_err());
    }

    #[test]
    fn parses_query_with_nested_and_or() {
        let header = Header {
            packet_type: PacketType::Request,
            table_name: "users".into(),
            message_id: "m1".into(),
            in_reply_to: None,
            part_number: 1,
            total_parts: 1,
            records_in_part: 0,
            timestamp: chrono::Utc::now(),
            sender: None,
            recipient: None,
        };
        let schema = Schema::new(vec![Field::new("id", TdtpType::Integer)]).unwrap();
        let query = Query {
            language: "tdtql".into(),
            filters: Some(FilterNode::And(vec![
                FilterNode::Leaf(Filter {
                    field: "IsActive".into(),
                    operator: Operator::Eq,
                    value: Some("1".into()),
                    values: None,
                    low: None,
                    high: None,
                }),
                FilterNode::Or(vec![
                    FilterNode::Leaf(Filter {
                        field: "Balance".into(),
                        operator: Operator::Gt,
                        value: Some("1000".into()),
                        values: None,
                        low: None,
                        high: None,
                    }),
                ]),
            ])),
            order_by: vec![OrderBy { field: "Balance".into(), direction: SortDirection::Desc }],
            limit: 2,
            offset: 0,
        };
        let packet = DataPacket {
            protocol: "TDTP".into(),
            version: "1.0".into(),
            header,
            schema,
            data: Data::default(),
            query: Some(query),
            query_context: None,
            uuid: Uuid::new_v4(),
        };
        let xml = to_xml(&packet, false).unwrap();
        let parsed = from_xml(&xml).unwrap();
        match parsed.query.unwrap().filters.unwrap() {
            FilterNode::And(children) => assert_eq!(children.len(), 2),
            _ => panic!("expected And root"),
        }
    }
}
