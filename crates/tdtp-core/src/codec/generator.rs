//! Serializes a [`DataPacket`] to its canonical XML wire form.

use crate::header::PacketType;
use crate::packet::DataPacket;
use crate::query::{ExecutionResults, Filter, FilterNode, Operator, OrderBy, Query, QueryContext, SortDirection};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;
use std::io::Cursor;

/// Serialize a packet to XML. `indent` controls pretty-printing only; the
/// decoded semantic content is identical either way (§4.1).
pub fn to_xml(packet: &DataPacket, indent: bool) -> crate::error::Result<String> {
    let mut buf = Vec::new();
    {
        let mut writer = if indent {
            Writer::new_with_indent(Cursor::new(&mut buf), b' ', 2)
        } else {
            Writer::new(Cursor::new(&mut buf))
        };
        write_packet(&mut writer, packet).map_err(xml_err)?;
    }
    String::from_utf8(buf).map_err(|e| crate::error::TdtpError::validation("codec", format!("non-utf8 xml output: {e}")))
}

fn xml_err(e: quick_xml::Error) -> crate::error::TdtpError {
    crate::error::TdtpError::validation("codec", format!("xml write error: {e}"))
}

fn write_packet<W: std::io::Write>(writer: &mut Writer<W>, packet: &DataPacket) -> quick_xml::Result<()> {
    let mut root = BytesStart::new("DataPacket");
    root.push_attribute(("protocol", packet.protocol.as_str()));
    root.push_attribute(("version", packet.version.as_str()));
    let uuid_str = packet.uuid.to_string();
    root.push_attribute(("uuid", uuid_str.as_str()));
    writer.write_event(Event::Start(root))?;

    write_header(writer, packet)?;
    write_schema(writer, packet)?;
    write_data(writer, packet)?;
    if let Some(q) = &packet.query {
        write_query(writer, "Query", q)?;
    }
    if let Some(qc) = &packet.query_context {
        write_query_context(writer, qc)?;
    }

    writer.write_event(Event::End(BytesEnd::new("DataPacket")))?;
    Ok(())
}

fn write_header<W: std::io::Write>(writer: &mut Writer<W>, packet: &DataPacket) -> quick_xml::Result<()> {
    let h = &packet.header;
    let mut el = BytesStart::new("Header");
    el.push_attribute(("type", packet_type_str(h.packet_type)));
    el.push_attribute(("tableName", h.table_name.as_str()));
    el.push_attribute(("messageId", h.message_id.as_str()));
    if let Some(ref r) = h.in_reply_to {
        el.push_attribute(("inReplyTo", r.as_str()));
    }
    let part_number = h.part_number.to_string();
    let total_parts = h.total_parts.to_string();
    let records_in_part = h.records_in_part.to_string();
    let timestamp = h.timestamp.to_rfc3339();
    el.push_attribute(("partNumber", part_number.as_str()));
    el.push_attribute(("totalParts", total_parts.as_str()));
    el.push_attribute(("recordsInPart", records_in_part.as_str()));
    el.push_attribute(("timestamp", timestamp.as_str()));
    if let Some(ref s) = h.sender {
        el.push_attribute(("sender", s.as_str()));
    }
    if let Some(ref r) = h.recipient {
        el.push_attribute(("recipient", r.as_str()));
    }
    writer.write_event(Event::Empty(el))?;
    Ok(())
}

fn packet_type_str(t: PacketType) -> &'static str {
    t.as_str()
}

fn write_schema<W: std::io::Write>(writer: &mut Writer<W>, packet: &DataPacket) -> quick_xml::Result<()> {
    writer.write_event(Event::Start(BytesStart::new("Schema")))?;
    for f in &packet.schema.fields {
        let mut el = BytesStart::new("Field");
        el.push_attribute(("name", f.name.as_str()));
        el.push_attribute(("type", f.type_name.as_str()));
        let length = f.length.map(|l| l.to_string());
        if let Some(ref l) = length {
            el.push_attribute(("length", l.as_str()));
        }
        let precision = f.precision.map(|p| p.to_string());
        if let Some(ref p) = precision {
            el.push_attribute(("precision", p.as_str()));
        }
        let scale = f.scale.map(|s| s.to_string());
        if let Some(ref s) = scale {
            el.push_attribute(("scale", s.as_str()));
        }
        if let Some(ref tz) = f.timezone {
            el.push_attribute(("timezone", tz.as_str()));
        }
        if f.key {
            el.push_attribute(("key", "true"));
        }
        writer.write_event(Event::Empty(el))?;
    }
    writer.write_event(Event::End(BytesEnd::new("Schema")))?;
    Ok(())
}

fn write_data<W: std::io::Write>(writer: &mut Writer<W>, packet: &DataPacket) -> quick_xml::Result<()> {
    let mut el = BytesStart::new("Data");
    if let Some(ref c) = packet.data.compression {
        el.push_attribute(("compression", c.as_str()));
    }
    writer.write_event(Event::Start(el))?;
    for row in &packet.data.rows {
        writer.write_event(Event::Start(BytesStart::new("R")))?;
        writer.write_event(Event::Text(BytesText::new(row)))?;
        writer.write_event(Event::End(BytesEnd::new("R")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("Data")))?;
    Ok(())
}

fn write_query<W: std::io::Write>(writer: &mut Writer<W>, tag: &str, q: &Query) -> quick_xml::Result<()> {
    let mut el = BytesStart::new(tag);
    el.push_attribute(("language", q.language.as_str()));
    let limit = q.limit.to_string();
    let offset = q.offset.to_string();
    el.push_attribute(("limit", limit.as_str()));
    el.push_attribute(("offset", offset.as_str()));
    writer.write_event(Event::Start(el))?;

    if let Some(ref filters) = q.filters {
        writer.write_event(Event::Start(BytesStart::new("Filters")))?;
        write_filter_node(writer, filters)?;
        writer.write_event(Event::End(BytesEnd::new("Filters")))?;
    }
    for ob in &q.order_by {
        write_order_by(writer, ob)?;
    }

    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn write_order_by<W: std::io::Write>(writer: &mut Writer<W>, ob: &OrderBy) -> quick_xml::Result<()> {
    let mut el = BytesStart::new("OrderBy");
    el.push_attribute(("field", ob.field.as_str()));
    el.push_attribute(("direction", direction_str(ob.direction)));
    writer.write_event(Event::Empty(el))?;
    Ok(())
}

fn direction_str(d: SortDirection) -> &'static str {
    match d {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    }
}

fn write_filter_node<W: std::io::Write>(writer: &mut Writer<W>, node: &FilterNode) -> quick_xml::Result<()> {
    match node {
        FilterNode::Leaf(f) => write_filter(writer, f),
        FilterNode::And(children) => {
            writer.write_event(Event::Start(BytesStart::new("And")))?;
            for c in children {
                write_filter_node(writer, c)?;
            }
            writer.write_event(Event::End(BytesEnd::new("And")))?;
            Ok(())
        }
        FilterNode::Or(children) => {
            writer.write_event(Event::Start(BytesStart::new("Or")))?;
            for c in children {
                write_filter_node(writer, c)?;
            }
            writer.write_event(Event::End(BytesEnd::new("Or")))?;
            Ok(())
        }
    }
}

fn write_filter<W: std::io::Write>(writer: &mut Writer<W>, f: &Filter) -> quick_xml::Result<()> {
    let mut el = BytesStart::new("Filter");
    el.push_attribute(("field", f.field.as_str()));
    el.push_attribute(("operator", operator_str(f.operator)));
    if let Some(ref v) = f.value {
        el.push_attribute(("value", v.as_str()));
    }
    let values_joined = f.values.as_ref().map(|vs| vs.join(","));
    if let Some(ref v) = values_joined {
        el.push_attribute(("values", v.as_str()));
    }
    if let Some(ref v) = f.low {
        el.push_attribute(("low", v.as_str()));
    }
    if let Some(ref v) = f.high {
        el.push_attribute(("high", v.as_str()));
    }
    writer.write_event(Event::Empty(el))?;
    Ok(())
}

fn operator_str(op: Operator) -> &'static str {
    match op {
        Operator::Eq => "eq",
        Operator::Ne => "ne",
        Operator::Lt => "lt",
        Operator::Le => "le",
        Operator::Gt => "gt",
        Operator::Ge => "ge",
        Operator::In => "in",
        Operator::NotIn => "not_in",
        Operator::Between => "between",
        Operator::Like => "like",
        Operator::IsNull => "is_null",
        Operator::IsNotNull => "is_not_null",
    }
}

fn write_query_context<W: std::io::Write>(writer: &mut Writer<W>, qc: &QueryContext) -> quick_xml::Result<()> {
    writer.write_event(Event::Start(BytesStart::new("QueryContext")))?;
    write_query(writer, "OriginalQuery", &qc.original_query)?;
    write_execution_results(writer, &qc.execution_results)?;
    writer.write_event(Event::End(BytesEnd::new("QueryContext")))?;
    Ok(())
}

fn write_execution_results<W: std::io::Write>(writer: &mut Writer<W>, er: &ExecutionResults) -> quick_xml::Result<()> {
    let mut el = BytesStart::new("ExecutionResults");
    let total = er.total_records_in_table.to_string();
    let after = er.records_after_filters.to_string();
    let returned = er.records_returned.to_string();
    let more = er.more_data_available.to_string();
    let next_offset = er.next_offset.to_string();
    el.push_attribute(("totalRecordsInTable", total.as_str()));
    el.push_attribute(("recordsAfterFilters", after.as_str()));
    el.push_attribute(("recordsReturned", returned.as_str()));
    el.push_attribute(("moreDataAvailable", more.as_str()));
    el.push_attribute(("nextOffset", next_offset.as_str()));
    writer.write_event(Event::Empty(el))?;
    Ok(())
}
