//! `tdtp-core` — the neutral wire model shared by every other TDTP crate:
//! typed values, fields/schemas, packet headers, the XML codec, and the
//! TDTQL query AST (§3, §4.1, §6).

pub mod codec;
pub mod error;
pub mod field;
pub mod header;
pub mod packet;
pub mod query;
pub mod row;
pub mod value;

pub use codec::{from_xml, to_xml};
pub use error::{ErrorCode, Result, TdtpError};
pub use field::{Field, Schema};
pub use header::{Header, PacketType};
pub use packet::{build_row, plan_chunks, Data, DataPacket, Generator, PROTOCOL_TAG, PROTOCOL_VERSION};
pub use query::{ExecutionResults, Filter, FilterNode, Operator, OrderBy, Query, QueryContext, SortDirection};
pub use row::{encode_row, escape_field, format_row, split_row};
pub use value::{Converter, TdtpType, TypedValue, DEFAULT_DECIMAL_PRECISION, DEFAULT_DECIMAL_SCALE};
