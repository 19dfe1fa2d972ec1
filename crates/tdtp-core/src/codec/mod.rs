//! XML wire codec for [`crate::packet::DataPacket`] (§6: `DataPacket[@protocol="TDTP"
//! @version="1.0"]`, `Header`, `Schema/Field`, `Data/R`, `Query`, `QueryContext`).

pub mod generator;
pub mod parser;

pub use generator::to_xml;
pub use parser::from_xml;
