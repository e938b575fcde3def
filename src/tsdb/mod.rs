//! TSDB gateway
//!
//! Read/write adapter for the telemetry and command stores: SQL reads,
//! line-protocol writes, bounded retry with exponential backoff, and the
//! command wire encoding.

pub mod gateway;
pub mod line_protocol;

pub use gateway::{coalesce_rows, command_line, QueryResult, TsdbError, TsdbGateway, WriteResult};
pub use line_protocol::{format_line, parse_line, FieldValue, LineProtocolError, ParsedLine};
