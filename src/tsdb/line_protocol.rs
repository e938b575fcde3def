//! Line-protocol formatting and parsing
//!
//! The write side of the TSDB speaks InfluxDB-style line protocol:
//!
//! ```text
//! measurement,tag=value field=1.5,flag=t 1700000000000000000
//! ```
//!
//! Escaping rules: commas and spaces in measurements; commas, spaces, and
//! equals in tag keys/values and field keys; quotes and backslashes in
//! string field values. Integer fields carry an `i` suffix, booleans map
//! to `t`/`f`, floats are bare. The parser exists so formatted lines can
//! be verified round-trip.

use std::collections::BTreeMap;

/// A field value on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Bool(bool),
    Text(String),
    /// Pre-encoded token emitted verbatim. The command writer uses this
    /// for enable-style booleans, which the downstream contract wants as
    /// the words `true`/`false` rather than `t`/`f`.
    Literal(String),
}

/// Errors from [`parse_line`].
#[derive(Debug, thiserror::Error)]
pub enum LineProtocolError {
    #[error("Empty line")]
    Empty,
    #[error("Missing field set")]
    MissingFields,
    #[error("Malformed tag: {0}")]
    MalformedTag(String),
    #[error("Malformed field: {0}")]
    MalformedField(String),
    #[error("Malformed timestamp: {0}")]
    MalformedTimestamp(String),
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

fn escape_string_field(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn format_field_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Float(v) => {
            // Keep a decimal point so the store types the column float.
            if v.fract() == 0.0 && v.is_finite() && v.abs() < 1e15 {
                format!("{v:.1}")
            } else {
                format!("{v}")
            }
        }
        FieldValue::Integer(v) => format!("{v}i"),
        FieldValue::Bool(b) => (if *b { "t" } else { "f" }).to_string(),
        FieldValue::Text(s) => format!("\"{}\"", escape_string_field(s)),
        FieldValue::Literal(s) => s.clone(),
    }
}

/// Format one line-protocol record. Tags and fields iterate in key order,
/// so output is deterministic. `timestamp_ns` is epoch nanoseconds.
pub fn format_line(
    measurement: &str,
    tags: &BTreeMap<String, String>,
    fields: &BTreeMap<String, FieldValue>,
    timestamp_ns: i64,
) -> String {
    let mut line = escape_measurement(measurement);
    for (key, value) in tags {
        line.push(',');
        line.push_str(&escape_tag(key));
        line.push('=');
        line.push_str(&escape_tag(value));
    }
    line.push(' ');
    let mut first = true;
    for (key, value) in fields {
        if !first {
            line.push(',');
        }
        first = false;
        line.push_str(&escape_tag(key));
        line.push('=');
        line.push_str(&format_field_value(value));
    }
    line.push(' ');
    line.push_str(&timestamp_ns.to_string());
    line
}

/// A parsed line-protocol record.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp_ns: Option<i64>,
}

/// Split on a separator, honouring backslash escapes and double-quoted
/// runs (string field values contain unescaped separators). The separator
/// is consumed; escapes are left in place for `unescape`.
fn split_escaped(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    let mut in_quotes = false;
    for c in s.chars() {
        if escaped {
            current.push('\\');
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            in_quotes = !in_quotes;
            current.push(c);
        } else if c == sep && !in_quotes {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    if escaped {
        current.push('\\');
    }
    parts.push(current);
    parts
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else {
            out.push(c);
        }
    }
    if escaped {
        out.push('\\');
    }
    out
}

fn parse_field_value(raw: &str) -> Result<FieldValue, LineProtocolError> {
    if raw.starts_with('"') {
        if !raw.ends_with('"') || raw.len() < 2 {
            return Err(LineProtocolError::MalformedField(raw.to_string()));
        }
        let inner = &raw[1..raw.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut escaped = false;
        for c in inner.chars() {
            if escaped {
                out.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else {
                out.push(c);
            }
        }
        return Ok(FieldValue::Text(out));
    }
    match raw {
        "t" | "T" | "true" | "True" => return Ok(FieldValue::Bool(true)),
        "f" | "F" | "false" | "False" => return Ok(FieldValue::Bool(false)),
        _ => {}
    }
    if let Some(int_part) = raw.strip_suffix('i') {
        return int_part
            .parse::<i64>()
            .map(FieldValue::Integer)
            .map_err(|_| LineProtocolError::MalformedField(raw.to_string()));
    }
    raw.parse::<f64>()
        .map(FieldValue::Float)
        .map_err(|_| LineProtocolError::MalformedField(raw.to_string()))
}

/// Parse one line-protocol record.
pub fn parse_line(line: &str) -> Result<ParsedLine, LineProtocolError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(LineProtocolError::Empty);
    }

    // measurement+tags | fields | optional timestamp
    let sections = split_escaped(line, ' ');
    let sections: Vec<&String> = sections.iter().filter(|s| !s.is_empty()).collect();
    if sections.len() < 2 {
        return Err(LineProtocolError::MissingFields);
    }

    let head = split_escaped(sections[0], ',');
    let measurement = unescape(&head[0]);
    let mut tags = BTreeMap::new();
    for raw_tag in &head[1..] {
        let kv = split_escaped(raw_tag, '=');
        if kv.len() != 2 {
            return Err(LineProtocolError::MalformedTag(raw_tag.clone()));
        }
        tags.insert(unescape(&kv[0]), unescape(&kv[1]));
    }

    let mut fields = BTreeMap::new();
    for raw_field in split_escaped(sections[1], ',') {
        let kv = split_escaped(&raw_field, '=');
        if kv.len() != 2 {
            return Err(LineProtocolError::MalformedField(raw_field.clone()));
        }
        fields.insert(unescape(&kv[0]), parse_field_value(&kv[1])?);
    }
    if fields.is_empty() {
        return Err(LineProtocolError::MissingFields);
    }

    let timestamp_ns = if sections.len() >= 3 {
        Some(
            sections[2]
                .parse::<i64>()
                .map_err(|_| LineProtocolError::MalformedTimestamp(sections[2].clone()))?,
        )
    } else {
        None
    };

    Ok(ParsedLine {
        measurement,
        tags,
        fields,
        timestamp_ns,
    })
}
