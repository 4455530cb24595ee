//! Record-oriented codec stages
//!
//! NDJSON↔CSV conversion and schema-driven record coercion. NDJSON inputs
//! are processed record-by-record as chunks arrive; CSV inputs are buffered
//! before decoding because quoting permits embedded newlines.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use objmirror_common::{MirrorError, Result};

use crate::config::rule::{FieldKind, Schema};
use crate::split::RecordScanner;

use super::Codec;

fn schema_violation(reason: impl Into<String>) -> MirrorError {
    MirrorError::Schema {
        url: String::new(),
        reason: reason.into(),
    }
}

fn parse_record(record: &[u8]) -> Result<Option<Map<String, Value>>> {
    let text = std::str::from_utf8(record)
        .map_err(|_| schema_violation("record is not valid UTF-8"))?
        .trim_end_matches(['\n', '\r']);
    if text.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(other) => Err(schema_violation(format!(
            "record is not a JSON object: {}",
            other
        ))),
        Err(e) => Err(schema_violation(format!("invalid NDJSON record: {}", e))),
    }
}

fn csv_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        nested => nested.to_string(),
    }
}

fn write_csv_row(out: &mut Vec<u8>, fields: &[String]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(fields)
        .map_err(|e| MirrorError::codec(format!("csv write failed: {}", e)))?;
    let row = writer
        .into_inner()
        .map_err(|e| MirrorError::codec(format!("csv flush failed: {}", e)))?;
    out.extend(row);
    Ok(())
}

/// NDJSON → CSV conversion
///
/// The first record defines the column set (keys in sorted order); later
/// records contribute empty cells for missing keys and drop unknown ones.
#[derive(Default)]
pub struct NdjsonToCsvCodec {
    scanner: RecordScanner,
    header: Option<Vec<String>>,
}

impl NdjsonToCsvCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn convert(&mut self, record: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let Some(map) = parse_record(record)? else {
            return Ok(());
        };
        if self.header.is_none() {
            let header: Vec<String> = map.keys().cloned().collect();
            write_csv_row(out, &header)?;
            self.header = Some(header);
        }
        let header = self.header.as_ref().ok_or_else(|| {
            MirrorError::codec("csv header disappeared mid-stream")
        })?;
        let row: Vec<String> = header
            .iter()
            .map(|key| map.get(key).map(csv_field).unwrap_or_default())
            .collect();
        write_csv_row(out, &row)
    }
}

impl Codec for NdjsonToCsvCodec {
    fn transform(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for record in self.scanner.push(chunk) {
            self.convert(&record, &mut out)?;
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if let Some(record) = self.scanner.finish() {
            self.convert(&record, &mut out)?;
        }
        Ok(out)
    }
}

/// CSV → NDJSON conversion
///
/// Buffers the whole stream before decoding: CSV quoting permits embedded
/// newlines, so records cannot be cut at chunk boundaries. The first row is
/// the header; all values are emitted as JSON strings.
#[derive(Default)]
pub struct CsvToNdjsonCodec {
    buffer: Vec<u8>,
}

impl CsvToNdjsonCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Codec for CsvToNdjsonCodec {
    fn transform(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        Ok(Vec::new())
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        let buffer = std::mem::take(&mut self.buffer);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(buffer.as_slice());
        let headers = reader
            .headers()
            .map_err(|e| schema_violation(format!("invalid CSV header: {}", e)))?
            .clone();
        let mut out = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|e| schema_violation(format!("invalid CSV record: {}", e)))?;
            let mut map = Map::new();
            for (key, value) in headers.iter().zip(row.iter()) {
                map.insert(key.to_string(), Value::String(value.to_string()));
            }
            out.extend(serde_json::to_vec(&Value::Object(map))?);
            out.push(b'\n');
        }
        Ok(out)
    }
}

fn coerce(field: &str, kind: FieldKind, value: &Value) -> Result<Value> {
    let fail = |why: &str| {
        Err(schema_violation(format!(
            "field '{}' {}: got {}",
            field, why, value
        )))
    };
    match kind {
        FieldKind::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => fail("must be a string"),
        },
        FieldKind::Integer => match value {
            Value::Number(n) if n.as_i64().is_some() => Ok(value.clone()),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Ok(Value::from(f as i64)),
                _ => fail("must be an integer"),
            },
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(i) => Ok(Value::from(i)),
                Err(_) => fail("must be an integer"),
            },
            _ => fail("must be an integer"),
        },
        FieldKind::Float => match value {
            Value::Number(n) => match n.as_f64() {
                Some(f) => Ok(Value::from(f)),
                None => fail("must be a number"),
            },
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(f) => Ok(Value::from(f)),
                Err(_) => fail("must be a number"),
            },
            _ => fail("must be a number"),
        },
        FieldKind::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => fail("must be a boolean"),
            },
            _ => fail("must be a boolean"),
        },
        FieldKind::Timestamp => match value {
            Value::String(s) => match DateTime::parse_from_rfc3339(s) {
                Ok(ts) => Ok(Value::String(ts.with_timezone(&Utc).to_rfc3339())),
                Err(_) => fail("must be an RFC 3339 timestamp"),
            },
            Value::Number(n) => match n.as_i64().map(|secs| Utc.timestamp_opt(secs, 0)) {
                Some(chrono::LocalResult::Single(ts)) => Ok(Value::String(ts.to_rfc3339())),
                _ => fail("must be an epoch-seconds timestamp"),
            },
            _ => fail("must be a timestamp"),
        },
    }
}

/// Schema validation / coercion over NDJSON records
///
/// In rewrite mode records are re-emitted with exactly the schema's fields,
/// coerced to their declared types; in validate-only mode the original bytes
/// pass through untouched once they check out.
pub struct SchemaCodec {
    schema: Schema,
    rewrite: bool,
    scanner: RecordScanner,
}

impl SchemaCodec {
    pub fn new(schema: Schema, rewrite: bool) -> Self {
        Self {
            schema,
            rewrite,
            scanner: RecordScanner::new(),
        }
    }

    fn apply(&self, record: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let Some(map) = parse_record(record)? else {
            if !self.rewrite {
                out.extend_from_slice(record);
            }
            return Ok(());
        };
        let mut coerced = Map::new();
        for field in &self.schema.fields {
            let value = match map.get(&field.name) {
                Some(Value::Null) | None => {
                    return Err(schema_violation(format!(
                        "field '{}' is missing",
                        field.name
                    )));
                }
                Some(value) => coerce(&field.name, field.kind, value)?,
            };
            coerced.insert(field.name.clone(), value);
        }
        if self.rewrite {
            out.extend(serde_json::to_vec(&Value::Object(coerced))?);
            out.push(b'\n');
        } else {
            out.extend_from_slice(record);
        }
        Ok(())
    }
}

impl Codec for SchemaCodec {
    fn transform(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for record in self.scanner.push(chunk) {
            self.apply(&record, &mut out)?;
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if let Some(record) = self.scanner.finish() {
            self.apply(&record, &mut out)?;
        }
        Ok(out)
    }
}
