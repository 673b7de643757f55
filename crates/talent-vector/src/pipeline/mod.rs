//! Streaming JSONL import and export
//!
//! Each line of an interchange file is one record:
//! `{"id": "...", "embedding": [..], "metadata": {..}}`.
//! Export pages through a collection; import replays a file through the
//! bulk writer after an ID-sampling idempotency check.

mod export;
mod import;

pub use export::{export_collection, ExportOptions, ExportReport};
pub use import::{
    import_collection, sample_ids, should_skip_import, ImportOptions, ImportReport,
};

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{VectorError, VectorResult};
use crate::types::{Metadata, Record};

/// One line of an interchange file
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParsedLine {
    Blank,
    /// Not valid JSON; skipped by import
    Unparsable(String),
    Record(Record),
}

/// Record ID as written in a file; numbers are accepted and stringified
pub(crate) fn extract_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Read the next line into `buf` and decode it.
///
/// Returns `None` at end of file. A line that is not valid UTF-8 comes back
/// as `Some(Err(reason))` so callers can skip it instead of failing the file.
pub(crate) async fn next_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> VectorResult<Option<Result<String, String>>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(
        std::str::from_utf8(buf)
            .map(str::to_owned)
            .map_err(|err| err.to_string()),
    ))
}

/// Parse a line. Missing or mistyped core fields are fatal.
pub(crate) fn parse_line(line: &str, line_no: usize) -> VectorResult<ParsedLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(ParsedLine::Blank);
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(err) => return Ok(ParsedLine::Unparsable(err.to_string())),
    };
    let Value::Object(mut object) = value else {
        return Err(VectorError::malformed(line_no, "expected a JSON object"));
    };

    let id = match object.get("id") {
        None => return Err(VectorError::malformed(line_no, "missing id")),
        Some(raw) => extract_id(raw)
            .ok_or_else(|| VectorError::malformed(line_no, "id must be a string or number"))?,
    };

    let embedding = match object.remove("embedding") {
        Some(Value::Array(values)) => values
            .iter()
            .map(|v| {
                let x = v.as_f64().ok_or_else(|| {
                    VectorError::malformed(line_no, "embedding must contain only numbers")
                })?;
                let narrowed = x as f32;
                if narrowed.is_finite() {
                    Ok(narrowed)
                } else {
                    Err(VectorError::malformed(
                        line_no,
                        format!("embedding value {x} is outside the f32 range"),
                    ))
                }
            })
            .collect::<VectorResult<Vec<f32>>>()?,
        Some(_) => return Err(VectorError::malformed(line_no, "embedding must be an array")),
        None => return Err(VectorError::malformed(line_no, "missing embedding")),
    };

    let metadata = match object.remove("metadata") {
        None | Some(Value::Null) => Metadata::new(),
        Some(Value::Object(metadata)) => metadata,
        Some(_) => return Err(VectorError::malformed(line_no, "metadata must be an object")),
    };

    Ok(ParsedLine::Record(Record::with_metadata(id, embedding, metadata)))
}

/// Serialize a record as one JSONL line, newline included
pub(crate) fn encode_line(record: &Record) -> VectorResult<String> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    Ok(line)
}
