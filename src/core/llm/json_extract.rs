//! Embedded JSON extraction
//!
//! Models wrap JSON in prose or code fences. The extraction contract is a
//! small grammar over the raw text:
//!
//! ```text
//! raw    := prefix OPEN body CLOSE suffix
//! OPEN   := the first '{' or '[' in raw, whichever comes first
//! CLOSE  := the last occurrence in raw of the closer matching OPEN
//! ```
//!
//! Only `OPEN body CLOSE` is handed to the JSON parser. The region is
//! rejected when no opener exists, when no matching closer follows the
//! opener, or when the slice does not parse.

use super::error::MalformedResponse;
use serde_json::Value;

/// Kind of bracketed region found in the raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    Object,
    Array,
}

impl JsonShape {
    fn delimiters(self) -> (char, char) {
        match self {
            JsonShape::Object => ('{', '}'),
            JsonShape::Array => ('[', ']'),
        }
    }
}

/// Locate the bracketed region according to the extraction grammar.
///
/// Returns the byte range (inclusive start, exclusive end) and its shape.
pub fn locate_json_region(raw: &str) -> Option<(usize, usize, JsonShape)> {
    let first_brace = raw.find('{');
    let first_bracket = raw.find('[');

    let (start, shape) = match (first_brace, first_bracket) {
        (None, None) => return None,
        (Some(b), None) => (b, JsonShape::Object),
        (None, Some(k)) => (k, JsonShape::Array),
        (Some(b), Some(k)) if b < k => (b, JsonShape::Object),
        (Some(_), Some(k)) => (k, JsonShape::Array),
    };

    let (_, close) = shape.delimiters();
    let end = raw.rfind(close)?;
    if end <= start {
        return None;
    }
    Some((start, end + close.len_utf8(), shape))
}

/// Extract and parse the single JSON value embedded in `raw`.
pub fn extract_json(raw: &str) -> Result<Value, MalformedResponse> {
    let (start, end, _) = locate_json_region(raw)
        .ok_or_else(|| MalformedResponse::new("no balanced JSON object or array found", raw))?;

    serde_json::from_str(&raw[start..end])
        .map_err(|e| MalformedResponse::new(format!("embedded JSON failed to parse: {e}"), raw))
}

/// Extract a JSON value and require a specific shape.
pub fn extract_json_shaped(raw: &str, expected: JsonShape) -> Result<Value, MalformedResponse> {
    let value = extract_json(raw)?;
    let matches = match expected {
        JsonShape::Object => value.is_object(),
        JsonShape::Array => value.is_array(),
    };
    if matches {
        Ok(value)
    } else {
        Err(MalformedResponse::new(
            format!("expected a JSON {expected:?}, found a different value"),
            raw,
        ))
    }
}
