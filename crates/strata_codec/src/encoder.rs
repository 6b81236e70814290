//! Canonical CBOR encoder.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use ciborium::value::{Integer, Value as CborValue};

/// Encodes a value to canonical CBOR bytes.
///
/// Map entries are re-sorted during encoding, so maps built without
/// [`Value::map`] still encode deterministically.
///
/// # Errors
///
/// Returns an error if the underlying writer fails.
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(&to_cbor_value(value), &mut buf)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Infallible encoding used for key ordering.
pub(crate) fn encode_value(value: &Value) -> Vec<u8> {
    to_canonical_cbor(value).unwrap_or_default()
}

fn to_cbor_value(value: &Value) -> CborValue {
    match value {
        Value::Null => CborValue::Null,
        Value::Bool(b) => CborValue::Bool(*b),
        Value::Integer(n) => CborValue::Integer(Integer::from(*n)),
        Value::Bytes(b) => CborValue::Bytes(b.clone()),
        Value::Text(s) => CborValue::Text(s.clone()),
        Value::Array(items) => CborValue::Array(items.iter().map(to_cbor_value).collect()),
        Value::Map(pairs) => {
            let mut sorted: Vec<&(Value, Value)> = pairs.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp_canonical(&b.0));
            CborValue::Map(
                sorted
                    .into_iter()
                    .map(|(k, v)| (to_cbor_value(k), to_cbor_value(v)))
                    .collect(),
            )
        }
    }
}
