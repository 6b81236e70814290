//! CBOR decoder.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use ciborium::value::Value as CborValue;

/// Decodes CBOR bytes into a value.
///
/// # Errors
///
/// Returns an error for malformed input, floats, tags, or integers
/// outside the i64 range.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let raw: CborValue = ciborium::de::from_reader(bytes)
        .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    from_cbor_value(raw)
}

fn from_cbor_value(raw: CborValue) -> CodecResult<Value> {
    Ok(match raw {
        CborValue::Null => Value::Null,
        CborValue::Bool(b) => Value::Bool(b),
        CborValue::Integer(i) => {
            Value::Integer(i64::try_from(i).map_err(|_| CodecError::IntegerOverflow)?)
        }
        CborValue::Bytes(b) => Value::Bytes(b),
        CborValue::Text(s) => Value::Text(s),
        CborValue::Float(_) => return Err(CodecError::FloatForbidden),
        CborValue::Array(items) => Value::Array(
            items
                .into_iter()
                .map(from_cbor_value)
                .collect::<CodecResult<Vec<_>>>()?,
        ),
        CborValue::Map(pairs) => {
            let mut out = Vec::with_capacity(pairs.len());
            for (k, v) in pairs {
                out.push((from_cbor_value(k)?, from_cbor_value(v)?));
            }
            Value::map(out)
        }
        CborValue::Tag(tag, _) => {
            return Err(CodecError::unsupported_type(format!("tag {tag}")));
        }
        _ => return Err(CodecError::unsupported_type("unknown")),
    })
}
