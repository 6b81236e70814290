//! Rows: the flat field maps exchanged with store backends.

use crate::decoder::from_cbor;
use crate::encoder::to_canonical_cbor;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use std::collections::BTreeMap;

/// A stored record: field name to value, in field-name order.
pub type Row = BTreeMap<String, Value>;

/// Encodes a row as a canonical CBOR map with text keys.
///
/// Identical rows always produce identical bytes.
pub fn encode_row(row: &Row) -> CodecResult<Vec<u8>> {
    let map = Value::text_map(row.iter().map(|(k, v)| (k.clone(), v.clone())));
    to_canonical_cbor(&map)
}

/// Decodes a row previously written by [`encode_row`].
pub fn decode_row(bytes: &[u8]) -> CodecResult<Row> {
    let value = from_cbor(bytes)?;
    let Value::Map(pairs) = value else {
        return Err(CodecError::not_a_row("expected map"));
    };
    let mut row = Row::new();
    for (k, v) in pairs {
        let Value::Text(name) = k else {
            return Err(CodecError::not_a_row(format!("non-text field name {k}")));
        };
        row.insert(name, v);
    }
    Ok(row)
}

/// Reads a dotted path from a row.
///
/// The first segment names a field; remaining segments walk nested maps.
pub fn row_path<'a>(row: &'a Row, path: &str) -> Option<&'a Value> {
    match path.split_once('.') {
        None => row.get(path),
        Some((head, rest)) => row.get(head)?.get_path(rest),
    }
}
