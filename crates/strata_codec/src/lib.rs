//! # Strata Codec
//!
//! Field values and row encoding for Strata.
//!
//! Every backend behind the entity manager speaks in [`Value`]s grouped
//! into [`Row`]s. Backends that persist opaque payloads (object storage)
//! serialize rows with the canonical CBOR encoding provided here, so that:
//! - Identical rows produce identical bytes
//! - Payloads are portable across processes and platforms
//!
//! ## Usage
//!
//! ```
//! use strata_codec::{decode_row, encode_row, Row, Value};
//!
//! let mut row = Row::new();
//! row.insert("sku".into(), Value::from("A-1"));
//! let bytes = encode_row(&row).unwrap();
//! assert_eq!(decode_row(&bytes).unwrap(), row);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod row;
mod value;

pub use decoder::from_cbor;
pub use encoder::to_canonical_cbor;
pub use error::{CodecError, CodecResult};
pub use row::{decode_row, encode_row, row_path, Row};
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaf_strategy() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::Text),
            prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
        ]
    }

    fn value_strategy() -> impl Strategy<Value = Value> {
        leaf_strategy().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::vec(("[a-z]{1,6}", inner), 0..4).prop_map(|pairs| {
                    Value::map(
                        pairs
                            .into_iter()
                            .map(|(k, v)| (Value::Text(k), v))
                            .collect(),
                    )
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(value in value_strategy()) {
            let bytes = to_canonical_cbor(&value).unwrap();
            let decoded = from_cbor(&bytes).unwrap();
            // Compare encodings, since Value::map may reorder generated keys
            prop_assert_eq!(to_canonical_cbor(&decoded).unwrap(), bytes);
        }

        #[test]
        fn total_order_is_antisymmetric(a in value_strategy(), b in value_strategy()) {
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        }
    }
}
