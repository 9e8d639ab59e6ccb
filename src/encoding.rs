//! Deterministic encoding of credential attribute values to field elements.
//!
//! Every leaf of a credential schema maps to one codec here. String values are
//! hashed to the field by try-and-increment; reversible strings are packed
//! into the low bytes of a field element so a verifier who learns the scalar
//! (e.g. by decrypting a SAVER ciphertext) can recover the original string;
//! numeric values are shifted and scaled into non-negative integers so that
//! bound checks over the encoded form are order-preserving.

use ark_ff::{BigInteger, PrimeField};
use ark_std::{collections::BTreeMap, string::String, vec::Vec};
use blake2::Blake2b512;
use dock_crypto_utils::hashing_utils::field_elem_from_try_and_incr;
use std::io::{Read, Write};

use crate::error::EncodingError;
use crate::types::Fr;

/// Closed set of leaf types a schema can declare.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeafType {
    String_,
    StringReversible { compress: bool },
    PositiveInteger,
    Integer { minimum: i64 },
    PositiveDecimal { decimal_places: u8 },
    Decimal { minimum: i64, decimal_places: u8 },
}

/// Reversible strings occupy the low 30 bytes of the field element; byte 30
/// holds the byte length and byte 31 a flag marking compression. Keeping the
/// top byte at 0 or 1 keeps the packed value below the field modulus.
const REVERSIBLE_MAX_BYTES: usize = 30;
const REVERSIBLE_LEN_BYTE: usize = 30;
const REVERSIBLE_FLAG_BYTE: usize = 31;

pub fn encode_string_hash(value: &str) -> Fr {
    field_elem_from_try_and_incr::<Fr, Blake2b512>(value.as_bytes())
}

pub fn encode_string_reversible(value: &str, compress: bool) -> Result<Fr, EncodingError> {
    let bytes = if compress {
        deflate(value.as_bytes()).map_err(|_| EncodingError::CompressionFailed(value.into()))?
    } else {
        value.as_bytes().to_vec()
    };
    if bytes.len() > REVERSIBLE_MAX_BYTES {
        return Err(EncodingError::StringTooLongForReversibleEncoding(
            value.into(),
            bytes.len(),
        ));
    }
    let mut packed = [0u8; 32];
    packed[..bytes.len()].copy_from_slice(&bytes);
    packed[REVERSIBLE_LEN_BYTE] = bytes.len() as u8;
    packed[REVERSIBLE_FLAG_BYTE] = compress as u8;
    Ok(Fr::from_le_bytes_mod_order(&packed))
}

pub fn decode_string_reversible(value: &Fr) -> Result<String, EncodingError> {
    let packed = value.into_bigint().to_bytes_le();
    if packed.len() != 32 {
        return Err(EncodingError::NotReversibleEncoding);
    }
    let len = packed[REVERSIBLE_LEN_BYTE] as usize;
    let compressed = packed[REVERSIBLE_FLAG_BYTE] == 1;
    if len > REVERSIBLE_MAX_BYTES || packed[REVERSIBLE_FLAG_BYTE] > 1 {
        return Err(EncodingError::NotReversibleEncoding);
    }
    if packed[len..REVERSIBLE_LEN_BYTE].iter().any(|b| *b != 0) {
        return Err(EncodingError::NotReversibleEncoding);
    }
    let bytes = if compressed {
        inflate(&packed[..len]).map_err(|_| EncodingError::DecompressionFailed)?
    } else {
        packed[..len].to_vec()
    };
    String::from_utf8(bytes).map_err(|_| EncodingError::InvalidUtf8InReversibleString)
}

pub fn encode_positive_integer(name: &str, value: u64) -> Result<Fr, EncodingError> {
    let _ = name;
    Ok(Fr::from(value))
}

pub fn encode_integer(name: &str, value: i64, minimum: i64) -> Result<Fr, EncodingError> {
    if value < minimum {
        return Err(EncodingError::IntegerBelowMinimum(name.into(), value, minimum));
    }
    Ok(Fr::from((value as i128 - minimum as i128) as u128))
}

/// Scale to an integer with `decimal_places` fractional digits, rejecting
/// values that carry more precision than the leaf declares.
fn scale_decimal(name: &str, value: f64, decimal_places: u8) -> Result<i128, EncodingError> {
    let factor = 10f64.powi(decimal_places as i32);
    let scaled = value * factor;
    if (scaled - scaled.round()).abs() > 1e-6 {
        return Err(EncodingError::TooManyDecimalPlaces(
            name.into(),
            decimal_places,
        ));
    }
    Ok(scaled.round() as i128)
}

pub fn encode_positive_decimal(
    name: &str,
    value: f64,
    decimal_places: u8,
) -> Result<Fr, EncodingError> {
    if value < 0f64 {
        return Err(EncodingError::NegativeValueForPositiveType(name.into()));
    }
    Ok(Fr::from(scale_decimal(name, value, decimal_places)? as u128))
}

pub fn encode_decimal(
    name: &str,
    value: f64,
    minimum: i64,
    decimal_places: u8,
) -> Result<Fr, EncodingError> {
    if value < minimum as f64 {
        return Err(EncodingError::IntegerBelowMinimum(
            name.into(),
            value as i64,
            minimum,
        ));
    }
    let scaled = scale_decimal(name, value, decimal_places)?;
    let scaled_min = (minimum as i128) * 10i128.pow(decimal_places as u32);
    Ok(Fr::from((scaled - scaled_min) as u128))
}

impl LeafType {
    /// Encode a JSON value under this leaf type.
    pub fn encode(&self, name: &str, value: &serde_json::Value) -> Result<Fr, EncodingError> {
        use serde_json::Value;
        match self {
            Self::String_ => match value {
                Value::String(s) => Ok(encode_string_hash(s)),
                _ => Err(self.type_mismatch(name)),
            },
            Self::StringReversible { compress } => match value {
                Value::String(s) => encode_string_reversible(s, *compress),
                _ => Err(self.type_mismatch(name)),
            },
            Self::PositiveInteger => match value.as_u64() {
                Some(v) => encode_positive_integer(name, v),
                None => Err(self.type_mismatch(name)),
            },
            Self::Integer { minimum } => match value.as_i64() {
                Some(v) => encode_integer(name, v, *minimum),
                None => Err(self.type_mismatch(name)),
            },
            Self::PositiveDecimal { decimal_places } => match value.as_f64() {
                Some(v) if value.is_number() => encode_positive_decimal(name, v, *decimal_places),
                _ => Err(self.type_mismatch(name)),
            },
            Self::Decimal {
                minimum,
                decimal_places,
            } => match value.as_f64() {
                Some(v) if value.is_number() => encode_decimal(name, v, *minimum, *decimal_places),
                _ => Err(self.type_mismatch(name)),
            },
        }
    }

    /// Transform a raw bound into the encoded domain of this leaf, for bound
    /// checks over the encoded attribute. Only numeric leaves admit bounds.
    pub fn scale_bound(&self, name: &str, bound: f64) -> Result<u64, EncodingError> {
        let scaled = match self {
            Self::PositiveInteger => {
                if bound < 0f64 {
                    return Err(EncodingError::NegativeValueForPositiveType(name.into()));
                }
                bound as i128
            }
            Self::Integer { minimum } => {
                if bound < *minimum as f64 {
                    return Err(EncodingError::IntegerBelowMinimum(
                        name.into(),
                        bound as i64,
                        *minimum,
                    ));
                }
                bound as i128 - *minimum as i128
            }
            Self::PositiveDecimal { decimal_places } => {
                if bound < 0f64 {
                    return Err(EncodingError::NegativeValueForPositiveType(name.into()));
                }
                scale_decimal(name, bound, *decimal_places)?
            }
            Self::Decimal {
                minimum,
                decimal_places,
            } => {
                scale_decimal(name, bound, *decimal_places)?
                    - (*minimum as i128) * 10i128.pow(*decimal_places as u32)
            }
            _ => {
                return Err(EncodingError::ValueIncompatibleWithType(
                    name.into(),
                    "bounds require a numeric leaf".into(),
                ))
            }
        };
        Ok(scaled as u64)
    }

    fn type_mismatch(&self, name: &str) -> EncodingError {
        EncodingError::ValueIncompatibleWithType(name.into(), format!("{:?}", self))
    }
}

/// Attribute-name keyed dispatch table derived from a schema's flattened form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Encoder {
    map: BTreeMap<String, LeafType>,
    use_defaults: bool,
}

impl Encoder {
    pub fn new(map: BTreeMap<String, LeafType>, use_defaults: bool) -> Self {
        Self { map, use_defaults }
    }

    pub fn leaf_type(&self, name: &str) -> Option<&LeafType> {
        self.map.get(name)
    }

    pub fn encode(&self, name: &str, value: &serde_json::Value) -> Result<Fr, EncodingError> {
        match self.map.get(name) {
            Some(t) => t.encode(name, value),
            None if self.use_defaults => match value {
                serde_json::Value::String(s) => Ok(encode_string_hash(s)),
                v => LeafType::String_.encode(name, v),
            },
            None => Err(EncodingError::NoEncoderForAttribute(name.into())),
        }
    }
}

fn deflate(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn inflate(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    flate2::read::DeflateDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_hash_is_deterministic() {
        assert_eq!(encode_string_hash("John"), encode_string_hash("John"));
        assert_ne!(encode_string_hash("John"), encode_string_hash("Jane"));
    }

    #[test]
    fn reversible_string_round_trip() {
        for (s, compress) in [
            ("123-456789-0", false),
            ("", false),
            ("aaaaaaaaaaaaaaaaaaaaaaaaa", true),
            ("üñïçødé", false),
        ] {
            let enc = encode_string_reversible(s, compress).unwrap();
            assert_eq!(decode_string_reversible(&enc).unwrap(), s);
        }
    }

    #[test]
    fn reversible_string_too_long() {
        let long = "x".repeat(31);
        assert!(matches!(
            encode_string_reversible(&long, false),
            Err(EncodingError::StringTooLongForReversibleEncoding(_, 31))
        ));
    }

    #[test]
    fn hashed_scalar_does_not_decode() {
        // A hash-to-field output has (with overwhelming probability) garbage
        // in the metadata bytes.
        assert!(decode_string_reversible(&encode_string_hash("John")).is_err());
    }

    #[test]
    fn integer_encodings_preserve_order() {
        let a = encode_integer("a", -5, -10).unwrap();
        let b = encode_integer("a", -4, -10).unwrap();
        assert_eq!(a + Fr::from(1u64), b);
        assert!(encode_integer("a", -11, -10).is_err());
    }

    #[test]
    fn decimal_encoding() {
        let t = LeafType::PositiveDecimal { decimal_places: 2 };
        assert_eq!(
            t.encode("cgpa", &serde_json::json!(2.57)).unwrap(),
            Fr::from(257u64)
        );
        assert!(t.encode("cgpa", &serde_json::json!(2.571)).is_err());
        assert!(t.encode("cgpa", &serde_json::json!(-0.5)).is_err());

        let t = LeafType::Decimal {
            minimum: -10,
            decimal_places: 1,
        };
        assert_eq!(
            t.encode("temp", &serde_json::json!(-9.5)).unwrap(),
            Fr::from(5u64)
        );
    }

    #[test]
    fn bound_scaling_matches_encoding() {
        let t = LeafType::PositiveDecimal { decimal_places: 2 };
        assert_eq!(t.scale_bound("cgpa", 2.5).unwrap(), 250);
        assert_eq!(t.scale_bound("cgpa", 3.5).unwrap(), 350);
        assert!(LeafType::String_.scale_bound("name", 1.0).is_err());
    }

    #[test]
    fn strict_encoder_rejects_unknown_attributes() {
        let mut map = BTreeMap::new();
        map.insert("fname".to_string(), LeafType::String_);
        let strict = Encoder::new(map.clone(), false);
        assert!(strict.encode("lname", &serde_json::json!("Smith")).is_err());
        let lax = Encoder::new(map, true);
        assert!(lax.encode("lname", &serde_json::json!("Smith")).is_ok());
    }
}
