use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::{collections::BTreeMap, string::String, vec::Vec};
use serde_json::Value;

use crate::error::CredentialError;

/// Flatten a JSON document into dotted-path leaves. Array indices become path
/// segments, mirroring the schema's flattening.
pub fn flatten_json(prefix: &str, value: &Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let path = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", prefix, k)
                };
                flatten_json(&path, v, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_json(&format!("{}.{}", prefix, i), v, out);
            }
        }
        leaf => {
            out.insert(prefix.to_string(), leaf.clone());
        }
    }
}

/// Insert a leaf at a dotted path, creating intermediate objects.
pub fn insert_at_path(root: &mut Value, dotted: &str, leaf: Value) {
    let mut current = root;
    let mut segments = dotted.split('.').peekable();
    while let Some(seg) = segments.next() {
        if segments.peek().is_none() {
            current
                .as_object_mut()
                .expect("intermediate nodes are objects")
                .insert(seg.to_string(), leaf);
            return;
        }
        let map = current
            .as_object_mut()
            .expect("intermediate nodes are objects");
        current = map
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

/// Look up a leaf by dotted path.
pub fn get_at_path<'a>(root: &'a Value, dotted: &str) -> Option<&'a Value> {
    let mut current = root;
    for seg in dotted.split('.') {
        current = match current {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

pub fn b58_encode<T: CanonicalSerialize>(t: &T) -> Result<String, CredentialError> {
    let mut bytes = Vec::new();
    t.serialize_compressed(&mut bytes)?;
    Ok(bs58::encode(bytes).into_string())
}

pub fn b58_decode<T: CanonicalDeserialize>(s: &str) -> Result<T, CredentialError> {
    let bytes = bs58::decode(s)
        .into_vec()
        .map_err(|e| CredentialError::Base58Decode(e.to_string()))?;
    Ok(T::deserialize_compressed(&bytes[..])?)
}
