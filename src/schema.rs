//! Credential schemas parsed from JSON-Schema documents.
//!
//! A schema is parsed once into a tree of typed leaves, flattened into an
//! ordered list of dotted attribute names with their leaf types, and embedded
//! into credentials as a data-URI so a presentation carries everything a
//! verifier needs to re-derive attribute positions. The flattened order is the
//! single source of truth for every position index used by signatures and
//! proofs.

use ark_std::{
    collections::{BTreeMap, BTreeSet},
    string::String,
    vec::Vec,
};
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::encoding::{Encoder, LeafType};
use crate::error::SchemaError;

pub const CRYPTO_VERSION_STR: &str = "cryptoVersion";
pub const SCHEMA_STR: &str = "credentialSchema";
pub const SUBJECT_STR: &str = "credentialSubject";
pub const STATUS_STR: &str = "credentialStatus";
pub const PROOF_STR: &str = "proof";

pub const STATUS_ID_STR: &str = "id";
pub const STATUS_TYPE_STR: &str = "type";
pub const REV_CHECK_STR: &str = "revocationCheck";
pub const REV_ID_STR: &str = "revocationId";

pub const MEM_CHECK_STR: &str = "membership";
pub const NON_MEM_CHECK_STR: &str = "non-membership";
pub const STATUS_TYPE_VB_ACCUMULATOR: &str = "DockVBAccumulator2022";

pub const SCHEMA_TYPE_STR: &str = "JsonSchemaValidator2018";
pub const SCHEMA_VERSION: &str = "0.1.0";
pub const DATA_URI_PREFIX: &str = "data:application/json;charset=utf-8,";

const ENCRYPTABLE_REF: &str = "#/definitions/encryptableString";
const ENCRYPTABLE_COMP_REF: &str = "#/definitions/encryptableCompString";

/// Knobs for converting a JSON-Schema document into typed leaves. With
/// `use_defaults`, missing `minimum`/`multipleOf` fall back to the defaults
/// here instead of failing the parse.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsingOptions {
    pub use_defaults: bool,
    pub default_minimum_integer: i64,
    pub default_decimal_places: u8,
}

impl Default for ParsingOptions {
    fn default() -> Self {
        Self {
            use_defaults: false,
            default_minimum_integer: -(i32::MAX as i64),
            default_decimal_places: 0,
        }
    }
}

/// Parsed form of a schema document: nested objects, fixed-length arrays and
/// typed leaves.
#[derive(Clone, Debug, PartialEq)]
pub enum SchemaNode {
    Object(BTreeMap<String, SchemaNode>),
    Array(Vec<SchemaNode>),
    Leaf(LeafType),
}

#[derive(Clone, Debug)]
pub struct CredentialSchema {
    json: Value,
    version: String,
    parsing_options: ParsingOptions,
    root: SchemaNode,
    names: Vec<String>,
    types: Vec<LeafType>,
    encoder: Encoder,
}

impl PartialEq for CredentialSchema {
    fn eq(&self, other: &Self) -> bool {
        self.json == other.json
            && self.version == other.version
            && self.parsing_options == other.parsing_options
    }
}

impl CredentialSchema {
    /// Parse a JSON-Schema document. The document's top level must be an
    /// object with `properties`; `credentialSubject` is expected among them.
    pub fn new(json: Value, parsing_options: ParsingOptions) -> Result<Self, SchemaError> {
        Self::with_version(json, parsing_options, SCHEMA_VERSION.to_string())
    }

    fn with_version(
        json: Value,
        parsing_options: ParsingOptions,
        version: String,
    ) -> Result<Self, SchemaError> {
        let root = parse_object(&json, "", &parsing_options)?;
        let (names, types) = flatten_schema(&root);
        let map = names
            .iter()
            .cloned()
            .zip(types.iter().cloned())
            .collect::<BTreeMap<_, _>>();
        let encoder = Encoder::new(map, parsing_options.use_defaults);
        let schema = Self {
            json,
            version,
            parsing_options,
            root,
            names,
            types,
            encoder,
        };
        schema.validate_status()?;
        Ok(schema)
    }

    /// Ordered attribute names and leaf types. The first two entries are
    /// always the implicit `cryptoVersion` and `credentialSchema` leaves.
    pub fn flatten(&self) -> (&[String], &[LeafType]) {
        (&self.names, &self.types)
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn json(&self) -> &Value {
        &self.json
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn parsing_options(&self) -> &ParsingOptions {
        &self.parsing_options
    }

    pub fn root(&self) -> &SchemaNode {
        &self.root
    }

    pub fn has_status(&self) -> bool {
        matches!(&self.root, SchemaNode::Object(m) if m.contains_key(STATUS_STR))
    }

    /// Index of a full dotted attribute name in the flattened order.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn leaf_type(&self, name: &str) -> Option<&LeafType> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.types[i])
    }

    /// Names of all non-implicit leaves under the given top-level key.
    pub fn leaves_under(&self, key: &str) -> BTreeSet<String> {
        let prefix = format!("{}.", key);
        self.names
            .iter()
            .filter(|n| n.starts_with(&prefix))
            .cloned()
            .collect()
    }

    /// The schema document embedded as a data-URI, used as the value of the
    /// implicit `credentialSchema` attribute.
    pub fn embedded_id(&self) -> Result<String, SchemaError> {
        let doc = serde_json::to_string(&self.json)?;
        Ok(format!(
            "{}{}",
            DATA_URI_PREFIX,
            utf8_percent_encode(&doc, NON_ALPHANUMERIC)
        ))
    }

    /// JSON of the credential's `credentialSchema` field.
    pub fn to_schema_field(&self) -> Result<Value, SchemaError> {
        Ok(serde_json::json!({
            "id": self.embedded_id()?,
            "type": SCHEMA_TYPE_STR,
            "version": self.version,
            "parsingOptions": self.parsing_options,
        }))
    }

    /// Rebuild a schema from a credential's `credentialSchema` field.
    pub fn from_schema_field(field: &Value) -> Result<Self, SchemaError> {
        let obj = field
            .as_object()
            .ok_or_else(|| SchemaError::InvalidEmbeddedSchema("not an object".into()))?;
        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::InvalidEmbeddedSchema("missing id".into()))?;
        let version = obj
            .get("version")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::InvalidVersion("missing".into()))?
            .to_string();
        let parsing_options = match obj.get("parsingOptions") {
            Some(v) => serde_json::from_value(v.clone())?,
            None => ParsingOptions::default(),
        };
        let encoded = id
            .strip_prefix(DATA_URI_PREFIX)
            .or_else(|| id.strip_prefix("data:application/json;,"))
            .ok_or_else(|| SchemaError::InvalidEmbeddedSchema(id.into()))?;
        let doc = percent_decode_str(encoded)
            .decode_utf8()
            .map_err(|_| SchemaError::InvalidEmbeddedSchema("bad percent encoding".into()))?;
        let json: Value = serde_json::from_str(&doc)?;
        Self::with_version(json, parsing_options, version)
    }

    /// A status-bearing schema must carry the four mandatory string leaves.
    fn validate_status(&self) -> Result<(), SchemaError> {
        if !self.has_status() {
            return Ok(());
        }
        for leaf in [STATUS_ID_STR, STATUS_TYPE_STR, REV_CHECK_STR, REV_ID_STR] {
            let name = format!("{}.{}", STATUS_STR, leaf);
            match self.leaf_type(&name) {
                Some(LeafType::String_) | Some(LeafType::StringReversible { .. }) => {}
                _ => return Err(SchemaError::InvalidStatus(name)),
            }
        }
        Ok(())
    }
}

fn parse_object(
    json: &Value,
    path: &str,
    opts: &ParsingOptions,
) -> Result<SchemaNode, SchemaError> {
    let obj = json
        .as_object()
        .ok_or_else(|| SchemaError::NotAnObject(path.to_string()))?;

    if let Some(r) = obj.get("$ref").and_then(Value::as_str) {
        return match r {
            ENCRYPTABLE_REF => Ok(SchemaNode::Leaf(LeafType::StringReversible {
                compress: false,
            })),
            ENCRYPTABLE_COMP_REF => {
                Ok(SchemaNode::Leaf(LeafType::StringReversible { compress: true }))
            }
            _ => Err(SchemaError::UnknownRef(path.to_string(), r.to_string())),
        };
    }

    let typ = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| SchemaError::UnknownType(path.to_string(), "<missing>".to_string()))?;

    match typ {
        "object" => {
            let props = obj
                .get("properties")
                .and_then(Value::as_object)
                .ok_or(SchemaError::MissingProperties)?;
            let mut children = BTreeMap::new();
            for (k, v) in props {
                let child_path = if path.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", path, k)
                };
                children.insert(k.clone(), parse_object(v, &child_path, opts)?);
            }
            Ok(SchemaNode::Object(children))
        }
        "array" => {
            let items = obj
                .get("items")
                .and_then(Value::as_array)
                .ok_or_else(|| SchemaError::UnboundedArrayItems(path.to_string()))?;
            let mut children = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                children.push(parse_object(item, &format!("{}.{}", path, i), opts)?);
            }
            Ok(SchemaNode::Array(children))
        }
        "string" => Ok(SchemaNode::Leaf(LeafType::String_)),
        "integer" => {
            let minimum = match obj.get("minimum").and_then(Value::as_i64) {
                Some(m) => m,
                None if opts.use_defaults => opts.default_minimum_integer,
                None => return Err(SchemaError::MissingMinimum(path.to_string())),
            };
            if minimum >= 0 {
                Ok(SchemaNode::Leaf(LeafType::PositiveInteger))
            } else {
                Ok(SchemaNode::Leaf(LeafType::Integer { minimum }))
            }
        }
        "number" => {
            let decimal_places = match obj.get("multipleOf").and_then(Value::as_f64) {
                Some(m) => decimal_places_from_multiple_of(path, m)?,
                None if opts.use_defaults => opts.default_decimal_places,
                None => return Err(SchemaError::MissingMultipleOf(path.to_string())),
            };
            match obj.get("minimum").and_then(Value::as_f64) {
                Some(m) if m < 0f64 => Ok(SchemaNode::Leaf(LeafType::Decimal {
                    minimum: m.floor() as i64,
                    decimal_places,
                })),
                _ => Ok(SchemaNode::Leaf(LeafType::PositiveDecimal { decimal_places })),
            }
        }
        other => Err(SchemaError::UnknownType(
            path.to_string(),
            other.to_string(),
        )),
    }
}

/// `multipleOf` must be `10^-k`; `k` becomes the number of decimal places.
fn decimal_places_from_multiple_of(path: &str, m: f64) -> Result<u8, SchemaError> {
    if m <= 0f64 || m > 1f64 {
        return Err(SchemaError::InvalidMultipleOf(path.to_string(), m));
    }
    let k = (-m.log10()).round() as i32;
    if k < 0 || k > 18 || (10f64.powi(-k) - m).abs() > 1e-12 {
        return Err(SchemaError::InvalidMultipleOf(path.to_string(), m));
    }
    Ok(k as u8)
}

/// Flatten the parsed tree to `(names, types)`: the two implicit leaves first,
/// then every other full dotted path in lexicographic order.
fn flatten_schema(root: &SchemaNode) -> (Vec<String>, Vec<LeafType>) {
    let mut collected = BTreeMap::new();
    collect_leaves(root, "", &mut collected);
    collected.remove(CRYPTO_VERSION_STR);
    collected.remove(SCHEMA_STR);

    let mut names = Vec::with_capacity(collected.len() + 2);
    let mut types = Vec::with_capacity(collected.len() + 2);
    names.push(CRYPTO_VERSION_STR.to_string());
    types.push(LeafType::String_);
    names.push(SCHEMA_STR.to_string());
    types.push(LeafType::String_);
    for (name, typ) in collected {
        names.push(name);
        types.push(typ);
    }
    (names, types)
}

fn collect_leaves(node: &SchemaNode, path: &str, out: &mut BTreeMap<String, LeafType>) {
    match node {
        SchemaNode::Leaf(t) => {
            out.insert(path.to_string(), t.clone());
        }
        SchemaNode::Object(children) => {
            for (k, child) in children {
                let child_path = if path.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", path, k)
                };
                collect_leaves(child, &child_path, out);
            }
        }
        SchemaNode::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_leaves(item, &format!("{}.{}", path, i), out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema_doc(subject_props: Value) -> Value {
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "definitions": {
                "encryptableString": { "type": "string" },
                "encryptableCompString": { "type": "string" }
            },
            "properties": {
                "credentialSubject": { "type": "object", "properties": subject_props }
            }
        })
    }

    #[test]
    fn flatten_is_sorted_with_implicit_leaves_first() {
        let schema = CredentialSchema::new(
            schema_doc(json!({
                "lname": { "type": "string" },
                "fname": { "type": "string" }
            })),
            ParsingOptions::default(),
        )
        .unwrap();
        let (names, types) = schema.flatten();
        let names = names.iter().map(|s| s.as_str()).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "cryptoVersion",
                "credentialSchema",
                "credentialSubject.fname",
                "credentialSubject.lname"
            ]
        );
        assert_eq!(types.len(), 4);
        assert!(types.iter().all(|t| *t == LeafType::String_));
    }

    #[test]
    fn nested_and_array_paths() {
        let schema = CredentialSchema::new(
            schema_doc(json!({
                "sensitive": {
                    "type": "object",
                    "properties": { "SSN": { "$ref": "#/definitions/encryptableString" } }
                },
                "scores": {
                    "type": "array",
                    "items": [
                        { "type": "integer", "minimum": 0 },
                        { "type": "integer", "minimum": 0 }
                    ]
                }
            })),
            ParsingOptions::default(),
        )
        .unwrap();
        let (names, types) = schema.flatten();
        let tail = names[2..].iter().map(|s| s.as_str()).collect::<Vec<_>>();
        assert_eq!(
            tail,
            vec![
                "credentialSubject.scores.0",
                "credentialSubject.scores.1",
                "credentialSubject.sensitive.SSN"
            ]
        );
        assert_eq!(
            types[4],
            LeafType::StringReversible { compress: false }
        );
        assert_eq!(types[2], LeafType::PositiveInteger);
    }

    #[test]
    fn numeric_leaf_parsing() {
        let schema = CredentialSchema::new(
            schema_doc(json!({
                "cgpa": { "type": "number", "minimum": 0, "multipleOf": 0.01 },
                "temperature": { "type": "number", "minimum": -100, "multipleOf": 0.1 },
                "height": { "type": "integer", "minimum": -200 }
            })),
            ParsingOptions::default(),
        )
        .unwrap();
        assert_eq!(
            schema.leaf_type("credentialSubject.cgpa"),
            Some(&LeafType::PositiveDecimal { decimal_places: 2 })
        );
        assert_eq!(
            schema.leaf_type("credentialSubject.temperature"),
            Some(&LeafType::Decimal { minimum: -100, decimal_places: 1 })
        );
        assert_eq!(
            schema.leaf_type("credentialSubject.height"),
            Some(&LeafType::Integer { minimum: -200 })
        );
    }

    #[test]
    fn strict_parsing_rejects_missing_minimum_and_multiple_of() {
        let doc = schema_doc(json!({ "age": { "type": "integer" } }));
        assert!(CredentialSchema::new(doc.clone(), ParsingOptions::default()).is_err());
        let lax = ParsingOptions {
            use_defaults: true,
            ..ParsingOptions::default()
        };
        assert!(CredentialSchema::new(doc, lax).is_ok());

        let doc = schema_doc(json!({ "score": { "type": "number" } }));
        assert!(CredentialSchema::new(doc, ParsingOptions::default()).is_err());
    }

    #[test]
    fn status_requires_mandatory_string_leaves() {
        let mut doc = schema_doc(json!({ "fname": { "type": "string" } }));
        doc["properties"]["credentialStatus"] = json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "type": { "type": "string" },
                "revocationCheck": { "type": "string" },
                "revocationId": { "type": "string" }
            }
        });
        let schema = CredentialSchema::new(doc.clone(), ParsingOptions::default()).unwrap();
        assert!(schema.has_status());

        doc["properties"]["credentialStatus"]["properties"]
            .as_object_mut()
            .unwrap()
            .remove("revocationId");
        assert!(matches!(
            CredentialSchema::new(doc, ParsingOptions::default()),
            Err(SchemaError::InvalidStatus(_))
        ));
    }

    #[test]
    fn embedded_schema_round_trip() {
        let schema = CredentialSchema::new(
            schema_doc(json!({
                "fname": { "type": "string" },
                "cgpa": { "type": "number", "minimum": 0, "multipleOf": 0.01 }
            })),
            ParsingOptions::default(),
        )
        .unwrap();
        let field = schema.to_schema_field().unwrap();
        let back = CredentialSchema::from_schema_field(&field).unwrap();
        assert_eq!(schema, back);
        assert_eq!(schema.flatten(), back.flatten());
        // identical inputs encode identically through both schemas' encoders
        let v = json!(2.57);
        assert_eq!(
            schema
                .encoder()
                .encode("credentialSubject.cgpa", &v)
                .unwrap(),
            back.encoder().encode("credentialSubject.cgpa", &v).unwrap()
        );
    }

    #[test]
    fn unknown_ref_rejected() {
        let doc = schema_doc(json!({ "x": { "$ref": "#/definitions/unknown" } }));
        assert!(matches!(
            CredentialSchema::new(doc, ParsingOptions::default()),
            Err(SchemaError::UnknownRef(_, _))
        ));
    }
}
