//! The public, serializable record of what a presentation proves: per
//! credential the revealed raw attributes, revocation status, and predicate
//! declarations, plus cross-credential equalities and pseudonyms. The proof
//! bytes live next to this record, never inside it.

use ark_std::{collections::BTreeMap, string::String, vec::Vec};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::setup_registry::BoundCheckProtocol;

/// `(credential index, full dotted attribute name)`
pub type AttributeRef = (usize, String);

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationSpecification {
    pub credentials: Vec<PresentedCredential>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attribute_equalities: Vec<Vec<AttributeRef>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pseudonyms: Vec<PresentedPseudonym>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentedCredential {
    pub version: String,
    /// The credential's `credentialSchema` field (embedded data-URI id,
    /// version and parsing options); everything the verifier needs to rebuild
    /// attribute positions.
    pub schema: Value,
    /// Nested raw (pre-encoding) values of the revealed attributes.
    pub revealed_attributes: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PresentedStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bounds: Vec<PresentedBound>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verifiable_encryptions: Vec<PresentedVerifiableEncryption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub circom_predicates: Vec<PresentedCircomPredicate>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentedStatus {
    pub id: String,
    pub revocation_check: String,
    /// Accumulator value the (non-)membership witness was issued against,
    /// base58 of the compressed group element.
    pub accumulated: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentedBound {
    pub attribute_name: String,
    pub min: f64,
    pub max: f64,
    pub param_id: String,
    pub protocol: BoundCheckProtocol,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentedVerifiableEncryption {
    pub attribute_name: String,
    pub chunk_bit_size: u8,
    pub encryption_gens_id: String,
    pub commitment_gens_id: String,
    pub encryption_key_id: String,
    pub snark_key_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentedCircomPredicate {
    pub r1cs_id: String,
    pub wasm_id: String,
    pub snark_key_id: String,
    /// Circuit input name to the credential attributes bound to it.
    pub private_vars: Vec<CircomPrivateVar>,
    /// Circuit input name to its public values (base58 field elements).
    pub public_vars: Vec<CircomPublicVar>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircomPrivateVar {
    pub var_name: String,
    pub attribute_names: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircomPublicVar {
    pub var_name: String,
    pub values: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentedPseudonym {
    /// base58 of the commitment group element
    pub commitment: String,
    /// base58 bases, one per committed attribute in order
    pub bases_for_attributes: Vec<String>,
    /// credential index to the attribute names committed from it
    pub attributes: BTreeMap<usize, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_for_secret_key: Option<String>,
}
