//! Multi-credential presentations: proving possession of credentials with
//! selective disclosure, revocation checks, bound checks, verifiable
//! encryption, Circom predicates and pseudonyms, all under one composite
//! proof.

pub mod builder;
pub mod specification;
pub mod verifier;

pub use builder::{AccumInfo, PresentationBuilder, StatusWitnessKind};
pub use specification::*;

use ark_std::{string::String, vec::Vec};
use serde_json::Value;

use crate::composite::CompositeProof;
use crate::error::CredentialError;

pub const PRESENTATION_VERSION: &str = "0.1.0";

/// A finished presentation: the public specification plus the composite proof
/// bytes. The verifier-chosen nonce (if any) rides along so relying parties
/// can check it is the one they issued.
#[derive(Clone, Debug)]
pub struct Presentation {
    pub version: String,
    pub context: Option<String>,
    pub nonce: Option<Vec<u8>>,
    pub spec: PresentationSpecification,
    pub proof: CompositeProof,
}

/// The proof-spec context deterministically binds the presentation version,
/// the full serialized specification and the caller-supplied context string.
/// Both sides recompute it from the specification they hold, so any
/// divergence in what the presentation claims breaks the transcript.
pub(crate) fn transcript_context(
    version: &str,
    spec: &PresentationSpecification,
    context: &Option<String>,
) -> Result<Vec<u8>, CredentialError> {
    let mut bytes = version.as_bytes().to_vec();
    bytes.push(0u8);
    bytes.extend_from_slice(&serde_json::to_vec(spec)?);
    bytes.push(0u8);
    if let Some(ctx) = context {
        bytes.extend_from_slice(ctx.as_bytes());
    }
    Ok(bytes)
}

impl Presentation {
    pub fn to_json(&self) -> Result<Value, CredentialError> {
        let mut doc = serde_json::Map::new();
        doc.insert("version".to_string(), Value::String(self.version.clone()));
        if let Some(ctx) = &self.context {
            doc.insert("context".to_string(), Value::String(ctx.clone()));
        }
        if let Some(nonce) = &self.nonce {
            doc.insert(
                "nonce".to_string(),
                Value::String(bs58::encode(nonce).into_string()),
            );
        }
        doc.insert("spec".to_string(), serde_json::to_value(&self.spec)?);
        doc.insert("proof".to_string(), Value::String(self.proof.to_base58()?));
        Ok(Value::Object(doc))
    }

    pub fn from_json(json: &Value) -> Result<Self, CredentialError> {
        let obj = json.as_object().ok_or_else(|| {
            CredentialError::InvalidPresentation("presentation not an object".into())
        })?;
        let version = obj
            .get("version")
            .and_then(Value::as_str)
            .ok_or_else(|| CredentialError::InvalidPresentation("missing version".into()))?
            .to_string();
        let context = obj
            .get("context")
            .and_then(Value::as_str)
            .map(str::to_string);
        let nonce = obj
            .get("nonce")
            .and_then(Value::as_str)
            .map(|s| {
                bs58::decode(s)
                    .into_vec()
                    .map_err(|e| CredentialError::Base58Decode(e.to_string()))
            })
            .transpose()?;
        let spec = serde_json::from_value(
            obj.get("spec")
                .cloned()
                .ok_or_else(|| CredentialError::InvalidPresentation("missing spec".into()))?,
        )?;
        let proof = CompositeProof::from_base58(
            obj.get("proof")
                .and_then(Value::as_str)
                .ok_or_else(|| CredentialError::InvalidPresentation("missing proof".into()))?,
        )?;
        Ok(Self {
            version,
            context,
            nonce,
            spec,
            proof,
        })
    }
}
