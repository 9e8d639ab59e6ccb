//! Credentials and the builder that assembles and signs them.
//!
//! A credential embeds its schema as a data-URI, so holder and verifier derive
//! identical attribute positions from the credential alone. Signing flattens
//! the whole document (implicit leaves, subject, optional status, top-level
//! fields) in the schema's order and signs the encoded scalar vector.

use ark_std::{
    collections::{BTreeMap, BTreeSet},
    rand::RngCore,
    string::String,
    vec::Vec,
};
use serde_json::Value;

use crate::error::CredentialError;
use crate::schema::{
    CredentialSchema, CRYPTO_VERSION_STR, MEM_CHECK_STR, NON_MEM_CHECK_STR, PROOF_STR, REV_CHECK_STR,
    REV_ID_STR, SCHEMA_STR, STATUS_ID_STR, STATUS_STR, STATUS_TYPE_STR,
    STATUS_TYPE_VB_ACCUMULATOR, SUBJECT_STR,
};
use crate::types::{Fr, IssuerPublicKey, IssuerSecretKey, Signature, SignatureParams};
use crate::util::{flatten_json, get_at_path};

/// Version stamped into every credential as the implicit `cryptoVersion`
/// attribute; it is always revealed in presentations.
pub const CRYPTO_VERSION: &str = "0.1.0";

#[derive(Clone, Debug)]
pub struct Credential {
    pub schema: CredentialSchema,
    pub subject: Value,
    pub status: Option<Value>,
    pub top_level_fields: BTreeMap<String, Value>,
    pub signature: Signature,
}

impl Credential {
    /// Flattened `name -> raw value` map of everything the signature covers.
    pub fn attribute_json(&self) -> Result<BTreeMap<String, Value>, CredentialError> {
        let mut out = BTreeMap::new();
        out.insert(
            CRYPTO_VERSION_STR.to_string(),
            Value::String(CRYPTO_VERSION.to_string()),
        );
        out.insert(
            SCHEMA_STR.to_string(),
            Value::String(self.schema.embedded_id()?),
        );
        flatten_json(SUBJECT_STR, &self.subject, &mut out);
        if let Some(status) = &self.status {
            flatten_json(STATUS_STR, status, &mut out);
        }
        for (k, v) in &self.top_level_fields {
            flatten_json(k, v, &mut out);
        }
        Ok(out)
    }

    /// Encode the attribute map in the schema's flattened order. Fails unless
    /// the credential's leaves match the schema's leaf set exactly.
    pub fn attribute_scalars(&self) -> Result<Vec<Fr>, CredentialError> {
        let map = self.attribute_json()?;
        let (names, _) = self.schema.flatten();
        check_leaf_sets_match(names, &map)?;
        let encoder = self.schema.encoder();
        names
            .iter()
            .map(|name| Ok(encoder.encode(name, &map[name])?))
            .collect()
    }

    pub fn verify(&self, pk: &IssuerPublicKey) -> Result<(), CredentialError> {
        let scalars = self.attribute_scalars()?;
        let params = SignatureParams::generate(self.signature.scheme(), scalars.len() as u32);
        self.signature.verify(&scalars, pk, &params)
    }

    pub fn has_status(&self) -> bool {
        self.status.is_some()
    }

    pub fn status_field(&self, field: &str) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| get_at_path(s, field))
            .and_then(Value::as_str)
    }

    pub fn to_json(&self) -> Result<Value, CredentialError> {
        let mut doc = serde_json::Map::new();
        doc.insert(
            CRYPTO_VERSION_STR.to_string(),
            Value::String(CRYPTO_VERSION.to_string()),
        );
        doc.insert(SCHEMA_STR.to_string(), self.schema.to_schema_field()?);
        doc.insert(SUBJECT_STR.to_string(), self.subject.clone());
        if let Some(status) = &self.status {
            doc.insert(STATUS_STR.to_string(), status.clone());
        }
        for (k, v) in &self.top_level_fields {
            doc.insert(k.clone(), v.clone());
        }
        doc.insert(
            PROOF_STR.to_string(),
            serde_json::json!({
                "type": self.signature.scheme().proof_type(),
                "proofValue": bs58::encode(self.signature.to_bytes()?).into_string(),
            }),
        );
        Ok(Value::Object(doc))
    }

    pub fn from_json(json: &Value) -> Result<Self, CredentialError> {
        let obj = json
            .as_object()
            .ok_or_else(|| CredentialError::InvalidPresentation("credential not an object".into()))?;
        let schema = CredentialSchema::from_schema_field(obj.get(SCHEMA_STR).ok_or_else(|| {
            CredentialError::InvalidPresentation("missing credentialSchema".into())
        })?)?;
        let subject = obj
            .get(SUBJECT_STR)
            .cloned()
            .ok_or_else(|| CredentialError::InvalidPresentation("missing credentialSubject".into()))?;
        let status = obj.get(STATUS_STR).cloned();
        let proof = obj
            .get(PROOF_STR)
            .and_then(Value::as_object)
            .ok_or_else(|| CredentialError::InvalidPresentation("missing proof".into()))?;
        let scheme = crate::types::SignatureScheme::from_proof_type(
            proof
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| CredentialError::InvalidPresentation("missing proof type".into()))?,
        )?;
        let sig_bytes = bs58::decode(
            proof
                .get("proofValue")
                .and_then(Value::as_str)
                .ok_or_else(|| CredentialError::InvalidPresentation("missing proofValue".into()))?,
        )
        .into_vec()
        .map_err(|e| CredentialError::Base58Decode(e.to_string()))?;
        let signature = Signature::from_bytes(scheme, &sig_bytes)?;
        let mut top_level_fields = BTreeMap::new();
        for (k, v) in obj {
            if ![CRYPTO_VERSION_STR, SCHEMA_STR, SUBJECT_STR, STATUS_STR, PROOF_STR]
                .contains(&k.as_str())
            {
                top_level_fields.insert(k.clone(), v.clone());
            }
        }
        Ok(Self {
            schema,
            subject,
            status,
            top_level_fields,
            signature,
        })
    }
}

/// Assembles a credential and signs it once; the result is immutable.
#[derive(Clone, Debug, Default)]
pub struct CredentialBuilder {
    schema: Option<CredentialSchema>,
    subject: Option<Value>,
    status: Option<Value>,
    top_level_fields: BTreeMap<String, Value>,
}

impl CredentialBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_schema(&mut self, schema: CredentialSchema) -> &mut Self {
        self.schema = Some(schema);
        self
    }

    pub fn set_subject(&mut self, subject: Value) -> &mut Self {
        self.subject = Some(subject);
        self
    }

    /// Declare the credential revocable under the given registry. The member
    /// added to (or absent from) the accumulator is the encoding of
    /// `revocation_id`.
    pub fn set_status(
        &mut self,
        registry_id: &str,
        revocation_check: &str,
        revocation_id: &str,
    ) -> Result<&mut Self, CredentialError> {
        if revocation_check != MEM_CHECK_STR && revocation_check != NON_MEM_CHECK_STR {
            return Err(CredentialError::UnknownRevocationCheck(
                revocation_check.to_string(),
            ));
        }
        self.status = Some(serde_json::json!({
            (STATUS_ID_STR): registry_id,
            (STATUS_TYPE_STR): STATUS_TYPE_VB_ACCUMULATOR,
            (REV_CHECK_STR): revocation_check,
            (REV_ID_STR): revocation_id,
        }));
        Ok(self)
    }

    pub fn set_top_level_field(&mut self, name: &str, value: Value) -> &mut Self {
        self.top_level_fields.insert(name.to_string(), value);
        self
    }

    /// Validate the document against the schema, encode the attribute vector
    /// in flattened order and sign it.
    pub fn sign<R: RngCore>(
        self,
        rng: &mut R,
        sk: &IssuerSecretKey,
    ) -> Result<Credential, CredentialError> {
        let schema = self
            .schema
            .ok_or_else(|| CredentialError::InvalidPresentation("builder has no schema".into()))?;
        let subject = self
            .subject
            .ok_or_else(|| CredentialError::InvalidPresentation("builder has no subject".into()))?;
        if schema.has_status() && self.status.is_none() {
            return Err(CredentialError::StatusNotPresent(0));
        }

        let mut map = BTreeMap::new();
        map.insert(
            CRYPTO_VERSION_STR.to_string(),
            Value::String(CRYPTO_VERSION.to_string()),
        );
        map.insert(SCHEMA_STR.to_string(), Value::String(schema.embedded_id()?));
        flatten_json(SUBJECT_STR, &subject, &mut map);
        if let Some(status) = &self.status {
            flatten_json(STATUS_STR, status, &mut map);
        }
        for (k, v) in &self.top_level_fields {
            flatten_json(k, v, &mut map);
        }

        let (names, _) = schema.flatten();
        check_leaf_sets_match(names, &map)?;
        let encoder = schema.encoder();
        let scalars = names
            .iter()
            .map(|name| Ok(encoder.encode(name, &map[name])?))
            .collect::<Result<Vec<Fr>, CredentialError>>()?;

        let params = SignatureParams::generate(sk.scheme(), scalars.len() as u32);
        let signature = Signature::new(rng, &scalars, sk, &params)?;

        Ok(Credential {
            schema,
            subject,
            status: self.status,
            top_level_fields: self.top_level_fields,
            signature,
        })
    }
}

fn check_leaf_sets_match(
    names: &[String],
    map: &BTreeMap<String, Value>,
) -> Result<(), CredentialError> {
    let expected: BTreeSet<&String> = names.iter().collect();
    let got: BTreeSet<&String> = map.keys().collect();
    if expected != got {
        return Err(CredentialError::SubjectIncompatibleWithSchema {
            missing: expected
                .difference(&got)
                .map(|s| s.to_string())
                .collect(),
            extra: got
                .difference(&expected)
                .map(|s| s.to_string())
                .collect(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ParsingOptions;
    use crate::types::{generate_keypair, SignatureScheme};
    use ark_std::rand::{rngs::StdRng, SeedableRng};
    use serde_json::json;

    fn name_schema() -> CredentialSchema {
        CredentialSchema::new(
            json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "type": "object",
                "properties": {
                    "credentialSubject": {
                        "type": "object",
                        "properties": {
                            "fname": { "type": "string" },
                            "lname": { "type": "string" }
                        }
                    }
                }
            }),
            ParsingOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn sign_verify_and_mutation_fails() {
        let mut rng = StdRng::seed_from_u64(0u64);
        let schema = name_schema();
        // 4 leaves: 2 implicit + fname + lname
        let (sk, pk) = generate_keypair(&mut rng, SignatureScheme::BbsPlus, 4);

        let mut builder = CredentialBuilder::new();
        builder
            .set_schema(schema)
            .set_subject(json!({ "fname": "John", "lname": "Smith" }));
        let cred = builder.sign(&mut rng, &sk).unwrap();
        cred.verify(&pk).unwrap();

        let mut tampered = cred.clone();
        tampered.subject = json!({ "fname": "John", "lname": "Smythe" });
        assert!(tampered.verify(&pk).is_err());
    }

    #[test]
    fn subject_must_match_schema_exactly() {
        let mut rng = StdRng::seed_from_u64(1u64);
        let schema = name_schema();
        let (sk, _) = generate_keypair(&mut rng, SignatureScheme::BbsPlus, 4);

        let mut builder = CredentialBuilder::new();
        builder
            .set_schema(schema.clone())
            .set_subject(json!({ "fname": "John" }));
        assert!(matches!(
            builder.sign(&mut rng, &sk),
            Err(CredentialError::SubjectIncompatibleWithSchema { .. })
        ));

        let mut builder = CredentialBuilder::new();
        builder.set_schema(schema).set_subject(json!({
            "fname": "John", "lname": "Smith", "mname": "Q"
        }));
        assert!(matches!(
            builder.sign(&mut rng, &sk),
            Err(CredentialError::SubjectIncompatibleWithSchema { .. })
        ));
    }

    #[test]
    fn json_round_trip() {
        let mut rng = StdRng::seed_from_u64(2u64);
        let schema = name_schema();
        let (sk, pk) = generate_keypair(&mut rng, SignatureScheme::Bbs, 4);

        let mut builder = CredentialBuilder::new();
        builder
            .set_schema(schema)
            .set_subject(json!({ "fname": "John", "lname": "Smith" }));
        let cred = builder.sign(&mut rng, &sk).unwrap();

        let json = cred.to_json().unwrap();
        let back = Credential::from_json(&json).unwrap();
        back.verify(&pk).unwrap();
        assert_eq!(back.subject, cred.subject);
    }
}
