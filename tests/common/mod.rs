#![allow(dead_code)]

use anonymous_credentials::prelude::*;
use ark_std::rand::rngs::StdRng;
use serde_json::{json, Value};

/// JSON-Schema document with the given subject properties.
pub fn schema_doc(subject_props: Value, with_status: bool) -> Value {
    let mut doc = json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "definitions": {
            "encryptableString": { "type": "string" },
            "encryptableCompString": { "type": "string" }
        },
        "properties": {
            "credentialSubject": { "type": "object", "properties": subject_props }
        }
    });
    if with_status {
        doc["properties"]["credentialStatus"] = json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "type": { "type": "string" },
                "revocationCheck": { "type": "string" },
                "revocationId": { "type": "string" }
            }
        });
    }
    doc
}

pub fn schema(subject_props: Value, with_status: bool) -> CredentialSchema {
    CredentialSchema::new(schema_doc(subject_props, with_status), ParsingOptions::default())
        .unwrap()
}

/// Issue a credential over the given subject, generating a fresh issuer
/// keypair sized to the schema.
pub fn issue(
    rng: &mut StdRng,
    scheme: SignatureScheme,
    schema: CredentialSchema,
    subject: Value,
    status: Option<(&str, &str, &str)>,
) -> (Credential, IssuerSecretKey, IssuerPublicKey) {
    let count = schema.flatten().0.len() as u32;
    let (sk, pk) = generate_keypair(rng, scheme, count);
    let mut builder = CredentialBuilder::new();
    builder.set_schema(schema).set_subject(subject);
    if let Some((registry_id, check, rev_id)) = status {
        builder.set_status(registry_id, check, rev_id).unwrap();
    }
    let credential = builder.sign(rng, &sk).unwrap();
    credential.verify(&pk).unwrap();
    (credential, sk, pk)
}
