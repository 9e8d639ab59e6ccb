mod common;

use anonymous_credentials::prelude::*;
use ark_bls12_381::G1Projective;
use ark_ec::CurveGroup;
use ark_std::{
    collections::{BTreeMap, BTreeSet},
    rand::{rngs::StdRng, SeedableRng},
    UniformRand,
};
use common::{issue, schema};
use serde_json::json;

#[test]
fn selective_disclosure_with_nested_subject() {
    // Present revealing only the first name; the SSN and last name stay
    // hidden. The specification records exactly the revealed raw values.
    let mut rng = StdRng::seed_from_u64(200u64);
    let schema = schema(
        json!({
            "fname": { "type": "string" },
            "lname": { "type": "string" },
            "sensitive": {
                "type": "object",
                "properties": { "SSN": { "$ref": "#/definitions/encryptableString" } }
            }
        }),
        false,
    );
    let (credential, _, pk) = issue(
        &mut rng,
        SignatureScheme::BbsPlus,
        schema,
        json!({ "fname": "John", "lname": "Smith", "sensitive": { "SSN": "123-456789-0" } }),
        None,
    );

    let mut builder = PresentationBuilder::new();
    let idx = builder.add_credential(credential, pk.clone()).unwrap();
    builder
        .mark_attributes_revealed(
            idx,
            ["credentialSubject.fname".to_string()].into_iter().collect(),
        )
        .unwrap();
    let presentation = builder.finalize(&mut rng, None).unwrap();

    assert_eq!(
        presentation.spec.credentials[0].revealed_attributes["credentialSubject"],
        json!({ "fname": "John" })
    );
    assert_eq!(
        presentation.spec.credentials[0].revealed_attributes["cryptoVersion"],
        json!(CRYPTO_VERSION)
    );

    presentation
        .verify(&mut rng, &[pk.clone()], &BTreeMap::new(), &BTreeMap::new())
        .unwrap();

    // JSON envelope round trip verifies identically
    let envelope = presentation.to_json().unwrap();
    let back = Presentation::from_json(&envelope).unwrap();
    back.verify(&mut rng, &[pk.clone()], &BTreeMap::new(), &BTreeMap::new())
        .unwrap();

    // claiming a different raw value for a revealed attribute must fail
    let mut forged = presentation.clone();
    forged.spec.credentials[0].revealed_attributes["credentialSubject"]["fname"] = json!("Jane");
    assert!(forged
        .verify(&mut rng, &[pk], &BTreeMap::new(), &BTreeMap::new())
        .is_err());
}

#[test]
fn nonce_binding() {
    let mut rng = StdRng::seed_from_u64(201u64);
    let schema = schema(json!({ "fname": { "type": "string" } }), false);
    let (credential, _, pk) = issue(
        &mut rng,
        SignatureScheme::Bbs,
        schema,
        json!({ "fname": "John" }),
        None,
    );

    let mut builder = PresentationBuilder::new();
    builder.add_credential(credential, pk.clone()).unwrap();
    builder.set_context("order #4521");
    let nonce = Some(b"verifier chosen nonce".to_vec());
    let presentation = builder.finalize(&mut rng, nonce).unwrap();

    presentation
        .verify(&mut rng, &[pk.clone()], &BTreeMap::new(), &BTreeMap::new())
        .unwrap();

    let mut wrong_nonce = presentation.clone();
    wrong_nonce.nonce = Some(b"another nonce".to_vec());
    assert!(wrong_nonce
        .verify(&mut rng, &[pk.clone()], &BTreeMap::new(), &BTreeMap::new())
        .is_err());

    let mut no_nonce = presentation.clone();
    no_nonce.nonce = None;
    assert!(no_nonce
        .verify(&mut rng, &[pk.clone()], &BTreeMap::new(), &BTreeMap::new())
        .is_err());

    // context is bound into the transcript as well
    let mut wrong_context = presentation;
    wrong_context.context = Some("order #9999".to_string());
    assert!(wrong_context
        .verify(&mut rng, &[pk], &BTreeMap::new(), &BTreeMap::new())
        .is_err());
}

#[test]
fn equality_across_credentials_from_two_issuers() {
    // Two issuers, two schemes; prove the first names match without revealing
    // them.
    let mut rng = StdRng::seed_from_u64(202u64);
    let props = json!({ "fname": { "type": "string" }, "city": { "type": "string" } });
    let (cred_1, _, pk_1) = issue(
        &mut rng,
        SignatureScheme::BbsPlus,
        schema(props.clone(), false),
        json!({ "fname": "John", "city": "Paris" }),
        None,
    );
    let (cred_2, _, pk_2) = issue(
        &mut rng,
        SignatureScheme::Ps,
        schema(props.clone(), false),
        json!({ "fname": "John", "city": "Lyon" }),
        None,
    );

    let mut builder = PresentationBuilder::new();
    builder.add_credential(cred_1, pk_1.clone()).unwrap();
    builder.add_credential(cred_2, pk_2.clone()).unwrap();
    builder
        .mark_attributes_equal(vec![
            (0, "credentialSubject.fname".to_string()),
            (1, "credentialSubject.fname".to_string()),
        ])
        .unwrap();
    let presentation = builder.finalize(&mut rng, None).unwrap();
    presentation
        .verify(
            &mut rng,
            &[pk_1.clone(), pk_2.clone()],
            &BTreeMap::new(),
            &BTreeMap::new(),
        )
        .unwrap();

    // unequal names under the same claim must not produce a verifying proof
    let (cred_3, _, pk_3) = issue(
        &mut rng,
        SignatureScheme::BbsPlus,
        schema(props.clone(), false),
        json!({ "fname": "John", "city": "Paris" }),
        None,
    );
    let (cred_4, _, pk_4) = issue(
        &mut rng,
        SignatureScheme::Ps,
        schema(props, false),
        json!({ "fname": "Jane", "city": "Lyon" }),
        None,
    );
    let mut builder = PresentationBuilder::new();
    builder.add_credential(cred_3, pk_3.clone()).unwrap();
    builder.add_credential(cred_4, pk_4.clone()).unwrap();
    builder
        .mark_attributes_equal(vec![
            (0, "credentialSubject.fname".to_string()),
            (1, "credentialSubject.fname".to_string()),
        ])
        .unwrap();
    let result = builder.finalize(&mut rng, None).and_then(|p| {
        p.verify(
            &mut rng,
            &[pk_3, pk_4],
            &BTreeMap::new(),
            &BTreeMap::new(),
        )
    });
    assert!(result.is_err());
}

#[test]
fn pseudonym_bound_to_attributes() {
    let mut rng = StdRng::seed_from_u64(203u64);
    let props = json!({ "fname": { "type": "string" }, "email": { "type": "string" } });
    let (credential, _, pk) = issue(
        &mut rng,
        SignatureScheme::BbsPlus,
        schema(props, false),
        json!({ "fname": "John", "email": "john@example.com" }),
        None,
    );

    let bases = (0..2)
        .map(|_| G1Projective::rand(&mut rng).into_affine())
        .collect::<Vec<_>>();
    let sk_base = G1Projective::rand(&mut rng).into_affine();
    let holder_sk = anonymous_credentials::types::Fr::rand(&mut rng);

    let mut builder = PresentationBuilder::new();
    builder.add_credential(credential, pk.clone()).unwrap();
    let mut attrs = BTreeMap::new();
    attrs.insert(
        0usize,
        vec![
            "credentialSubject.email".to_string(),
            "credentialSubject.fname".to_string(),
        ],
    );
    let commitment = builder
        .add_pseudonym(bases, attrs, Some(sk_base), Some(holder_sk))
        .unwrap();
    let presentation = builder.finalize(&mut rng, None).unwrap();

    assert_eq!(presentation.spec.pseudonyms.len(), 1);
    assert_eq!(
        presentation.spec.pseudonyms[0].commitment,
        anonymous_credentials::util::b58_encode(&commitment).unwrap()
    );
    presentation
        .verify(&mut rng, &[pk], &BTreeMap::new(), &BTreeMap::new())
        .unwrap();
}

#[test]
fn builder_rejects_bad_references() {
    let mut rng = StdRng::seed_from_u64(204u64);
    let (credential, _, pk) = issue(
        &mut rng,
        SignatureScheme::BbsPlus,
        schema(json!({ "fname": { "type": "string" } }), false),
        json!({ "fname": "John" }),
        None,
    );
    let mut builder = PresentationBuilder::new();
    builder.add_credential(credential, pk).unwrap();

    assert!(matches!(
        builder.mark_attributes_revealed(
            0,
            ["credentialSubject.age".to_string()].into_iter().collect::<BTreeSet<_>>()
        ),
        Err(CredentialError::AttributeNotFoundInSchema(_))
    ));
    assert!(matches!(
        builder.mark_attributes_revealed(5, BTreeSet::new()),
        Err(CredentialError::CredentialIndexOutOfRange(5, 1))
    ));
    assert!(matches!(
        builder.mark_attributes_revealed(
            0,
            ["cryptoVersion".to_string()].into_iter().collect::<BTreeSet<_>>()
        ),
        Err(CredentialError::InvalidPresentation(_))
    ));
    assert!(builder
        .mark_attributes_equal(vec![(0, "credentialSubject.fname".to_string())])
        .is_err());
}
