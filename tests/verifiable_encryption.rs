mod common;

use anonymous_credentials::encoding::{decode_string_reversible, encode_string_reversible};
use anonymous_credentials::prelude::*;
use ark_bls12_381::{Bls12_381, G1Affine};
use ark_std::{
    collections::BTreeMap,
    rand::{rngs::StdRng, SeedableRng},
};
use blake2::Blake2b512;
use common::{issue, schema};
use saver::setup::{setup_for_groth16, ChunkedCommitmentGens, EncryptionGens};
use serde_json::json;

const SSN: &str = "credentialSubject.sensitive.SSN";
const CHUNK_BIT_SIZE: u8 = 16;

#[test]
fn verifiably_encrypt_reversible_attribute_and_decrypt() {
    // The holder proves a SAVER ciphertext encrypts the signed SSN; the
    // decryptor recovers the exact string because the SSN leaf uses the
    // reversible encoding.
    let mut rng = StdRng::seed_from_u64(400u64);
    let schema = schema(
        json!({
            "fname": { "type": "string" },
            "sensitive": {
                "type": "object",
                "properties": { "SSN": { "$ref": "#/definitions/encryptableString" } }
            }
        }),
        false,
    );
    let ssn = "123-456789-0";
    let (credential, _, pk) = issue(
        &mut rng,
        SignatureScheme::BbsPlus,
        schema,
        json!({ "fname": "John", "sensitive": { "SSN": ssn } }),
        None,
    );

    // decryptor's setup
    let enc_gens = EncryptionGens::<Bls12_381>::new::<Blake2b512>(b"saver-test-gens");
    let comm_gens = ChunkedCommitmentGens::<G1Affine>::new::<Blake2b512>(b"saver-test-comm");
    let (snark_pk, saver_sk, ek, dk) =
        setup_for_groth16(&mut rng, CHUNK_BIT_SIZE, &enc_gens).unwrap();

    let mut builder = PresentationBuilder::new();
    builder.add_credential(credential, pk.clone()).unwrap();
    builder
        .add_predicate_param(
            "enc-gens",
            PredicateParam::SaverEncryptionGens(enc_gens.clone()),
        )
        .unwrap();
    builder
        .add_predicate_param(
            "comm-gens",
            PredicateParam::SaverCommitmentGens(comm_gens.clone()),
        )
        .unwrap();
    builder
        .add_predicate_param("ek", PredicateParam::SaverEncryptionKey(ek.clone()))
        .unwrap();
    builder
        .add_predicate_param(
            "snark-pk",
            PredicateParam::SaverProvingKey(snark_pk.clone()),
        )
        .unwrap();
    builder
        .verifiably_encrypt(0, SSN, CHUNK_BIT_SIZE, "enc-gens", "comm-gens", "ek", "snark-pk")
        .unwrap();
    let presentation = builder.finalize(&mut rng, None).unwrap();

    assert_eq!(
        presentation.spec.credentials[0].verifiable_encryptions[0].attribute_name,
        SSN
    );

    let mut verifier_params: PredicateParams = BTreeMap::new();
    verifier_params.insert(
        "enc-gens".to_string(),
        PredicateParam::SaverEncryptionGens(enc_gens.clone()),
    );
    verifier_params.insert(
        "comm-gens".to_string(),
        PredicateParam::SaverCommitmentGens(comm_gens),
    );
    verifier_params.insert("ek".to_string(), PredicateParam::SaverEncryptionKey(ek));
    verifier_params.insert(
        "snark-pk".to_string(),
        PredicateParam::SaverVerifyingKey(snark_pk.pk.vk.clone()),
    );
    presentation
        .verify(&mut rng, &[pk], &BTreeMap::new(), &verifier_params)
        .unwrap();

    // statement 0 is the signature, statement 1 the encryption
    let (ciphertext, _) = presentation.proof.0.get_saver_ciphertext_and_proof(1).unwrap();
    let (decrypted, nu) = ciphertext
        .decrypt_given_groth16_vk(&saver_sk, &dk, &snark_pk.pk.vk, CHUNK_BIT_SIZE)
        .unwrap();
    assert_eq!(decrypted, encode_string_reversible(ssn, false).unwrap());
    ciphertext
        .verify_decryption_given_groth16_vk(
            &decrypted,
            &nu,
            CHUNK_BIT_SIZE,
            &dk,
            &snark_pk.pk.vk,
            &enc_gens,
        )
        .unwrap();
    assert_eq!(decode_string_reversible(&decrypted).unwrap(), ssn);
}

#[test]
fn encryption_requires_registered_params() {
    let mut rng = StdRng::seed_from_u64(401u64);
    let schema = schema(
        json!({ "sensitive": {
            "type": "object",
            "properties": { "SSN": { "$ref": "#/definitions/encryptableString" } }
        }}),
        false,
    );
    let (credential, _, pk) = issue(
        &mut rng,
        SignatureScheme::BbsPlus,
        schema,
        json!({ "sensitive": { "SSN": "1" } }),
        None,
    );
    let mut builder = PresentationBuilder::new();
    builder.add_credential(credential, pk).unwrap();
    assert!(matches!(
        builder.verifiably_encrypt(0, SSN, CHUNK_BIT_SIZE, "a", "b", "c", "d"),
        Err(CredentialError::PredicateParamNotFound(_))
    ));
}
