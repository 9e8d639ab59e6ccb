//! Presentation verification: rebuilds the statement list from the public
//! specification and the verifier's own key material, then checks the
//! composite proof under the same transcript context and nonce.

use ark_std::{
    collections::{BTreeMap, BTreeSet},
    rand::RngCore,
    vec::Vec,
};
use proof_system::{
    meta_statement::EqualWitnesses,
    statement::{
        accumulator::{VBAccumulatorMembership, VBAccumulatorNonMembership},
        bbs_23::PoKBBSSignature23G1Verifier,
        bbs_plus::PoKBBSSignatureG1Verifier,
        bound_check_bpp::BoundCheckBpp,
        bound_check_legogroth16::BoundCheckLegoGroth16Verifier,
        bound_check_smc::BoundCheckSmc,
        bound_check_smc_with_kv::BoundCheckSmcWithKVVerifier,
        ped_comm::PedersenCommitment as PedersenCommitmentStmt,
        ps_signature::PoKPSSignatureStatement,
        r1cs_legogroth16::R1CSCircomVerifier,
        saver::SaverVerifier,
    },
};
use serde_json::Value;

use crate::accumulator::{
    accumulator_params, membership_proving_key, non_membership_proving_key, AccumulatorPublicKey,
};
use crate::composite::QuasiProofSpec;
use crate::encoding::encode_string_hash;
use crate::error::CredentialError;
use crate::presentation::{transcript_context, Presentation};
use crate::schema::{
    CredentialSchema, MEM_CHECK_STR, NON_MEM_CHECK_STR, REV_CHECK_STR, REV_ID_STR, SCHEMA_STR,
    STATUS_ID_STR, STATUS_STR,
};
use crate::setup_registry::{PredicateParam, PredicateParams, SetupParamsTracker};
use crate::types::{Fr, G1Affine, IssuerPublicKey, SignatureParams};
use crate::util::{b58_decode, flatten_json};

/// Proof-spec reconstruction state shared by presentation and blinded-request
/// verification.
pub(crate) struct VerificationParts {
    pub(crate) spec_builder: QuasiProofSpec,
    pub(crate) tracker: SetupParamsTracker,
    pub(crate) equalities: Vec<BTreeSet<(usize, usize)>>,
    pub(crate) schemas: Vec<CredentialSchema>,
}

impl Presentation {
    /// Verify against the issuer public keys (one per presented credential, in
    /// order), the accumulator public keys of status-bearing credentials
    /// (keyed by credential index) and the verifier-side predicate parameters
    /// keyed by the ids in the specification.
    pub fn verify<R: RngCore>(
        &self,
        rng: &mut R,
        public_keys: &[IssuerPublicKey],
        accumulator_public_keys: &BTreeMap<usize, AccumulatorPublicKey>,
        predicate_params: &PredicateParams,
    ) -> Result<(), CredentialError> {
        let mut parts = reconstruct_parts(
            &self.spec,
            public_keys,
            accumulator_public_keys,
            predicate_params,
        )?;
        for eq in parts.equalities {
            parts.spec_builder.add_witness_equality(EqualWitnesses(eq));
        }
        parts.spec_builder.setup_params = parts.tracker.into_params();
        parts
            .spec_builder
            .set_context(transcript_context(&self.version, &self.spec, &self.context)?);
        self.proof.verify(rng, parts.spec_builder, self.nonce.clone())
    }
}

/// Rebuild statements, witness equalities and setup params from a
/// specification and the verifier's key material.
pub(crate) fn reconstruct_parts(
    spec: &crate::presentation::specification::PresentationSpecification,
    public_keys: &[IssuerPublicKey],
    accumulator_public_keys: &BTreeMap<usize, AccumulatorPublicKey>,
    predicate_params: &PredicateParams,
) -> Result<VerificationParts, CredentialError> {
    if public_keys.len() != spec.credentials.len() {
        return Err(CredentialError::InvalidPresentation(format!(
            "{} public keys for {} credentials",
            public_keys.len(),
            spec.credentials.len()
        )));
    }

    let mut tracker = SetupParamsTracker::new();
    let mut spec_builder = QuasiProofSpec::new();
    let mut equalities: Vec<BTreeSet<(usize, usize)>> = Vec::new();

    // schemas and revealed-message maps, one per credential
    let mut schemas = Vec::with_capacity(spec.credentials.len());
    for (pc, pk) in spec.credentials.iter().zip(public_keys.iter()) {
        let schema = CredentialSchema::from_schema_field(&pc.schema)?;
        let revealed_msgs = revealed_messages(&schema, pc)?;

        let params =
            SignatureParams::generate(pk.scheme(), schema.flatten().0.len() as u32);
        match (pk, params) {
            (IssuerPublicKey::BbsPlus(pk), SignatureParams::BbsPlus(p)) => {
                spec_builder.add_statement(
                    PoKBBSSignatureG1Verifier::new_statement_from_params(
                        p,
                        pk.clone(),
                        revealed_msgs,
                    ),
                );
            }
            (IssuerPublicKey::Bbs(pk), SignatureParams::Bbs(p)) => {
                spec_builder.add_statement(
                    PoKBBSSignature23G1Verifier::new_statement_from_params(
                        p,
                        pk.clone(),
                        revealed_msgs,
                    ),
                );
            }
            (IssuerPublicKey::Ps(pk), SignatureParams::Ps(p)) => {
                spec_builder.add_statement(PoKPSSignatureStatement::new_statement_from_params(
                    p,
                    pk.clone(),
                    revealed_msgs,
                ));
            }
            _ => unreachable!("params are generated for the key's own scheme"),
        }
        schemas.push(schema);
    }

    // accumulator statements in credential order
    for (idx, pc) in spec.credentials.iter().enumerate() {
        let status = match &pc.status {
            Some(s) => s,
            None => {
                if schemas[idx].has_status() {
                    return Err(CredentialError::MissingAccumInfoForStatus(idx));
                }
                continue;
            }
        };
        let accumulated: G1Affine = b58_decode(&status.accumulated)?;
        let pk = accumulator_public_keys
            .get(&idx)
            .ok_or(CredentialError::MissingAccumInfoForStatus(idx))?;
        let rev_id_pos = position(&schemas[idx], &format!("{}.{}", STATUS_STR, REV_ID_STR))?;

        let s_idx = match status.revocation_check.as_str() {
            MEM_CHECK_STR => {
                spec_builder.add_statement(VBAccumulatorMembership::new_statement_from_params(
                    accumulator_params(),
                    pk.clone(),
                    membership_proving_key(),
                    accumulated,
                ))
            }
            NON_MEM_CHECK_STR => spec_builder.add_statement(
                VBAccumulatorNonMembership::new_statement_from_params(
                    accumulator_params(),
                    pk.clone(),
                    non_membership_proving_key(),
                    accumulated,
                ),
            ),
            other => {
                return Err(CredentialError::UnknownRevocationCheck(other.to_string()))
            }
        };
        equalities.push([(idx, rev_id_pos), (s_idx, 0)].into());
    }

    // bound checks
    for (idx, pc) in spec.credentials.iter().enumerate() {
        for bound in &pc.bounds {
            let pos = position(&schemas[idx], &bound.attribute_name)?;
            let leaf = schemas[idx]
                .leaf_type(&bound.attribute_name)
                .ok_or_else(|| {
                    CredentialError::AttributeNotFoundInSchema(bound.attribute_name.clone())
                })?;
            let min = leaf.scale_bound(&bound.attribute_name, bound.min)?;
            let max = leaf.scale_bound(&bound.attribute_name, bound.max)?;
            let param = predicate_params
                .get(&bound.param_id)
                .ok_or_else(|| CredentialError::PredicateParamNotFound(bound.param_id.clone()))?;
            bound.protocol.check_verifier_param(param)?;
            let param_idx = tracker.index_for(&bound.param_id, param);

            let statement = match bound.protocol {
                crate::setup_registry::BoundCheckProtocol::LegoGroth16 => {
                    BoundCheckLegoGroth16Verifier::new_statement_from_params_ref(
                        min, max, param_idx,
                    )?
                }
                crate::setup_registry::BoundCheckProtocol::Bpp => {
                    BoundCheckBpp::new_statement_from_params_ref(min, max, param_idx)?
                }
                crate::setup_registry::BoundCheckProtocol::Smc => {
                    BoundCheckSmc::new_statement_from_params_ref(min, max, param_idx)?
                }
                crate::setup_registry::BoundCheckProtocol::SmcKV => {
                    BoundCheckSmcWithKVVerifier::new_statement_from_params_ref(
                        min, max, param_idx,
                    )?
                }
            };
            let s_idx = spec_builder.add_statement(statement);
            equalities.push([(idx, pos), (s_idx, 0)].into());
        }
    }

    // verifiable encryptions
    for (idx, pc) in spec.credentials.iter().enumerate() {
        for enc in &pc.verifiable_encryptions {
            let pos = position(&schemas[idx], &enc.attribute_name)?;
            let gens_idx =
                tracked_kind(&mut tracker, predicate_params, &enc.encryption_gens_id, |p| {
                    matches!(p, PredicateParam::SaverEncryptionGens(_))
                })?;
            let comm_idx =
                tracked_kind(&mut tracker, predicate_params, &enc.commitment_gens_id, |p| {
                    matches!(p, PredicateParam::SaverCommitmentGens(_))
                })?;
            let ek_idx =
                tracked_kind(&mut tracker, predicate_params, &enc.encryption_key_id, |p| {
                    matches!(p, PredicateParam::SaverEncryptionKey(_))
                })?;
            let vk_idx = tracked_kind(&mut tracker, predicate_params, &enc.snark_key_id, |p| {
                matches!(p, PredicateParam::SaverVerifyingKey(_))
            })?;
            let s_idx = spec_builder.add_statement(SaverVerifier::new_statement_from_params_ref(
                enc.chunk_bit_size,
                gens_idx,
                comm_idx,
                ek_idx,
                vk_idx,
            ));
            equalities.push([(idx, pos), (s_idx, 0)].into());
        }
    }

    // Circom predicates
    for (idx, pc) in spec.credentials.iter().enumerate() {
        for predicate in &pc.circom_predicates {
            let vk = match predicate_params.get(&predicate.snark_key_id) {
                Some(PredicateParam::LegoVerifyingKey(vk)) => vk.clone(),
                Some(p) => {
                    return Err(CredentialError::IncompatiblePredicateParam(
                        p.kind().to_string(),
                    ))
                }
                None => {
                    return Err(CredentialError::PredicateParamNotFound(
                        predicate.snark_key_id.clone(),
                    ))
                }
            };
            let mut public_inputs = Vec::new();
            for var in &predicate.public_vars {
                for v in &var.values {
                    public_inputs.push(b58_decode::<Fr>(v)?);
                }
            }
            let s_idx = spec_builder.add_statement(
                R1CSCircomVerifier::new_statement_from_params(public_inputs, vk)?,
            );
            let mut wit_idx = 0usize;
            for var in &predicate.private_vars {
                for attr in &var.attribute_names {
                    let pos = position(&schemas[idx], attr)?;
                    equalities.push([(idx, pos), (s_idx, wit_idx)].into());
                    wit_idx += 1;
                }
            }
        }
    }

    // pseudonyms
    for pseudonym in &spec.pseudonyms {
        let mut bases = pseudonym
            .bases_for_attributes
            .iter()
            .map(|b| b58_decode::<G1Affine>(b))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(base) = &pseudonym.base_for_secret_key {
            bases.push(b58_decode(base)?);
        }
        let commitment: G1Affine = b58_decode(&pseudonym.commitment)?;
        let s_idx = spec_builder
            .add_statement(PedersenCommitmentStmt::new_statement_from_params(
                bases, commitment,
            ));
        let mut k = 0usize;
        for (cred_idx, names) in &pseudonym.attributes {
            if *cred_idx >= schemas.len() {
                return Err(CredentialError::CredentialIndexOutOfRange(
                    *cred_idx,
                    schemas.len(),
                ));
            }
            for name in names {
                let pos = position(&schemas[*cred_idx], name)?;
                equalities.push([(*cred_idx, pos), (s_idx, k)].into());
                k += 1;
            }
        }
    }

    // cross-credential equalities
    for refs in &spec.attribute_equalities {
        let mut set = BTreeSet::new();
        for (cred_idx, name) in refs {
            if *cred_idx >= schemas.len() {
                return Err(CredentialError::CredentialIndexOutOfRange(
                    *cred_idx,
                    schemas.len(),
                ));
            }
            set.insert((*cred_idx, position(&schemas[*cred_idx], name)?));
        }
        equalities.push(set);
    }

    Ok(VerificationParts {
        spec_builder,
        tracker,
        equalities,
        schemas,
    })
}

pub(crate) fn position(schema: &CredentialSchema, name: &str) -> Result<usize, CredentialError> {
    schema
        .index_of(name)
        .ok_or_else(|| CredentialError::AttributeNotFoundInSchema(name.to_string()))
}

pub(crate) fn tracked_kind(
    tracker: &mut SetupParamsTracker,
    predicate_params: &PredicateParams,
    id: &str,
    check: impl Fn(&PredicateParam) -> bool,
) -> Result<usize, CredentialError> {
    let param = predicate_params
        .get(id)
        .ok_or_else(|| CredentialError::PredicateParamNotFound(id.to_string()))?;
    if !check(param) {
        return Err(CredentialError::IncompatiblePredicateParam(
            param.kind().to_string(),
        ));
    }
    Ok(tracker.index_for(id, param))
}

/// Rebuild the revealed `position -> scalar` map of one credential from the
/// raw values in the specification, the embedded schema's encoder and the
/// always-revealed implicit and status leaves.
fn revealed_messages(
    schema: &CredentialSchema,
    pc: &crate::presentation::specification::PresentedCredential,
) -> Result<BTreeMap<usize, Fr>, CredentialError> {
    let mut revealed = BTreeMap::new();

    let mut raw = BTreeMap::new();
    flatten_json("", &pc.revealed_attributes, &mut raw);
    let encoder = schema.encoder();
    for (name, value) in &raw {
        let pos = position(schema, name)?;
        revealed.insert(pos, encoder.encode(name, value)?);
    }

    // the embedded schema, revealed by construction
    let schema_id = pc
        .schema
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| CredentialError::InvalidPresentation("schema field missing id".into()))?;
    revealed.insert(position(schema, SCHEMA_STR)?, encode_string_hash(schema_id));

    if let Some(status) = &pc.status {
        revealed.insert(
            position(schema, &format!("{}.{}", STATUS_STR, STATUS_ID_STR))?,
            encode_string_hash(&status.id),
        );
        revealed.insert(
            position(schema, &format!("{}.{}", STATUS_STR, REV_CHECK_STR))?,
            encode_string_hash(&status.revocation_check),
        );
    }
    Ok(revealed)
}
