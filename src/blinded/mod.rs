//! Blind issuance: a holder commits to the attributes it wants signed without
//! the issuer seeing them, proves knowledge of the committed values (and
//! anything else a presentation can prove) in one composite proof, and the
//! issuer signs over the commitment. BBS+ needs a holder-kept blinding that
//! unblinds the returned signature; BBS signs the commitment directly and the
//! request is self-contained.

use ark_ec::{CurveGroup, VariableBaseMSM};
use ark_std::{
    collections::{BTreeMap, BTreeSet},
    rand::RngCore,
    string::String,
    vec::Vec,
};
use proof_system::{
    meta_statement::EqualWitnesses,
    statement::{
        bound_check_bpp::BoundCheckBpp,
        bound_check_legogroth16::{BoundCheckLegoGroth16Prover, BoundCheckLegoGroth16Verifier},
        bound_check_smc::BoundCheckSmc,
        bound_check_smc_with_kv::{BoundCheckSmcWithKVProver, BoundCheckSmcWithKVVerifier},
        ped_comm::PedersenCommitment as PedersenCommitmentStmt,
        saver::{SaverProver, SaverVerifier},
    },
    witness::Witness,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::accumulator::AccumulatorPublicKey;
use crate::composite::CompositeProof;
use crate::credential::{Credential, CRYPTO_VERSION};
use crate::error::CredentialError;
use crate::presentation::{
    builder::PresentationBuilder,
    specification::{
        AttributeRef, PresentationSpecification, PresentedBound, PresentedVerifiableEncryption,
    },
    verifier::{position, reconstruct_parts, tracked_kind},
};
use crate::schema::{CredentialSchema, CRYPTO_VERSION_STR, SCHEMA_STR, STATUS_STR, SUBJECT_STR};
use crate::setup_registry::{BoundCheckProtocol, PredicateParam, PredicateParams};
use crate::types::{
    Fr, G1Affine, IssuerSecretKey, Signature, SignatureParams, SignatureScheme,
};
use crate::util::{b58_decode, b58_encode, flatten_json};

pub const BLINDED_REQUEST_VERSION: &str = "0.1.0";

/// Public description of the blinded part of a request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlindedRequestSpec {
    pub scheme: SignatureScheme,
    /// `credentialSchema` field of the credential being requested.
    pub schema: Value,
    /// base58 commitment to the blinded attributes.
    pub commitment: String,
    /// Full dotted names of the blinded attributes, in their flattened order.
    pub blinded_attribute_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bounds: Vec<PresentedBound>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verifiable_encryptions: Vec<PresentedVerifiableEncryption>,
    /// Equalities between a blinded attribute and attributes of presented
    /// credentials.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blinded_attribute_equalities: Vec<(String, Vec<AttributeRef>)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pseudonyms: Vec<BlindedPseudonym>,
}

/// A pseudonym committing to blinded attributes (and optionally a holder
/// secret key).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlindedPseudonym {
    /// base58 of the commitment group element
    pub commitment: String,
    /// base58 bases, one per committed blinded attribute in order
    pub bases_for_attributes: Vec<String>,
    pub attribute_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_for_secret_key: Option<String>,
}

/// A self-verifiable request for a blindly-signed credential.
#[derive(Clone, Debug)]
pub struct BlindedCredentialRequest {
    pub version: String,
    pub context: Option<String>,
    pub nonce: Option<Vec<u8>>,
    pub presentation_spec: PresentationSpecification,
    pub blind_spec: BlindedRequestSpec,
    pub proof: CompositeProof,
}

#[derive(Clone, Debug)]
struct BlindedBoundRequest {
    attribute: String,
    min: f64,
    max: f64,
    param_id: String,
}

#[derive(Clone, Debug)]
struct BlindedEncryptionRequest {
    attribute: String,
    chunk_bit_size: u8,
    encryption_gens_id: String,
    commitment_gens_id: String,
    encryption_key_id: String,
    snark_key_id: String,
}

#[derive(Clone, Debug)]
struct BlindedPseudonymRequest {
    bases_for_attributes: Vec<G1Affine>,
    attribute_names: Vec<String>,
    base_for_secret_key: Option<G1Affine>,
    secret_key: Option<Fr>,
}

/// Drives a [`PresentationBuilder`] and additionally commits to the subject
/// attributes the issuer will sign without seeing.
pub struct BlindedCredentialRequestBuilder {
    /// Presentation operations over already-held credentials (reveals,
    /// equalities, status, predicates, pseudonyms) work as usual through this.
    pub presentation: PresentationBuilder,
    schema: CredentialSchema,
    subject_to_blind: Value,
    scheme: SignatureScheme,
    blinded_bounds: Vec<BlindedBoundRequest>,
    blinded_encryptions: Vec<BlindedEncryptionRequest>,
    blinded_equalities: Vec<(String, Vec<(usize, String)>)>,
    blinded_pseudonyms: Vec<BlindedPseudonymRequest>,
}

impl BlindedCredentialRequestBuilder {
    pub fn new(
        scheme: SignatureScheme,
        schema: CredentialSchema,
        subject_to_blind: Value,
    ) -> Result<Self, CredentialError> {
        if scheme == SignatureScheme::Ps {
            return Err(CredentialError::UnsupportedSchemeForBlindIssuance(
                "PS".into(),
            ));
        }
        // every blinded leaf must exist in the target schema
        let mut blinded = BTreeMap::new();
        flatten_json(SUBJECT_STR, &subject_to_blind, &mut blinded);
        for name in blinded.keys() {
            if schema.index_of(name).is_none() {
                return Err(CredentialError::BlindedAttributeNotInSchema(name.clone()));
            }
        }
        Ok(Self {
            presentation: PresentationBuilder::new(),
            schema,
            subject_to_blind,
            scheme,
            blinded_bounds: Vec::new(),
            blinded_encryptions: Vec::new(),
            blinded_equalities: Vec::new(),
            blinded_pseudonyms: Vec::new(),
        })
    }

    /// Require a blinded attribute to equal attributes of presented
    /// credentials.
    pub fn mark_blinded_attribute_equal(
        &mut self,
        blinded_attribute: &str,
        refs: Vec<(usize, String)>,
    ) -> Result<(), CredentialError> {
        self.blinded_position(blinded_attribute)?;
        self.blinded_equalities
            .push((blinded_attribute.to_string(), refs));
        Ok(())
    }

    pub fn enforce_bounds_on_blinded_attribute(
        &mut self,
        blinded_attribute: &str,
        min: f64,
        max: f64,
        param_id: &str,
        param: Option<PredicateParam>,
    ) -> Result<(), CredentialError> {
        if min >= max {
            return Err(CredentialError::InvalidBounds(
                format!("{}", min),
                format!("{}", max),
            ));
        }
        self.blinded_position(blinded_attribute)?;
        let leaf = self
            .schema
            .leaf_type(blinded_attribute)
            .ok_or_else(|| CredentialError::BlindedAttributeNotInSchema(blinded_attribute.into()))?;
        leaf.scale_bound(blinded_attribute, min)?;
        leaf.scale_bound(blinded_attribute, max)?;
        if let Some(p) = param {
            if !self.presentation.predicate_params.contains_key(param_id) {
                self.presentation.add_predicate_param(param_id, p)?;
            }
        }
        self.blinded_bounds.push(BlindedBoundRequest {
            attribute: blinded_attribute.to_string(),
            min,
            max,
            param_id: param_id.to_string(),
        });
        Ok(())
    }

    pub fn verifiably_encrypt_blinded_attribute(
        &mut self,
        blinded_attribute: &str,
        chunk_bit_size: u8,
        encryption_gens_id: &str,
        commitment_gens_id: &str,
        encryption_key_id: &str,
        snark_key_id: &str,
    ) -> Result<(), CredentialError> {
        self.blinded_position(blinded_attribute)?;
        self.blinded_encryptions.push(BlindedEncryptionRequest {
            attribute: blinded_attribute.to_string(),
            chunk_bit_size,
            encryption_gens_id: encryption_gens_id.to_string(),
            commitment_gens_id: commitment_gens_id.to_string(),
            encryption_key_id: encryption_key_id.to_string(),
            snark_key_id: snark_key_id.to_string(),
        });
        Ok(())
    }

    /// Commit to blinded attributes (and optionally a holder secret key)
    /// under the given bases.
    pub fn add_pseudonym_to_blinded_attributes(
        &mut self,
        bases_for_attributes: Vec<G1Affine>,
        attribute_names: Vec<String>,
        base_for_secret_key: Option<G1Affine>,
        secret_key: Option<Fr>,
    ) -> Result<(), CredentialError> {
        if base_for_secret_key.is_some() != secret_key.is_some() {
            return Err(CredentialError::InvalidBlindedRequest(
                "pseudonym secret key and its base come together".into(),
            ));
        }
        if bases_for_attributes.len() != attribute_names.len() {
            return Err(CredentialError::InvalidBlindedRequest(format!(
                "pseudonym has {} bases for {} attributes",
                bases_for_attributes.len(),
                attribute_names.len()
            )));
        }
        for name in &attribute_names {
            self.blinded_position(name)?;
        }
        self.blinded_pseudonyms.push(BlindedPseudonymRequest {
            bases_for_attributes,
            attribute_names,
            base_for_secret_key,
            secret_key,
        });
        Ok(())
    }

    /// Blinded attribute names in flattened order with their positions in the
    /// final credential's attribute vector and their encoded values.
    fn blinded_attributes(&self) -> Result<(Vec<String>, Vec<usize>, Vec<Fr>), CredentialError> {
        let mut raw = BTreeMap::new();
        flatten_json(SUBJECT_STR, &self.subject_to_blind, &mut raw);
        let encoder = self.schema.encoder();
        let mut names = Vec::with_capacity(raw.len());
        let mut positions = Vec::with_capacity(raw.len());
        let mut scalars = Vec::with_capacity(raw.len());
        // BTreeMap iteration matches the schema's lexicographic leaf order
        for (name, value) in &raw {
            let pos = self
                .schema
                .index_of(name)
                .ok_or_else(|| CredentialError::BlindedAttributeNotInSchema(name.clone()))?;
            names.push(name.clone());
            positions.push(pos);
            scalars.push(encoder.encode(name, value)?);
        }
        Ok((names, positions, scalars))
    }

    fn blinded_position(&self, name: &str) -> Result<usize, CredentialError> {
        let mut raw = BTreeMap::new();
        flatten_json(SUBJECT_STR, &self.subject_to_blind, &mut raw);
        raw.keys()
            .position(|n| n == name)
            .ok_or_else(|| CredentialError::BlindedAttributeNotInSchema(name.to_string()))
    }

    /// Produce the request and, for BBS+, the blinding needed to unblind the
    /// issued credential.
    pub fn finalize<R: RngCore>(
        self,
        rng: &mut R,
        nonce: Option<Vec<u8>>,
    ) -> Result<(BlindedCredentialRequest, Option<Fr>), CredentialError> {
        let (names, positions, scalars) = self.blinded_attributes()?;
        let total = self.schema.flatten().0.len() as u32;
        let params = SignatureParams::generate(self.scheme, total);

        // commitment, Schnorr bases and witness vector per scheme
        let (commitment, bases, witness_scalars, blinding, offset) = match &params {
            SignatureParams::BbsPlus(p) => {
                let blinding = {
                    use ark_std::UniformRand;
                    Fr::rand(rng)
                };
                let committed: BTreeMap<usize, &Fr> =
                    positions.iter().cloned().zip(scalars.iter()).collect();
                let commitment = p.commit_to_messages(committed, &blinding)?;
                let mut bases = vec![p.h_0];
                for pos in &positions {
                    bases.push(p.h[*pos]);
                }
                let mut witness_scalars = vec![blinding];
                witness_scalars.extend(scalars.iter().cloned());
                (commitment, bases, witness_scalars, Some(blinding), 1usize)
            }
            SignatureParams::Bbs(p) => {
                let bases = positions.iter().map(|pos| p.h[*pos]).collect::<Vec<_>>();
                let commitment =
                    ark_bls12_381::G1Projective::msm_unchecked(&bases, &scalars).into_affine();
                (commitment, bases, scalars.clone(), None, 0usize)
            }
            SignatureParams::Ps(_) => {
                return Err(CredentialError::UnsupportedSchemeForBlindIssuance(
                    "PS".into(),
                ))
            }
        };

        let predicate_params = self.presentation.predicate_params.clone();
        let mut parts = self.presentation.build_parts()?;

        let ped_idx = parts.spec_builder.add_statement(
            PedersenCommitmentStmt::new_statement_from_params(bases, commitment),
        );
        parts
            .witnesses
            .add(Witness::PedersenCommitment(witness_scalars));

        // equalities between blinded attributes and credential attributes
        for (blinded_name, refs) in &self.blinded_equalities {
            let k = names
                .iter()
                .position(|n| n == blinded_name)
                .ok_or_else(|| CredentialError::BlindedAttributeNotInSchema(blinded_name.clone()))?;
            let mut set: BTreeSet<(usize, usize)> = [(ped_idx, offset + k)].into();
            for (cred_idx, attr) in refs {
                // resolve against the schemas recorded in the presentation spec
                let schema = CredentialSchema::from_schema_field(
                    &parts
                        .spec
                        .credentials
                        .get(*cred_idx)
                        .ok_or(CredentialError::CredentialIndexOutOfRange(
                            *cred_idx,
                            parts.spec.credentials.len(),
                        ))?
                        .schema,
                )?;
                set.insert((*cred_idx, position(&schema, attr)?));
            }
            parts.equalities.push(set);
        }

        // bound checks on blinded attributes
        let mut presented_bounds = Vec::with_capacity(self.blinded_bounds.len());
        for req in &self.blinded_bounds {
            let k = names
                .iter()
                .position(|n| n == &req.attribute)
                .ok_or_else(|| CredentialError::BlindedAttributeNotInSchema(req.attribute.clone()))?;
            let leaf = self
                .schema
                .leaf_type(&req.attribute)
                .ok_or_else(|| CredentialError::BlindedAttributeNotInSchema(req.attribute.clone()))?;
            let min = leaf.scale_bound(&req.attribute, req.min)?;
            let max = leaf.scale_bound(&req.attribute, req.max)?;
            let param = predicate_params
                .get(&req.param_id)
                .ok_or_else(|| CredentialError::PredicateParamNotFound(req.param_id.clone()))?;
            let protocol = BoundCheckProtocol::for_prover_param(param)?;
            let param_idx = parts.tracker.index_for(&req.param_id, param);
            let (statement, witness) = match protocol {
                BoundCheckProtocol::LegoGroth16 => (
                    BoundCheckLegoGroth16Prover::new_statement_from_params_ref(min, max, param_idx)?,
                    Witness::BoundCheckLegoGroth16(scalars[k]),
                ),
                BoundCheckProtocol::Bpp => (
                    BoundCheckBpp::new_statement_from_params_ref(min, max, param_idx)?,
                    Witness::BoundCheckBpp(scalars[k]),
                ),
                BoundCheckProtocol::Smc => (
                    BoundCheckSmc::new_statement_from_params_ref(min, max, param_idx)?,
                    Witness::BoundCheckSmc(scalars[k]),
                ),
                BoundCheckProtocol::SmcKV => (
                    BoundCheckSmcWithKVProver::new_statement_from_params_ref(min, max, param_idx)?,
                    Witness::BoundCheckSmcWithKV(scalars[k]),
                ),
            };
            let s_idx = parts.spec_builder.add_statement(statement);
            parts.witnesses.add(witness);
            parts
                .equalities
                .push([(ped_idx, offset + k), (s_idx, 0)].into());
            presented_bounds.push(PresentedBound {
                attribute_name: req.attribute.clone(),
                min: req.min,
                max: req.max,
                param_id: req.param_id.clone(),
                protocol,
            });
        }

        // verifiable encryption of blinded attributes
        let mut presented_encryptions = Vec::with_capacity(self.blinded_encryptions.len());
        for req in &self.blinded_encryptions {
            let k = names
                .iter()
                .position(|n| n == &req.attribute)
                .ok_or_else(|| CredentialError::BlindedAttributeNotInSchema(req.attribute.clone()))?;
            let gens_idx = tracked_kind(
                &mut parts.tracker,
                &predicate_params,
                &req.encryption_gens_id,
                |p| matches!(p, PredicateParam::SaverEncryptionGens(_)),
            )?;
            let comm_idx = tracked_kind(
                &mut parts.tracker,
                &predicate_params,
                &req.commitment_gens_id,
                |p| matches!(p, PredicateParam::SaverCommitmentGens(_)),
            )?;
            let ek_idx = tracked_kind(
                &mut parts.tracker,
                &predicate_params,
                &req.encryption_key_id,
                |p| matches!(p, PredicateParam::SaverEncryptionKey(_)),
            )?;
            let pk_idx = tracked_kind(
                &mut parts.tracker,
                &predicate_params,
                &req.snark_key_id,
                |p| matches!(p, PredicateParam::SaverProvingKey(_)),
            )?;
            let s_idx = parts
                .spec_builder
                .add_statement(SaverProver::new_statement_from_params_ref(
                    req.chunk_bit_size,
                    gens_idx,
                    comm_idx,
                    ek_idx,
                    pk_idx,
                ));
            parts.witnesses.add(Witness::Saver(scalars[k]));
            parts
                .equalities
                .push([(ped_idx, offset + k), (s_idx, 0)].into());
            presented_encryptions.push(PresentedVerifiableEncryption {
                attribute_name: req.attribute.clone(),
                chunk_bit_size: req.chunk_bit_size,
                encryption_gens_id: req.encryption_gens_id.clone(),
                commitment_gens_id: req.commitment_gens_id.clone(),
                encryption_key_id: req.encryption_key_id.clone(),
                snark_key_id: req.snark_key_id.clone(),
            });
        }

        // pseudonyms over blinded attributes
        let mut presented_pseudonyms = Vec::with_capacity(self.blinded_pseudonyms.len());
        for pseudonym in &self.blinded_pseudonyms {
            let mut ks = Vec::with_capacity(pseudonym.attribute_names.len());
            let mut committed = Vec::with_capacity(pseudonym.attribute_names.len());
            for name in &pseudonym.attribute_names {
                let k = names.iter().position(|n| n == name).ok_or_else(|| {
                    CredentialError::BlindedAttributeNotInSchema(name.clone())
                })?;
                ks.push(k);
                committed.push(scalars[k]);
            }
            let mut all_bases = pseudonym.bases_for_attributes.clone();
            if let Some(base) = &pseudonym.base_for_secret_key {
                all_bases.push(*base);
                committed.push(pseudonym.secret_key.unwrap());
            }
            let pseudonym_commitment =
                ark_bls12_381::G1Projective::msm_unchecked(&all_bases, &committed).into_affine();
            let s_idx = parts.spec_builder.add_statement(
                PedersenCommitmentStmt::new_statement_from_params(all_bases, pseudonym_commitment),
            );
            parts.witnesses.add(Witness::PedersenCommitment(committed));
            for (j, k) in ks.iter().enumerate() {
                parts
                    .equalities
                    .push([(ped_idx, offset + k), (s_idx, j)].into());
            }
            presented_pseudonyms.push(BlindedPseudonym {
                commitment: b58_encode(&pseudonym_commitment)?,
                bases_for_attributes: pseudonym
                    .bases_for_attributes
                    .iter()
                    .map(b58_encode)
                    .collect::<Result<Vec<_>, _>>()?,
                attribute_names: pseudonym.attribute_names.clone(),
                base_for_secret_key: pseudonym
                    .base_for_secret_key
                    .as_ref()
                    .map(b58_encode)
                    .transpose()?,
            });
        }

        let blind_spec = BlindedRequestSpec {
            scheme: self.scheme,
            schema: self.schema.to_schema_field()?,
            commitment: b58_encode(&commitment)?,
            blinded_attribute_names: names,
            bounds: presented_bounds,
            verifiable_encryptions: presented_encryptions,
            blinded_attribute_equalities: self.blinded_equalities.clone(),
            pseudonyms: presented_pseudonyms,
        };

        for eq in parts.equalities {
            parts.spec_builder.add_witness_equality(EqualWitnesses(eq));
        }
        parts.spec_builder.setup_params = parts.tracker.into_params();
        parts.spec_builder.set_context(request_context(
            BLINDED_REQUEST_VERSION,
            &parts.spec,
            &blind_spec,
            &parts.context,
        )?);

        let proof =
            CompositeProof::generate(rng, parts.spec_builder, parts.witnesses, nonce.clone())?;

        Ok((
            BlindedCredentialRequest {
                version: BLINDED_REQUEST_VERSION.to_string(),
                context: parts.context,
                nonce,
                presentation_spec: parts.spec,
                blind_spec,
                proof,
            },
            blinding,
        ))
    }
}

/// Blinded requests bind `(version, presentation spec, blinded spec, context)`
/// into the transcript.
fn request_context(
    version: &str,
    spec: &PresentationSpecification,
    blind_spec: &BlindedRequestSpec,
    context: &Option<String>,
) -> Result<Vec<u8>, CredentialError> {
    let mut bytes = version.as_bytes().to_vec();
    bytes.push(0u8);
    bytes.extend_from_slice(&serde_json::to_vec(spec)?);
    bytes.push(0u8);
    bytes.extend_from_slice(&serde_json::to_vec(blind_spec)?);
    bytes.push(0u8);
    if let Some(ctx) = context {
        bytes.extend_from_slice(ctx.as_bytes());
    }
    Ok(bytes)
}

impl BlindedCredentialRequest {
    /// Issuer-side check: the composite proof must hold for the commitment and
    /// every declared predicate before anything gets signed.
    pub fn verify<R: RngCore>(
        &self,
        rng: &mut R,
        public_keys: &[crate::types::IssuerPublicKey],
        accumulator_public_keys: &BTreeMap<usize, AccumulatorPublicKey>,
        predicate_params: &PredicateParams,
    ) -> Result<(), CredentialError> {
        let mut parts = reconstruct_parts(
            &self.presentation_spec,
            public_keys,
            accumulator_public_keys,
            predicate_params,
        )?;

        let schema = CredentialSchema::from_schema_field(&self.blind_spec.schema)?;
        let positions = self
            .blind_spec
            .blinded_attribute_names
            .iter()
            .map(|n| position(&schema, n))
            .collect::<Result<Vec<_>, _>>()?;
        let total = schema.flatten().0.len() as u32;
        let params = SignatureParams::generate(self.blind_spec.scheme, total);
        let commitment: G1Affine = b58_decode(&self.blind_spec.commitment)?;

        let (bases, offset) = match &params {
            SignatureParams::BbsPlus(p) => {
                let mut bases = vec![p.h_0];
                for pos in &positions {
                    bases.push(p.h[*pos]);
                }
                (bases, 1usize)
            }
            SignatureParams::Bbs(p) => (
                positions.iter().map(|pos| p.h[*pos]).collect::<Vec<_>>(),
                0usize,
            ),
            SignatureParams::Ps(_) => {
                return Err(CredentialError::UnsupportedSchemeForBlindIssuance(
                    "PS".into(),
                ))
            }
        };
        let ped_idx = parts.spec_builder.add_statement(
            PedersenCommitmentStmt::new_statement_from_params(bases, commitment),
        );

        for (blinded_name, refs) in &self.blind_spec.blinded_attribute_equalities {
            let k = self
                .blind_spec
                .blinded_attribute_names
                .iter()
                .position(|n| n == blinded_name)
                .ok_or_else(|| CredentialError::BlindedAttributeNotInSchema(blinded_name.clone()))?;
            let mut set: BTreeSet<(usize, usize)> = [(ped_idx, offset + k)].into();
            for (cred_idx, attr) in refs {
                if *cred_idx >= parts.schemas.len() {
                    return Err(CredentialError::CredentialIndexOutOfRange(
                        *cred_idx,
                        parts.schemas.len(),
                    ));
                }
                set.insert((*cred_idx, position(&parts.schemas[*cred_idx], attr)?));
            }
            parts.equalities.push(set);
        }

        for bound in &self.blind_spec.bounds {
            let k = self
                .blind_spec
                .blinded_attribute_names
                .iter()
                .position(|n| n == &bound.attribute_name)
                .ok_or_else(|| {
                    CredentialError::BlindedAttributeNotInSchema(bound.attribute_name.clone())
                })?;
            let leaf = schema.leaf_type(&bound.attribute_name).ok_or_else(|| {
                CredentialError::BlindedAttributeNotInSchema(bound.attribute_name.clone())
            })?;
            let min = leaf.scale_bound(&bound.attribute_name, bound.min)?;
            let max = leaf.scale_bound(&bound.attribute_name, bound.max)?;
            let param = predicate_params
                .get(&bound.param_id)
                .ok_or_else(|| CredentialError::PredicateParamNotFound(bound.param_id.clone()))?;
            bound.protocol.check_verifier_param(param)?;
            let param_idx = parts.tracker.index_for(&bound.param_id, param);
            let statement = match bound.protocol {
                BoundCheckProtocol::LegoGroth16 => {
                    BoundCheckLegoGroth16Verifier::new_statement_from_params_ref(
                        min, max, param_idx,
                    )?
                }
                BoundCheckProtocol::Bpp => {
                    BoundCheckBpp::new_statement_from_params_ref(min, max, param_idx)?
                }
                BoundCheckProtocol::Smc => {
                    BoundCheckSmc::new_statement_from_params_ref(min, max, param_idx)?
                }
                BoundCheckProtocol::SmcKV => {
                    BoundCheckSmcWithKVVerifier::new_statement_from_params_ref(min, max, param_idx)?
                }
            };
            let s_idx = parts.spec_builder.add_statement(statement);
            parts
                .equalities
                .push([(ped_idx, offset + k), (s_idx, 0)].into());
        }

        for enc in &self.blind_spec.verifiable_encryptions {
            let k = self
                .blind_spec
                .blinded_attribute_names
                .iter()
                .position(|n| n == &enc.attribute_name)
                .ok_or_else(|| {
                    CredentialError::BlindedAttributeNotInSchema(enc.attribute_name.clone())
                })?;
            let gens_idx = tracked_kind(
                &mut parts.tracker,
                predicate_params,
                &enc.encryption_gens_id,
                |p| matches!(p, PredicateParam::SaverEncryptionGens(_)),
            )?;
            let comm_idx = tracked_kind(
                &mut parts.tracker,
                predicate_params,
                &enc.commitment_gens_id,
                |p| matches!(p, PredicateParam::SaverCommitmentGens(_)),
            )?;
            let ek_idx = tracked_kind(
                &mut parts.tracker,
                predicate_params,
                &enc.encryption_key_id,
                |p| matches!(p, PredicateParam::SaverEncryptionKey(_)),
            )?;
            let vk_idx = tracked_kind(
                &mut parts.tracker,
                predicate_params,
                &enc.snark_key_id,
                |p| matches!(p, PredicateParam::SaverVerifyingKey(_)),
            )?;
            let s_idx = parts
                .spec_builder
                .add_statement(SaverVerifier::new_statement_from_params_ref(
                    enc.chunk_bit_size,
                    gens_idx,
                    comm_idx,
                    ek_idx,
                    vk_idx,
                ));
            parts
                .equalities
                .push([(ped_idx, offset + k), (s_idx, 0)].into());
        }

        for pseudonym in &self.blind_spec.pseudonyms {
            let mut bases = pseudonym
                .bases_for_attributes
                .iter()
                .map(|b| b58_decode::<G1Affine>(b))
                .collect::<Result<Vec<_>, _>>()?;
            if let Some(base) = &pseudonym.base_for_secret_key {
                bases.push(b58_decode(base)?);
            }
            let pseudonym_commitment: G1Affine = b58_decode(&pseudonym.commitment)?;
            let s_idx = parts.spec_builder.add_statement(
                PedersenCommitmentStmt::new_statement_from_params(bases, pseudonym_commitment),
            );
            for (j, name) in pseudonym.attribute_names.iter().enumerate() {
                let k = self
                    .blind_spec
                    .blinded_attribute_names
                    .iter()
                    .position(|n| n == name)
                    .ok_or_else(|| CredentialError::BlindedAttributeNotInSchema(name.clone()))?;
                parts
                    .equalities
                    .push([(ped_idx, offset + k), (s_idx, j)].into());
            }
        }

        for eq in parts.equalities {
            parts.spec_builder.add_witness_equality(EqualWitnesses(eq));
        }
        parts.spec_builder.setup_params = parts.tracker.into_params();
        parts.spec_builder.set_context(request_context(
            &self.version,
            &self.presentation_spec,
            &self.blind_spec,
            &self.context,
        )?);

        self.proof.verify(rng, parts.spec_builder, self.nonce.clone())
    }

    /// Issuer signs over the commitment and the attributes it knows. The known
    /// part must cover exactly the non-blinded leaves of the schema.
    pub fn blind_sign<R: RngCore>(
        &self,
        rng: &mut R,
        sk: &IssuerSecretKey,
        known_subject: &Value,
        status: Option<Value>,
        top_level_fields: BTreeMap<String, Value>,
    ) -> Result<BlindedCredential, CredentialError> {
        let schema = CredentialSchema::from_schema_field(&self.blind_spec.schema)?;

        let mut known = BTreeMap::new();
        known.insert(
            CRYPTO_VERSION_STR.to_string(),
            Value::String(CRYPTO_VERSION.to_string()),
        );
        known.insert(SCHEMA_STR.to_string(), Value::String(schema.embedded_id()?));
        flatten_json(SUBJECT_STR, known_subject, &mut known);
        if let Some(status) = &status {
            flatten_json(STATUS_STR, status, &mut known);
        }
        for (key, value) in &top_level_fields {
            flatten_json(key, value, &mut known);
        }

        // known ∪ blinded must be exactly the schema's leaves, disjointly
        let (names, _) = schema.flatten();
        let blinded: BTreeSet<&String> = self.blind_spec.blinded_attribute_names.iter().collect();
        for name in known.keys() {
            if blinded.contains(name) {
                return Err(CredentialError::BlindedAttributeOverlapsKnown(name.clone()));
            }
        }
        let mut missing = BTreeSet::new();
        let mut extra: BTreeSet<String> = known.keys().cloned().collect();
        for name in names {
            extra.remove(name);
            if !known.contains_key(name) && !blinded.contains(name) {
                missing.insert(name.clone());
            }
        }
        if !missing.is_empty() || !extra.is_empty() {
            return Err(CredentialError::SubjectIncompatibleWithSchema { missing, extra });
        }

        let encoder = schema.encoder();
        let mut known_scalars = BTreeMap::new();
        for (pos, name) in names.iter().enumerate() {
            if let Some(value) = known.get(name) {
                known_scalars.insert(pos, encoder.encode(name, value)?);
            }
        }
        let uncommitted: BTreeMap<usize, &Fr> =
            known_scalars.iter().map(|(k, v)| (*k, v)).collect();

        let commitment: G1Affine = b58_decode(&self.blind_spec.commitment)?;
        let params = SignatureParams::generate(self.blind_spec.scheme, names.len() as u32);
        let signature = match (sk, &params) {
            (IssuerSecretKey::BbsPlus(sk), SignatureParams::BbsPlus(p)) => {
                BlindedSignature::BbsPlus(crate::types::BBSPlusSignature::new_with_committed_messages(
                    rng,
                    &commitment,
                    uncommitted,
                    sk,
                    p,
                )?)
            }
            (IssuerSecretKey::Bbs(sk), SignatureParams::Bbs(p)) => {
                BlindedSignature::Bbs(crate::types::BBSSignature::new_with_committed_messages(
                    rng,
                    &commitment,
                    uncommitted,
                    sk,
                    p,
                )?)
            }
            _ => {
                return Err(CredentialError::IncompatibleScheme(
                    format!("{:?}", sk.scheme()),
                    format!("{:?}", self.blind_spec.scheme),
                ))
            }
        };

        Ok(BlindedCredential {
            schema,
            known_subject: known_subject.clone(),
            status,
            top_level_fields,
            signature,
        })
    }
}

/// Signature over a commitment; BBS+ still carries the holder's blinding.
#[derive(Clone, Debug)]
pub enum BlindedSignature {
    Bbs(crate::types::BBSSignature),
    BbsPlus(crate::types::BBSPlusSignature),
}

/// What the issuer returns: the known part of the credential plus a signature
/// the holder completes with its blinded subject (and blinding, for BBS+).
#[derive(Clone, Debug)]
pub struct BlindedCredential {
    pub schema: CredentialSchema,
    pub known_subject: Value,
    pub status: Option<Value>,
    pub top_level_fields: BTreeMap<String, Value>,
    pub signature: BlindedSignature,
}

impl BlindedCredential {
    /// Merge the holder's blinded subject back in and unblind the signature.
    pub fn to_credential(
        self,
        blinding: Option<&Fr>,
        subject_to_blind: &Value,
    ) -> Result<Credential, CredentialError> {
        let subject = merge_disjoint(&self.known_subject, subject_to_blind)?;
        let signature = match self.signature {
            BlindedSignature::BbsPlus(sig) => {
                let blinding = blinding.ok_or_else(|| {
                    CredentialError::InvalidBlindedRequest("BBS+ unblinding needs the blinding".into())
                })?;
                Signature::BbsPlus(sig.unblind(blinding))
            }
            BlindedSignature::Bbs(sig) => Signature::Bbs(sig),
        };
        Ok(Credential {
            schema: self.schema,
            subject,
            status: self.status,
            top_level_fields: self.top_level_fields,
            signature,
        })
    }
}

/// Deep-merge two JSON trees with disjoint leaf sets.
fn merge_disjoint(a: &Value, b: &Value) -> Result<Value, CredentialError> {
    let mut leaves = BTreeMap::new();
    flatten_json("", a, &mut leaves);
    let mut b_leaves = BTreeMap::new();
    flatten_json("", b, &mut b_leaves);
    for (name, value) in b_leaves {
        if leaves.insert(name.clone(), value).is_some() {
            return Err(CredentialError::BlindedAttributeOverlapsKnown(name));
        }
    }
    let mut merged = Value::Object(serde_json::Map::new());
    for (name, value) in leaves {
        crate::util::insert_at_path(&mut merged, &name, value);
    }
    Ok(merged)
}

impl BlindedCredentialRequest {
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
        doc.insert(
            "spec".to_string(),
            serde_json::to_value(&self.presentation_spec)?,
        );
        doc.insert(
            "blindCredentialRequest".to_string(),
            serde_json::to_value(&self.blind_spec)?,
        );
        doc.insert("proof".to_string(), Value::String(self.proof.to_base58()?));
        Ok(Value::Object(doc))
    }

    pub fn from_json(json: &Value) -> Result<Self, CredentialError> {
        let obj = json
            .as_object()
            .ok_or_else(|| CredentialError::InvalidBlindedRequest("not an object".into()))?;
        let version = obj
            .get("version")
            .and_then(Value::as_str)
            .ok_or_else(|| CredentialError::InvalidBlindedRequest("missing version".into()))?
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
        let presentation_spec = serde_json::from_value(
            obj.get("spec")
                .cloned()
                .ok_or_else(|| CredentialError::InvalidBlindedRequest("missing spec".into()))?,
        )?;
        let blind_spec = serde_json::from_value(
            obj.get("blindCredentialRequest").cloned().ok_or_else(|| {
                CredentialError::InvalidBlindedRequest("missing blindCredentialRequest".into())
            })?,
        )?;
        let proof = CompositeProof::from_base58(
            obj.get("proof")
                .and_then(Value::as_str)
                .ok_or_else(|| CredentialError::InvalidBlindedRequest("missing proof".into()))?,
        )?;
        Ok(Self {
            version,
            context,
            nonce,
            presentation_spec,
            blind_spec,
            proof,
        })
    }
}
