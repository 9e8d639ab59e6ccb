//! Builds a presentation over one or more held credentials.
//!
//! Statement order is deterministic: one signature statement per credential in
//! insertion order, then accumulator statements for status-bearing credentials
//! in credential-index order, then bound checks, verifiable encryptions and
//! Circom predicates (each grouped by credential index, preserving request
//! order within a credential), then pseudonym commitments. Witness-equality
//! indices are derived from this order, and the verifier reconstructs the
//! identical order from the presentation specification.

use ark_ec::{CurveGroup, VariableBaseMSM};
use ark_std::{
    collections::{BTreeMap, BTreeSet},
    rand::RngCore,
    string::String,
    vec::Vec,
};
use proof_system::{
    meta_statement::EqualWitnesses,
    prelude::R1CSCircomWitness,
    statement::{
        accumulator::{VBAccumulatorMembership, VBAccumulatorNonMembership},
        bbs_23::PoKBBSSignature23G1Prover,
        bbs_plus::PoKBBSSignatureG1Prover,
        bound_check_bpp::BoundCheckBpp,
        bound_check_legogroth16::BoundCheckLegoGroth16Prover,
        bound_check_smc::BoundCheckSmc,
        bound_check_smc_with_kv::BoundCheckSmcWithKVProver,
        ped_comm::PedersenCommitment as PedersenCommitmentStmt,
        ps_signature::PoKPSSignatureStatement,
        saver::SaverProver,
        r1cs_legogroth16::R1CSCircomProver,
    },
    witness::{
        Membership as MembershipWit, NonMembership as NonMembershipWit,
        PoKBBSSignature23G1 as PoKBBS23Wit, PoKBBSSignatureG1 as PoKBBSPlusWit, PoKPSSignature,
        Witness, Witnesses,
    },
};
use serde_json::Value;

use crate::accumulator::{
    accumulator_params, membership_proving_key, non_membership_proving_key, AccumulatorPublicKey,
    MembershipWitness, NonMembershipWitness,
};
use crate::composite::{CompositeProof, QuasiProofSpec};
use crate::credential::{Credential, CRYPTO_VERSION};
use crate::error::CredentialError;
use crate::presentation::{
    specification::{
        CircomPrivateVar, CircomPublicVar, PresentationSpecification, PresentedBound,
        PresentedCircomPredicate, PresentedCredential, PresentedPseudonym, PresentedStatus,
        PresentedVerifiableEncryption,
    },
    transcript_context, Presentation, PRESENTATION_VERSION,
};
use crate::schema::{
    CRYPTO_VERSION_STR, MEM_CHECK_STR, NON_MEM_CHECK_STR, REV_CHECK_STR, REV_ID_STR, SCHEMA_STR,
    STATUS_ID_STR, STATUS_STR,
};
use crate::setup_registry::{
    BoundCheckProtocol, PredicateParam, PredicateParams, SetupParamsTracker,
};
use crate::types::{Fr, G1Affine, IssuerPublicKey, SignatureParams};
use crate::util::{b58_encode, insert_at_path};

/// Accumulator witness for a credential's status, of the variant the
/// credential's `revocationCheck` demands.
#[derive(Clone, Debug)]
pub enum StatusWitnessKind {
    Membership(MembershipWitness),
    NonMembership(NonMembershipWitness),
}

/// Everything the holder supplies to prove a credential's revocation status.
#[derive(Clone, Debug)]
pub struct AccumInfo {
    pub witness: StatusWitnessKind,
    pub accumulated: G1Affine,
    pub public_key: AccumulatorPublicKey,
    pub extra: BTreeMap<String, Value>,
}

#[derive(Clone, Debug)]
struct BoundRequest {
    attribute: String,
    min: f64,
    max: f64,
    param_id: String,
}

#[derive(Clone, Debug)]
struct EncryptionRequest {
    attribute: String,
    chunk_bit_size: u8,
    encryption_gens_id: String,
    commitment_gens_id: String,
    encryption_key_id: String,
    snark_key_id: String,
}

#[derive(Clone, Debug)]
struct CircomRequest {
    r1cs_id: String,
    wasm_id: String,
    snark_key_id: String,
    private_vars: Vec<(String, Vec<String>)>,
    public_vars: Vec<(String, Vec<Fr>)>,
}

#[derive(Clone, Debug)]
struct PseudonymRequest {
    bases_for_attributes: Vec<G1Affine>,
    attributes: BTreeMap<usize, Vec<String>>,
    base_for_secret_key: Option<G1Affine>,
    secret_key: Option<Fr>,
    commitment: G1Affine,
    scalars: Vec<Fr>,
}

/// Everything a finalize produces short of the transcript context and the
/// proof itself; the blinded-credential request builder appends its own
/// statements to these before proving.
pub(crate) struct PresentationParts {
    pub(crate) spec_builder: QuasiProofSpec,
    pub(crate) tracker: SetupParamsTracker,
    pub(crate) witnesses: Witnesses<crate::types::Bls12381>,
    pub(crate) equalities: Vec<BTreeSet<(usize, usize)>>,
    pub(crate) spec: PresentationSpecification,
    pub(crate) context: Option<String>,
}

#[derive(Default)]
pub struct PresentationBuilder {
    credentials: Vec<(Credential, IssuerPublicKey)>,
    revealed: BTreeMap<usize, BTreeSet<String>>,
    equalities: Vec<Vec<(usize, String)>>,
    accum_infos: BTreeMap<usize, AccumInfo>,
    bounds: BTreeMap<usize, Vec<BoundRequest>>,
    encryptions: BTreeMap<usize, Vec<EncryptionRequest>>,
    circom: BTreeMap<usize, Vec<CircomRequest>>,
    pseudonyms: Vec<PseudonymRequest>,
    pub(crate) predicate_params: PredicateParams,
    context: Option<String>,
}

impl PresentationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a credential and the public key to prove it against. Returns the
    /// credential's index, used by every other builder call.
    pub fn add_credential(
        &mut self,
        credential: Credential,
        public_key: IssuerPublicKey,
    ) -> Result<usize, CredentialError> {
        if credential.signature.scheme() != public_key.scheme() {
            return Err(CredentialError::IncompatibleScheme(
                format!("{:?}", credential.signature.scheme()),
                format!("{:?}", public_key.scheme()),
            ));
        }
        self.credentials.push((credential, public_key));
        Ok(self.credentials.len() - 1)
    }

    /// Reveal attributes by full dotted name (e.g. `credentialSubject.fname`).
    /// The implicit leaves and status fields are revealed automatically and
    /// cannot be named here.
    pub fn mark_attributes_revealed(
        &mut self,
        credential_idx: usize,
        names: BTreeSet<String>,
    ) -> Result<(), CredentialError> {
        self.credential(credential_idx)?;
        for name in &names {
            if name == CRYPTO_VERSION_STR
                || name == SCHEMA_STR
                || name.starts_with(STATUS_STR)
            {
                return Err(CredentialError::InvalidPresentation(format!(
                    "attribute {} is revealed implicitly",
                    name
                )));
            }
            self.position_of(credential_idx, name)?;
        }
        self.revealed
            .entry(credential_idx)
            .or_default()
            .extend(names);
        Ok(())
    }

    /// Require the named attributes (across credentials) to hide the same
    /// value.
    pub fn mark_attributes_equal(
        &mut self,
        refs: Vec<(usize, String)>,
    ) -> Result<(), CredentialError> {
        if refs.len() < 2 {
            return Err(CredentialError::InvalidPresentation(
                "attribute equality needs at least 2 references".into(),
            ));
        }
        for (idx, name) in &refs {
            self.position_of(*idx, name)?;
        }
        self.equalities.push(refs);
        Ok(())
    }

    /// Supply the accumulator witness for a status-bearing credential.
    pub fn add_accum_info_for_cred_status(
        &mut self,
        credential_idx: usize,
        witness: StatusWitnessKind,
        accumulated: G1Affine,
        public_key: AccumulatorPublicKey,
        extra: BTreeMap<String, Value>,
    ) -> Result<(), CredentialError> {
        let (credential, _) = self.credential(credential_idx)?;
        if !credential.has_status() {
            return Err(CredentialError::StatusNotPresent(credential_idx));
        }
        let check = credential
            .status_field(REV_CHECK_STR)
            .ok_or_else(|| CredentialError::UnknownRevocationCheck("<missing>".into()))?;
        match (&witness, check) {
            (StatusWitnessKind::Membership(_), MEM_CHECK_STR)
            | (StatusWitnessKind::NonMembership(_), NON_MEM_CHECK_STR) => {}
            _ => {
                return Err(CredentialError::IncompatibleRevocationCheck(
                    credential_idx,
                    check.to_string(),
                ))
            }
        }
        self.accum_infos.insert(
            credential_idx,
            AccumInfo {
                witness,
                accumulated,
                public_key,
                extra,
            },
        );
        Ok(())
    }

    /// Register a predicate parameter under an id; statements reference it by
    /// this id and large parameters are serialized once per presentation.
    pub fn add_predicate_param(
        &mut self,
        id: &str,
        param: PredicateParam,
    ) -> Result<(), CredentialError> {
        if self.predicate_params.contains_key(id) {
            return Err(CredentialError::DuplicatePredicateParam(id.to_string()));
        }
        self.predicate_params.insert(id.to_string(), param);
        Ok(())
    }

    /// Prove `min <= attribute <= max` without revealing the attribute. The
    /// range-proof protocol is inferred from the kind of parameter registered
    /// under `param_id`; bounds are raw values, scaled by the attribute's leaf
    /// encoding.
    pub fn enforce_bounds(
        &mut self,
        credential_idx: usize,
        attribute: &str,
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
        let leaf = self
            .credential(credential_idx)?
            .0
            .schema
            .leaf_type(attribute)
            .cloned()
            .ok_or_else(|| CredentialError::AttributeNotFoundInSchema(attribute.to_string()))?;
        // scaling also rejects non-numeric leaves
        leaf.scale_bound(attribute, min)?;
        leaf.scale_bound(attribute, max)?;
        if let Some(p) = param {
            if !self.predicate_params.contains_key(param_id) {
                self.add_predicate_param(param_id, p)?;
            }
        }
        let registered = self
            .predicate_params
            .get(param_id)
            .ok_or_else(|| CredentialError::PredicateParamNotFound(param_id.to_string()))?;
        BoundCheckProtocol::for_prover_param(registered)?;
        self.bounds
            .entry(credential_idx)
            .or_default()
            .push(BoundRequest {
                attribute: attribute.to_string(),
                min,
                max,
                param_id: param_id.to_string(),
            });
        Ok(())
    }

    /// Verifiably encrypt an attribute under a SAVER encryption key so the
    /// holder proves the ciphertext encrypts exactly the signed attribute.
    pub fn verifiably_encrypt(
        &mut self,
        credential_idx: usize,
        attribute: &str,
        chunk_bit_size: u8,
        encryption_gens_id: &str,
        commitment_gens_id: &str,
        encryption_key_id: &str,
        snark_key_id: &str,
    ) -> Result<(), CredentialError> {
        self.position_of(credential_idx, attribute)?;
        self.require_param_kind(encryption_gens_id, |p| {
            matches!(p, PredicateParam::SaverEncryptionGens(_))
        })?;
        self.require_param_kind(commitment_gens_id, |p| {
            matches!(p, PredicateParam::SaverCommitmentGens(_))
        })?;
        self.require_param_kind(encryption_key_id, |p| {
            matches!(p, PredicateParam::SaverEncryptionKey(_))
        })?;
        self.require_param_kind(snark_key_id, |p| {
            matches!(p, PredicateParam::SaverProvingKey(_))
        })?;
        self.encryptions
            .entry(credential_idx)
            .or_default()
            .push(EncryptionRequest {
                attribute: attribute.to_string(),
                chunk_bit_size,
                encryption_gens_id: encryption_gens_id.to_string(),
                commitment_gens_id: commitment_gens_id.to_string(),
                encryption_key_id: encryption_key_id.to_string(),
                snark_key_id: snark_key_id.to_string(),
            });
        Ok(())
    }

    /// Prove an arbitrary compiled Circom predicate over credential
    /// attributes. `private_vars` maps circuit input names to the attributes
    /// bound to them; `public_vars` carries the circuit's public inputs and
    /// outputs.
    pub fn enforce_circom_predicate(
        &mut self,
        credential_idx: usize,
        private_vars: Vec<(String, Vec<String>)>,
        public_vars: Vec<(String, Vec<Fr>)>,
        r1cs_id: &str,
        wasm_id: &str,
        snark_key_id: &str,
    ) -> Result<(), CredentialError> {
        for (_, attrs) in &private_vars {
            for attr in attrs {
                self.position_of(credential_idx, attr)?;
            }
        }
        self.require_param_kind(r1cs_id, |p| matches!(p, PredicateParam::R1CS(_)))?;
        self.require_param_kind(wasm_id, |p| matches!(p, PredicateParam::Bytes(_)))?;
        self.require_param_kind(snark_key_id, |p| {
            matches!(p, PredicateParam::LegoProvingKey(_))
        })?;
        self.circom
            .entry(credential_idx)
            .or_default()
            .push(CircomRequest {
                r1cs_id: r1cs_id.to_string(),
                wasm_id: wasm_id.to_string(),
                snark_key_id: snark_key_id.to_string(),
                private_vars,
                public_vars,
            });
        Ok(())
    }

    /// Commit to attributes (and optionally a holder secret key) under the
    /// given bases, yielding an unlinkable pseudonym. Returns the commitment.
    pub fn add_pseudonym(
        &mut self,
        bases_for_attributes: Vec<G1Affine>,
        attributes: BTreeMap<usize, Vec<String>>,
        base_for_secret_key: Option<G1Affine>,
        secret_key: Option<Fr>,
    ) -> Result<G1Affine, CredentialError> {
        if base_for_secret_key.is_some() != secret_key.is_some() {
            return Err(CredentialError::InvalidPresentation(
                "pseudonym secret key and its base come together".into(),
            ));
        }
        let mut scalars = Vec::new();
        for (cred_idx, names) in &attributes {
            let (credential, _) = self.credential(*cred_idx)?;
            let all = credential.attribute_scalars()?;
            for name in names {
                let pos = credential
                    .schema
                    .index_of(name)
                    .ok_or_else(|| CredentialError::AttributeNotFoundInSchema(name.clone()))?;
                scalars.push(all[pos]);
            }
        }
        if scalars.len() != bases_for_attributes.len() {
            return Err(CredentialError::InvalidPresentation(format!(
                "pseudonym has {} bases for {} attributes",
                bases_for_attributes.len(),
                scalars.len()
            )));
        }
        let mut bases = bases_for_attributes.clone();
        if let Some(base) = &base_for_secret_key {
            bases.push(*base);
            scalars.push(secret_key.unwrap());
        }
        let commitment =
            ark_bls12_381::G1Projective::msm_unchecked(&bases, &scalars).into_affine();
        self.pseudonyms.push(PseudonymRequest {
            bases_for_attributes,
            attributes,
            base_for_secret_key,
            secret_key,
            commitment,
            scalars,
        });
        Ok(commitment)
    }

    pub fn set_context(&mut self, context: &str) {
        self.context = Some(context.to_string());
    }

    /// Assemble statements, witnesses and the public specification, bind the
    /// specification into the transcript and generate the composite proof.
    pub fn finalize<R: RngCore>(
        self,
        rng: &mut R,
        nonce: Option<Vec<u8>>,
    ) -> Result<Presentation, CredentialError> {
        let mut parts = self.build_parts()?;
        for eq in parts.equalities {
            parts.spec_builder.add_witness_equality(EqualWitnesses(eq));
        }
        parts.spec_builder.setup_params = parts.tracker.into_params();
        parts.spec_builder.set_context(transcript_context(
            PRESENTATION_VERSION,
            &parts.spec,
            &parts.context,
        )?);

        let proof = CompositeProof::generate(rng, parts.spec_builder, parts.witnesses, nonce.clone())?;

        Ok(Presentation {
            version: PRESENTATION_VERSION.to_string(),
            context: parts.context,
            nonce,
            spec: parts.spec,
            proof,
        })
    }

    /// Statement, witness and bookkeeping assembly shared by presentations and
    /// blinded credential requests.
    pub(crate) fn build_parts(self) -> Result<PresentationParts, CredentialError> {
        let mut tracker = SetupParamsTracker::new();
        let mut spec_builder = QuasiProofSpec::new();
        let mut witnesses = Witnesses::new();
        let mut equalities: Vec<BTreeSet<(usize, usize)>> = Vec::new();

        let mut presented: Vec<PresentedCredential> = Vec::with_capacity(self.credentials.len());
        let mut all_scalars: Vec<Vec<Fr>> = Vec::with_capacity(self.credentials.len());

        // one signature statement per credential, in insertion order
        for (idx, (credential, public_key)) in self.credentials.iter().enumerate() {
            let scalars = credential.attribute_scalars()?;
            let (names, _) = credential.schema.flatten();
            let raw = credential.attribute_json()?;

            let mut revealed_names: BTreeSet<String> =
                [CRYPTO_VERSION_STR.to_string(), SCHEMA_STR.to_string()].into();
            if let Some(user) = self.revealed.get(&idx) {
                revealed_names.extend(user.iter().cloned());
            }
            if credential.has_status() {
                revealed_names.insert(format!("{}.{}", STATUS_STR, STATUS_ID_STR));
                revealed_names.insert(format!("{}.{}", STATUS_STR, REV_CHECK_STR));
            }

            let mut revealed_msgs = BTreeMap::new();
            let mut unrevealed_msgs = BTreeMap::new();
            for (pos, name) in names.iter().enumerate() {
                if revealed_names.contains(name) {
                    revealed_msgs.insert(pos, scalars[pos]);
                } else {
                    unrevealed_msgs.insert(pos, scalars[pos]);
                }
            }

            let params = SignatureParams::generate(
                credential.signature.scheme(),
                names.len() as u32,
            );
            match (&credential.signature, public_key, params) {
                (
                    crate::types::Signature::BbsPlus(sig),
                    IssuerPublicKey::BbsPlus(_),
                    SignatureParams::BbsPlus(p),
                ) => {
                    spec_builder.add_statement(
                        PoKBBSSignatureG1Prover::new_statement_from_params(p, revealed_msgs.clone()),
                    );
                    witnesses.add(PoKBBSPlusWit::new_as_witness(sig.clone(), unrevealed_msgs));
                }
                (
                    crate::types::Signature::Bbs(sig),
                    IssuerPublicKey::Bbs(_),
                    SignatureParams::Bbs(p),
                ) => {
                    spec_builder.add_statement(
                        PoKBBSSignature23G1Prover::new_statement_from_params(
                            p,
                            revealed_msgs.clone(),
                        ),
                    );
                    witnesses.add(PoKBBS23Wit::new_as_witness(sig.clone(), unrevealed_msgs));
                }
                (
                    crate::types::Signature::Ps(sig),
                    IssuerPublicKey::Ps(pk),
                    SignatureParams::Ps(p),
                ) => {
                    spec_builder.add_statement(PoKPSSignatureStatement::new_statement_from_params(
                        p,
                        pk.clone(),
                        revealed_msgs.clone(),
                    ));
                    witnesses.add(PoKPSSignature::new_as_witness(sig.clone(), unrevealed_msgs));
                }
                _ => {
                    return Err(CredentialError::IncompatibleScheme(
                        format!("{:?}", credential.signature.scheme()),
                        format!("{:?}", public_key.scheme()),
                    ))
                }
            }

            // raw values of the revealed attributes, statuses aside
            let mut revealed_attributes = Value::Object(serde_json::Map::new());
            for name in &revealed_names {
                if name == SCHEMA_STR || name.starts_with(STATUS_STR) {
                    continue;
                }
                insert_at_path(&mut revealed_attributes, name, raw[name].clone());
            }

            presented.push(PresentedCredential {
                version: CRYPTO_VERSION.to_string(),
                schema: credential.schema.to_schema_field()?,
                revealed_attributes,
                status: None,
                bounds: Vec::new(),
                verifiable_encryptions: Vec::new(),
                circom_predicates: Vec::new(),
            });
            all_scalars.push(scalars);
        }

        // accumulator statements for status-bearing credentials
        for (idx, (credential, _)) in self.credentials.iter().enumerate() {
            if !credential.has_status() {
                continue;
            }
            let info = self
                .accum_infos
                .get(&idx)
                .ok_or(CredentialError::MissingAccumInfoForStatus(idx))?;
            let rev_id_pos = self.position_of(idx, &format!("{}.{}", STATUS_STR, REV_ID_STR))?;
            let element = all_scalars[idx][rev_id_pos];

            let s_idx = match &info.witness {
                StatusWitnessKind::Membership(w) => {
                    let s_idx = spec_builder.add_statement(
                        VBAccumulatorMembership::new_statement_from_params(
                            accumulator_params(),
                            info.public_key.clone(),
                            membership_proving_key(),
                            info.accumulated,
                        ),
                    );
                    witnesses.add(MembershipWit::new_as_witness(element, w.clone()));
                    s_idx
                }
                StatusWitnessKind::NonMembership(w) => {
                    let s_idx = spec_builder.add_statement(
                        VBAccumulatorNonMembership::new_statement_from_params(
                            accumulator_params(),
                            info.public_key.clone(),
                            non_membership_proving_key(),
                            info.accumulated,
                        ),
                    );
                    witnesses.add(NonMembershipWit::new_as_witness(element, w.clone()));
                    s_idx
                }
            };
            equalities.push([(idx, rev_id_pos), (s_idx, 0)].into());

            presented[idx].status = Some(PresentedStatus {
                id: credential
                    .status_field(STATUS_ID_STR)
                    .unwrap_or_default()
                    .to_string(),
                revocation_check: credential
                    .status_field(REV_CHECK_STR)
                    .unwrap_or_default()
                    .to_string(),
                accumulated: b58_encode(&info.accumulated)?,
                extra: info.extra.clone(),
            });
        }

        // bound checks, grouped by credential
        for (idx, requests) in &self.bounds {
            let (credential, _) = self.credential(*idx)?;
            for req in requests {
                let pos = self.position_of(*idx, &req.attribute)?;
                let leaf = credential
                    .schema
                    .leaf_type(&req.attribute)
                    .ok_or_else(|| CredentialError::AttributeNotFoundInSchema(req.attribute.clone()))?;
                let min = leaf.scale_bound(&req.attribute, req.min)?;
                let max = leaf.scale_bound(&req.attribute, req.max)?;
                let param = self
                    .predicate_params
                    .get(&req.param_id)
                    .ok_or_else(|| CredentialError::PredicateParamNotFound(req.param_id.clone()))?;
                let protocol = BoundCheckProtocol::for_prover_param(param)?;
                let param_idx = tracker.index_for(&req.param_id, param);

                let (statement, witness) = match protocol {
                    BoundCheckProtocol::LegoGroth16 => (
                        BoundCheckLegoGroth16Prover::new_statement_from_params_ref(
                            min, max, param_idx,
                        )?,
                        Witness::BoundCheckLegoGroth16(all_scalars[*idx][pos]),
                    ),
                    BoundCheckProtocol::Bpp => (
                        BoundCheckBpp::new_statement_from_params_ref(min, max, param_idx)?,
                        Witness::BoundCheckBpp(all_scalars[*idx][pos]),
                    ),
                    BoundCheckProtocol::Smc => (
                        BoundCheckSmc::new_statement_from_params_ref(min, max, param_idx)?,
                        Witness::BoundCheckSmc(all_scalars[*idx][pos]),
                    ),
                    BoundCheckProtocol::SmcKV => (
                        BoundCheckSmcWithKVProver::new_statement_from_params_ref(
                            min, max, param_idx,
                        )?,
                        Witness::BoundCheckSmcWithKV(all_scalars[*idx][pos]),
                    ),
                };
                let s_idx = spec_builder.add_statement(statement);
                witnesses.add(witness);
                equalities.push([(*idx, pos), (s_idx, 0)].into());

                presented[*idx].bounds.push(PresentedBound {
                    attribute_name: req.attribute.clone(),
                    min: req.min,
                    max: req.max,
                    param_id: req.param_id.clone(),
                    protocol,
                });
            }
        }

        // verifiable encryptions
        for (idx, requests) in &self.encryptions {
            for req in requests {
                let pos = self.position_of(*idx, &req.attribute)?;
                let gens_idx = self.tracked(&mut tracker, &req.encryption_gens_id)?;
                let comm_idx = self.tracked(&mut tracker, &req.commitment_gens_id)?;
                let ek_idx = self.tracked(&mut tracker, &req.encryption_key_id)?;
                let pk_idx = self.tracked(&mut tracker, &req.snark_key_id)?;
                let s_idx = spec_builder.add_statement(SaverProver::new_statement_from_params_ref(
                    req.chunk_bit_size,
                    gens_idx,
                    comm_idx,
                    ek_idx,
                    pk_idx,
                ));
                witnesses.add(Witness::Saver(all_scalars[*idx][pos]));
                equalities.push([(*idx, pos), (s_idx, 0)].into());

                presented[*idx]
                    .verifiable_encryptions
                    .push(PresentedVerifiableEncryption {
                        attribute_name: req.attribute.clone(),
                        chunk_bit_size: req.chunk_bit_size,
                        encryption_gens_id: req.encryption_gens_id.clone(),
                        commitment_gens_id: req.commitment_gens_id.clone(),
                        encryption_key_id: req.encryption_key_id.clone(),
                        snark_key_id: req.snark_key_id.clone(),
                    });
            }
        }

        // Circom predicates
        for (idx, requests) in &self.circom {
            for req in requests {
                let r1cs_idx = self.tracked(&mut tracker, &req.r1cs_id)?;
                let wasm_idx = self.tracked(&mut tracker, &req.wasm_id)?;
                let pk_idx = self.tracked(&mut tracker, &req.snark_key_id)?;
                let s_idx = spec_builder.add_statement(
                    R1CSCircomProver::new_statement_from_params_ref(r1cs_idx, wasm_idx, pk_idx)?,
                );

                let mut circom_witness = R1CSCircomWitness::new();
                let mut wit_idx = 0usize;
                let mut private_vars = Vec::with_capacity(req.private_vars.len());
                for (var, attrs) in &req.private_vars {
                    let mut values = Vec::with_capacity(attrs.len());
                    for attr in attrs {
                        let pos = self.position_of(*idx, attr)?;
                        values.push(all_scalars[*idx][pos]);
                        equalities.push([(*idx, pos), (s_idx, wit_idx)].into());
                        wit_idx += 1;
                    }
                    circom_witness.set_private(var.clone(), values);
                    private_vars.push(CircomPrivateVar {
                        var_name: var.clone(),
                        attribute_names: attrs.clone(),
                    });
                }
                let mut public_vars = Vec::with_capacity(req.public_vars.len());
                for (var, values) in &req.public_vars {
                    circom_witness.set_public(var.clone(), values.clone());
                    public_vars.push(CircomPublicVar {
                        var_name: var.clone(),
                        values: values
                            .iter()
                            .map(b58_encode)
                            .collect::<Result<Vec<_>, _>>()?,
                    });
                }
                witnesses.add(Witness::R1CSLegoGroth16(circom_witness));

                presented[*idx]
                    .circom_predicates
                    .push(PresentedCircomPredicate {
                        r1cs_id: req.r1cs_id.clone(),
                        wasm_id: req.wasm_id.clone(),
                        snark_key_id: req.snark_key_id.clone(),
                        private_vars,
                        public_vars,
                    });
            }
        }

        // pseudonyms last
        let mut presented_pseudonyms = Vec::with_capacity(self.pseudonyms.len());
        for pseudonym in &self.pseudonyms {
            let mut bases = pseudonym.bases_for_attributes.clone();
            if let Some(base) = &pseudonym.base_for_secret_key {
                bases.push(*base);
            }
            let s_idx = spec_builder.add_statement(
                PedersenCommitmentStmt::new_statement_from_params(bases, pseudonym.commitment),
            );
            witnesses.add(Witness::PedersenCommitment(pseudonym.scalars.clone()));

            let mut k = 0usize;
            for (cred_idx, names) in &pseudonym.attributes {
                for name in names {
                    let pos = self.position_of(*cred_idx, name)?;
                    equalities.push([(*cred_idx, pos), (s_idx, k)].into());
                    k += 1;
                }
            }

            presented_pseudonyms.push(PresentedPseudonym {
                commitment: b58_encode(&pseudonym.commitment)?,
                bases_for_attributes: pseudonym
                    .bases_for_attributes
                    .iter()
                    .map(b58_encode)
                    .collect::<Result<Vec<_>, _>>()?,
                attributes: pseudonym.attributes.clone(),
                base_for_secret_key: pseudonym
                    .base_for_secret_key
                    .as_ref()
                    .map(b58_encode)
                    .transpose()?,
            });
        }

        // cross-credential equalities
        for refs in &self.equalities {
            let mut set = BTreeSet::new();
            for (cred_idx, name) in refs {
                set.insert((*cred_idx, self.position_of(*cred_idx, name)?));
            }
            equalities.push(set);
        }

        let spec = PresentationSpecification {
            credentials: presented,
            attribute_equalities: self.equalities.clone(),
            pseudonyms: presented_pseudonyms,
        };

        Ok(PresentationParts {
            spec_builder,
            tracker,
            witnesses,
            equalities,
            spec,
            context: self.context,
        })
    }

    fn credential(&self, idx: usize) -> Result<&(Credential, IssuerPublicKey), CredentialError> {
        self.credentials
            .get(idx)
            .ok_or(CredentialError::CredentialIndexOutOfRange(
                idx,
                self.credentials.len(),
            ))
    }

    fn position_of(&self, idx: usize, name: &str) -> Result<usize, CredentialError> {
        let (credential, _) = self.credential(idx)?;
        credential
            .schema
            .index_of(name)
            .ok_or_else(|| CredentialError::AttributeNotFoundInSchema(name.to_string()))
    }

    fn tracked(
        &self,
        tracker: &mut SetupParamsTracker,
        id: &str,
    ) -> Result<usize, CredentialError> {
        let param = self
            .predicate_params
            .get(id)
            .ok_or_else(|| CredentialError::PredicateParamNotFound(id.to_string()))?;
        Ok(tracker.index_for(id, param))
    }

    fn require_param_kind(
        &self,
        id: &str,
        check: impl Fn(&PredicateParam) -> bool,
    ) -> Result<(), CredentialError> {
        let param = self
            .predicate_params
            .get(id)
            .ok_or_else(|| CredentialError::PredicateParamNotFound(id.to_string()))?;
        if check(param) {
            Ok(())
        } else {
            Err(CredentialError::IncompatiblePredicateParam(
                param.kind().to_string(),
            ))
        }
    }
}
