//! Registry of large public parameters referenced from statements.
//!
//! Predicate parameters (SNARK keys, range-proof setups, encryption keys) are
//! registered once under a caller-chosen id; statements then reference them by
//! index into the proof spec's `SetupParams` vector instead of embedding a
//! copy per statement. The registered kind also determines which bound-check
//! protocol a builder runs.

use ark_std::{collections::BTreeMap, string::String, vec::Vec};
use serde::{Deserialize, Serialize};

use bulletproofs_plus_plus::prelude::SetupParams as BppSetupParams;
use legogroth16::circom::R1CS;
use proof_system::{
    setup_params::SetupParams,
    statement::{
        bound_check_smc::SmcParamsAndCommitmentKey,
        bound_check_smc_with_kv::SmcParamsKVAndCommitmentKeyAndSecretKey,
    },
};
use saver::prelude::{
    ChunkedCommitmentGens, EncryptionGens, EncryptionKey, ProvingKey as SaverSnarkProvingKey,
    VerifyingKey as SaverSnarkVerifyingKey,
};

use crate::error::CredentialError;
use crate::types::{Bls12381, Fr, G1Affine};

pub type LegoProvingKey = legogroth16::ProvingKey<Bls12381>;
pub type LegoVerifyingKey = legogroth16::VerifyingKey<Bls12381>;

/// A public parameter registered under an id. The variant decides which
/// statement kind consumes it.
#[derive(Clone, Debug)]
pub enum PredicateParam {
    LegoProvingKey(LegoProvingKey),
    LegoVerifyingKey(LegoVerifyingKey),
    BppSetup(BppSetupParams<G1Affine>),
    SmcParams(SmcParamsAndCommitmentKey<Bls12381>),
    /// Same setup as [`Self::SmcParams`] but requesting the keyed-verification
    /// protocol; the verifier side registers [`Self::SmcParamsAndSk`].
    SmcKvProverParams(SmcParamsAndCommitmentKey<Bls12381>),
    SmcParamsAndSk(SmcParamsKVAndCommitmentKeyAndSecretKey<Bls12381>),
    SaverEncryptionGens(EncryptionGens<Bls12381>),
    SaverCommitmentGens(ChunkedCommitmentGens<G1Affine>),
    SaverEncryptionKey(EncryptionKey<Bls12381>),
    SaverProvingKey(SaverSnarkProvingKey<Bls12381>),
    SaverVerifyingKey(SaverSnarkVerifyingKey<Bls12381>),
    R1CS(R1CS<Bls12381>),
    Bytes(Vec<u8>),
    FieldElemVec(Vec<Fr>),
}

impl PredicateParam {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LegoProvingKey(_) => "LegoProvingKey",
            Self::LegoVerifyingKey(_) => "LegoVerifyingKey",
            Self::BppSetup(_) => "BppSetup",
            Self::SmcParams(_) => "SmcParams",
            Self::SmcKvProverParams(_) => "SmcKvProverParams",
            Self::SmcParamsAndSk(_) => "SmcParamsAndSk",
            Self::SaverEncryptionGens(_) => "SaverEncryptionGens",
            Self::SaverCommitmentGens(_) => "SaverCommitmentGens",
            Self::SaverEncryptionKey(_) => "SaverEncryptionKey",
            Self::SaverProvingKey(_) => "SaverProvingKey",
            Self::SaverVerifyingKey(_) => "SaverVerifyingKey",
            Self::R1CS(_) => "R1CS",
            Self::Bytes(_) => "Bytes",
            Self::FieldElemVec(_) => "FieldElemVec",
        }
    }

    fn into_setup_param(self) -> SetupParams<Bls12381> {
        match self {
            Self::LegoProvingKey(p) => SetupParams::LegoSnarkProvingKey(p),
            Self::LegoVerifyingKey(p) => SetupParams::LegoSnarkVerifyingKey(p),
            Self::BppSetup(p) => SetupParams::BppSetupParams(p),
            Self::SmcParams(p) | Self::SmcKvProverParams(p) => {
                SetupParams::SmcParamsAndCommKey(p)
            }
            Self::SmcParamsAndSk(p) => SetupParams::SmcParamsAndCommKeyAndSk(p),
            Self::SaverEncryptionGens(p) => SetupParams::SaverEncryptionGens(p),
            Self::SaverCommitmentGens(p) => SetupParams::SaverCommitmentGens(p),
            Self::SaverEncryptionKey(p) => SetupParams::SaverEncryptionKey(p),
            Self::SaverProvingKey(p) => SetupParams::SaverProvingKey(p),
            Self::SaverVerifyingKey(p) => SetupParams::SaverVerifyingKey(p),
            Self::R1CS(p) => SetupParams::R1CS(p),
            Self::Bytes(p) => SetupParams::Bytes(p),
            Self::FieldElemVec(p) => SetupParams::FieldElemVec(p),
        }
    }
}

/// Which range-proof backend a bound check runs; inferred from the kind of
/// parameter registered for the check, recorded in the presentation
/// specification so the verifier rebuilds the same statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundCheckProtocol {
    LegoGroth16,
    Bpp,
    Smc,
    SmcKV,
}

impl BoundCheckProtocol {
    /// Infer the protocol from a prover-side parameter.
    pub fn for_prover_param(param: &PredicateParam) -> Result<Self, CredentialError> {
        match param {
            PredicateParam::LegoProvingKey(_) => Ok(Self::LegoGroth16),
            PredicateParam::BppSetup(_) => Ok(Self::Bpp),
            PredicateParam::SmcParams(_) => Ok(Self::Smc),
            PredicateParam::SmcKvProverParams(_) => Ok(Self::SmcKV),
            p => Err(CredentialError::IncompatiblePredicateParam(
                p.kind().to_string(),
            )),
        }
    }

    /// Check a verifier-side parameter fits this protocol.
    pub fn check_verifier_param(&self, param: &PredicateParam) -> Result<(), CredentialError> {
        let ok = matches!(
            (self, param),
            (Self::LegoGroth16, PredicateParam::LegoVerifyingKey(_))
                | (Self::Bpp, PredicateParam::BppSetup(_))
                | (Self::Smc, PredicateParam::SmcParams(_))
                | (Self::SmcKV, PredicateParam::SmcParamsAndSk(_))
        );
        if ok {
            Ok(())
        } else {
            Err(CredentialError::IncompatiblePredicateParam(
                param.kind().to_string(),
            ))
        }
    }
}

/// Deduplicating collector for the proof spec's `SetupParams` vector.
#[derive(Debug, Default)]
pub struct SetupParamsTracker {
    params: Vec<SetupParams<Bls12381>>,
    indices: BTreeMap<String, usize>,
}

impl SetupParamsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the parameter registered under `id`, appending it on first
    /// use. Later calls with the same id reuse the first index and ignore the
    /// passed value.
    pub fn index_for(&mut self, id: &str, param: &PredicateParam) -> usize {
        if let Some(idx) = self.indices.get(id) {
            return *idx;
        }
        let idx = self.add_unkeyed(param.clone().into_setup_param());
        self.indices.insert(id.to_string(), idx);
        idx
    }

    /// Append a raw setup param that is not shared by id (e.g. per-scheme
    /// signature params).
    pub fn add_unkeyed(&mut self, param: SetupParams<Bls12381>) -> usize {
        self.params.push(param);
        self.params.len() - 1
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.indices.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn into_params(self) -> Vec<SetupParams<Bls12381>> {
        self.params
    }
}

/// The parameter map a prover or verifier holds, keyed by the ids appearing in
/// a presentation specification.
pub type PredicateParams = BTreeMap<String, PredicateParam>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_deduplicates_by_id() {
        let mut tracker = SetupParamsTracker::new();
        let p = PredicateParam::Bytes(vec![1, 2, 3]);
        let i1 = tracker.index_for("k1", &p);
        let i2 = tracker.index_for("k1", &p);
        assert_eq!(i1, i2);
        let i3 = tracker.index_for("k2", &p);
        assert_ne!(i1, i3);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn protocol_inference() {
        assert!(matches!(
            BoundCheckProtocol::for_prover_param(&PredicateParam::Bytes(vec![])),
            Err(CredentialError::IncompatiblePredicateParam(_))
        ));
        assert!(BoundCheckProtocol::LegoGroth16
            .check_verifier_param(&PredicateParam::Bytes(vec![]))
            .is_err());
    }
}
