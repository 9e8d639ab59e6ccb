//! Thin layer over the composite proof engine: a proof spec held in decoded
//! form until proof time, and the aggregated proof with its byte round-trip.

use ark_std::{
    rand::RngCore,
    string::String,
    vec::Vec,
};
use blake2::Blake2b512;

use proof_system::{
    meta_statement::{EqualWitnesses, MetaStatements},
    proof::Proof,
    proof_spec::ProofSpec,
    setup_params::SetupParams,
    statement::{Statement, Statements},
    witness::{Witness, Witnesses},
};

use crate::error::CredentialError;
use crate::types::Bls12381;
use crate::util::{b58_decode, b58_encode};

/// Statements, meta-statements and setup params kept in their decoded forms;
/// the engine's `ProofSpec` is only materialized (and validated) when a proof
/// is generated or verified. Building incrementally this way avoids
/// re-serializing the accumulated statements on every addition.
#[derive(Clone, Debug)]
pub struct QuasiProofSpec {
    pub statements: Statements<Bls12381>,
    pub meta_statements: MetaStatements,
    pub setup_params: Vec<SetupParams<Bls12381>>,
    pub context: Option<Vec<u8>>,
}

impl Default for QuasiProofSpec {
    fn default() -> Self {
        Self::new()
    }
}

impl QuasiProofSpec {
    pub fn new() -> Self {
        Self {
            statements: Statements::new(),
            meta_statements: MetaStatements::new(),
            setup_params: Vec::new(),
            context: None,
        }
    }

    pub fn add_statement(&mut self, statement: Statement<Bls12381>) -> usize {
        self.statements.add(statement)
    }

    pub fn add_witness_equality(&mut self, equality: EqualWitnesses) -> usize {
        self.meta_statements.add_witness_equality(equality)
    }

    pub fn set_context(&mut self, context: Vec<u8>) {
        self.context = Some(context);
    }

    /// Build the engine's proof spec and run its structural validity check.
    pub fn materialize(self) -> Result<ProofSpec<Bls12381>, CredentialError> {
        let spec = ProofSpec::new(
            self.statements,
            self.meta_statements,
            self.setup_params,
            self.context,
        );
        spec.validate()?;
        Ok(spec)
    }
}

/// A single aggregated proof over all statements of a spec.
#[derive(Clone, Debug)]
pub struct CompositeProof(pub Proof<Bls12381>);

impl CompositeProof {
    /// Witnesses must be given in statement order; the optional nonce is
    /// bound into the Fiat-Shamir challenge and must be presented again at
    /// verification.
    pub fn generate<R: RngCore>(
        rng: &mut R,
        spec: QuasiProofSpec,
        witnesses: Witnesses<Bls12381>,
        nonce: Option<Vec<u8>>,
    ) -> Result<Self, CredentialError> {
        let spec = spec.materialize()?;
        let (proof, _) =
            Proof::new::<R, Blake2b512>(rng, spec, witnesses, nonce, Default::default())?;
        Ok(Self(proof))
    }

    pub fn verify<R: RngCore>(
        &self,
        rng: &mut R,
        spec: QuasiProofSpec,
        nonce: Option<Vec<u8>>,
    ) -> Result<(), CredentialError> {
        let spec = spec.materialize()?;
        self.0
            .clone()
            .verify::<R, Blake2b512>(rng, spec, nonce, Default::default())?;
        Ok(())
    }

    pub fn to_base58(&self) -> Result<String, CredentialError> {
        b58_encode(&self.0)
    }

    pub fn from_base58(s: &str) -> Result<Self, CredentialError> {
        Ok(Self(b58_decode(s)?))
    }
}

/// Convenience constructors for the witness variants builders emit.
pub fn pedersen_commitment_witness(scalars: Vec<crate::types::Fr>) -> Witness<Bls12381> {
    Witness::PedersenCommitment(scalars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Fr;
    use ark_ec::{CurveGroup, VariableBaseMSM};
    use ark_std::{
        collections::BTreeSet,
        rand::{rngs::StdRng, SeedableRng},
        UniformRand,
    };
    use proof_system::statement::ped_comm::PedersenCommitment as PedersenCommitmentStmt;

    fn pedersen_setup(
        rng: &mut StdRng,
        scalars: &[Fr],
    ) -> (Vec<crate::types::G1Affine>, crate::types::G1Affine) {
        let bases = (0..scalars.len())
            .map(|_| ark_bls12_381::G1Projective::rand(rng).into_affine())
            .collect::<Vec<_>>();
        let commitment = ark_bls12_381::G1Projective::msm_unchecked(&bases, scalars).into_affine();
        (bases, commitment)
    }

    #[test]
    fn proof_round_trip_with_nonce_binding() {
        let mut rng = StdRng::seed_from_u64(0u64);
        let scalars = (0..3).map(|_| Fr::rand(&mut rng)).collect::<Vec<_>>();
        let (bases, commitment) = pedersen_setup(&mut rng, &scalars);

        let mut spec = QuasiProofSpec::new();
        spec.add_statement(PedersenCommitmentStmt::new_statement_from_params(
            bases, commitment,
        ));
        spec.set_context(b"test-context".to_vec());

        let mut witnesses = Witnesses::new();
        witnesses.add(pedersen_commitment_witness(scalars));

        let nonce = Some(b"a nonce".to_vec());
        let proof =
            CompositeProof::generate(&mut rng, spec.clone(), witnesses, nonce.clone()).unwrap();

        proof.verify(&mut rng, spec.clone(), nonce.clone()).unwrap();
        // different or missing nonce fails
        assert!(proof.verify(&mut rng, spec.clone(), None).is_err());
        assert!(proof
            .verify(&mut rng, spec.clone(), Some(b"other".to_vec()))
            .is_err());

        let b58 = proof.to_base58().unwrap();
        let back = CompositeProof::from_base58(&b58).unwrap();
        back.verify(&mut rng, spec, nonce).unwrap();
    }

    #[test]
    fn witness_equality_enforced() {
        let mut rng = StdRng::seed_from_u64(1u64);
        let s1 = (0..2).map(|_| Fr::rand(&mut rng)).collect::<Vec<_>>();
        let mut s2 = (0..2).map(|_| Fr::rand(&mut rng)).collect::<Vec<_>>();
        let (b1, c1) = pedersen_setup(&mut rng, &s1);

        // equal scalars at (0,1) and (1,0): honest case
        s2[0] = s1[1];
        let (b2, c2) = pedersen_setup(&mut rng, &s2);

        let mut spec = QuasiProofSpec::new();
        spec.add_statement(PedersenCommitmentStmt::new_statement_from_params(b1, c1));
        spec.add_statement(PedersenCommitmentStmt::new_statement_from_params(b2, c2));
        spec.add_witness_equality(EqualWitnesses(
            vec![(0, 1), (1, 0)].into_iter().collect::<BTreeSet<_>>(),
        ));

        let mut witnesses = Witnesses::new();
        witnesses.add(pedersen_commitment_witness(s1.clone()));
        witnesses.add(pedersen_commitment_witness(s2.clone()));
        let proof = CompositeProof::generate(&mut rng, spec.clone(), witnesses, None).unwrap();
        proof.verify(&mut rng, spec.clone(), None).unwrap();

        // unequal scalars under the same equality constraint must not verify
        let mut s3 = s2.clone();
        s3[0] = Fr::rand(&mut rng);
        let (b3, c3) = pedersen_setup(&mut rng, &s3);
        let mut bad_spec = QuasiProofSpec::new();
        let (b1b, c1b) = pedersen_setup(&mut rng, &s1);
        bad_spec.add_statement(PedersenCommitmentStmt::new_statement_from_params(b1b, c1b));
        bad_spec.add_statement(PedersenCommitmentStmt::new_statement_from_params(b3, c3));
        bad_spec.add_witness_equality(EqualWitnesses(
            vec![(0, 1), (1, 0)].into_iter().collect::<BTreeSet<_>>(),
        ));
        let mut witnesses = Witnesses::new();
        witnesses.add(pedersen_commitment_witness(s1));
        witnesses.add(pedersen_commitment_witness(s3));
        let result = CompositeProof::generate(&mut rng, bad_spec.clone(), witnesses, None)
            .and_then(|p| p.verify(&mut rng, bad_spec, None));
        assert!(result.is_err());
    }

    #[test]
    fn invalid_witness_equality_rejected() {
        let mut rng = StdRng::seed_from_u64(2u64);
        let scalars = (0..2).map(|_| Fr::rand(&mut rng)).collect::<Vec<_>>();
        let (bases, commitment) = pedersen_setup(&mut rng, &scalars);

        let mut spec = QuasiProofSpec::new();
        spec.add_statement(PedersenCommitmentStmt::new_statement_from_params(
            bases, commitment,
        ));
        // witness equality referencing a statement that doesn't exist
        spec.add_witness_equality(EqualWitnesses(
            vec![(0, 0), (5, 0)].into_iter().collect::<BTreeSet<_>>(),
        ));
        let mut witnesses = Witnesses::new();
        witnesses.add(pedersen_commitment_witness(scalars));
        assert!(CompositeProof::generate(&mut rng, spec, witnesses, None).is_err());
    }
}
