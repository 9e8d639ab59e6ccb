//! Revocation accumulators and their state stores.
//!
//! Wraps the VB accumulators of the backing crate with an asynchronous state
//! store interface: a realistic store is a database, so reads and writes here
//! are `async fn`s and the managers `await` them at the defined suspension
//! points (mutations and witness generation). The cryptographic calls
//! themselves run against a short-lived in-memory snapshot of the relevant
//! store facts; the async store stays the source of truth.
//!
//! Mutation invariants: adding a present element or removing an absent one
//! fails; batches are checked up front so they either apply fully or not at
//! all (against this manager — the store's own durability is the caller's
//! contract).

use ark_std::{
    collections::BTreeSet,
    rand::{rngs::StdRng, RngCore, SeedableRng},
    vec::Vec,
};
use blake2::{Blake2b512, Digest};
use std::collections::HashSet;
use vb_accumulator::{
    batch_utils::Omega as VbOmega,
    persistence::{
        InitialElementsStore as VbInitialElementsStore, State as VbState,
        UniversalAccumulatorState as VbUniversalAccumulatorState,
    },
    positive::{Accumulator as _, PositiveAccumulator as VbPositiveAccumulator},
    prelude::{
        MembershipProvingKey as VbMembershipProvingKey, MembershipWitness as VbMembershipWitness,
        NonMembershipProvingKey as VbNonMembershipProvingKey,
        NonMembershipWitness as VbNonMembershipWitness,
    },
    setup::{
        Keypair as VbKeypair, PublicKey as VbPublicKey, SecretKey as VbSecretKey,
        SetupParams as VbSetupParams,
    },
    universal::UniversalAccumulator as VbUniversalAccumulator,
};

use crate::encoding::encode_string_hash;
use crate::error::CredentialError;
use crate::types::{Bls12381, Fr, G1Affine};

pub type AccumulatorParams = VbSetupParams<Bls12381>;
pub type AccumulatorKeypair = VbKeypair<Bls12381>;
pub type AccumulatorSecretKey = VbSecretKey<Fr>;
pub type AccumulatorPublicKey = VbPublicKey<Bls12381>;
pub type MembershipProvingKey = VbMembershipProvingKey<G1Affine>;
pub type NonMembershipProvingKey = VbNonMembershipProvingKey<G1Affine>;
pub type MembershipWitness = VbMembershipWitness<G1Affine>;
pub type NonMembershipWitness = VbNonMembershipWitness<G1Affine>;
pub type Omega = VbOmega<G1Affine>;

pub const ACCUMULATOR_PARAMS_LABEL: &[u8] = b"anonymous-credentials accumulator params";
pub const MEM_PROVING_KEY_LABEL: &[u8] = b"anonymous-credentials accumulator mem proving key";
pub const NON_MEM_PROVING_KEY_LABEL: &[u8] =
    b"anonymous-credentials accumulator non-mem proving key";

/// Accumulator parameters every registry in this system uses, derived from a
/// public label so provers and verifiers regenerate them on demand.
pub fn accumulator_params() -> AccumulatorParams {
    AccumulatorParams::new::<Blake2b512>(ACCUMULATOR_PARAMS_LABEL)
}

pub fn accumulator_keypair<R: RngCore>(rng: &mut R) -> AccumulatorKeypair {
    AccumulatorKeypair::generate_using_rng(rng, &accumulator_params())
}

/// Label-seeded so both sides of a proof derive the same proving key.
pub fn membership_proving_key() -> MembershipProvingKey {
    let mut rng = StdRng::from_seed(seed_from_label(MEM_PROVING_KEY_LABEL));
    MembershipProvingKey::generate_using_rng(&mut rng)
}

pub fn non_membership_proving_key() -> NonMembershipProvingKey {
    let mut rng = StdRng::from_seed(seed_from_label(NON_MEM_PROVING_KEY_LABEL));
    NonMembershipProvingKey::generate_using_rng(&mut rng)
}

fn seed_from_label(label: &[u8]) -> [u8; 32] {
    let digest = Blake2b512::digest(label);
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&digest[..32]);
    seed
}

/// The accumulator member for a credential is the encoding of its
/// `credentialStatus.revocationId`, identical to the string encoding the
/// credential itself uses for that leaf.
pub fn encode_revocation_id(revocation_id: &str) -> Fr {
    encode_string_hash(revocation_id)
}

/// Membership set of an accumulator, backed by something that may suspend
/// (a database); element enumeration is bounded by the accumulator's
/// maximum size.
#[allow(async_fn_in_trait)]
pub trait State {
    async fn add(&mut self, element: Fr);
    async fn remove(&mut self, element: &Fr);
    async fn has(&self, element: &Fr) -> bool;
    async fn size(&self) -> u64;
    async fn elements(&self) -> Vec<Fr>;
}

/// Store for a universal accumulator's fixed initial elements.
#[allow(async_fn_in_trait)]
pub trait InitialElementsStore {
    async fn add(&mut self, element: Fr);
    async fn has(&self, element: &Fr) -> bool;
}

/// Reference in-memory store.
#[derive(Clone, Debug, Default)]
pub struct InMemoryState {
    pub db: BTreeSet<Fr>,
}

impl InMemoryState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl State for InMemoryState {
    async fn add(&mut self, element: Fr) {
        self.db.insert(element);
    }

    async fn remove(&mut self, element: &Fr) {
        self.db.remove(element);
    }

    async fn has(&self, element: &Fr) -> bool {
        self.db.contains(element)
    }

    async fn size(&self) -> u64 {
        self.db.len() as u64
    }

    async fn elements(&self) -> Vec<Fr> {
        self.db.iter().cloned().collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryInitialElements {
    pub db: BTreeSet<Fr>,
}

impl InMemoryInitialElements {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InitialElementsStore for InMemoryInitialElements {
    async fn add(&mut self, element: Fr) {
        self.db.insert(element);
    }

    async fn has(&self, element: &Fr) -> bool {
        self.db.contains(element)
    }
}

/// Synchronous view handed to the backing crate's accumulator calls. Holds
/// only the facts already fetched from the async store.
#[derive(Clone, Debug, Default)]
struct Snapshot {
    db: HashSet<Fr>,
}

impl Snapshot {
    fn new() -> Self {
        Self::default()
    }

    fn with(elements: impl IntoIterator<Item = Fr>) -> Self {
        Self {
            db: elements.into_iter().collect(),
        }
    }
}

impl VbState<Fr> for Snapshot {
    fn add(&mut self, element: Fr) {
        self.db.insert(element);
    }

    fn remove(&mut self, element: &Fr) {
        self.db.remove(element);
    }

    fn has(&self, element: &Fr) -> bool {
        self.db.contains(element)
    }

    fn size(&self) -> u64 {
        self.db.len() as u64
    }
}

impl<'a> VbUniversalAccumulatorState<'a, Fr> for Snapshot {
    type ElementIterator = std::collections::hash_set::Iter<'a, Fr>;

    fn elements(&'a self) -> Self::ElementIterator {
        self.db.iter()
    }
}

#[derive(Clone, Debug, Default)]
struct SnapshotInitialElements {
    db: HashSet<Fr>,
}

impl VbInitialElementsStore<Fr> for SnapshotInitialElements {
    fn add(&mut self, element: Fr) {
        self.db.insert(element);
    }

    fn has(&self, element: &Fr) -> bool {
        self.db.contains(element)
    }
}

fn check_batch_disjoint(additions: &[Fr], removals: &[Fr]) -> Result<(), CredentialError> {
    let add_set: BTreeSet<&Fr> = additions.iter().collect();
    let rem_set: BTreeSet<&Fr> = removals.iter().collect();
    if add_set.len() != additions.len() || rem_set.len() != removals.len() {
        return Err(CredentialError::DuplicateElementInBatch);
    }
    if add_set.intersection(&rem_set).next().is_some() {
        return Err(CredentialError::DuplicateElementInBatch);
    }
    Ok(())
}

/// Positive accumulator: membership proofs only.
#[derive(Clone, Debug)]
pub struct PositiveAccumulator {
    accum: VbPositiveAccumulator<G1Affine>,
}

impl PositiveAccumulator {
    pub fn initialize(params: &AccumulatorParams) -> Self {
        Self {
            accum: VbPositiveAccumulator::initialize(params),
        }
    }

    pub fn value(&self) -> &G1Affine {
        self.accum.value()
    }

    pub async fn add<S: State>(
        &mut self,
        element: Fr,
        sk: &AccumulatorSecretKey,
        state: &mut S,
    ) -> Result<(), CredentialError> {
        if state.has(&element).await {
            return Err(CredentialError::ElementPresentInAccumulator);
        }
        let mut snapshot = Snapshot::new();
        self.accum = self.accum.add(element, sk, &mut snapshot)?;
        state.add(element).await;
        Ok(())
    }

    pub async fn remove<S: State>(
        &mut self,
        element: &Fr,
        sk: &AccumulatorSecretKey,
        state: &mut S,
    ) -> Result<(), CredentialError> {
        if !state.has(element).await {
            return Err(CredentialError::ElementAbsentFromAccumulator);
        }
        let mut snapshot = Snapshot::with([*element]);
        self.accum = self.accum.remove(element, sk, &mut snapshot)?;
        state.remove(element).await;
        Ok(())
    }

    pub async fn add_batch<S: State>(
        &mut self,
        elements: Vec<Fr>,
        sk: &AccumulatorSecretKey,
        state: &mut S,
    ) -> Result<(), CredentialError> {
        check_batch_disjoint(&elements, &[])?;
        for e in &elements {
            if state.has(e).await {
                return Err(CredentialError::ElementPresentInAccumulator);
            }
        }
        let mut snapshot = Snapshot::new();
        self.accum = self.accum.add_batch(elements.clone(), sk, &mut snapshot)?;
        for e in elements {
            state.add(e).await;
        }
        Ok(())
    }

    pub async fn remove_batch<S: State>(
        &mut self,
        elements: &[Fr],
        sk: &AccumulatorSecretKey,
        state: &mut S,
    ) -> Result<(), CredentialError> {
        check_batch_disjoint(elements, &[])?;
        for e in elements {
            if !state.has(e).await {
                return Err(CredentialError::ElementAbsentFromAccumulator);
            }
        }
        let mut snapshot = Snapshot::with(elements.iter().cloned());
        self.accum = self.accum.remove_batch(elements, sk, &mut snapshot)?;
        for e in elements {
            state.remove(e).await;
        }
        Ok(())
    }

    /// Apply additions and removals in one update. Checked up front so the
    /// whole batch applies or none of it does.
    pub async fn add_remove_batches<S: State>(
        &mut self,
        additions: Vec<Fr>,
        removals: &[Fr],
        sk: &AccumulatorSecretKey,
        state: &mut S,
    ) -> Result<(), CredentialError> {
        check_batch_disjoint(&additions, removals)?;
        for e in &additions {
            if state.has(e).await {
                return Err(CredentialError::ElementPresentInAccumulator);
            }
        }
        for e in removals {
            if !state.has(e).await {
                return Err(CredentialError::ElementAbsentFromAccumulator);
            }
        }
        let mut snapshot = Snapshot::with(removals.iter().cloned());
        self.accum = self
            .accum
            .batch_updates(additions.clone(), removals, sk, &mut snapshot)?;
        for e in additions {
            state.add(e).await;
        }
        for e in removals {
            state.remove(e).await;
        }
        Ok(())
    }

    pub async fn membership_witness<S: State>(
        &self,
        element: &Fr,
        sk: &AccumulatorSecretKey,
        state: &S,
    ) -> Result<MembershipWitness, CredentialError> {
        if !state.has(element).await {
            return Err(CredentialError::ElementAbsentFromAccumulator);
        }
        let snapshot = Snapshot::with([*element]);
        Ok(self.accum.get_membership_witness(element, sk, &snapshot)?)
    }

    pub fn verify_membership(
        &self,
        element: &Fr,
        witness: &MembershipWitness,
        pk: &AccumulatorPublicKey,
        params: &AccumulatorParams,
    ) -> bool {
        self.accum.verify_membership(element, witness, pk, params)
    }

    /// Public update info for a coming batch update. Must be computed against
    /// the pre-update accumulator value.
    pub fn compute_update_info(
        &self,
        additions: &[Fr],
        removals: &[Fr],
        sk: &AccumulatorSecretKey,
    ) -> Omega {
        Omega::new(additions, removals, self.value(), sk)
    }

}

/// Universal accumulator: membership and non-membership proofs. Requires its
/// fixed initial elements to be loaded into the initial-elements store before
/// any other operation.
#[derive(Clone, Debug)]
pub struct UniversalAccumulator {
    accum: VbUniversalAccumulator<G1Affine>,
}

impl UniversalAccumulator {
    /// Set up a universal accumulator of the given maximum size, loading the
    /// generated initial elements into `initial_elements`.
    pub async fn initialize<R: RngCore, I: InitialElementsStore>(
        rng: &mut R,
        params: &AccumulatorParams,
        max_size: u64,
        sk: &AccumulatorSecretKey,
        initial_elements: &mut I,
    ) -> Self {
        let mut generated = SnapshotInitialElements::default();
        let accum = VbUniversalAccumulator::initialize_with_all_random(
            rng,
            params,
            max_size,
            sk,
            &mut generated,
        );
        for e in generated.db {
            initial_elements.add(e).await;
        }
        Self { accum }
    }

    pub fn value(&self) -> &G1Affine {
        self.accum.value()
    }

    pub fn max_size(&self) -> u64 {
        self.accum.max_size()
    }

    pub async fn add<S: State, I: InitialElementsStore>(
        &mut self,
        element: Fr,
        sk: &AccumulatorSecretKey,
        initial_elements: &I,
        state: &mut S,
    ) -> Result<(), CredentialError> {
        if initial_elements.has(&element).await {
            return Err(CredentialError::ElementPresentInAccumulator);
        }
        if state.has(&element).await {
            return Err(CredentialError::ElementPresentInAccumulator);
        }
        if state.size().await >= self.max_size() {
            return Err(vb_accumulator::error::VBAccumulatorError::AccumulatorFull.into());
        }
        let empty_initial = SnapshotInitialElements::default();
        let mut snapshot = Snapshot::new();
        self.accum = self
            .accum
            .add(element, sk, &empty_initial, &mut snapshot)?;
        state.add(element).await;
        Ok(())
    }

    pub async fn remove<S: State>(
        &mut self,
        element: &Fr,
        sk: &AccumulatorSecretKey,
        state: &mut S,
    ) -> Result<(), CredentialError> {
        if !state.has(element).await {
            return Err(CredentialError::ElementAbsentFromAccumulator);
        }
        let empty_initial = SnapshotInitialElements::default();
        let mut snapshot = Snapshot::with([*element]);
        self.accum = self
            .accum
            .remove(element, sk, &empty_initial, &mut snapshot)?;
        state.remove(element).await;
        Ok(())
    }

    pub async fn add_remove_batches<S: State, I: InitialElementsStore>(
        &mut self,
        additions: Vec<Fr>,
        removals: &[Fr],
        sk: &AccumulatorSecretKey,
        initial_elements: &I,
        state: &mut S,
    ) -> Result<(), CredentialError> {
        check_batch_disjoint(&additions, removals)?;
        for e in &additions {
            if initial_elements.has(e).await || state.has(e).await {
                return Err(CredentialError::ElementPresentInAccumulator);
            }
        }
        for e in removals {
            if !state.has(e).await {
                return Err(CredentialError::ElementAbsentFromAccumulator);
            }
        }
        if state.size().await + additions.len() as u64 - removals.len() as u64 > self.max_size() {
            return Err(
                vb_accumulator::error::VBAccumulatorError::BatchExceedsAccumulatorCapacity.into(),
            );
        }
        let empty_initial = SnapshotInitialElements::default();
        let mut snapshot = Snapshot::with(removals.iter().cloned());
        self.accum = self.accum.batch_updates(
            additions.clone(),
            removals,
            sk,
            &empty_initial,
            &mut snapshot,
        )?;
        for e in additions {
            state.add(e).await;
        }
        for e in removals {
            state.remove(e).await;
        }
        Ok(())
    }

    pub async fn membership_witness<S: State>(
        &self,
        element: &Fr,
        sk: &AccumulatorSecretKey,
        state: &S,
    ) -> Result<MembershipWitness, CredentialError> {
        if !state.has(element).await {
            return Err(CredentialError::ElementAbsentFromAccumulator);
        }
        let snapshot = Snapshot::with([*element]);
        Ok(self.accum.get_membership_witness(element, sk, &snapshot)?)
    }

    /// Non-membership witness generation walks every member, so the whole
    /// membership set is fetched from the store (bounded by `max_size`).
    pub async fn non_membership_witness<S: State, I: InitialElementsStore>(
        &self,
        element: &Fr,
        sk: &AccumulatorSecretKey,
        initial_elements: &I,
        state: &S,
        params: &AccumulatorParams,
    ) -> Result<NonMembershipWitness, CredentialError> {
        if initial_elements.has(element).await || state.has(element).await {
            return Err(CredentialError::ElementPresentInAccumulator);
        }
        let members = state.elements().await;
        let snapshot = Snapshot::with(members);
        Ok(self
            .accum
            .get_non_membership_witness(element, sk, &snapshot, params)?)
    }

    pub fn verify_membership(
        &self,
        element: &Fr,
        witness: &MembershipWitness,
        pk: &AccumulatorPublicKey,
        params: &AccumulatorParams,
    ) -> bool {
        self.accum.verify_membership(element, witness, pk, params)
    }

    pub fn verify_non_membership(
        &self,
        element: &Fr,
        witness: &NonMembershipWitness,
        pk: &AccumulatorPublicKey,
        params: &AccumulatorParams,
    ) -> bool {
        self.accum
            .verify_non_membership(element, witness, pk, params)
    }

    pub fn compute_update_info(
        &self,
        additions: &[Fr],
        removals: &[Fr],
        sk: &AccumulatorSecretKey,
    ) -> Omega {
        Omega::new(additions, removals, self.value(), sk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_std::UniformRand;

    #[tokio::test]
    async fn positive_accumulator_state_invariants() {
        let mut rng = StdRng::seed_from_u64(0u64);
        let params = accumulator_params();
        let keypair = accumulator_keypair(&mut rng);
        let mut accum = PositiveAccumulator::initialize(&params);
        let mut state = InMemoryState::new();

        let e1 = Fr::rand(&mut rng);
        let e2 = Fr::rand(&mut rng);

        accum.add(e1, &keypair.secret_key, &mut state).await.unwrap();
        assert!(state.has(&e1).await);
        // double add fails and leaves the value unchanged
        let before = *accum.value();
        assert!(matches!(
            accum.add(e1, &keypair.secret_key, &mut state).await,
            Err(CredentialError::ElementPresentInAccumulator)
        ));
        assert_eq!(before, *accum.value());

        assert!(matches!(
            accum.remove(&e2, &keypair.secret_key, &mut state).await,
            Err(CredentialError::ElementAbsentFromAccumulator)
        ));

        let wit = accum
            .membership_witness(&e1, &keypair.secret_key, &state)
            .await
            .unwrap();
        assert!(accum.verify_membership(&e1, &wit, &keypair.public_key, &params));

        accum
            .remove(&e1, &keypair.secret_key, &mut state)
            .await
            .unwrap();
        assert!(!state.has(&e1).await);
    }

    #[tokio::test]
    async fn batches_are_checked_up_front() {
        let mut rng = StdRng::seed_from_u64(1u64);
        let params = accumulator_params();
        let keypair = accumulator_keypair(&mut rng);
        let mut accum = PositiveAccumulator::initialize(&params);
        let mut state = InMemoryState::new();

        let elems = (0..5).map(|_| Fr::rand(&mut rng)).collect::<Vec<_>>();
        accum
            .add_batch(elems.clone(), &keypair.secret_key, &mut state)
            .await
            .unwrap();
        assert_eq!(state.size().await, 5);

        // duplicate inside a batch
        let dup = vec![elems[0], elems[0]];
        assert!(matches!(
            accum
                .remove_batch(&dup, &keypair.secret_key, &mut state)
                .await,
            Err(CredentialError::DuplicateElementInBatch)
        ));
        // nothing was removed
        assert_eq!(state.size().await, 5);

        let fresh = (0..2).map(|_| Fr::rand(&mut rng)).collect::<Vec<_>>();
        accum
            .add_remove_batches(fresh.clone(), &elems[..2], &keypair.secret_key, &mut state)
            .await
            .unwrap();
        for a in &fresh {
            assert!(state.has(a).await);
        }
        for r in &elems[..2] {
            assert!(!state.has(r).await);
        }
    }

    #[tokio::test]
    async fn witness_update_with_public_info() {
        let mut rng = StdRng::seed_from_u64(2u64);
        let params = accumulator_params();
        let keypair = accumulator_keypair(&mut rng);
        let mut accum = PositiveAccumulator::initialize(&params);
        let mut state = InMemoryState::new();

        let member = Fr::rand(&mut rng);
        accum
            .add(member, &keypair.secret_key, &mut state)
            .await
            .unwrap();
        let wit = accum
            .membership_witness(&member, &keypair.secret_key, &state)
            .await
            .unwrap();

        let additions = (0..3).map(|_| Fr::rand(&mut rng)).collect::<Vec<_>>();
        let omega = accum.compute_update_info(&additions, &[], &keypair.secret_key);
        accum
            .add_remove_batches(additions.clone(), &[], &keypair.secret_key, &mut state)
            .await
            .unwrap();

        // stale witness no longer verifies; updated one does
        assert!(!accum.verify_membership(&member, &wit, &keypair.public_key, &params));
        let updated = wit
            .update_using_public_info_after_batch_updates(&additions, &[], &omega, &member)
            .unwrap();
        assert!(accum.verify_membership(&member, &updated, &keypair.public_key, &params));
    }

    #[tokio::test]
    async fn universal_accumulator_non_membership() {
        let mut rng = StdRng::seed_from_u64(3u64);
        let params = accumulator_params();
        let keypair = accumulator_keypair(&mut rng);
        let mut initial = InMemoryInitialElements::new();
        let mut accum =
            UniversalAccumulator::initialize(&mut rng, &params, 50, &keypair.secret_key, &mut initial)
                .await;
        let mut state = InMemoryState::new();

        let member = Fr::rand(&mut rng);
        let non_member = Fr::rand(&mut rng);
        accum
            .add(member, &keypair.secret_key, &initial, &mut state)
            .await
            .unwrap();

        let wit = accum
            .non_membership_witness(&non_member, &keypair.secret_key, &initial, &state, &params)
            .await
            .unwrap();
        assert!(accum.verify_non_membership(&non_member, &wit, &keypair.public_key, &params));

        // a member has no non-membership witness
        assert!(accum
            .non_membership_witness(&member, &keypair.secret_key, &initial, &state, &params)
            .await
            .is_err());
    }
}
