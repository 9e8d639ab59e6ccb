//! Anonymous credentials over composite zero-knowledge proofs.
//!
//! Credentials are structured JSON documents described by a JSON Schema. A
//! [`CredentialSchema`] flattens the document into an ordered vector of
//! attributes, each encoded to a field element, and a BBS, BBS+ or PS
//! signature commits to that vector. Presenting credentials means proving
//! knowledge of the signatures while revealing a chosen subset of attributes
//! and, in the same composite proof, any of: accumulator (non-)membership for
//! revocation, bound checks (LegoGroth16, Bulletproofs++, set-membership
//! check with or without keyed verification), SAVER verifiable encryption,
//! arbitrary Circom predicates and Pedersen-commitment pseudonyms. Witness
//! equalities tie attribute positions together across statements; the
//! flattened schema order is the single authority for those positions.
//!
//! [`PresentationBuilder`] drives the whole pipeline for a holder;
//! [`Presentation::verify`] reconstructs the statements from the public
//! specification on the verifier's side. [`BlindedCredentialRequestBuilder`]
//! runs the same pipeline while committing to attributes a new credential's
//! issuer must sign without seeing.
//!
//! [`CredentialSchema`]: crate::schema::CredentialSchema
//! [`PresentationBuilder`]: crate::presentation::PresentationBuilder
//! [`Presentation::verify`]: crate::presentation::Presentation::verify
//! [`BlindedCredentialRequestBuilder`]: crate::blinded::BlindedCredentialRequestBuilder

pub mod accumulator;
pub mod blinded;
pub mod composite;
pub mod credential;
pub mod encoding;
pub mod error;
pub mod presentation;
pub mod schema;
pub mod setup_registry;
pub mod types;
pub mod util;

pub mod prelude {
    pub use crate::accumulator::{
        accumulator_keypair, accumulator_params, encode_revocation_id, membership_proving_key,
        non_membership_proving_key, InMemoryInitialElements, InMemoryState, InitialElementsStore,
        PositiveAccumulator, State, UniversalAccumulator,
    };
    pub use crate::blinded::{
        BlindedCredential, BlindedCredentialRequest, BlindedCredentialRequestBuilder,
    };
    pub use crate::composite::{CompositeProof, QuasiProofSpec};
    pub use crate::credential::{Credential, CredentialBuilder, CRYPTO_VERSION};
    pub use crate::encoding::LeafType;
    pub use crate::error::{CredentialError, EncodingError, SchemaError};
    pub use crate::presentation::{
        AccumInfo, Presentation, PresentationBuilder, PresentationSpecification,
        StatusWitnessKind,
    };
    pub use crate::schema::{CredentialSchema, ParsingOptions, MEM_CHECK_STR, NON_MEM_CHECK_STR};
    pub use crate::setup_registry::{BoundCheckProtocol, PredicateParam, PredicateParams};
    pub use crate::types::{
        generate_keypair, IssuerPublicKey, IssuerSecretKey, Signature, SignatureParams,
        SignatureScheme,
    };
}
