use ark_serialize::SerializationError;
use ark_std::{collections::BTreeSet, string::String};
use bbs_plus::error::BBSPlusError;
use coconut_crypto::PSError;
use proof_system::error::ProofSystemError;
use vb_accumulator::error::VBAccumulatorError;

/// Errors raised while turning a JSON-Schema document into a credential schema
#[derive(Debug)]
pub enum SchemaError {
    NotAnObject(String),
    MissingProperties,
    UnknownType(String, String),
    UnknownRef(String, String),
    /// `integer` without `minimum` when parsing options don't allow defaults
    MissingMinimum(String),
    /// `number` without `multipleOf` when parsing options don't allow defaults
    MissingMultipleOf(String),
    /// `multipleOf` must be a negative power of 10
    InvalidMultipleOf(String, f64),
    /// Array `items` must be a fixed-length list of sub-schemas
    UnboundedArrayItems(String),
    /// `credentialStatus` must declare string leaves `id`, `type`, `revocationCheck`, `revocationId`
    InvalidStatus(String),
    InvalidEmbeddedSchema(String),
    InvalidVersion(String),
    Json(serde_json::Error),
}

/// Errors raised while encoding an attribute value to a field element
#[derive(Debug)]
pub enum EncodingError {
    /// The value's JSON type does not match the schema leaf type
    ValueIncompatibleWithType(String, String),
    /// Attribute has no encoder and defaults are disabled
    NoEncoderForAttribute(String),
    IntegerBelowMinimum(String, i64, i64),
    NegativeValueForPositiveType(String),
    /// Decimal has more fractional digits than the leaf allows
    TooManyDecimalPlaces(String, u8),
    /// Reversible strings must fit in a field element after (de)compression
    StringTooLongForReversibleEncoding(String, usize),
    CompressionFailed(String),
    DecompressionFailed,
    /// Decoded bytes of a reversible string are not valid UTF-8
    InvalidUtf8InReversibleString,
    NotReversibleEncoding,
}

#[derive(Debug)]
pub enum CredentialError {
    Schema(SchemaError),
    Encoding(EncodingError),
    /// Subject (or status) does not flatten to exactly the schema's leaf set
    SubjectIncompatibleWithSchema {
        missing: BTreeSet<String>,
        extra: BTreeSet<String>,
    },
    AttributeNotFoundInSchema(String),
    CredentialIndexOutOfRange(usize, usize),
    /// Credential declares a status but no accumulator witness was supplied
    MissingAccumInfoForStatus(usize),
    /// Witness variant does not match the credential's `revocationCheck`
    IncompatibleRevocationCheck(usize, String),
    UnknownRevocationCheck(String),
    StatusNotPresent(usize),
    InvalidBounds(String, String),
    /// Bounds can only be enforced on numeric leaves
    BoundsNotApplicableToLeafType(String),
    /// Parameter registered under this id has the wrong kind for the operation
    IncompatiblePredicateParam(String),
    PredicateParamNotFound(String),
    DuplicatePredicateParam(String),
    /// Requested signature scheme does not match the key
    IncompatibleScheme(String, String),
    SignatureVerificationFailed,
    MessageCountIncompatibleWithKey(usize, usize),
    BlindedAttributeNotInSchema(String),
    BlindedAttributeOverlapsKnown(String),
    InvalidBlindedRequest(String),
    UnsupportedSchemeForBlindIssuance(String),
    ElementPresentInAccumulator,
    ElementAbsentFromAccumulator,
    DuplicateElementInBatch,
    InitialElementsNotLoaded,
    ProofSystem(ProofSystemError),
    BBSPlus(BBSPlusError),
    PS(PSError),
    Accumulator(VBAccumulatorError),
    Serialization(SerializationError),
    Json(serde_json::Error),
    Base58Decode(String),
    InvalidPresentation(String),
}

impl From<SchemaError> for CredentialError {
    fn from(e: SchemaError) -> Self {
        Self::Schema(e)
    }
}

impl From<EncodingError> for CredentialError {
    fn from(e: EncodingError) -> Self {
        Self::Encoding(e)
    }
}

impl From<ProofSystemError> for CredentialError {
    fn from(e: ProofSystemError) -> Self {
        Self::ProofSystem(e)
    }
}

impl From<BBSPlusError> for CredentialError {
    fn from(e: BBSPlusError) -> Self {
        Self::BBSPlus(e)
    }
}

impl From<PSError> for CredentialError {
    fn from(e: PSError) -> Self {
        Self::PS(e)
    }
}

impl From<VBAccumulatorError> for CredentialError {
    fn from(e: VBAccumulatorError) -> Self {
        Self::Accumulator(e)
    }
}

impl From<SerializationError> for CredentialError {
    fn from(e: SerializationError) -> Self {
        Self::Serialization(e)
    }
}

impl From<serde_json::Error> for CredentialError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<serde_json::Error> for SchemaError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
