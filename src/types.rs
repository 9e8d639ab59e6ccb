//! Typed facade over the pairing-based signature back-end. Everything in this
//! crate is pinned to BLS12-381, mirroring the WASM bindings of the backing
//! workspace; the aliases and scheme-dispatch enums here are the only place
//! that pinning appears.

use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::{rand::RngCore, vec::Vec};
use blake2::Blake2b512;
use dock_crypto_utils::signature::MultiMessageSignatureParams;

use crate::error::CredentialError;

pub type Bls12381 = ark_bls12_381::Bls12_381;
pub type Fr = ark_bls12_381::Fr;
pub type G1Affine = ark_bls12_381::G1Affine;

pub type BBSPlusSignatureParams = bbs_plus::prelude::SignatureParamsG1<Bls12381>;
pub type BBSSignatureParams = bbs_plus::prelude::SignatureParams23G1<Bls12381>;
pub type PSSignatureParams = coconut_crypto::setup::SignatureParams<Bls12381>;

pub type BBSPlusSecretKey = bbs_plus::prelude::SecretKey<Fr>;
pub type BBSPlusPublicKey = bbs_plus::prelude::PublicKeyG2<Bls12381>;
pub type PSSecretKey = coconut_crypto::setup::SecretKey<Fr>;
pub type PSPublicKey = coconut_crypto::setup::PublicKey<Bls12381>;

pub type BBSPlusSignature = bbs_plus::prelude::SignatureG1<Bls12381>;
pub type BBSSignature = bbs_plus::prelude::Signature23G1<Bls12381>;
pub type PSSignature = coconut_crypto::Signature<Bls12381>;

/// Public label all issuers derive their signature parameters from. Parameters
/// are a pure function of this label and the message count, so provers and
/// verifiers regenerate them instead of shipping them around.
pub const SIGNATURE_PARAMS_LABEL: &[u8] = b"anonymous-credentials signature params";

pub const BBS_SIGNATURE_TYPE: &str = "Bls12381BBSSignature2023";
pub const BBS_PLUS_SIGNATURE_TYPE: &str = "Bls12381BBS+SignatureG1";
pub const PS_SIGNATURE_TYPE: &str = "Bls12381PSSignature";

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SignatureScheme {
    Bbs,
    BbsPlus,
    Ps,
}

impl SignatureScheme {
    pub fn proof_type(&self) -> &'static str {
        match self {
            Self::Bbs => BBS_SIGNATURE_TYPE,
            Self::BbsPlus => BBS_PLUS_SIGNATURE_TYPE,
            Self::Ps => PS_SIGNATURE_TYPE,
        }
    }

    pub fn from_proof_type(t: &str) -> Result<Self, CredentialError> {
        match t {
            BBS_SIGNATURE_TYPE => Ok(Self::Bbs),
            BBS_PLUS_SIGNATURE_TYPE => Ok(Self::BbsPlus),
            PS_SIGNATURE_TYPE => Ok(Self::Ps),
            _ => Err(CredentialError::IncompatibleScheme(
                t.into(),
                "known signature type".into(),
            )),
        }
    }
}

/// Signature parameters of any supported scheme, always derived from
/// [`SIGNATURE_PARAMS_LABEL`] for a given message count.
#[derive(Clone, Debug)]
pub enum SignatureParams {
    Bbs(BBSSignatureParams),
    BbsPlus(BBSPlusSignatureParams),
    Ps(PSSignatureParams),
}

impl SignatureParams {
    pub fn generate(scheme: SignatureScheme, message_count: u32) -> Self {
        match scheme {
            SignatureScheme::Bbs => Self::Bbs(BBSSignatureParams::new::<Blake2b512>(
                SIGNATURE_PARAMS_LABEL,
                message_count as _,
            )),
            SignatureScheme::BbsPlus => Self::BbsPlus(BBSPlusSignatureParams::new::<Blake2b512>(
                SIGNATURE_PARAMS_LABEL,
                message_count as _,
            )),
            SignatureScheme::Ps => Self::Ps(PSSignatureParams::new::<Blake2b512>(
                SIGNATURE_PARAMS_LABEL,
                message_count as _,
            )),
        }
    }

    /// Same label, different message count. Used when one proof covers
    /// credentials of different sizes.
    pub fn adapt(&self, new_message_count: u32) -> Self {
        Self::generate(self.scheme(), new_message_count)
    }

    pub fn scheme(&self) -> SignatureScheme {
        match self {
            Self::Bbs(_) => SignatureScheme::Bbs,
            Self::BbsPlus(_) => SignatureScheme::BbsPlus,
            Self::Ps(_) => SignatureScheme::Ps,
        }
    }

    pub fn supported_message_count(&self) -> usize {
        match self {
            Self::Bbs(p) => p.supported_message_count() as usize,
            Self::BbsPlus(p) => p.supported_message_count() as usize,
            Self::Ps(p) => p.supported_message_count() as usize,
        }
    }
}

#[derive(Clone, Debug)]
pub enum IssuerSecretKey {
    Bbs(BBSPlusSecretKey),
    BbsPlus(BBSPlusSecretKey),
    Ps(PSSecretKey),
}

#[derive(Clone, Debug)]
pub enum IssuerPublicKey {
    Bbs(BBSPlusPublicKey),
    BbsPlus(BBSPlusPublicKey),
    Ps(PSPublicKey),
}

impl IssuerSecretKey {
    pub fn scheme(&self) -> SignatureScheme {
        match self {
            Self::Bbs(_) => SignatureScheme::Bbs,
            Self::BbsPlus(_) => SignatureScheme::BbsPlus,
            Self::Ps(_) => SignatureScheme::Ps,
        }
    }
}

impl IssuerPublicKey {
    pub fn scheme(&self) -> SignatureScheme {
        match self {
            Self::Bbs(_) => SignatureScheme::Bbs,
            Self::BbsPlus(_) => SignatureScheme::BbsPlus,
            Self::Ps(_) => SignatureScheme::Ps,
        }
    }
}

/// Generate an issuer keypair. `message_count` sizes the key for PS (whose
/// secret key has one component per message) and picks the parameters the
/// public key is bound to for BBS and BBS+.
pub fn generate_keypair<R: RngCore>(
    rng: &mut R,
    scheme: SignatureScheme,
    message_count: u32,
) -> (IssuerSecretKey, IssuerPublicKey) {
    match scheme {
        SignatureScheme::Bbs => {
            let params = match SignatureParams::generate(scheme, message_count) {
                SignatureParams::Bbs(p) => p,
                _ => unreachable!(),
            };
            let keypair =
                bbs_plus::prelude::KeypairG2::<Bls12381>::generate_using_rng_and_bbs23_params(
                    rng, &params,
                );
            (
                IssuerSecretKey::Bbs(keypair.secret_key.clone()),
                IssuerPublicKey::Bbs(keypair.public_key.clone()),
            )
        }
        SignatureScheme::BbsPlus => {
            let params = match SignatureParams::generate(scheme, message_count) {
                SignatureParams::BbsPlus(p) => p,
                _ => unreachable!(),
            };
            let keypair = bbs_plus::prelude::KeypairG2::<Bls12381>::generate_using_rng(rng, &params);
            (
                IssuerSecretKey::BbsPlus(keypair.secret_key.clone()),
                IssuerPublicKey::BbsPlus(keypair.public_key.clone()),
            )
        }
        SignatureScheme::Ps => {
            let params = match SignatureParams::generate(scheme, message_count) {
                SignatureParams::Ps(p) => p,
                _ => unreachable!(),
            };
            let sk = PSSecretKey::rand(rng, message_count as _);
            let pk = PSPublicKey::new(&sk, &params);
            (IssuerSecretKey::Ps(sk), IssuerPublicKey::Ps(pk))
        }
    }
}

/// A signature of any supported scheme over an attribute vector.
#[derive(Clone, Debug)]
pub enum Signature {
    Bbs(BBSSignature),
    BbsPlus(BBSPlusSignature),
    Ps(PSSignature),
}

impl Signature {
    pub fn new<R: RngCore>(
        rng: &mut R,
        messages: &[Fr],
        sk: &IssuerSecretKey,
        params: &SignatureParams,
    ) -> Result<Self, CredentialError> {
        match (sk, params) {
            (IssuerSecretKey::Bbs(sk), SignatureParams::Bbs(params)) => {
                Ok(Self::Bbs(BBSSignature::new(rng, messages, sk, params)?))
            }
            (IssuerSecretKey::BbsPlus(sk), SignatureParams::BbsPlus(params)) => {
                Ok(Self::BbsPlus(BBSPlusSignature::new(
                    rng, messages, sk, params,
                )?))
            }
            (IssuerSecretKey::Ps(sk), SignatureParams::Ps(params)) => {
                Ok(Self::Ps(PSSignature::new(rng, messages, sk, params)?))
            }
            (sk, params) => Err(CredentialError::IncompatibleScheme(
                format!("{:?}", sk.scheme()),
                format!("{:?}", params.scheme()),
            )),
        }
    }

    pub fn verify(
        &self,
        messages: &[Fr],
        pk: &IssuerPublicKey,
        params: &SignatureParams,
    ) -> Result<(), CredentialError> {
        match (self, pk, params) {
            (Self::Bbs(sig), IssuerPublicKey::Bbs(pk), SignatureParams::Bbs(params)) => {
                sig.verify(messages, pk.clone(), params.clone())?;
                Ok(())
            }
            (Self::BbsPlus(sig), IssuerPublicKey::BbsPlus(pk), SignatureParams::BbsPlus(params)) => {
                sig.verify(messages, pk.clone(), params.clone())?;
                Ok(())
            }
            (Self::Ps(sig), IssuerPublicKey::Ps(pk), SignatureParams::Ps(params)) => {
                sig.verify(messages, pk, params)?;
                Ok(())
            }
            _ => Err(CredentialError::IncompatibleScheme(
                format!("{:?}", self.scheme()),
                format!("{:?}", pk.scheme()),
            )),
        }
    }

    pub fn scheme(&self) -> SignatureScheme {
        match self {
            Self::Bbs(_) => SignatureScheme::Bbs,
            Self::BbsPlus(_) => SignatureScheme::BbsPlus,
            Self::Ps(_) => SignatureScheme::Ps,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CredentialError> {
        let mut bytes = Vec::new();
        match self {
            Self::Bbs(s) => s.serialize_compressed(&mut bytes)?,
            Self::BbsPlus(s) => s.serialize_compressed(&mut bytes)?,
            Self::Ps(s) => s.serialize_compressed(&mut bytes)?,
        }
        Ok(bytes)
    }

    pub fn from_bytes(scheme: SignatureScheme, bytes: &[u8]) -> Result<Self, CredentialError> {
        Ok(match scheme {
            SignatureScheme::Bbs => Self::Bbs(BBSSignature::deserialize_compressed(bytes)?),
            SignatureScheme::BbsPlus => {
                Self::BbsPlus(BBSPlusSignature::deserialize_compressed(bytes)?)
            }
            SignatureScheme::Ps => Self::Ps(PSSignature::deserialize_compressed(bytes)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_std::{
        rand::{rngs::StdRng, SeedableRng},
        UniformRand,
    };

    #[test]
    fn params_are_label_deterministic() {
        let p1 = SignatureParams::generate(SignatureScheme::BbsPlus, 5);
        let p2 = SignatureParams::generate(SignatureScheme::BbsPlus, 5);
        match (p1, p2) {
            (SignatureParams::BbsPlus(a), SignatureParams::BbsPlus(b)) => assert_eq!(a, b),
            _ => unreachable!(),
        }
        assert_eq!(
            SignatureParams::generate(SignatureScheme::Bbs, 3).supported_message_count(),
            3
        );
    }

    #[test]
    fn sign_verify_round_trip_all_schemes() {
        let mut rng = StdRng::seed_from_u64(0u64);
        let msgs = (0..4).map(|_| Fr::rand(&mut rng)).collect::<Vec<_>>();
        for scheme in [
            SignatureScheme::Bbs,
            SignatureScheme::BbsPlus,
            SignatureScheme::Ps,
        ] {
            let params = SignatureParams::generate(scheme, 4);
            let (sk, pk) = generate_keypair(&mut rng, scheme, 4);
            let sig = Signature::new(&mut rng, &msgs, &sk, &params).unwrap();
            sig.verify(&msgs, &pk, &params).unwrap();

            let mut wrong = msgs.clone();
            wrong[1] = Fr::rand(&mut rng);
            assert!(sig.verify(&wrong, &pk, &params).is_err());

            let bytes = sig.to_bytes().unwrap();
            let sig_back = Signature::from_bytes(scheme, &bytes).unwrap();
            sig_back.verify(&msgs, &pk, &params).unwrap();
        }
    }
}
