//! Raw key-pair generation for every supported family.
//!
//! Encodings are wire-stable; the keystore persists exactly these bytes
//! (encrypted) and [`sign`](super::Keystore::sign) re-parses them:
//!
//! - ECDSA/P-256: SEC1 (RFC 5915) DER private key, uncompressed SEC1 public.
//! - ECDSA/secp256k1: raw 32-byte scalar, uncompressed SEC1 public. The
//!   curve-aware pair keeps the curve identity out of band instead of relying
//!   on a named-curve OID.
//! - RSA: PKCS#1 DER private and public, 2048-bit modulus.
//! - Ed25519: PKCS#8 DER private, raw 32-byte public.
//! - Symmetric: 32 random bytes, no public half.

use ed25519_dalek::pkcs8::EncodePrivateKey as _;
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use super::{Curve, KeyFamily};
use crate::error::Error;

/// RSA modulus size used when generating keys.
const RSA_BITS: usize = 2048;
/// Length of generated symmetric secrets.
const SYMMETRIC_LEN: usize = 32;

/// Freshly generated key material, private half kept in a zeroizing buffer.
pub struct GeneratedKey {
    /// Encoded private key bytes (see module docs for the per-family format).
    pub private: Zeroizing<Vec<u8>>,
    /// Encoded public key bytes; `None` for symmetric keys.
    pub public: Option<Vec<u8>>,
}

/// Generate a key pair for `family` (and `curve`, for ECDSA).
///
/// # Errors
/// Returns [`Error::InvalidInput`] when a curve is supplied for a non-ECDSA
/// family or missing for ECDSA, and [`Error::Signing`] if the underlying
/// generator fails.
pub fn generate(family: KeyFamily, curve: Option<Curve>) -> Result<GeneratedKey, Error> {
    match (family, curve) {
        (KeyFamily::Ecdsa, Some(Curve::P256)) => generate_p256(),
        (KeyFamily::Ecdsa, Some(Curve::Secp256k1)) => generate_secp256k1(),
        (KeyFamily::Ecdsa, None) => Err(Error::InvalidInput(
            "ECDSA keys require a curve".to_string(),
        )),
        (KeyFamily::Rsa, None) => generate_rsa(),
        (KeyFamily::Ed25519, None) => generate_ed25519(),
        (KeyFamily::Symmetric, None) => generate_symmetric(),
        (family, Some(curve)) => Err(Error::InvalidInput(format!(
            "{family} keys do not take a curve ({curve} given)"
        ))),
    }
}

fn generate_p256() -> Result<GeneratedKey, Error> {
    let secret = p256::SecretKey::random(&mut OsRng);
    let private = secret
        .to_sec1_der()
        .map_err(|e| Error::Signing(format!("P-256 encoding failed: {e}")))?;
    let public = secret.public_key().to_sec1_bytes().to_vec();
    Ok(GeneratedKey {
        private: Zeroizing::new(private.to_vec()),
        public: Some(public),
    })
}

fn generate_secp256k1() -> Result<GeneratedKey, Error> {
    let secret = k256::SecretKey::random(&mut OsRng);
    let private = Zeroizing::new(secret.to_bytes().to_vec());
    let public = secret.public_key().to_sec1_bytes().to_vec();
    Ok(GeneratedKey {
        private,
        public: Some(public),
    })
}

fn generate_rsa() -> Result<GeneratedKey, Error> {
    let secret = RsaPrivateKey::new(&mut OsRng, RSA_BITS)
        .map_err(|e| Error::Signing(format!("RSA generation failed: {e}")))?;
    let private = secret
        .to_pkcs1_der()
        .map_err(|e| Error::Signing(format!("RSA encoding failed: {e}")))?;
    let public = RsaPublicKey::from(&secret)
        .to_pkcs1_der()
        .map_err(|e| Error::Signing(format!("RSA public encoding failed: {e}")))?;
    Ok(GeneratedKey {
        private: Zeroizing::new(private.as_bytes().to_vec()),
        public: Some(public.into_vec()),
    })
}

fn generate_ed25519() -> Result<GeneratedKey, Error> {
    let signing = ed25519_dalek::SigningKey::generate(&mut OsRng);
    let private = signing
        .to_pkcs8_der()
        .map_err(|e| Error::Signing(format!("Ed25519 encoding failed: {e}")))?;
    Ok(GeneratedKey {
        private: Zeroizing::new(private.as_bytes().to_vec()),
        public: Some(signing.verifying_key().to_bytes().to_vec()),
    })
}

fn generate_symmetric() -> Result<GeneratedKey, Error> {
    let mut secret = Zeroizing::new(vec![0u8; SYMMETRIC_LEN]);
    OsRng.fill_bytes(&mut secret);
    Ok(GeneratedKey {
        private: secret,
        public: None,
    })
}

/// Re-derive the public half from encoded private bytes.
///
/// Used on import to verify that a caller-supplied public key matches the
/// private material.
///
/// # Errors
/// Returns [`Error::InvalidKey`] when the private bytes do not parse in the
/// family's encoding.
pub fn public_from_private(
    family: KeyFamily,
    curve: Option<Curve>,
    private: &[u8],
) -> Result<Option<Vec<u8>>, Error> {
    match (family, curve) {
        (KeyFamily::Ecdsa, Some(Curve::P256)) => {
            let secret = p256::SecretKey::from_sec1_der(private)
                .map_err(|e| Error::InvalidKey(format!("P-256 private key: {e}")))?;
            Ok(Some(secret.public_key().to_sec1_bytes().to_vec()))
        }
        (KeyFamily::Ecdsa, Some(Curve::Secp256k1)) => {
            let secret = k256::SecretKey::from_slice(private)
                .map_err(|e| Error::InvalidKey(format!("secp256k1 private key: {e}")))?;
            Ok(Some(secret.public_key().to_sec1_bytes().to_vec()))
        }
        (KeyFamily::Rsa, _) => {
            let secret = <RsaPrivateKey as rsa::pkcs1::DecodeRsaPrivateKey>::from_pkcs1_der(private)
                .map_err(|e| Error::InvalidKey(format!("RSA private key: {e}")))?;
            let public = RsaPublicKey::from(&secret)
                .to_pkcs1_der()
                .map_err(|e| Error::InvalidKey(format!("RSA public key: {e}")))?;
            Ok(Some(public.into_vec()))
        }
        (KeyFamily::Ed25519, _) => {
            let signing =
                <ed25519_dalek::SigningKey as ed25519_dalek::pkcs8::DecodePrivateKey>::from_pkcs8_der(
                    private,
                )
                .map_err(|e| Error::InvalidKey(format!("Ed25519 private key: {e}")))?;
            Ok(Some(signing.verifying_key().to_bytes().to_vec()))
        }
        (KeyFamily::Symmetric, _) => Ok(None),
        (KeyFamily::Ecdsa, None) => Err(Error::InvalidKey(
            "ECDSA keys require a curve".to_string(),
        )),
    }
}
