// Copyright (c) 2019-2025 The Umbra Project developers

//! Ristretto key types.
//!
//! A wallet account holds two keypairs (spend and view); transactions carry
//! an ephemeral tx keypair. All of them are plain Ristretto scalars/points
//! wrapped so that secret material zeroizes on drop and comparisons on
//! secrets run in constant time.

use core::fmt;

use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_POINT, ristretto::RistrettoPoint, scalar::Scalar,
};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::{Error, Result};

/// A secret scalar. Zeroized on drop.
#[derive(Clone, Deserialize, Serialize, Zeroize)]
#[zeroize(drop)]
pub struct SecretKey(Scalar);

impl SecretKey {
    /// Draw a fresh random secret.
    pub fn random(rng: &mut dyn CryptoRngCore) -> Self {
        Self(Scalar::random(rng))
    }

    /// Rebuild from canonical little-endian bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        Option::<Scalar>::from(Scalar::from_canonical_bytes(*bytes))
            .map(Self)
            .ok_or(Error::InvalidInput)
    }

    /// Canonical little-endian encoding.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub(crate) fn scalar(&self) -> &Scalar {
        &self.0
    }

    pub(crate) fn from_scalar(scalar: Scalar) -> Self {
        Self(scalar)
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SecretKey {}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the scalar itself.
        write!(f, "SecretKey(..)")
    }
}

/// A public Ristretto point.
#[derive(Clone, Copy, Deserialize, Serialize)]
pub struct PublicKey(RistrettoPoint);

impl PublicKey {
    /// The point corresponding to a secret: `P = x * G`.
    pub fn from_secret(secret: &SecretKey) -> Self {
        Self(secret.scalar() * RISTRETTO_BASEPOINT_POINT)
    }

    /// Rebuild from a compressed encoding.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        curve25519_dalek::ristretto::CompressedRistretto(*bytes)
            .decompress()
            .map(Self)
            .ok_or(Error::InvalidInput)
    }

    /// Compressed encoding.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.compress().to_bytes()
    }

    pub(crate) fn point(&self) -> &RistrettoPoint {
        &self.0
    }

    pub(crate) fn from_point(point: RistrettoPoint) -> Self {
        Self(point)
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for PublicKey {}

impl core::hash::Hash for PublicKey {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

/// A secret with its matching public point.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct KeyPair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

impl KeyPair {
    /// Generate a fresh keypair.
    pub fn generate(rng: &mut dyn CryptoRngCore) -> Self {
        let secret = SecretKey::random(rng);
        let public = PublicKey::from_secret(&secret);
        Self { public, secret }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_secret_roundtrip() {
        let mut rng = StdRng::seed_from_u64(7);
        let secret = SecretKey::random(&mut rng);
        let restored = SecretKey::from_bytes(&secret.to_bytes()).unwrap();
        assert_eq!(secret, restored);
    }

    #[test]
    fn test_public_matches_secret() {
        let mut rng = StdRng::seed_from_u64(7);
        let pair = KeyPair::generate(&mut rng);
        assert_eq!(pair.public, PublicKey::from_secret(&pair.secret));
    }

    #[test]
    fn test_public_rejects_garbage() {
        // Not a valid Ristretto encoding.
        assert_eq!(PublicKey::from_bytes(&[0xff; 32]), Err(Error::InvalidInput));
    }
}
