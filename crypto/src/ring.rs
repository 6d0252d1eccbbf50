// Copyright (c) 2019-2025 The Umbra Project developers

//! Linkable ring signatures and key images.
//!
//! The signature proves the signer controls one of the ring's one-time
//! keys without revealing which, and publishes the key image
//! `I = x * Hp(P)` that links any two spends of the same key.

use core::fmt;

use blake2::{digest::Digest, Blake2b512};
use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_POINT, ristretto::CompressedRistretto,
    ristretto::RistrettoPoint, scalar::Scalar,
};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};

use crate::{
    hash::Hash32,
    keys::{PublicKey, SecretKey},
    Error, Result,
};

const HASH_TO_POINT_DOMAIN_TAG: &[u8] = b"umbra_hash_to_point";
const RING_CHALLENGE_DOMAIN_TAG: &[u8] = b"umbra_ring_challenge";

/// The image of a one-time secret `x` with public point `P`:
/// `I = x * Hp(P)`. One image exists per spendable coin.
#[derive(Clone, Copy, Deserialize, Eq, PartialEq, Serialize)]
pub struct KeyImage(CompressedRistretto);

impl core::hash::Hash for KeyImage {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl PartialOrd for KeyImage {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyImage {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl KeyImage {
    /// View the compressed point as bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Rebuild from a compressed encoding.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let compressed = CompressedRistretto(*bytes);
        // Must decode to a valid point even though we store it compressed.
        compressed.decompress().ok_or(Error::InvalidInput)?;
        Ok(Self(compressed))
    }

    fn decompress(&self) -> Result<RistrettoPoint> {
        self.0.decompress().ok_or(Error::InvalidInput)
    }
}

impl fmt::Debug for KeyImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyImage({})", hex::encode(self.as_bytes()))
    }
}

impl fmt::Display for KeyImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.as_bytes()))
    }
}

fn hash_to_point(public: &PublicKey) -> RistrettoPoint {
    let mut hasher = Blake2b512::new();
    hasher.update(HASH_TO_POINT_DOMAIN_TAG);
    hasher.update(public.to_bytes());
    let wide: [u8; 64] = hasher.finalize().into();
    RistrettoPoint::from_uniform_bytes(&wide)
}

/// Compute the key image for a one-time keypair.
///
/// Rejects a mismatched pair rather than emitting an image that would
/// never verify.
pub fn key_image(secret: &SecretKey, public: &PublicKey) -> Result<KeyImage> {
    if &PublicKey::from_secret(secret) != public {
        return Err(Error::InvalidInput);
    }
    let point = secret.scalar() * hash_to_point(public);
    Ok(KeyImage(point.compress()))
}

fn challenge(
    message: &Hash32,
    l_point: &RistrettoPoint,
    r_point: &RistrettoPoint,
) -> Scalar {
    let mut hasher = Blake2b512::new();
    hasher.update(RING_CHALLENGE_DOMAIN_TAG);
    hasher.update(message.as_bytes());
    hasher.update(l_point.compress().as_bytes());
    hasher.update(r_point.compress().as_bytes());
    Scalar::from_hash(hasher)
}

/// A linkable ring signature: the initial challenge plus one response per
/// ring member, alongside the key image being spent.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RingSignature {
    /// The initial challenge `c[0]`.
    pub c_zero: [u8; 32],
    /// Responses `s[0] .. s[ring_size - 1]`.
    pub responses: Vec<[u8; 32]>,
    /// Key image consumed by this signature.
    pub key_image: KeyImage,
}

impl RingSignature {
    /// Sign `message` over `ring`, where `ring[real_index]` is the public
    /// point of `secret`.
    pub fn sign(
        message: &Hash32,
        image: &KeyImage,
        ring: &[PublicKey],
        secret: &SecretKey,
        real_index: usize,
        rng: &mut dyn CryptoRngCore,
    ) -> Result<Self> {
        let ring_size = ring.len();
        if ring_size == 0 || real_index >= ring_size {
            return Err(Error::InvalidInput);
        }
        if PublicKey::from_secret(secret) != ring[real_index] {
            return Err(Error::InvalidInput);
        }

        let image_point = image.decompress()?;

        let mut challenges = vec![Scalar::ZERO; ring_size];
        let mut responses = vec![Scalar::ZERO; ring_size];

        // Commit at the real index, then close the ring around it.
        let alpha = Scalar::random(rng);
        let l_real = alpha * RISTRETTO_BASEPOINT_POINT;
        let r_real = alpha * hash_to_point(&ring[real_index]);
        challenges[(real_index + 1) % ring_size] = challenge(message, &l_real, &r_real);

        let mut i = (real_index + 1) % ring_size;
        while i != real_index {
            responses[i] = Scalar::random(rng);
            let l_point =
                responses[i] * RISTRETTO_BASEPOINT_POINT + challenges[i] * ring[i].point();
            let r_point =
                responses[i] * hash_to_point(&ring[i]) + challenges[i] * image_point;
            challenges[(i + 1) % ring_size] = challenge(message, &l_point, &r_point);
            i = (i + 1) % ring_size;
        }

        responses[real_index] = alpha - challenges[real_index] * secret.scalar();

        Ok(Self {
            c_zero: challenges[0].to_bytes(),
            responses: responses.iter().map(|s| s.to_bytes()).collect(),
            key_image: *image,
        })
    }

    /// Verify against `message` and `ring`.
    pub fn verify(&self, message: &Hash32, ring: &[PublicKey]) -> Result<()> {
        let ring_size = ring.len();
        if ring_size == 0 || self.responses.len() != ring_size {
            return Err(Error::InvalidInput);
        }

        let image_point = self.key_image.decompress()?;
        let c_zero = Option::<Scalar>::from(Scalar::from_canonical_bytes(self.c_zero))
            .ok_or(Error::InvalidInput)?;

        let mut c = c_zero;
        for (i, response) in self.responses.iter().enumerate() {
            let s = Option::<Scalar>::from(Scalar::from_canonical_bytes(*response))
                .ok_or(Error::InvalidInput)?;
            let l_point = s * RISTRETTO_BASEPOINT_POINT + c * ring[i].point();
            let r_point = s * hash_to_point(&ring[i]) + c * image_point;
            c = challenge(message, &l_point, &r_point);
        }

        if c == c_zero {
            Ok(())
        } else {
            Err(Error::InvalidSignature)
        }
    }
}
