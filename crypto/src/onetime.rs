// Copyright (c) 2019-2025 The Umbra Project developers

//! One-time (stealth) output key derivation.
//!
//! Every transaction carries an ephemeral tx keypair `(r, R)`. An output at
//! index `i` destined for the address `(S, V)` has the one-time key
//! `P_i = Hs(r * V, i) * G + S`. The recipient recognizes it by computing
//! the same point from `v * R` (the DH shared point is identical on both
//! sides), and can spend it with `x_i = Hs(v * R, i) + s`.

use blake2::{digest::Digest, Blake2b512};
use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_POINT, ristretto::RistrettoPoint, scalar::Scalar,
};

use crate::{keys::PublicKey, keys::SecretKey, Result};

const DERIVATION_DOMAIN_TAG: &[u8] = b"umbra_output_derivation";
const MESSAGE_KEY_DOMAIN_TAG: &[u8] = b"umbra_message_key";

fn derivation_scalar(shared: &RistrettoPoint, output_index: u32) -> Scalar {
    let mut hasher = Blake2b512::new();
    hasher.update(DERIVATION_DOMAIN_TAG);
    hasher.update(shared.compress().as_bytes());
    hasher.update(output_index.to_le_bytes());
    Scalar::from_hash(hasher)
}

/// Derive the one-time public key for an output.
///
/// Symmetric in the DH pair: the sender passes `(tx_secret, view_public)`,
/// the recipient `(view_secret, tx_public)`; both reach the same point.
/// `spend_public` is the destination's spend key.
pub fn derive_public(
    dh_secret: &SecretKey,
    dh_public: &PublicKey,
    output_index: u32,
    spend_public: &PublicKey,
) -> Result<PublicKey> {
    let shared = dh_secret.scalar() * dh_public.point();
    let scalar = derivation_scalar(&shared, output_index);
    Ok(PublicKey::from_point(
        scalar * RISTRETTO_BASEPOINT_POINT + spend_public.point(),
    ))
}

/// Recover the one-time secret key for an output we own.
pub fn derive_secret(
    view_secret: &SecretKey,
    tx_public: &PublicKey,
    output_index: u32,
    spend_secret: &SecretKey,
) -> SecretKey {
    let shared = view_secret.scalar() * tx_public.point();
    let scalar = derivation_scalar(&shared, output_index);
    SecretKey::from_scalar(scalar + spend_secret.scalar())
}

/// Symmetric key bound to the tx DH pair and a message index.
///
/// Seals per-destination messages carried in extra; sender and recipient
/// reach the same key from opposite sides of the DH pair.
pub fn message_key(dh_secret: &SecretKey, dh_public: &PublicKey, index: u32) -> [u8; 32] {
    let shared = dh_secret.scalar() * dh_public.point();
    let mut hasher = Blake2b512::new();
    hasher.update(MESSAGE_KEY_DOMAIN_TAG);
    hasher.update(shared.compress().as_bytes());
    hasher.update(index.to_le_bytes());
    let wide: [u8; 64] = hasher.finalize().into();
    let mut key = [0u8; 32];
    key.copy_from_slice(&wide[..32]);
    key
}
