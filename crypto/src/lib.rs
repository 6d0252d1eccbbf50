// Copyright (c) 2019-2025 The Umbra Project developers

//! Cryptographic primitives consumed by the Umbra wallet engine.
//!
//! Everything here is pure and deterministic given its inputs (signing
//! additionally takes a caller-supplied RNG). Higher layers treat this
//! crate as a black box: one-time key derivation, key images, ring
//! signatures, content/tree hashing, the password KDF and the ChaCha8
//! stream cipher used by the wallet file.

pub mod chacha;
pub mod hash;
pub mod keys;
pub mod onetime;
pub mod ring;

mod error;

pub use chacha::{chacha8, CHACHA8_IV_SIZE, CHACHA8_KEY_SIZE};
pub use error::Error;
pub use hash::{hash, slow_hash, tree_hash, Hash32};
pub use keys::{KeyPair, PublicKey, SecretKey};
pub use onetime::{derive_public, derive_secret, message_key};
pub use ring::{key_image, KeyImage, RingSignature};

/// Result alias for facade operations.
pub type Result<T> = core::result::Result<T, Error>;
