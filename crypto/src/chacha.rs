// Copyright (c) 2019-2025 The Umbra Project developers

//! ChaCha8 stream cipher for wallet-file encryption.

use chacha20::{
    cipher::{KeyIvInit, StreamCipher},
    ChaCha8,
};

/// Key length in bytes.
pub const CHACHA8_KEY_SIZE: usize = 32;

/// IV length in bytes as stored in the wallet file.
pub const CHACHA8_IV_SIZE: usize = 8;

/// Apply the ChaCha8 keystream to `data`.
///
/// Encryption and decryption are the same operation. The wallet file
/// carries an 8-byte IV; it occupies the low 8 bytes of the cipher nonce
/// with a zero 4-byte prefix.
pub fn chacha8(key: &[u8; CHACHA8_KEY_SIZE], iv: &[u8; CHACHA8_IV_SIZE], data: &[u8]) -> Vec<u8> {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(iv);

    let mut cipher = ChaCha8::new(key.into(), (&nonce).into());
    let mut out = data.to_vec();
    cipher.apply_keystream(&mut out);
    out
}
