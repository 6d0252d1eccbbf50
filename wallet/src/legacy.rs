//! Offline import of legacy key files.
//!
//! Early wallets stored only the account keys, ChaCha8-encrypted under
//! the same password KDF but without the outer framing of the current
//! format:
//!
//! ```text
//! version   u32 LE (always 0)
//! iv        8 bytes
//! plaintext: spend_public | spend_secret | view_public | view_secret
//!            creation_timestamp u64 LE
//! ```
//!
//! A migration tool reads the blob with [`import_keys`] and writes a
//! current wallet file from the result. Nothing here runs at wallet
//! runtime.

use umb_crypto::{chacha8, slow_hash, PublicKey, SecretKey, CHACHA8_IV_SIZE};

use crate::account::AccountKeys;
use crate::error::WalletError;

const LEGACY_VERSION: u32 = 0;
const LEGACY_PLAINTEXT_LEN: usize = 4 * 32 + 8;

/// Decrypt a legacy keys blob.
pub fn import_keys(bytes: &[u8], password: &str) -> Result<(AccountKeys, u64), WalletError> {
    if bytes.len() != 4 + CHACHA8_IV_SIZE + LEGACY_PLAINTEXT_LEN {
        return Err(WalletError::Internal("not a legacy keys file".into()));
    }
    let version = u32::from_le_bytes(bytes[..4].try_into().unwrap());
    if version != LEGACY_VERSION {
        return Err(WalletError::Internal(format!(
            "unsupported legacy keys version {version}"
        )));
    }

    let iv: [u8; CHACHA8_IV_SIZE] = bytes[4..4 + CHACHA8_IV_SIZE].try_into().unwrap();
    let key = slow_hash(password.as_bytes());
    let plain = chacha8(key.as_bytes(), &iv, &bytes[4 + CHACHA8_IV_SIZE..]);

    let field = |i: usize| -> [u8; 32] { plain[i * 32..(i + 1) * 32].try_into().unwrap() };
    let spend_public =
        PublicKey::from_bytes(&field(0)).map_err(|_| WalletError::WrongPassword)?;
    let spend_secret =
        SecretKey::from_bytes(&field(1)).map_err(|_| WalletError::WrongPassword)?;
    let view_public = PublicKey::from_bytes(&field(2)).map_err(|_| WalletError::WrongPassword)?;
    let view_secret = SecretKey::from_bytes(&field(3)).map_err(|_| WalletError::WrongPassword)?;

    let keys = AccountKeys {
        spend_public,
        spend_secret,
        view_public,
        view_secret,
    };
    if !keys.is_consistent() {
        return Err(WalletError::WrongPassword);
    }

    let creation_timestamp = u64::from_le_bytes(plain[128..136].try_into().unwrap());
    Ok((keys, creation_timestamp))
}

/// Encrypt keys in the legacy layout. Only tests and the migration
/// tool's round-trip checks need this.
pub fn export_keys(
    keys: &AccountKeys,
    creation_timestamp: u64,
    password: &str,
    iv: &[u8; CHACHA8_IV_SIZE],
) -> Vec<u8> {
    let mut plain = Vec::with_capacity(LEGACY_PLAINTEXT_LEN);
    plain.extend_from_slice(&keys.spend_public.to_bytes());
    plain.extend_from_slice(&keys.spend_secret.to_bytes());
    plain.extend_from_slice(&keys.view_public.to_bytes());
    plain.extend_from_slice(&keys.view_secret.to_bytes());
    plain.extend_from_slice(&creation_timestamp.to_le_bytes());

    let key = slow_hash(password.as_bytes());
    let ciphertext = chacha8(key.as_bytes(), iv, &plain);

    let mut out = Vec::with_capacity(4 + CHACHA8_IV_SIZE + ciphertext.len());
    out.extend_from_slice(&LEGACY_VERSION.to_le_bytes());
    out.extend_from_slice(iv);
    out.extend_from_slice(&ciphertext);
    out
}
