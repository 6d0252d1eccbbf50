//! The encrypted wallet file.
//!
//! Layout:
//!
//! ```text
//! magic  "WLT\0"                      4 bytes
//! version                             u32 LE
//! iv                                  8 bytes
//! ciphertext_len                      u64 LE
//! ciphertext                          ChaCha8 under slow_hash(password)
//! ```
//!
//! Plaintext inside the ciphertext:
//!
//! ```text
//! spend_public | spend_secret | view_public | view_secret   4 x 32 bytes
//! creation_timestamp                  u64 LE
//! has_details                         u8
//! if has_details:
//!     tx_count u64, tx records, transfer_count u64, transfer records
//! cache_len u64, cache bytes          engine snapshot
//! ```
//!
//! Records and the snapshot use the crate's bincode encoding (fixed-width
//! little-endian integers, `u64` sequence lengths). A wrong password is
//! detected by checking that the decrypted secrets derive the decrypted
//! public keys; nothing is ever returned from a partially decrypted file.

use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};
use tracing::debug;
use umb_crypto::{chacha8, slow_hash, PublicKey, SecretKey, CHACHA8_IV_SIZE};

use crate::account::AccountKeys;
use crate::container::TransfersContainer;
use crate::error::WalletError;
use crate::synchronizer::BlockchainSynchronizer;
use crate::types::{Transfer, WalletTransaction};
use crate::unconfirmed::UnconfirmedTransactions;

/// File magic.
pub const WALLET_FILE_MAGIC: [u8; 4] = *b"WLT\0";

/// Current file format version.
pub const WALLET_FILE_VERSION: u32 = 1;

/// The engine state persisted opaquely inside the wallet file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EngineSnapshot {
    pub container: TransfersContainer,
    pub unconfirmed: UnconfirmedTransactions,
    pub synchronizer: BlockchainSynchronizer,
}

/// Everything read back from a wallet file.
#[derive(Debug)]
pub struct LoadedWallet {
    pub keys: AccountKeys,
    pub creation_timestamp: u64,
    pub transactions: Vec<WalletTransaction>,
    pub transfers: Vec<Transfer>,
    pub snapshot: Option<EngineSnapshot>,
}

fn corrupt() -> WalletError {
    WalletError::Internal("wallet file is corrupt".into())
}

/// Serialize and encrypt a wallet.
///
/// `details` carries the transaction history; `snapshot` the container
/// and sync state. Either may be omitted for a keys-only export.
pub fn save_wallet(
    password: &str,
    keys: &AccountKeys,
    creation_timestamp: u64,
    details: Option<(&[WalletTransaction], &[Transfer])>,
    snapshot: Option<&EngineSnapshot>,
    rng: &mut (impl Rng + CryptoRng),
) -> Result<Vec<u8>, WalletError> {
    let cache_bytes: Vec<u8> = match snapshot {
        Some(snapshot) => {
            bincode::serialize(snapshot).map_err(|e| WalletError::Internal(e.to_string()))?
        }
        None => Vec::new(),
    };

    let mut plain = Vec::new();
    plain.extend_from_slice(&keys.spend_public.to_bytes());
    plain.extend_from_slice(&keys.spend_secret.to_bytes());
    plain.extend_from_slice(&keys.view_public.to_bytes());
    plain.extend_from_slice(&keys.view_secret.to_bytes());
    plain.extend_from_slice(&creation_timestamp.to_le_bytes());

    match details {
        Some((transactions, transfers)) => {
            plain.push(1);
            let tail = bincode::serialize(&(transactions, transfers, &cache_bytes))
                .map_err(|e| WalletError::Internal(e.to_string()))?;
            plain.extend_from_slice(&tail);
        }
        None => {
            plain.push(0);
            let tail = bincode::serialize(&cache_bytes)
                .map_err(|e| WalletError::Internal(e.to_string()))?;
            plain.extend_from_slice(&tail);
        }
    }

    let key = slow_hash(password.as_bytes());
    let mut iv = [0u8; CHACHA8_IV_SIZE];
    rng.fill_bytes(&mut iv);
    let ciphertext = chacha8(key.as_bytes(), &iv, &plain);

    let mut out = Vec::with_capacity(4 + 4 + CHACHA8_IV_SIZE + 8 + ciphertext.len());
    out.extend_from_slice(&WALLET_FILE_MAGIC);
    out.extend_from_slice(&WALLET_FILE_VERSION.to_le_bytes());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&(ciphertext.len() as u64).to_le_bytes());
    out.extend_from_slice(&ciphertext);

    debug!(bytes = out.len(), "wallet serialized");
    Ok(out)
}

/// Decrypt and parse a wallet file.
pub fn load_wallet(bytes: &[u8], password: &str) -> Result<LoadedWallet, WalletError> {
    if bytes.len() < 4 + 4 + CHACHA8_IV_SIZE + 8 {
        return Err(corrupt());
    }
    if bytes[..4] != WALLET_FILE_MAGIC {
        return Err(corrupt());
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    if version != WALLET_FILE_VERSION {
        return Err(WalletError::Internal(format!(
            "unsupported wallet file version {version}"
        )));
    }

    let iv: [u8; CHACHA8_IV_SIZE] = bytes[8..8 + CHACHA8_IV_SIZE].try_into().unwrap();
    let len_offset = 8 + CHACHA8_IV_SIZE;
    let ciphertext_len =
        u64::from_le_bytes(bytes[len_offset..len_offset + 8].try_into().unwrap()) as usize;
    let ciphertext = bytes
        .get(len_offset + 8..len_offset + 8 + ciphertext_len)
        .ok_or_else(corrupt)?;

    let key = slow_hash(password.as_bytes());
    let plain = chacha8(key.as_bytes(), &iv, ciphertext);

    // Keys block. A wrong password produces garbage here, which the
    // consistency check rejects before anything else is parsed.
    if plain.len() < 4 * 32 + 8 + 1 {
        return Err(WalletError::WrongPassword);
    }
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
    let has_details = plain[136];
    let tail = &plain[137..];

    let (transactions, transfers, cache_bytes): (Vec<WalletTransaction>, Vec<Transfer>, Vec<u8>) =
        match has_details {
            1 => bincode::deserialize(tail).map_err(|_| corrupt())?,
            0 => {
                let cache: Vec<u8> = bincode::deserialize(tail).map_err(|_| corrupt())?;
                (Vec::new(), Vec::new(), cache)
            }
            _ => return Err(corrupt()),
        };

    let snapshot = if cache_bytes.is_empty() {
        None
    } else {
        Some(bincode::deserialize(&cache_bytes).map_err(|_| corrupt())?)
    };

    Ok(LoadedWallet {
        keys,
        creation_timestamp,
        transactions,
        transfers,
        snapshot,
    })
}
