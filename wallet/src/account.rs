//! Account keys and public addresses.

use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use umb_crypto::{KeyPair, PublicKey, SecretKey};

use crate::error::WalletError;

const ADDRESS_CHECKSUM_SIZE: usize = 4;

/// The two keypairs of a wallet account.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AccountKeys {
    pub spend_public: PublicKey,
    pub spend_secret: SecretKey,
    pub view_public: PublicKey,
    pub view_secret: SecretKey,
}

impl AccountKeys {
    /// Generate a fresh account.
    pub fn generate(rng: &mut dyn CryptoRngCore) -> Self {
        let spend = KeyPair::generate(rng);
        let view = KeyPair::generate(rng);
        Self {
            spend_public: spend.public,
            spend_secret: spend.secret,
            view_public: view.public,
            view_secret: view.secret,
        }
    }

    /// Rebuild an account from its two secrets.
    pub fn from_secrets(spend_secret: SecretKey, view_secret: SecretKey) -> Self {
        Self {
            spend_public: PublicKey::from_secret(&spend_secret),
            view_public: PublicKey::from_secret(&view_secret),
            spend_secret,
            view_secret,
        }
    }

    /// The secrets derive the stored public keys.
    pub fn is_consistent(&self) -> bool {
        PublicKey::from_secret(&self.spend_secret) == self.spend_public
            && PublicKey::from_secret(&self.view_secret) == self.view_public
    }

    /// The account's public address.
    pub fn address(&self) -> Address {
        Address {
            spend_public: self.spend_public,
            view_public: self.view_public,
        }
    }
}

/// A public destination: spend and view keys.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Address {
    pub spend_public: PublicKey,
    pub view_public: PublicKey,
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn read_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0;
    for (i, byte) in bytes.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }
    None
}

fn checksum(payload: &[u8]) -> [u8; ADDRESS_CHECKSUM_SIZE] {
    let digest = Sha256::digest(payload);
    digest[..ADDRESS_CHECKSUM_SIZE]
        .try_into()
        .expect("digest longer than checksum")
}

impl Address {
    /// Encode as base58(tag ‖ spend ‖ view ‖ checksum4).
    pub fn encode(&self, prefix: u64) -> String {
        let mut payload = Vec::with_capacity(74);
        write_varint(&mut payload, prefix);
        payload.extend_from_slice(&self.spend_public.to_bytes());
        payload.extend_from_slice(&self.view_public.to_bytes());
        let check = checksum(&payload);
        payload.extend_from_slice(&check);
        bs58::encode(payload).into_string()
    }

    /// Parse and verify an address against the expected tag.
    pub fn parse(s: &str, prefix: u64) -> Result<Self, WalletError> {
        let payload = bs58::decode(s)
            .into_vec()
            .map_err(|_| WalletError::BadAddress)?;
        if payload.len() < ADDRESS_CHECKSUM_SIZE {
            return Err(WalletError::BadAddress);
        }

        let (body, check) = payload.split_at(payload.len() - ADDRESS_CHECKSUM_SIZE);
        if checksum(body) != <[u8; ADDRESS_CHECKSUM_SIZE]>::try_from(check).unwrap() {
            return Err(WalletError::BadAddress);
        }

        let (tag, tag_len) = read_varint(body).ok_or(WalletError::BadAddress)?;
        if tag != prefix {
            return Err(WalletError::BadAddress);
        }

        let keys = &body[tag_len..];
        if keys.len() != 64 {
            return Err(WalletError::BadAddress);
        }

        let spend_public = PublicKey::from_bytes(&keys[..32].try_into().unwrap())
            .map_err(|_| WalletError::BadAddress)?;
        let view_public = PublicKey::from_bytes(&keys[32..].try_into().unwrap())
            .map_err(|_| WalletError::BadAddress)?;

        Ok(Self {
            spend_public,
            view_public,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_address_round_trip() {
        let mut rng = StdRng::seed_from_u64(5);
        let keys = AccountKeys::generate(&mut rng);

        let encoded = keys.address().encode(0x2e);
        let decoded = Address::parse(&encoded, 0x2e).unwrap();
        assert_eq!(decoded, keys.address());
    }

    #[test]
    fn test_wrong_prefix_rejected() {
        let mut rng = StdRng::seed_from_u64(5);
        let keys = AccountKeys::generate(&mut rng);
        let encoded = keys.address().encode(0x2e);
        assert_eq!(
            Address::parse(&encoded, 0x2f),
            Err(WalletError::BadAddress)
        );
    }

    #[test]
    fn test_corrupted_checksum_rejected() {
        let mut rng = StdRng::seed_from_u64(5);
        let keys = AccountKeys::generate(&mut rng);
        let mut encoded = keys.address().encode(0x2e);
        // Flip the last character to another base58 symbol.
        let last = encoded.pop().unwrap();
        encoded.push(if last == '1' { '2' } else { '1' });
        assert_eq!(Address::parse(&encoded, 0x2e), Err(WalletError::BadAddress));
    }

    #[test]
    fn test_garbage_rejected() {
        assert_eq!(
            Address::parse("not an address", 0x2e),
            Err(WalletError::BadAddress)
        );
        assert_eq!(Address::parse("", 0x2e), Err(WalletError::BadAddress));
    }

    #[test]
    fn test_account_consistency() {
        let mut rng = StdRng::seed_from_u64(6);
        let keys = AccountKeys::generate(&mut rng);
        assert!(keys.is_consistent());

        let rebuilt =
            AccountKeys::from_secrets(keys.spend_secret.clone(), keys.view_secret.clone());
        assert_eq!(rebuilt, keys);
    }
}
