// Copyright (c) 2019-2025 The Umbra Project developers

//! Content hashing, tree hashing and the wallet-password KDF.

use core::fmt;

use blake2::{
    digest::{consts::U32, Digest},
    Blake2b, Blake2b512,
};
use serde::{Deserialize, Serialize};

type Blake2b256 = Blake2b<U32>;

/// A 32-byte content hash.
#[derive(
    Clone, Copy, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    /// The all-zero hash.
    pub const ZERO: Hash32 = Hash32([0u8; 32]);

    /// View as a byte slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for Hash32 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash32 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", hex::encode(self.0))
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Hash arbitrary bytes to a [`Hash32`].
pub fn hash(data: &[u8]) -> Hash32 {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    Hash32(hasher.finalize().into())
}

fn hash_pair(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut hasher = Blake2b256::new();
    hasher.update(left.0);
    hasher.update(right.0);
    Hash32(hasher.finalize().into())
}

/// Merkle root over a non-empty list of leaves.
///
/// Uses the CryptoNote tree shape: with `n` leaves the first
/// `2 * cnt - n` leaves pass through unchanged (`cnt` = largest power of
/// two below `n`) and the remainder are paired, so every leaf sits at
/// depth `log2(cnt)` or `log2(cnt) + 1`.
pub fn tree_hash(leaves: &[Hash32]) -> Hash32 {
    match leaves.len() {
        0 => Hash32::ZERO,
        1 => leaves[0],
        2 => hash_pair(&leaves[0], &leaves[1]),
        n => {
            let mut cnt = 1usize;
            while cnt * 2 < n {
                cnt *= 2;
            }

            let carried = 2 * cnt - n;
            let mut level: Vec<Hash32> = leaves[..carried].to_vec();
            let mut i = carried;
            while i < n {
                level.push(hash_pair(&leaves[i], &leaves[i + 1]));
                i += 2;
            }
            debug_assert_eq!(level.len(), cnt);

            while level.len() > 2 {
                level = level
                    .chunks_exact(2)
                    .map(|pair| hash_pair(&pair[0], &pair[1]))
                    .collect();
            }
            hash_pair(&level[0], &level[1])
        }
    }
}

/// Scratchpad entries used by [`slow_hash`].
const SLOW_HASH_PAD: usize = 4096;
/// Mixing rounds over the scratchpad.
const SLOW_HASH_ROUNDS: usize = 8;

/// Memory-hard password hash.
///
/// Fills a scratchpad by chained hashing, then walks it data-dependently,
/// folding entries back into the running state. Only used to derive the
/// wallet-file encryption key from the user password.
pub fn slow_hash(data: &[u8]) -> Hash32 {
    let mut state = {
        let mut hasher = Blake2b512::new();
        hasher.update(data);
        let wide: [u8; 64] = hasher.finalize().into();
        let mut narrow = [0u8; 32];
        narrow.copy_from_slice(&wide[..32]);
        narrow
    };

    let mut pad = vec![[0u8; 32]; SLOW_HASH_PAD];
    for slot in pad.iter_mut() {
        state = hash(&state).0;
        *slot = state;
    }

    for _ in 0..SLOW_HASH_ROUNDS * SLOW_HASH_PAD {
        let idx = u32::from_le_bytes([state[0], state[1], state[2], state[3]]) as usize
            % SLOW_HASH_PAD;
        let mut hasher = Blake2b256::new();
        hasher.update(state);
        hasher.update(pad[idx]);
        state = hasher.finalize().into();
        pad[idx] = state;
    }

    hash(&state)
}
