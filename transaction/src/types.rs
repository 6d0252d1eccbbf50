// Copyright (c) 2019-2025 The Umbra Project developers

//! Transaction prefix model.

use core::fmt;

use serde::{Deserialize, Serialize};
use umb_crypto::{Hash32, KeyImage, PublicKey, RingSignature};

use crate::encoding;

/// Transaction format version emitted by this wallet.
pub const CURRENT_TRANSACTION_VERSION: u8 = 1;

/// A 32-byte payment id carried in the transaction extra.
#[derive(
    Clone, Copy, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct PaymentId(pub [u8; 32]);

impl PaymentId {
    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let bytes: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Debug for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentId({})", hex::encode(self.0))
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A ring-signature input spending one of `ring_indices`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct KeyInput {
    /// Denomination being spent; every ring member has this amount.
    pub amount: u64,
    /// Per-amount global indices of the ring members, ascending.
    pub ring_indices: Vec<u32>,
    /// Key image of the real member.
    pub key_image: KeyImage,
}

/// An m-of-n multisignature input.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MultisigInput {
    pub amount: u64,
    pub global_index: u32,
    pub signature_count: u8,
}

/// Transaction input. Wire discriminants: 0 = coinbase, 1 = key,
/// 2 = multisig.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TxInput {
    /// Miner reward input; `height` is the block being rewarded.
    Coinbase { height: u64 },
    Key(KeyInput),
    Multisig(MultisigInput),
}

impl TxInput {
    /// The key image, for key inputs.
    pub fn key_image(&self) -> Option<&KeyImage> {
        match self {
            TxInput::Key(input) => Some(&input.key_image),
            _ => None,
        }
    }

    /// The amount consumed by this input (0 for coinbase).
    pub fn amount(&self) -> u64 {
        match self {
            TxInput::Coinbase { .. } => 0,
            TxInput::Key(input) => input.amount,
            TxInput::Multisig(input) => input.amount,
        }
    }
}

/// Output destination. Wire discriminants: 0 = key, 1 = multisig.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TxOutputTarget {
    /// A one-time stealth key.
    Key(PublicKey),
    /// An n-key multisignature target requiring `required` signers.
    Multisig { keys: Vec<PublicKey>, required: u8 },
}

/// A transaction output.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TxOutput {
    pub amount: u64,
    pub target: TxOutputTarget,
}

/// The signed-over portion of a transaction.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TransactionPrefix {
    pub version: u8,
    /// Height (below the threshold in [`crate::unlock`]) or Unix
    /// timestamp before which outputs stay locked.
    pub unlock_time: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub extra: Vec<u8>,
}

impl TransactionPrefix {
    /// Hash of the canonical prefix encoding; this is what ring
    /// signatures sign.
    pub fn hash(&self) -> Hash32 {
        umb_crypto::hash(&encoding::prefix_to_bytes(self))
    }

    /// True for a miner transaction.
    pub fn is_coinbase(&self) -> bool {
        matches!(self.inputs.as_slice(), [TxInput::Coinbase { .. }])
    }

    /// Sum of output amounts.
    pub fn output_amount(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }
}

/// A full transaction: prefix plus one ring signature per key input.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Transaction {
    pub prefix: TransactionPrefix,
    pub signatures: Vec<RingSignature>,
}

impl Transaction {
    /// Transaction hash. Version-1 transactions hash the prefix only, so
    /// the id is stable before and after signing.
    pub fn hash(&self) -> Hash32 {
        self.prefix.hash()
    }

    /// Canonical relay encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        encoding::transaction_to_bytes(self)
    }

    /// Serialized size in bytes, for the relay size limit.
    pub fn blob_size(&self) -> usize {
        self.to_bytes().len()
    }
}
