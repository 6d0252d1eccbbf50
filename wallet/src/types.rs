//! Identifiers and user-visible records shared across the engine.

use serde::{Deserialize, Serialize};
use umb_crypto::Hash32;

/// Dense, append-only index of a transaction in the history.
pub type TransactionId = usize;

/// Dense, append-only index of a transfer in the history.
pub type TransferId = usize;

/// Sentinel id for "no transaction".
pub const INVALID_TRANSACTION_ID: TransactionId = usize::MAX;

/// Sentinel id for "no transfer".
pub const INVALID_TRANSFER_ID: TransferId = usize::MAX;

/// Block height of anything not yet in a block.
pub const UNCONFIRMED_HEIGHT: u64 = u64::MAX;

/// Per-amount global output index before confirmation assigns one.
pub const UNCONFIRMED_GLOBAL_INDEX: u32 = u32::MAX;

/// Lifecycle state of a history entry.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TransactionState {
    /// Known to the chain or pool, or in flight.
    Active,
    /// Dropped from the pool or detached by a reorganization.
    Deleted,
    /// Build, sign or relay failed.
    Failed,
    /// Cancelled by the user or by shutdown.
    Cancelled,
}

/// A user-visible transaction.
///
/// `total_amount` is signed: positive means net incoming, negative net
/// outgoing (amount plus fee leaving the wallet).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct WalletTransaction {
    pub state: TransactionState,
    pub hash: Hash32,
    pub total_amount: i64,
    pub fee: u64,
    /// [`UNCONFIRMED_HEIGHT`] until the transaction lands in a block.
    pub block_height: u64,
    pub timestamp: u64,
    pub unlock_time: u64,
    pub is_coinbase: bool,
    pub extra: Vec<u8>,
    pub first_transfer_id: TransferId,
    pub transfer_count: usize,
    /// Decrypted plaintext messages attached to the transaction.
    pub messages: Vec<String>,
}

/// One destination row of an outgoing transaction.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Transfer {
    pub address: String,
    pub amount: u64,
}
