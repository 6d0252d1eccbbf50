//! The remote node interface.
//!
//! The engine never talks to the network directly; an embedder supplies a
//! [`NodeClient`] backed by whatever transport it uses. Every method is a
//! suspension point. Tests script a mock implementation.

use async_trait::async_trait;
use thiserror::Error;
use umb_crypto::{Hash32, PublicKey};
use umb_transaction::TransactionPrefix;

/// Errors a node backend may surface.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum NodeError {
    #[error("request timed out")]
    Timeout,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("node rejected the request: {0}")]
    Rejected(String),
}

/// A transaction hash with its prefix, as relayed by the node.
#[derive(Clone, Debug)]
pub struct TransactionShortInfo {
    pub hash: Hash32,
    pub prefix: TransactionPrefix,
}

/// Full block payload inside a [`BlockShortEntry`].
#[derive(Clone, Debug)]
pub struct BlockData {
    pub timestamp: u64,
    pub miner_tx: TransactionPrefix,
}

/// One entry of a `query_blocks` response.
///
/// Entries overlapping the wallet's known chain may carry only the hash;
/// entries past it carry the block and its non-miner transactions.
#[derive(Clone, Debug)]
pub struct BlockShortEntry {
    pub block_hash: Hash32,
    pub block: Option<BlockData>,
    pub transactions: Vec<TransactionShortInfo>,
}

/// One candidate ring member.
#[derive(Clone, Copy, Debug)]
pub struct RandomOutEntry {
    pub global_index: u32,
    pub public_key: PublicKey,
}

/// Random outputs for one amount.
#[derive(Clone, Debug)]
pub struct RandomOuts {
    pub amount: u64,
    pub outs: Vec<RandomOutEntry>,
}

/// Response of `get_pool_symmetric_difference`.
#[derive(Clone, Debug)]
pub struct PoolDifference {
    /// False when `tail_block` is no longer the node's chain tip; the
    /// caller must re-sync the chain before trusting the pool view.
    pub is_actual: bool,
    pub new_transactions: Vec<TransactionShortInfo>,
    pub deleted: Vec<Hash32>,
}

/// The remote node, from the wallet's point of view.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Walk the chain from the most recent hash in `known_hashes` the
    /// node recognizes. Returns the height of the first entry.
    async fn query_blocks(
        &self,
        known_hashes: Vec<Hash32>,
        timestamp: u64,
    ) -> Result<(u64, Vec<BlockShortEntry>), NodeError>;

    /// Global per-amount indices of every output of `tx_hash`, in output
    /// order.
    async fn get_tx_outs_global_indices(&self, tx_hash: Hash32) -> Result<Vec<u32>, NodeError>;

    /// Random ring candidates, `outs_per_amount` per requested amount.
    async fn get_random_outputs(
        &self,
        amounts: Vec<u64>,
        outs_per_amount: u16,
    ) -> Result<Vec<RandomOuts>, NodeError>;

    /// Hand a signed transaction blob to the network.
    async fn relay_transaction(&self, raw: Vec<u8>) -> Result<(), NodeError>;

    /// Pool delta against the wallet's known pool ids.
    async fn get_pool_symmetric_difference(
        &self,
        known_pool_ids: Vec<Hash32>,
        tail_block: Hash32,
    ) -> Result<PoolDifference, NodeError>;
}
