//! In-flight outgoing transfers.
//!
//! Every local send parks an entry here until the chain confirms it, the
//! pool evicts it, or it ages out. The change amounts of these entries
//! are part of the pending balance.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use umb_crypto::{Hash32, KeyImage};

use crate::types::TransactionId;

/// Book-keeping for one in-flight transfer.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct UnconfirmedTransferDetails {
    pub transaction_id: TransactionId,
    /// Change returning to this wallet once confirmed.
    pub change: u64,
    /// Wall-clock send time, seconds since the epoch.
    pub sent_time: u64,
    /// Key images of the inputs this transfer marked spent.
    pub spent_key_images: Vec<KeyImage>,
}

/// Map of transaction hash to in-flight details.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct UnconfirmedTransactions {
    entries: HashMap<Hash32, UnconfirmedTransferDetails>,
}

impl UnconfirmedTransactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a freshly relayed transfer.
    pub fn add(&mut self, tx_hash: Hash32, details: UnconfirmedTransferDetails) {
        self.entries.insert(tx_hash, details);
    }

    /// Remove an entry, returning it.
    pub fn erase(&mut self, tx_hash: &Hash32) -> Option<UnconfirmedTransferDetails> {
        self.entries.remove(tx_hash)
    }

    pub fn contains(&self, tx_hash: &Hash32) -> bool {
        self.entries.contains_key(tx_hash)
    }

    pub fn get(&self, tx_hash: &Hash32) -> Option<&UnconfirmedTransferDetails> {
        self.entries.get(tx_hash)
    }

    /// History id of an in-flight transfer.
    pub fn find_transaction_id(&self, tx_hash: &Hash32) -> Option<TransactionId> {
        self.entries.get(tx_hash).map(|d| d.transaction_id)
    }

    /// Change still in flight.
    pub fn pending_balance(&self) -> u64 {
        self.entries.values().map(|d| d.change).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Hashes of entries older than `live_time` seconds at `now`.
    pub fn expired(&self, now: u64, live_time: u64) -> Vec<Hash32> {
        self.entries
            .iter()
            .filter(|(_, d)| d.sent_time.saturating_add(live_time) < now)
            .map(|(hash, _)| *hash)
            .collect()
    }
}
