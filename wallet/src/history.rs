//! The user-visible transaction log.
//!
//! Ids are dense and append-only: a transaction or transfer never moves
//! once assigned, even when a reorganization later deletes the entry.
//! The payment-id index only ever references Active, confirmed entries.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use umb_crypto::Hash32;
use umb_transaction::{extra, PaymentId};

use crate::types::{
    Transfer, TransactionId, TransactionState, TransferId, WalletTransaction, UNCONFIRMED_HEIGHT,
};

/// Errors from history bookkeeping.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HistoryError {
    #[error("a transaction with this hash is already tracked")]
    DuplicateHash,

    #[error("transaction id out of range")]
    UnknownTransaction,
}

/// Append-only transaction and transfer log with hash and payment-id
/// lookups.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TransactionHistory {
    transactions: Vec<WalletTransaction>,
    transfers: Vec<Transfer>,
    by_hash: HashMap<Hash32, TransactionId>,
    payment_index: HashMap<PaymentId, Vec<TransactionId>>,
}

impl TransactionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the lookup tables from restored records.
    pub fn from_records(transactions: Vec<WalletTransaction>, transfers: Vec<Transfer>) -> Self {
        let mut history = Self {
            transactions,
            transfers,
            by_hash: HashMap::new(),
            payment_index: HashMap::new(),
        };
        for id in 0..history.transactions.len() {
            history.index_transaction(id);
        }
        history
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers.len()
    }

    pub fn get_transaction(&self, id: TransactionId) -> Option<&WalletTransaction> {
        self.transactions.get(id)
    }

    pub fn get_transfer(&self, id: TransferId) -> Option<&Transfer> {
        self.transfers.get(id)
    }

    /// All records, for persistence.
    pub fn records(&self) -> (&[WalletTransaction], &[Transfer]) {
        (&self.transactions, &self.transfers)
    }

    /// Id of the Active transaction with `hash`.
    pub fn find_transaction_by_hash(&self, hash: &Hash32) -> Option<TransactionId> {
        self.by_hash.get(hash).copied()
    }

    /// The transaction owning transfer `transfer_id`.
    pub fn find_transaction_by_transfer_id(&self, transfer_id: TransferId) -> Option<TransactionId> {
        if transfer_id >= self.transfers.len() {
            return None;
        }
        self.transactions.iter().position(|tx| {
            tx.transfer_count > 0
                && transfer_id >= tx.first_transfer_id
                && transfer_id < tx.first_transfer_id + tx.transfer_count
        })
    }

    /// Active, confirmed transactions carrying `payment_id`.
    pub fn get_transactions_by_payment_id(&self, payment_id: &PaymentId) -> Vec<TransactionId> {
        self.payment_index
            .get(payment_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Append transfer rows, returning the id of the first.
    pub fn insert_transfers(&mut self, transfers: Vec<Transfer>) -> TransferId {
        let first = self.transfers.len();
        self.transfers.extend(transfers);
        first
    }

    /// Append a transaction. The hash, if already known for an Active
    /// entry, is rejected rather than silently remapped.
    pub fn insert_transaction(
        &mut self,
        transaction: WalletTransaction,
    ) -> Result<TransactionId, HistoryError> {
        if transaction.hash != Hash32::ZERO && self.by_hash.contains_key(&transaction.hash) {
            return Err(HistoryError::DuplicateHash);
        }
        let id = self.transactions.len();
        self.transactions.push(transaction);
        self.index_transaction(id);
        debug!(id, "transaction recorded in history");
        Ok(id)
    }

    /// Fill in the hash of a transaction inserted before it was built.
    pub fn set_transaction_hash(
        &mut self,
        id: TransactionId,
        hash: Hash32,
    ) -> Result<(), HistoryError> {
        if self.by_hash.contains_key(&hash) {
            return Err(HistoryError::DuplicateHash);
        }
        let tx = self
            .transactions
            .get_mut(id)
            .ok_or(HistoryError::UnknownTransaction)?;
        tx.hash = hash;
        self.index_transaction(id);
        Ok(())
    }

    /// Record confirmation of a transaction.
    pub fn confirm_transaction(
        &mut self,
        id: TransactionId,
        height: u64,
        timestamp: u64,
    ) -> Result<(), HistoryError> {
        let tx = self
            .transactions
            .get_mut(id)
            .ok_or(HistoryError::UnknownTransaction)?;
        tx.block_height = height;
        tx.timestamp = timestamp;
        tx.state = TransactionState::Active;
        self.index_transaction(id);
        Ok(())
    }

    /// Move a transaction back to the pool (its block was detached).
    pub fn unconfirm_transaction(&mut self, id: TransactionId) -> Result<(), HistoryError> {
        let tx = self
            .transactions
            .get_mut(id)
            .ok_or(HistoryError::UnknownTransaction)?;
        tx.block_height = UNCONFIRMED_HEIGHT;
        tx.timestamp = 0;
        self.index_transaction(id);
        Ok(())
    }

    /// Change a transaction's lifecycle state.
    pub fn set_transaction_state(
        &mut self,
        id: TransactionId,
        state: TransactionState,
    ) -> Result<(), HistoryError> {
        let tx = self
            .transactions
            .get_mut(id)
            .ok_or(HistoryError::UnknownTransaction)?;
        tx.state = state;
        self.index_transaction(id);
        Ok(())
    }

    /// Record the extra blob of a transaction built after insertion.
    pub fn set_transaction_extra(
        &mut self,
        id: TransactionId,
        extra: Vec<u8>,
    ) -> Result<(), HistoryError> {
        let tx = self
            .transactions
            .get_mut(id)
            .ok_or(HistoryError::UnknownTransaction)?;
        tx.extra = extra;
        self.index_transaction(id);
        Ok(())
    }

    /// Attach decrypted messages to a transaction.
    pub fn set_transaction_messages(
        &mut self,
        id: TransactionId,
        messages: Vec<String>,
    ) -> Result<(), HistoryError> {
        let tx = self
            .transactions
            .get_mut(id)
            .ok_or(HistoryError::UnknownTransaction)?;
        tx.messages = messages;
        Ok(())
    }

    /// Mark every Active transaction at `height` or above Deleted, in
    /// response to a reorganization. Returns the affected ids.
    pub fn detach(&mut self, height: u64) -> Vec<TransactionId> {
        let affected: Vec<TransactionId> = self
            .transactions
            .iter()
            .enumerate()
            .filter(|(_, tx)| {
                tx.state == TransactionState::Active
                    && tx.block_height != UNCONFIRMED_HEIGHT
                    && tx.block_height >= height
            })
            .map(|(id, _)| id)
            .collect();

        for id in &affected {
            self.transactions[*id].state = TransactionState::Deleted;
            self.index_transaction(*id);
        }
        if !affected.is_empty() {
            debug!(height, affected = affected.len(), "history detached");
        }
        affected
    }

    /// Restore the hash and payment-id indexes for one entry after any
    /// mutation. Only Active entries are addressable by hash, and only
    /// Active, confirmed, non-zero-amount entries with a payment id are
    /// indexed by it.
    fn index_transaction(&mut self, id: TransactionId) {
        let tx = &self.transactions[id];
        let hash = tx.hash;
        let active = tx.state == TransactionState::Active;

        if hash != Hash32::ZERO {
            match self.by_hash.get(&hash) {
                Some(mapped) if *mapped == id && !active => {
                    self.by_hash.remove(&hash);
                }
                None if active => {
                    self.by_hash.insert(hash, id);
                }
                _ => {}
            }
        }

        let indexed = active
            && tx.block_height != UNCONFIRMED_HEIGHT
            && !tx.extra.is_empty()
            && tx.total_amount != 0;
        let payment_id = extra::extract_payment_id(&tx.extra);

        if let Some(payment_id) = payment_id {
            let entry = self.payment_index.entry(payment_id).or_default();
            let present = entry.contains(&id);
            if indexed && !present {
                entry.push(id);
            } else if !indexed && present {
                entry.retain(|t| *t != id);
            }
            if self.payment_index[&payment_id].is_empty() {
                self.payment_index.remove(&payment_id);
            }
        }
    }
}
