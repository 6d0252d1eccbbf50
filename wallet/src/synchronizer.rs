//! Drives the container and history from node queries.
//!
//! The chain loop walks `query_blocks` batches, verifies the overlap
//! with the locally known hashes, detaches on mismatch and scans new
//! blocks for outputs addressed to this wallet. The pool loop resolves
//! the symmetric difference against the node's mempool and sweeps aged
//! in-flight transfers.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use umb_crypto::Hash32;
use umb_transaction::{extra, TransactionPrefix, TxOutputTarget};

use crate::account::AccountKeys;
use crate::config::Currency;
use crate::container::{
    BlockInfo, ContainerError, OutputKind, OutputMask, TransferOutput, TransfersContainer,
};
use crate::error::WalletError;
use crate::events::{publish_balances, EventSink, WalletEvent};
use crate::history::TransactionHistory;
use crate::node::{BlockData, NodeClient, TransactionShortInfo};
use crate::types::{TransactionState, WalletTransaction, UNCONFIRMED_GLOBAL_INDEX,
    UNCONFIRMED_HEIGHT};
use crate::unconfirmed::UnconfirmedTransactions;

/// Mutable engine state one sync round operates on.
pub struct SyncTarget<'a> {
    pub keys: &'a AccountKeys,
    pub currency: &'a Currency,
    pub container: &'a mut TransfersContainer,
    pub history: &'a mut TransactionHistory,
    pub unconfirmed: &'a mut UnconfirmedTransactions,
    pub events: &'a EventSink,
}

/// Chain and pool synchronization state.
///
/// `chain` holds every known block hash indexed by height; the short
/// history sent to the node thins exponentially towards genesis.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct BlockchainSynchronizer {
    chain: Vec<Hash32>,
    known_pool: BTreeSet<Hash32>,
    /// Account creation time; blocks older than this need no scanning.
    start_timestamp: u64,
}

fn wall_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl BlockchainSynchronizer {
    pub fn new(start_timestamp: u64) -> Self {
        Self {
            chain: Vec::new(),
            known_pool: BTreeSet::new(),
            start_timestamp,
        }
    }

    /// Number of known blocks (the next height to fetch).
    pub fn known_block_count(&self) -> u64 {
        self.chain.len() as u64
    }

    /// Hash of the best known block.
    pub fn tail_hash(&self) -> Option<Hash32> {
        self.chain.last().copied()
    }

    /// Drop all sync state, keeping nothing but the start timestamp.
    pub fn reset(&mut self) {
        self.chain.clear();
        self.known_pool.clear();
    }

    /// Known hashes, newest first: the last ten consecutively, then
    /// exponentially sparser back to genesis.
    fn short_history(&self) -> Vec<Hash32> {
        let size = self.chain.len();
        let mut ids = Vec::new();
        if size == 0 {
            return ids;
        }

        let mut back_offset = 1usize;
        let mut multiplier = 1usize;
        let mut genesis_included = false;
        let mut step = 0usize;
        while back_offset < size {
            ids.push(self.chain[size - back_offset]);
            if size - back_offset == 0 {
                genesis_included = true;
            }
            if step < 10 {
                back_offset += 1;
            } else {
                multiplier *= 2;
                back_offset += multiplier;
            }
            step += 1;
        }
        if !genesis_included {
            ids.push(self.chain[0]);
        }
        ids
    }

    /// One chain sync round: fetch, verify overlap, detach on mismatch,
    /// scan new blocks. Loops until the node has nothing new, then
    /// publishes `SyncCompleted`.
    pub async fn sync_chain(
        &mut self,
        node: &dyn NodeClient,
        target: &mut SyncTarget<'_>,
        stopping: &AtomicBool,
    ) -> Result<(), WalletError> {
        let result = self.sync_chain_inner(node, target, stopping).await;
        target
            .events
            .publish(WalletEvent::SyncCompleted(result.clone()));
        result
    }

    async fn sync_chain_inner(
        &mut self,
        node: &dyn NodeClient,
        target: &mut SyncTarget<'_>,
        stopping: &AtomicBool,
    ) -> Result<(), WalletError> {
        loop {
            if stopping.load(Ordering::Relaxed) {
                return Ok(());
            }

            let known = self.short_history();
            let (start_height, entries) = node
                .query_blocks(known, self.start_timestamp)
                .await
                .map_err(WalletError::from)?;
            if entries.is_empty() {
                break;
            }
            if start_height as usize > self.chain.len() {
                return Err(WalletError::Internal(
                    "node response leaves a gap before the known chain".into(),
                ));
            }

            let batch_tip = start_height + entries.len() as u64 - 1;
            let mut height = start_height;
            let mut appended = 0u64;

            for entry in entries {
                if stopping.load(Ordering::Relaxed) {
                    return Ok(());
                }

                if (height as usize) < self.chain.len() {
                    if entry.block_hash == self.chain[height as usize] {
                        height += 1;
                        continue;
                    }
                    // The node follows a different chain above this
                    // point: everything from here up is gone.
                    self.detach_to(height, target);
                }

                let Some(block) = entry.block else {
                    return Err(WalletError::Internal(
                        "node omitted a block body past the known chain".into(),
                    ));
                };
                self.process_block(node, target, height, block, entry.transactions)
                    .await?;
                self.chain.push(entry.block_hash);
                target.container.advance_height(height);
                appended += 1;
                target.events.publish(WalletEvent::SyncProgress {
                    current: height,
                    total: batch_tip,
                });
                height += 1;
            }

            if appended == 0 {
                break;
            }
            publish_balances(target.container, target.unconfirmed, target.events);
            debug!(appended, height, "chain sync batch applied");
        }
        Ok(())
    }

    /// Truncate everything at and above `height` across the engine.
    fn detach_to(&mut self, height: u64, target: &mut SyncTarget<'_>) {
        warn!(height, "reorganization: detaching local state");
        self.chain.truncate(height as usize);
        let removed = target.container.detach(height);
        let affected = target.history.detach(height);
        for id in affected {
            target.events.publish(WalletEvent::TransactionUpdated(id));
        }
        self.known_pool.clear();
        publish_balances(target.container, target.unconfirmed, target.events);
        info!(
            height,
            removed = removed.len(),
            "detach complete"
        );
    }

    async fn process_block(
        &mut self,
        node: &dyn NodeClient,
        target: &mut SyncTarget<'_>,
        height: u64,
        block: BlockData,
        transactions: Vec<TransactionShortInfo>,
    ) -> Result<(), WalletError> {
        let mut block_info = BlockInfo {
            height,
            timestamp: block.timestamp,
            transaction_index: 0,
        };

        let miner_hash = block.miner_tx.hash();
        self.process_confirmed_transaction(node, target, &block_info, miner_hash, &block.miner_tx)
            .await?;

        for (index, tx) in transactions.iter().enumerate() {
            block_info.transaction_index = index as u32 + 1;
            self.process_confirmed_transaction(node, target, &block_info, tx.hash, &tx.prefix)
                .await?;
        }
        Ok(())
    }

    async fn process_confirmed_transaction(
        &mut self,
        node: &dyn NodeClient,
        target: &mut SyncTarget<'_>,
        block: &BlockInfo,
        tx_hash: Hash32,
        prefix: &TransactionPrefix,
    ) -> Result<(), WalletError> {
        let relevant = match target.container.transaction_block(&tx_hash) {
            Some(existing) if !existing.is_confirmed() => {
                // Known from the pool; promote it with real indices.
                let indices = node
                    .get_tx_outs_global_indices(tx_hash)
                    .await
                    .map_err(WalletError::from)?;
                target
                    .container
                    .mark_transaction_confirmed(block, &tx_hash, &indices)
                    .map_err(WalletError::from)?;
                self.known_pool.remove(&tx_hash);
                true
            }
            Some(_) => true,
            None => {
                let mut owned = scan_transaction(target.keys, tx_hash, prefix, block);
                let spends_ours = prefix
                    .inputs
                    .iter()
                    .filter_map(|input| input.key_image())
                    .any(|image| target.container.is_tracked_key_image(image));

                if owned.is_empty() && !spends_ours {
                    false
                } else {
                    if !owned.is_empty() {
                        let indices = node
                            .get_tx_outs_global_indices(tx_hash)
                            .await
                            .map_err(WalletError::from)?;
                        for output in &mut owned {
                            let index = indices
                                .get(output.index_in_transaction as usize)
                                .copied()
                                .ok_or_else(|| {
                                    WalletError::Internal(
                                        "global index response is too short".into(),
                                    )
                                })?;
                            output.global_index = index;
                        }
                    }
                    target
                        .container
                        .add_transaction(block, tx_hash, prefix, owned)
                        .map_err(WalletError::from)?
                }
            }
        };

        if relevant {
            self.update_history(target, block, tx_hash, prefix);
        }
        Ok(())
    }

    /// Create or confirm the history entry for a relevant transaction.
    fn update_history(
        &mut self,
        target: &mut SyncTarget<'_>,
        block: &BlockInfo,
        tx_hash: Hash32,
        prefix: &TransactionPrefix,
    ) {
        if let Some(id) = target.history.find_transaction_by_hash(&tx_hash) {
            let _ = target
                .history
                .confirm_transaction(id, block.height, block.timestamp);
            target.unconfirmed.erase(&tx_hash);
            target.events.publish(WalletEvent::TransactionUpdated(id));
            return;
        }

        let outputs_ours: u64 = target
            .container
            .get_transaction_outputs(&tx_hash, OutputMask::STATE_ALL | OutputMask::TYPE_ALL)
            .iter()
            .map(|output| output.amount)
            .sum();
        let inputs_ours: u64 = target
            .container
            .get_spent_outputs()
            .iter()
            .filter(|(_, mark)| mark.spending_transaction_hash == tx_hash)
            .map(|(output, _)| output.amount)
            .sum();

        let inputs_total: u64 = prefix.inputs.iter().map(|input| input.amount()).sum();
        let fee = if prefix.is_coinbase() {
            0
        } else {
            inputs_total.saturating_sub(prefix.output_amount())
        };

        let transaction = WalletTransaction {
            state: TransactionState::Active,
            hash: tx_hash,
            total_amount: outputs_ours as i64 - inputs_ours as i64,
            fee,
            block_height: block.height,
            timestamp: block.timestamp,
            unlock_time: prefix.unlock_time,
            is_coinbase: prefix.is_coinbase(),
            extra: prefix.extra.clone(),
            first_transfer_id: 0,
            transfer_count: 0,
            messages: decrypt_messages(target.keys, prefix),
        };
        match target.history.insert_transaction(transaction) {
            Ok(id) => {
                target
                    .events
                    .publish(WalletEvent::ExternalTransactionCreated(id));
                if block.is_confirmed() {
                    target.events.publish(WalletEvent::TransactionUpdated(id));
                }
            }
            Err(err) => warn!(tx = %tx_hash, error = %err, "history insert failed"),
        }
    }

    /// One pool round: resolve the symmetric difference, then sweep aged
    /// in-flight transfers.
    pub async fn sync_pool(
        &mut self,
        node: &dyn NodeClient,
        target: &mut SyncTarget<'_>,
        stopping: &AtomicBool,
    ) -> Result<(), WalletError> {
        if stopping.load(Ordering::Relaxed) {
            return Ok(());
        }
        let Some(tail) = self.tail_hash() else {
            return Ok(());
        };

        let known: Vec<Hash32> = self.known_pool.iter().copied().collect();
        let diff = node
            .get_pool_symmetric_difference(known, tail)
            .await
            .map_err(WalletError::from)?;
        if !diff.is_actual {
            // Our tail is stale; the next chain round refreshes it.
            debug!("pool view not actual, deferring to chain sync");
            return Ok(());
        }

        for deleted in &diff.deleted {
            self.known_pool.remove(deleted);
            if target.unconfirmed.contains(deleted) {
                // Our own transfer fell out of the pool.
                drop_in_flight_transfer(
                    target.container,
                    target.history,
                    target.unconfirmed,
                    target.events,
                    deleted,
                    TransactionState::Deleted,
                );
            } else if matches!(
                target.container.transaction_block(deleted),
                Some(block) if !block.is_confirmed()
            ) {
                // An incoming pool transaction evaporated.
                if let Err(err) = target.container.delete_unconfirmed_transaction(deleted) {
                    warn!(tx = %deleted, error = %err, "pool delete failed");
                    continue;
                }
                if let Some(id) = target.history.find_transaction_by_hash(deleted) {
                    let _ = target
                        .history
                        .set_transaction_state(id, TransactionState::Deleted);
                    target.events.publish(WalletEvent::TransactionUpdated(id));
                }
            }
        }

        for tx in &diff.new_transactions {
            self.known_pool.insert(tx.hash);
            // Our own in-flight transfers are owned by the unconfirmed
            // table until a block confirms them; re-adding their change
            // here would double-count it.
            if target.unconfirmed.contains(&tx.hash) || target.container.is_tracked(&tx.hash) {
                continue;
            }

            let pool_block = BlockInfo::unconfirmed();
            let owned = scan_transaction(target.keys, tx.hash, &tx.prefix, &pool_block);
            let spends_ours = tx
                .prefix
                .inputs
                .iter()
                .filter_map(|input| input.key_image())
                .any(|image| target.container.is_tracked_key_image(image));
            if owned.is_empty() && !spends_ours {
                continue;
            }

            match target
                .container
                .add_transaction(&pool_block, tx.hash, &tx.prefix, owned)
            {
                Ok(_) => {}
                Err(ContainerError::AlreadyExists) => continue,
                Err(err) => return Err(WalletError::from(err)),
            }

            if target.history.find_transaction_by_hash(&tx.hash).is_none() {
                self.update_history(target, &pool_block, tx.hash, &tx.prefix);
            }
        }

        // Transfers the pool silently forgot age out eventually.
        let now = wall_clock();
        for hash in target
            .unconfirmed
            .expired(now, target.currency.mempool_tx_live_time)
        {
            info!(tx = %hash, "unconfirmed transfer aged out");
            drop_in_flight_transfer(
                target.container,
                target.history,
                target.unconfirmed,
                target.events,
                &hash,
                TransactionState::Deleted,
            );
        }

        publish_balances(target.container, target.unconfirmed, target.events);
        Ok(())
    }
}

/// Remove an in-flight transfer: unspend its inputs, drop its pool-side
/// outputs and mark the history entry. Used for pool evictions, aging
/// and user cancellation.
pub(crate) fn drop_in_flight_transfer(
    container: &mut TransfersContainer,
    history: &mut TransactionHistory,
    unconfirmed: &mut UnconfirmedTransactions,
    events: &EventSink,
    tx_hash: &Hash32,
    state: TransactionState,
) -> bool {
    let Some(details) = unconfirmed.erase(tx_hash) else {
        return false;
    };
    container.unmark_spent(&details.spent_key_images, tx_hash);
    if matches!(
        container.transaction_block(tx_hash),
        Some(block) if !block.is_confirmed()
    ) {
        let _ = container.delete_unconfirmed_transaction(tx_hash);
    }
    let _ = history.set_transaction_state(details.transaction_id, state);
    events.publish(WalletEvent::TransactionUpdated(details.transaction_id));
    true
}

/// Scan a transaction's outputs against the wallet's view key.
///
/// A key output is ours when the candidate derived from
/// `(view_secret, tx_public, index)` matches its one-time key; a
/// multisig output is ours when our spend key appears among its keys.
/// Transactions without a tx public key in extra cannot be scanned.
fn scan_transaction(
    keys: &AccountKeys,
    tx_hash: Hash32,
    prefix: &TransactionPrefix,
    block: &BlockInfo,
) -> Vec<TransferOutput> {
    let Some(tx_public) = extra::extract_tx_public_key(&prefix.extra) else {
        return Vec::new();
    };

    let mut owned = Vec::new();
    for (index, output) in prefix.outputs.iter().enumerate() {
        let index = index as u32;
        let kind = match &output.target {
            TxOutputTarget::Key(target_key) => {
                let Ok(candidate) = umb_crypto::derive_public(
                    &keys.view_secret,
                    &tx_public,
                    index,
                    &keys.spend_public,
                ) else {
                    continue;
                };
                if candidate != *target_key {
                    continue;
                }
                let onetime_secret = umb_crypto::derive_secret(
                    &keys.view_secret,
                    &tx_public,
                    index,
                    &keys.spend_secret,
                );
                let Ok(key_image) = umb_crypto::key_image(&onetime_secret, target_key) else {
                    continue;
                };
                OutputKind::Key { key_image }
            }
            TxOutputTarget::Multisig {
                keys: member_keys,
                required,
            } => {
                if !member_keys.contains(&keys.spend_public) {
                    continue;
                }
                OutputKind::Multisig {
                    required: *required,
                    key_count: member_keys.len() as u8,
                }
            }
        };

        let public_key = match &output.target {
            TxOutputTarget::Key(key) => *key,
            TxOutputTarget::Multisig { .. } => keys.spend_public,
        };
        owned.push(TransferOutput {
            amount: output.amount,
            transaction_hash: tx_hash,
            index_in_transaction: index,
            global_index: UNCONFIRMED_GLOBAL_INDEX,
            tx_public_key: tx_public,
            public_key,
            kind,
            block_height: block.height,
            block_timestamp: if block.height == UNCONFIRMED_HEIGHT {
                0
            } else {
                block.timestamp
            },
            unlock_time: prefix.unlock_time,
        });
    }
    owned
}

/// Decrypt any sealed messages in extra addressed to this wallet.
fn decrypt_messages(keys: &AccountKeys, prefix: &TransactionPrefix) -> Vec<String> {
    let Some(tx_public) = extra::extract_tx_public_key(&prefix.extra) else {
        return Vec::new();
    };
    extra::extract_messages(&prefix.extra)
        .into_iter()
        .enumerate()
        .filter_map(|(index, sealed)| {
            let key = umb_crypto::message_key(&keys.view_secret, &tx_public, index as u32);
            let plain = umb_crypto::chacha8(&key, &[0u8; 8], &sealed);
            String::from_utf8(plain).ok()
        })
        .collect()
}
