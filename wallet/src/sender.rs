//! Builds, signs and relays outgoing transfers.
//!
//! The sender owns no state between calls; everything for one transfer
//! lives in a per-send context dropped on completion. A send either
//! commits completely (history entry, unconfirmed entry, spent marks,
//! relay) or rolls every mutation back and reports the failure both as
//! the return value and as a `SendTransactionCompleted` event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;
use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use umb_crypto::{chacha8, KeyImage, KeyPair, PublicKey, RingSignature, SecretKey};
use umb_transaction::{
    amounts, extra, KeyInput, PaymentId, Transaction, TransactionPrefix, TxInput, TxOutput,
    TxOutputTarget, CURRENT_TRANSACTION_VERSION,
};

use crate::account::{AccountKeys, Address};
use crate::config::Currency;
use crate::container::{OutputMask, TransferOutput, TransfersContainer};
use crate::error::WalletError;
use crate::events::{publish_balances, EventSink, WalletEvent};
use crate::history::TransactionHistory;
use crate::node::{NodeClient, RandomOutEntry};
use crate::types::{Transfer, TransactionId, TransactionState, WalletTransaction,
    UNCONFIRMED_HEIGHT};
use crate::unconfirmed::{UnconfirmedTransactions, UnconfirmedTransferDetails};

/// One destination of a transfer request.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Destination {
    pub address: String,
    pub amount: u64,
}

/// A plaintext message sealed to one destination.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TransactionMessage {
    pub address: String,
    pub message: String,
}

/// What to do with change residue below the dust threshold.
#[derive(Clone, Debug, Default)]
pub enum DustPolicy {
    /// Let the residue fall into the implicit fee.
    #[default]
    AddToFee,
    /// Send the residue to a pre-configured collection address.
    SendToAddress(Address),
}

/// A transfer request.
#[derive(Clone, Debug, Default)]
pub struct SendRequest {
    pub destinations: Vec<Destination>,
    pub fee: u64,
    /// Ring size minus one.
    pub mixin: u16,
    pub unlock_time: u64,
    /// Pre-encoded extra fields, appended verbatim when no payment id is
    /// given.
    pub extra: Vec<u8>,
    pub payment_id: Option<PaymentId>,
    pub messages: Vec<TransactionMessage>,
}

/// Everything one send carries between its stages. Dropped when the
/// send completes, successfully or not.
struct SendContext {
    transaction_id: TransactionId,
    destinations: Vec<(Address, u64)>,
    messages: Vec<(Address, String)>,
    selected: Vec<TransferOutput>,
    found_money: u64,
    required: u64,
    change: u64,
}

/// One ring input ready for signing.
struct PreparedInput {
    output: TransferOutput,
    onetime_secret: SecretKey,
    key_image: KeyImage,
    ring: Vec<RandomOutEntry>,
    real_index: usize,
}

/// Stateless transfer orchestrator.
pub struct TransferSender {
    currency: Currency,
    keys: AccountKeys,
    dust_policy: DustPolicy,
    upper_transaction_size_limit: usize,
}

fn wall_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl TransferSender {
    pub fn new(currency: Currency, keys: AccountKeys, dust_policy: DustPolicy) -> Self {
        let upper_transaction_size_limit = currency.upper_transaction_size_limit();
        Self {
            currency,
            keys,
            dust_policy,
            upper_transaction_size_limit,
        }
    }

    /// Build, sign and relay one transfer.
    ///
    /// Validation failures return before any state changes. Once the
    /// history entry exists, failures mark it Failed (or Cancelled) and
    /// additionally surface through `SendTransactionCompleted`.
    #[allow(clippy::too_many_arguments)]
    pub async fn send(
        &self,
        node: &dyn NodeClient,
        container: &mut TransfersContainer,
        history: &mut TransactionHistory,
        unconfirmed: &mut UnconfirmedTransactions,
        events: &EventSink,
        stopping: &AtomicBool,
        rng: &mut (impl Rng + CryptoRng),
        request: SendRequest,
    ) -> Result<TransactionId, WalletError> {
        if stopping.load(Ordering::Relaxed) {
            return Err(WalletError::TxCancelled);
        }

        let mut context = self.validate_and_select(container, rng, &request)?;
        context.transaction_id = self.record_history(history, &request, &context)?;

        // The request is committed to history from here on.
        let result = self
            .build_and_relay(
                node,
                container,
                history,
                unconfirmed,
                events,
                stopping,
                rng,
                &request,
                &mut context,
            )
            .await;

        let transaction_id = context.transaction_id;
        match result {
            Ok(()) => {
                events.publish(WalletEvent::SendTransactionCompleted {
                    transaction_id,
                    result: Ok(()),
                });
                Ok(transaction_id)
            }
            Err(err) => {
                let state = if err == WalletError::TxCancelled {
                    TransactionState::Cancelled
                } else {
                    TransactionState::Failed
                };
                let _ = history.set_transaction_state(transaction_id, state);
                warn!(transaction_id, error = %err, "send failed");
                events.publish(WalletEvent::SendTransactionCompleted {
                    transaction_id,
                    result: Err(err.clone()),
                });
                Err(err)
            }
        }
    }

    /// Checks every precondition and picks inputs; the only state change
    /// on success is the new history entry.
    fn validate_and_select(
        &self,
        container: &TransfersContainer,
        rng: &mut (impl Rng + CryptoRng),
        request: &SendRequest,
    ) -> Result<SendContext, WalletError> {
        if request.destinations.is_empty() {
            return Err(WalletError::ZeroDestination);
        }

        let mut destinations = Vec::with_capacity(request.destinations.len());
        let mut required: u64 = request.fee;
        for destination in &request.destinations {
            if destination.amount == 0 {
                return Err(WalletError::WrongAmount);
            }
            let address = Address::parse(&destination.address, self.currency.address_prefix)?;
            required = required
                .checked_add(destination.amount)
                .ok_or(WalletError::SumOverflow)?;
            destinations.push((address, destination.amount));
        }
        if required > i64::MAX as u64 {
            return Err(WalletError::SumOverflow);
        }

        let mut messages = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            let address = Address::parse(&message.address, self.currency.address_prefix)?;
            messages.push((address, message.message.clone()));
        }

        let available = container.balance(OutputMask::SPENDABLE);
        if required > available {
            return Err(WalletError::InsufficientFunds {
                available,
                required,
            });
        }

        let (selected, found_money) = self.select_inputs(container, rng, request.mixin, required)?;
        let change = found_money - required;

        debug!(
            required,
            found_money,
            inputs = selected.len(),
            "transfer inputs selected"
        );

        Ok(SendContext {
            transaction_id: crate::types::INVALID_TRANSACTION_ID,
            destinations,
            messages,
            selected,
            found_money,
            required,
            change,
        })
    }

    /// Greedy randomized selection with a dust preference.
    ///
    /// With a zero mixin, dust outputs are welcome (this sweeps them
    /// up); with mixing they are excluded, since no decoys exist for
    /// sub-dust denominations. After accumulation the selection is
    /// pruned smallest-first so the transfer uses the fewest, largest
    /// inputs the random draw allows.
    fn select_inputs(
        &self,
        container: &TransfersContainer,
        rng: &mut (impl Rng + CryptoRng),
        mixin: u16,
        required: u64,
    ) -> Result<(Vec<TransferOutput>, u64), WalletError> {
        let mut pool = container.get_outputs(OutputMask::SPENDABLE);
        if mixin > 0 {
            pool.retain(|output| output.amount >= self.currency.dust_threshold);
        }
        pool.shuffle(rng);

        let mut selected = Vec::new();
        let mut found: u64 = 0;
        for output in pool {
            if found >= required {
                break;
            }
            found = found.saturating_add(output.amount);
            selected.push(output);
        }
        if found < required {
            return Err(WalletError::InsufficientFunds {
                available: found,
                required,
            });
        }

        selected.sort_by(|a, b| b.amount.cmp(&a.amount));
        let mut index = selected.len();
        while index > 0 {
            index -= 1;
            if found - selected[index].amount >= required {
                found -= selected[index].amount;
                selected.remove(index);
            }
        }

        Ok((selected, found))
    }

    #[allow(clippy::too_many_arguments)]
    async fn build_and_relay(
        &self,
        node: &dyn NodeClient,
        container: &mut TransfersContainer,
        history: &mut TransactionHistory,
        unconfirmed: &mut UnconfirmedTransactions,
        events: &EventSink,
        stopping: &AtomicBool,
        rng: &mut (impl Rng + CryptoRng),
        request: &SendRequest,
        context: &mut SendContext,
    ) -> Result<(), WalletError> {
        // Ring candidates come from the node; one suspension point.
        let rings = if request.mixin > 0 {
            let ring_size = request
                .mixin
                .checked_add(1)
                .ok_or(WalletError::MixinCountTooBig)?;
            let amounts: Vec<u64> = context.selected.iter().map(|o| o.amount).collect();
            let response = node
                .get_random_outputs(amounts, ring_size)
                .await
                .map_err(WalletError::from)?;
            if stopping.load(Ordering::Relaxed) {
                return Err(WalletError::TxCancelled);
            }
            if response.len() != context.selected.len() {
                return Err(WalletError::Internal(
                    "random outputs response does not match request".into(),
                ));
            }
            if response
                .iter()
                .any(|outs| outs.outs.len() < usize::from(request.mixin) + 1)
            {
                return Err(WalletError::MixinCountTooBig);
            }
            response.into_iter().map(|outs| outs.outs).collect()
        } else {
            vec![Vec::new(); context.selected.len()]
        };

        let inputs = self.prepare_inputs(context, rings, request.mixin)?;
        let transaction = self.construct_transaction(rng, request, context, &inputs)?;
        let tx_hash = transaction.hash();

        history
            .set_transaction_hash(context.transaction_id, tx_hash)
            .map_err(|e| WalletError::Internal(e.to_string()))?;
        history
            .set_transaction_extra(context.transaction_id, transaction.prefix.extra.clone())
            .map_err(|e| WalletError::Internal(e.to_string()))?;

        let spent_key_images: Vec<KeyImage> =
            inputs.iter().map(|input| input.key_image).collect();
        unconfirmed.add(
            tx_hash,
            UnconfirmedTransferDetails {
                transaction_id: context.transaction_id,
                change: context.change,
                sent_time: wall_clock(),
                spent_key_images: spent_key_images.clone(),
            },
        );
        if let Err(err) = container.mark_spent(&spent_key_images, tx_hash) {
            unconfirmed.erase(&tx_hash);
            return Err(WalletError::Internal(err.to_string()));
        }

        // The container invariant holds; observers may see the new
        // balances now.
        publish_balances(container, unconfirmed, events);

        if stopping.load(Ordering::Relaxed) {
            container.unmark_spent(&spent_key_images, &tx_hash);
            unconfirmed.erase(&tx_hash);
            publish_balances(container, unconfirmed, events);
            return Err(WalletError::TxCancelled);
        }

        if let Err(err) = node.relay_transaction(transaction.to_bytes()).await {
            container.unmark_spent(&spent_key_images, &tx_hash);
            unconfirmed.erase(&tx_hash);
            publish_balances(container, unconfirmed, events);
            return Err(WalletError::from(err));
        }

        debug!(tx = %tx_hash, "transfer relayed");
        Ok(())
    }

    fn record_history(
        &self,
        history: &mut TransactionHistory,
        request: &SendRequest,
        context: &SendContext,
    ) -> Result<TransactionId, WalletError> {
        let transfers: Vec<Transfer> = request
            .destinations
            .iter()
            .map(|d| Transfer {
                address: d.address.clone(),
                amount: d.amount,
            })
            .collect();
        let transfer_count = transfers.len();
        let first_transfer_id = history.insert_transfers(transfers);

        history
            .insert_transaction(WalletTransaction {
                state: TransactionState::Active,
                hash: umb_crypto::Hash32::ZERO,
                total_amount: -(context.required as i64),
                fee: request.fee,
                block_height: UNCONFIRMED_HEIGHT,
                timestamp: wall_clock(),
                unlock_time: request.unlock_time,
                is_coinbase: false,
                extra: Vec::new(),
                first_transfer_id,
                transfer_count,
                messages: request.messages.iter().map(|m| m.message.clone()).collect(),
            })
            .map_err(|e| WalletError::Internal(e.to_string()))
    }

    /// Re-derive the one-time secrets, verify them against the recorded
    /// output keys, and place each real output into its sorted ring.
    fn prepare_inputs(
        &self,
        context: &SendContext,
        rings: Vec<Vec<RandomOutEntry>>,
        mixin: u16,
    ) -> Result<Vec<PreparedInput>, WalletError> {
        let mut prepared = Vec::with_capacity(context.selected.len());

        for (output, candidates) in context.selected.iter().zip(rings) {
            let expected = umb_crypto::derive_public(
                &self.keys.view_secret,
                &output.tx_public_key,
                output.index_in_transaction,
                &self.keys.spend_public,
            )
            .map_err(|e| WalletError::Internal(e.to_string()))?;
            if expected != output.public_key {
                return Err(WalletError::Internal(
                    "derived output key does not match the recorded key".into(),
                ));
            }

            let onetime_secret = umb_crypto::derive_secret(
                &self.keys.view_secret,
                &output.tx_public_key,
                output.index_in_transaction,
                &self.keys.spend_secret,
            );
            let key_image = *output.key_image().ok_or_else(|| {
                WalletError::Internal("selected output has no key image".into())
            })?;
            let computed = umb_crypto::key_image(&onetime_secret, &output.public_key)
                .map_err(|e| WalletError::Internal(e.to_string()))?;
            if computed != key_image {
                return Err(WalletError::Internal(
                    "recomputed key image does not match the tracked image".into(),
                ));
            }

            // Decoys ascend by global index; the real output is spliced
            // into its sorted position.
            let mut ring: Vec<RandomOutEntry> = Vec::with_capacity(usize::from(mixin) + 1);
            let mut sorted = candidates;
            sorted.sort_by_key(|entry| entry.global_index);
            for entry in sorted {
                if entry.global_index == output.global_index {
                    continue;
                }
                ring.push(entry);
                if ring.len() >= usize::from(mixin) {
                    break;
                }
            }
            let real_index = ring
                .iter()
                .position(|entry| entry.global_index >= output.global_index)
                .unwrap_or(ring.len());
            ring.insert(
                real_index,
                RandomOutEntry {
                    global_index: output.global_index,
                    public_key: output.public_key,
                },
            );

            prepared.push(PreparedInput {
                output: output.clone(),
                onetime_secret,
                key_image,
                ring,
                real_index,
            });
        }

        Ok(prepared)
    }

    fn construct_transaction(
        &self,
        rng: &mut (impl Rng + CryptoRng),
        request: &SendRequest,
        context: &SendContext,
        inputs: &[PreparedInput],
    ) -> Result<Transaction, WalletError> {
        let tx_keys = KeyPair::generate(rng);

        let mut tx_extra = Vec::new();
        extra::add_tx_public_key(&mut tx_extra, &tx_keys.public);
        if let Some(payment_id) = &request.payment_id {
            extra::add_payment_id(&mut tx_extra, payment_id);
        } else {
            tx_extra.extend_from_slice(&request.extra);
        }
        for (index, (address, plaintext)) in context.messages.iter().enumerate() {
            let key =
                umb_crypto::message_key(&tx_keys.secret, &address.view_public, index as u32);
            let sealed = chacha8(&key, &[0u8; 8], plaintext.as_bytes());
            extra::add_message(&mut tx_extra, &sealed)
                .map_err(|e| WalletError::Internal(e.to_string()))?;
        }

        let split = self.split_destinations(context)?;
        let mut outputs = Vec::with_capacity(split.len());
        for (index, (address, amount)) in split.iter().enumerate() {
            let onetime = umb_crypto::derive_public(
                &tx_keys.secret,
                &address.view_public,
                index as u32,
                &address.spend_public,
            )
            .map_err(|e| WalletError::Internal(e.to_string()))?;
            outputs.push(TxOutput {
                amount: *amount,
                target: TxOutputTarget::Key(onetime),
            });
        }

        // Inputs must cover outputs plus the explicit fee; anything
        // beyond that is dust absorbed into the implicit fee.
        let outputs_total: u64 = outputs.iter().map(|o| o.amount).sum();
        debug_assert!(outputs_total + request.fee <= context.found_money);

        let tx_inputs: Vec<TxInput> = inputs
            .iter()
            .map(|input| {
                TxInput::Key(KeyInput {
                    amount: input.output.amount,
                    ring_indices: input.ring.iter().map(|e| e.global_index).collect(),
                    key_image: input.key_image,
                })
            })
            .collect();

        let prefix = TransactionPrefix {
            version: CURRENT_TRANSACTION_VERSION,
            unlock_time: request.unlock_time,
            inputs: tx_inputs,
            outputs,
            extra: tx_extra,
        };
        let prefix_hash = prefix.hash();

        let mut signatures = Vec::with_capacity(inputs.len());
        for input in inputs {
            let ring_keys: Vec<PublicKey> =
                input.ring.iter().map(|entry| entry.public_key).collect();
            let signature = RingSignature::sign(
                &prefix_hash,
                &input.key_image,
                &ring_keys,
                &input.onetime_secret,
                input.real_index,
                rng,
            )
            .map_err(|e| WalletError::Internal(e.to_string()))?;
            signatures.push(signature);
        }

        let transaction = Transaction { prefix, signatures };
        if transaction.blob_size() >= self.upper_transaction_size_limit {
            return Err(WalletError::TransactionSizeTooBig);
        }
        Ok(transaction)
    }

    /// Digit-split every destination and the change. Destination dust
    /// stays with the destination; change dust follows the dust policy.
    fn split_destinations(
        &self,
        context: &SendContext,
    ) -> Result<Vec<(Address, u64)>, WalletError> {
        let threshold = self.currency.dust_threshold;
        let mut split = Vec::new();

        for (address, amount) in &context.destinations {
            let (chunks, dust) = amounts::decompose_to_vec(*amount, threshold);
            for chunk in chunks {
                split.push((*address, chunk));
            }
            // Destination dust still belongs to the destination.
            if dust != 0 {
                split.push((*address, dust));
            }
        }

        let own_address = self.keys.address();
        let (change_chunks, change_dust) = amounts::decompose_to_vec(context.change, threshold);
        for chunk in change_chunks {
            split.push((own_address, chunk));
        }
        if change_dust > threshold {
            return Err(WalletError::Internal(
                "change residue exceeds the dust threshold".into(),
            ));
        }
        if change_dust != 0 {
            match &self.dust_policy {
                DustPolicy::AddToFee => {}
                DustPolicy::SendToAddress(address) => split.push((*address, change_dust)),
            }
        }

        Ok(split)
    }
}
