//! The wallet facade an application embeds.
//!
//! Owns the container, history, unconfirmed table and synchronizer, and
//! serializes access to them: one engine operation runs at a time on a
//! current-thread runtime, suspending only inside node calls. Events
//! stream out through the channel handed over by
//! [`Wallet::take_event_receiver`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};
use umb_crypto::Hash32;
use umb_transaction::PaymentId;

use crate::account::AccountKeys;
use crate::config::Currency;
use crate::container::TransfersContainer;
use crate::error::WalletError;
use crate::events::{actual_balance, pending_balance, publish_balances, EventSink, WalletEvent};
use crate::history::TransactionHistory;
use crate::node::NodeClient;
use crate::sender::{DustPolicy, SendRequest, TransferSender};
use crate::storage::{load_wallet, save_wallet, EngineSnapshot, LoadedWallet};
use crate::synchronizer::{drop_in_flight_transfer, BlockchainSynchronizer, SyncTarget};
use crate::types::{Transfer, TransactionId, TransactionState, TransferId, WalletTransaction};
use crate::unconfirmed::UnconfirmedTransactions;

/// Retries for one synchronization round before giving up.
const SYNC_RETRIES: u32 = 3;

/// Initial backoff after a failed node round; doubles per retry.
const SYNC_BACKOFF: Duration = Duration::from_millis(500);

fn wall_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A single-account transfer wallet.
pub struct Wallet {
    currency: Currency,
    node: Arc<dyn NodeClient>,
    keys: AccountKeys,
    creation_timestamp: u64,
    container: TransfersContainer,
    history: TransactionHistory,
    unconfirmed: UnconfirmedTransactions,
    synchronizer: BlockchainSynchronizer,
    sender: TransferSender,
    events: EventSink,
    event_rx: Option<UnboundedReceiver<WalletEvent>>,
    stopping: Arc<AtomicBool>,
    rng: StdRng,
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("currency", &self.currency)
            .field("creation_timestamp", &self.creation_timestamp)
            .finish_non_exhaustive()
    }
}

impl Wallet {
    /// Create a wallet with freshly generated keys.
    pub fn generate(currency: Currency, node: Arc<dyn NodeClient>) -> Self {
        let mut rng = StdRng::from_entropy();
        let keys = AccountKeys::generate(&mut rng);
        Self::build(currency, node, keys, wall_clock(), None, rng)
    }

    /// Create a wallet from existing account keys.
    pub fn with_keys(
        currency: Currency,
        node: Arc<dyn NodeClient>,
        keys: AccountKeys,
        creation_timestamp: u64,
    ) -> Self {
        Self::build(
            currency,
            node,
            keys,
            creation_timestamp,
            None,
            StdRng::from_entropy(),
        )
    }

    /// Restore a wallet from an encrypted file.
    pub fn load(
        currency: Currency,
        node: Arc<dyn NodeClient>,
        bytes: &[u8],
        password: &str,
    ) -> Result<Self, WalletError> {
        let LoadedWallet {
            keys,
            creation_timestamp,
            transactions,
            transfers,
            snapshot,
        } = load_wallet(bytes, password)?;

        let mut wallet = Self::build(
            currency,
            node,
            keys,
            creation_timestamp,
            snapshot,
            StdRng::from_entropy(),
        );
        wallet.history = TransactionHistory::from_records(transactions, transfers);
        info!(
            transactions = wallet.history.transaction_count(),
            height = wallet.synchronizer.known_block_count(),
            "wallet restored"
        );
        Ok(wallet)
    }

    fn build(
        currency: Currency,
        node: Arc<dyn NodeClient>,
        keys: AccountKeys,
        creation_timestamp: u64,
        snapshot: Option<EngineSnapshot>,
        rng: StdRng,
    ) -> Self {
        let (events, event_rx) = EventSink::channel();
        let sender = TransferSender::new(currency.clone(), keys.clone(), DustPolicy::AddToFee);

        let (container, unconfirmed, synchronizer) = match snapshot {
            Some(snapshot) => (
                snapshot.container,
                snapshot.unconfirmed,
                snapshot.synchronizer,
            ),
            None => (
                TransfersContainer::new(currency.spendable_age),
                UnconfirmedTransactions::new(),
                BlockchainSynchronizer::new(creation_timestamp),
            ),
        };

        Self {
            currency,
            node,
            keys,
            creation_timestamp,
            container,
            history: TransactionHistory::new(),
            unconfirmed,
            synchronizer,
            sender,
            events,
            event_rx: Some(event_rx),
            stopping: Arc::new(AtomicBool::new(false)),
            rng,
        }
    }

    /// Seed the wallet's RNG, making input selection and signing nonces
    /// reproducible. Test support.
    pub fn with_deterministic_rng(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// The receiving half of the event stream. Yields `None` after the
    /// first call.
    pub fn take_event_receiver(&mut self) -> Option<UnboundedReceiver<WalletEvent>> {
        self.event_rx.take()
    }

    pub fn account_keys(&self) -> &AccountKeys {
        &self.keys
    }

    pub fn creation_timestamp(&self) -> u64 {
        self.creation_timestamp
    }

    /// This wallet's address string.
    pub fn address(&self) -> String {
        self.keys.address().encode(self.currency.address_prefix)
    }

    /// Spendable balance.
    pub fn actual_balance(&self) -> u64 {
        actual_balance(&self.container)
    }

    /// Incoming but not yet spendable, including in-flight change.
    pub fn pending_balance(&self) -> u64 {
        pending_balance(&self.container, &self.unconfirmed)
    }

    pub fn transaction_count(&self) -> usize {
        self.history.transaction_count()
    }

    pub fn transfer_count(&self) -> usize {
        self.history.transfer_count()
    }

    pub fn get_transaction(&self, id: TransactionId) -> Option<&WalletTransaction> {
        self.history.get_transaction(id)
    }

    pub fn get_transfer(&self, id: TransferId) -> Option<&Transfer> {
        self.history.get_transfer(id)
    }

    pub fn find_transaction_by_hash(&self, hash: &Hash32) -> Option<TransactionId> {
        self.history.find_transaction_by_hash(hash)
    }

    pub fn find_transaction_by_transfer_id(&self, id: TransferId) -> Option<TransactionId> {
        self.history.find_transaction_by_transfer_id(id)
    }

    pub fn get_transactions_by_payment_id(&self, payment_id: &PaymentId) -> Vec<TransactionId> {
        self.history.get_transactions_by_payment_id(payment_id)
    }

    /// Build, sign and relay a transfer. The returned id is also the
    /// subject of the `SendTransactionCompleted` event.
    pub async fn send_transaction(
        &mut self,
        request: SendRequest,
    ) -> Result<TransactionId, WalletError> {
        let node = Arc::clone(&self.node);
        self.sender
            .send(
                node.as_ref(),
                &mut self.container,
                &mut self.history,
                &mut self.unconfirmed,
                &self.events,
                &self.stopping,
                &mut self.rng,
                request,
            )
            .await
    }

    /// Cancel an in-flight transfer the pool has not confirmed yet.
    pub fn cancel_transaction(&mut self, id: TransactionId) -> Result<(), WalletError> {
        let hash = self
            .history
            .get_transaction(id)
            .map(|tx| tx.hash)
            .ok_or_else(|| WalletError::Internal("unknown transaction id".into()))?;

        if !drop_in_flight_transfer(
            &mut self.container,
            &mut self.history,
            &mut self.unconfirmed,
            &self.events,
            &hash,
            TransactionState::Cancelled,
        ) {
            return Err(WalletError::Internal(
                "transaction is not cancellable".into(),
            ));
        }
        publish_balances(&self.container, &self.unconfirmed, &self.events);
        Ok(())
    }

    /// One full synchronization round: chain, then pool. Node failures
    /// retry with exponential backoff before surfacing.
    pub async fn synchronize(&mut self) -> Result<(), WalletError> {
        let node = Arc::clone(&self.node);

        let mut attempt = 0;
        loop {
            let mut target = SyncTarget {
                keys: &self.keys,
                currency: &self.currency,
                container: &mut self.container,
                history: &mut self.history,
                unconfirmed: &mut self.unconfirmed,
                events: &self.events,
            };
            let chain = self
                .synchronizer
                .sync_chain(node.as_ref(), &mut target, &self.stopping)
                .await;
            match chain {
                Ok(()) => break,
                Err(WalletError::Network(_)) if attempt < SYNC_RETRIES => {
                    attempt += 1;
                    debug!(attempt, "chain sync retry after network error");
                    tokio::time::sleep(SYNC_BACKOFF * 2u32.pow(attempt - 1)).await;
                }
                Err(err) => return Err(err),
            }
            if self.stopping.load(Ordering::Relaxed) {
                return Ok(());
            }
        }

        let mut target = SyncTarget {
            keys: &self.keys,
            currency: &self.currency,
            container: &mut self.container,
            history: &mut self.history,
            unconfirmed: &mut self.unconfirmed,
            events: &self.events,
        };
        self.synchronizer
            .sync_pool(node.as_ref(), &mut target, &self.stopping)
            .await
    }

    /// Serialize the wallet. `save_details` includes the history,
    /// `save_cache` the container and sync state.
    pub fn save(
        &mut self,
        password: &str,
        save_details: bool,
        save_cache: bool,
    ) -> Result<Vec<u8>, WalletError> {
        let (transactions, transfers) = self.history.records();
        let details = save_details.then_some((transactions, transfers));

        let snapshot;
        let snapshot_ref = if save_cache {
            snapshot = EngineSnapshot {
                container: self.container.clone(),
                unconfirmed: self.unconfirmed.clone(),
                synchronizer: self.synchronizer.clone(),
            };
            Some(&snapshot)
        } else {
            None
        };

        save_wallet(
            password,
            &self.keys,
            self.creation_timestamp,
            details,
            snapshot_ref,
            &mut self.rng,
        )
    }

    /// Drop all synchronized state, keeping the keys. The next
    /// synchronization rescans from the beginning.
    pub fn reset(&mut self) {
        self.container = TransfersContainer::new(self.currency.spendable_age);
        self.history = TransactionHistory::new();
        self.unconfirmed = UnconfirmedTransactions::new();
        self.synchronizer = BlockchainSynchronizer::new(self.creation_timestamp);
        publish_balances(&self.container, &self.unconfirmed, &self.events);
        info!("wallet state reset");
    }

    /// Request shutdown: pending operations finish with `TxCancelled`
    /// and the synchronizer exits at its next suspension point.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Relaxed);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Relaxed)
    }
}
