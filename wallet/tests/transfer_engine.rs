//! End-to-end tests for the transfer engine against a scripted node.
//!
//! Covers the full receive/send/reorg/pool lifecycle:
//! - coinbase receive and soft-lock maturation
//! - transfers between two wallets sharing one chain
//! - reorganizations cancelling confirmed transfers
//! - pool eviction and aging of in-flight transfers
//! - payment-id indexing
//! - persistence of the whole engine state

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::{rngs::StdRng, SeedableRng};
use umb_crypto::{Hash32, KeyPair};
use umb_transaction::{
    encoding, extra, KeyInput, PaymentId, Transaction, TransactionPrefix, TxInput, TxOutput,
    TxOutputTarget,
};
use umbra_wallet::{
    AccountKeys, BlockData, BlockShortEntry, Currency, Destination, NodeClient, NodeError,
    PoolDifference, RandomOutEntry, RandomOuts, SendRequest, TransactionShortInfo,
    TransactionState, Wallet, WalletEvent,
};

const TEST_BLOCK_REWARD: u64 = 70_368_744_177_664;
const TEST_PASSWORD: &str = "engine-test-password";

// ============================================================================
// Scripted node
// ============================================================================

struct MockBlock {
    hash: Hash32,
    timestamp: u64,
    miner_tx: TransactionPrefix,
    transactions: Vec<TransactionShortInfo>,
}

#[derive(Default)]
struct NodeState {
    blocks: Vec<MockBlock>,
    global_indices: HashMap<Hash32, Vec<u32>>,
    next_global_index: HashMap<u64, u32>,
    pool: Vec<TransactionShortInfo>,
    relayed: Vec<Vec<u8>>,
    fail_relay: bool,
    /// When set, `get_random_outputs` returns this many per amount
    /// regardless of the request.
    random_outs_override: Option<u16>,
}

struct MockNode {
    state: Mutex<NodeState>,
    rng: Mutex<StdRng>,
}

impl MockNode {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(NodeState::default()),
            rng: Mutex::new(StdRng::seed_from_u64(0xfeed)),
        })
    }

    fn height(&self) -> u64 {
        self.state.lock().unwrap().blocks.len() as u64
    }

    /// Append a block; the miner transaction comes first in the index
    /// assignment, matching how the chain numbers outputs.
    fn add_block(&self, miner_tx: TransactionPrefix, transactions: Vec<TransactionPrefix>) {
        let mut state = self.state.lock().unwrap();
        let height = state.blocks.len() as u64;

        let mut short_infos = Vec::new();
        let mut hash_input = height.to_le_bytes().to_vec();
        for prefix in std::iter::once(&miner_tx).chain(transactions.iter()) {
            let tx_hash = prefix.hash();
            hash_input.extend_from_slice(tx_hash.as_bytes());
            let mut indices = Vec::new();
            for output in &prefix.outputs {
                let counter = state.next_global_index.entry(output.amount).or_insert(0);
                indices.push(*counter);
                *counter += 1;
            }
            state.global_indices.insert(tx_hash, indices);
            if *prefix != miner_tx {
                short_infos.push(TransactionShortInfo {
                    hash: tx_hash,
                    prefix: prefix.clone(),
                });
            }
        }

        // A block confirmed out of the pool leaves the pool.
        let confirmed: Vec<Hash32> = short_infos.iter().map(|info| info.hash).collect();
        state.pool.retain(|entry| !confirmed.contains(&entry.hash));

        state.blocks.push(MockBlock {
            hash: umb_crypto::hash(&hash_input),
            timestamp: 1_700_000_000 + height,
            miner_tx,
            transactions: short_infos,
        });
    }

    /// Drop every block at `height` and above, simulating a fork.
    fn truncate(&self, height: u64) {
        self.state.lock().unwrap().blocks.truncate(height as usize);
    }

    fn add_pool_transaction(&self, prefix: TransactionPrefix) {
        let hash = prefix.hash();
        self.state
            .lock()
            .unwrap()
            .pool
            .push(TransactionShortInfo { hash, prefix });
    }

    fn remove_pool_transaction(&self, hash: &Hash32) {
        self.state
            .lock()
            .unwrap()
            .pool
            .retain(|entry| entry.hash != *hash);
    }

    fn set_fail_relay(&self, fail: bool) {
        self.state.lock().unwrap().fail_relay = fail;
    }

    fn set_random_outs_override(&self, count: Option<u16>) {
        self.state.lock().unwrap().random_outs_override = count;
    }

    fn take_relayed(&self) -> Vec<Transaction> {
        self.state
            .lock()
            .unwrap()
            .relayed
            .drain(..)
            .map(|bytes| encoding::transaction_from_bytes(&bytes).expect("relayed blob decodes"))
            .collect()
    }
}

#[async_trait]
impl NodeClient for MockNode {
    async fn query_blocks(
        &self,
        known_hashes: Vec<Hash32>,
        _timestamp: u64,
    ) -> Result<(u64, Vec<BlockShortEntry>), NodeError> {
        let state = self.state.lock().unwrap();

        let mut start = 0u64;
        'outer: for known in &known_hashes {
            for (height, block) in state.blocks.iter().enumerate().rev() {
                if block.hash == *known {
                    start = height as u64;
                    break 'outer;
                }
            }
        }

        let entries = state.blocks[start as usize..]
            .iter()
            .map(|block| BlockShortEntry {
                block_hash: block.hash,
                block: Some(BlockData {
                    timestamp: block.timestamp,
                    miner_tx: block.miner_tx.clone(),
                }),
                transactions: block.transactions.clone(),
            })
            .collect();
        Ok((start, entries))
    }

    async fn get_tx_outs_global_indices(&self, tx_hash: Hash32) -> Result<Vec<u32>, NodeError> {
        self.state
            .lock()
            .unwrap()
            .global_indices
            .get(&tx_hash)
            .cloned()
            .ok_or_else(|| NodeError::Rejected("unknown transaction".into()))
    }

    async fn get_random_outputs(
        &self,
        amounts: Vec<u64>,
        outs_per_amount: u16,
    ) -> Result<Vec<RandomOuts>, NodeError> {
        let state = self.state.lock().unwrap();
        let count = state.random_outs_override.unwrap_or(outs_per_amount);
        let mut rng = self.rng.lock().unwrap();

        Ok(amounts
            .into_iter()
            .map(|amount| RandomOuts {
                amount,
                outs: (0..count)
                    .map(|i| RandomOutEntry {
                        global_index: 1_000 + u32::from(i),
                        public_key: KeyPair::generate(&mut *rng).public,
                    })
                    .collect(),
            })
            .collect())
    }

    async fn relay_transaction(&self, raw: Vec<u8>) -> Result<(), NodeError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_relay {
            return Err(NodeError::Transport("relay refused".into()));
        }
        state.relayed.push(raw);
        Ok(())
    }

    async fn get_pool_symmetric_difference(
        &self,
        known_pool_ids: Vec<Hash32>,
        tail_block: Hash32,
    ) -> Result<PoolDifference, NodeError> {
        let state = self.state.lock().unwrap();
        let is_actual = state
            .blocks
            .last()
            .map(|block| block.hash == tail_block)
            .unwrap_or(false);

        let new_transactions: Vec<TransactionShortInfo> = state
            .pool
            .iter()
            .filter(|entry| !known_pool_ids.contains(&entry.hash))
            .cloned()
            .collect();
        let deleted: Vec<Hash32> = known_pool_ids
            .into_iter()
            .filter(|hash| state.pool.iter().all(|entry| entry.hash != *hash))
            .collect();

        Ok(PoolDifference {
            is_actual,
            new_transactions,
            deleted,
        })
    }
}

// ============================================================================
// Transaction builders
// ============================================================================

/// A coinbase transaction paying `amount` to `recipient`.
fn coinbase_to(recipient: &AccountKeys, height: u64, amount: u64, rng: &mut StdRng) -> TransactionPrefix {
    let tx_keys = KeyPair::generate(rng);
    let onetime = umb_crypto::derive_public(
        &tx_keys.secret,
        &recipient.view_public,
        0,
        &recipient.spend_public,
    )
    .unwrap();

    let mut tx_extra = Vec::new();
    extra::add_tx_public_key(&mut tx_extra, &tx_keys.public);

    TransactionPrefix {
        version: 1,
        unlock_time: 0,
        inputs: vec![TxInput::Coinbase { height }],
        outputs: vec![TxOutput {
            amount,
            target: TxOutputTarget::Key(onetime),
        }],
        extra: tx_extra,
    }
}

/// An externally funded transfer paying `amount` to `recipient`, with an
/// optional payment id. The input spends a foreign output.
fn external_transfer_to(
    recipient: &AccountKeys,
    amount: u64,
    fee: u64,
    payment_id: Option<PaymentId>,
    rng: &mut StdRng,
) -> TransactionPrefix {
    let tx_keys = KeyPair::generate(rng);
    let onetime = umb_crypto::derive_public(
        &tx_keys.secret,
        &recipient.view_public,
        0,
        &recipient.spend_public,
    )
    .unwrap();

    let mut tx_extra = Vec::new();
    extra::add_tx_public_key(&mut tx_extra, &tx_keys.public);
    if let Some(payment_id) = payment_id {
        extra::add_payment_id(&mut tx_extra, &payment_id);
    }

    let foreign = KeyPair::generate(rng);
    let foreign_image = umb_crypto::key_image(&foreign.secret, &foreign.public).unwrap();

    TransactionPrefix {
        version: 1,
        unlock_time: 0,
        inputs: vec![TxInput::Key(KeyInput {
            amount: amount + fee,
            ring_indices: vec![0],
            key_image: foreign_image,
        })],
        outputs: vec![TxOutput {
            amount,
            target: TxOutputTarget::Key(onetime),
        }],
        extra: tx_extra,
    }
}

/// Mainnet constants except for the dust threshold: a threshold of one
/// makes every decomposition exact, so balance arithmetic in the
/// scenarios has no fee-absorbed residue. Dust handling itself is
/// covered by the sender's unit tests.
fn test_currency() -> Currency {
    Currency {
        dust_threshold: 1,
        ..Currency::default()
    }
}

/// A wallet funded with one matured coinbase reward.
async fn funded_wallet(node: &Arc<MockNode>, seed: u64, rng: &mut StdRng) -> Wallet {
    let mut wallet =
        Wallet::generate(test_currency(), Arc::clone(node) as Arc<dyn NodeClient>)
            .with_deterministic_rng(seed);
    let other = AccountKeys::generate(rng);

    let height = node.height();
    node.add_block(
        coinbase_to(wallet.account_keys(), height, TEST_BLOCK_REWARD, rng),
        vec![],
    );
    for age in 1..=test_currency().spendable_age {
        node.add_block(coinbase_to(&other, height + age, TEST_BLOCK_REWARD, rng), vec![]);
    }
    wallet.synchronize().await.unwrap();
    assert_eq!(wallet.actual_balance(), TEST_BLOCK_REWARD);
    wallet
}

fn drain_events(wallet: &mut Wallet) -> Vec<WalletEvent> {
    let mut rx = wallet.take_event_receiver().expect("receiver not yet taken");
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================================
// Receiving
// ============================================================================

mod receiving {
    use super::*;

    #[tokio::test]
    async fn test_receive_coinbase_and_mature() {
        let node = MockNode::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut wallet =
            Wallet::generate(test_currency(), Arc::clone(&node) as Arc<dyn NodeClient>)
                .with_deterministic_rng(2);
        let other = AccountKeys::generate(&mut rng);

        node.add_block(
            coinbase_to(wallet.account_keys(), 0, TEST_BLOCK_REWARD, &mut rng),
            vec![],
        );
        wallet.synchronize().await.unwrap();

        // One confirmation: the reward is seen but not spendable.
        assert_eq!(wallet.pending_balance(), TEST_BLOCK_REWARD);
        assert_eq!(wallet.actual_balance(), 0);
        assert_eq!(wallet.transaction_count(), 1);
        let tx = wallet.get_transaction(0).unwrap();
        assert!(tx.is_coinbase);
        assert_eq!(tx.total_amount, TEST_BLOCK_REWARD as i64);

        // Ten more blocks mature it.
        for height in 1..=10 {
            node.add_block(coinbase_to(&other, height, TEST_BLOCK_REWARD, &mut rng), vec![]);
        }
        wallet.synchronize().await.unwrap();
        assert_eq!(wallet.actual_balance(), TEST_BLOCK_REWARD);
        assert_eq!(wallet.pending_balance(), 0);
    }

    #[tokio::test]
    async fn test_payment_id_round_trip() {
        let node = MockNode::new();
        let mut rng = StdRng::seed_from_u64(3);
        let mut wallet =
            Wallet::generate(test_currency(), Arc::clone(&node) as Arc<dyn NodeClient>)
                .with_deterministic_rng(4);

        let payment_id = PaymentId([0xde; 32]);
        let transfer =
            external_transfer_to(wallet.account_keys(), 10_000_000, 1_000_000, Some(payment_id), &mut rng);
        let tx_hash = transfer.hash();

        let other = AccountKeys::generate(&mut rng);
        node.add_block(coinbase_to(&other, 0, TEST_BLOCK_REWARD, &mut rng), vec![transfer]);
        wallet.synchronize().await.unwrap();

        let ids = wallet.get_transactions_by_payment_id(&payment_id);
        assert_eq!(ids.len(), 1);
        let tx = wallet.get_transaction(ids[0]).unwrap();
        assert_eq!(tx.hash, tx_hash);
        assert_eq!(tx.total_amount, 10_000_000);

        // An unrelated payment id finds nothing.
        assert!(wallet
            .get_transactions_by_payment_id(&PaymentId([0x01; 32]))
            .is_empty());
    }

    #[tokio::test]
    async fn test_incoming_pool_transaction_is_pending() {
        let node = MockNode::new();
        let mut rng = StdRng::seed_from_u64(5);
        let mut wallet =
            Wallet::generate(test_currency(), Arc::clone(&node) as Arc<dyn NodeClient>)
                .with_deterministic_rng(6);
        let other = AccountKeys::generate(&mut rng);

        node.add_block(coinbase_to(&other, 0, TEST_BLOCK_REWARD, &mut rng), vec![]);
        wallet.synchronize().await.unwrap();

        let incoming = external_transfer_to(wallet.account_keys(), 5_000_000, 100, None, &mut rng);
        let incoming_hash = incoming.hash();
        node.add_pool_transaction(incoming.clone());
        wallet.synchronize().await.unwrap();

        assert_eq!(wallet.pending_balance(), 5_000_000);
        assert_eq!(wallet.actual_balance(), 0);
        let id = wallet.find_transaction_by_hash(&incoming_hash).unwrap();
        assert_eq!(
            wallet.get_transaction(id).unwrap().block_height,
            umbra_wallet::UNCONFIRMED_HEIGHT
        );

        // The pool drops it again: the pending balance returns to zero.
        node.remove_pool_transaction(&incoming_hash);
        wallet.synchronize().await.unwrap();
        assert_eq!(wallet.pending_balance(), 0);
        assert_eq!(
            wallet.get_transaction(id).unwrap().state,
            TransactionState::Deleted
        );
    }
}

// ============================================================================
// Sending
// ============================================================================

mod sending {
    use super::*;

    #[tokio::test]
    async fn test_transfer_between_wallets() {
        let node = MockNode::new();
        let mut rng = StdRng::seed_from_u64(10);
        let mut alice = funded_wallet(&node, 11, &mut rng).await;
        let mut bob = Wallet::generate(test_currency(), Arc::clone(&node) as Arc<dyn NodeClient>)
            .with_deterministic_rng(12);

        let amount = 10_000_000;
        let fee = 1_000_000;
        let id = alice
            .send_transaction(SendRequest {
                destinations: vec![Destination {
                    address: bob.address(),
                    amount,
                }],
                fee,
                ..Default::default()
            })
            .await
            .unwrap();

        // All funds left the spendable pool; the change is pending.
        assert_eq!(alice.actual_balance(), 0);
        assert_eq!(alice.pending_balance(), TEST_BLOCK_REWARD - amount - fee);
        let events = drain_events(&mut alice);
        assert!(events.contains(&WalletEvent::SendTransactionCompleted {
            transaction_id: id,
            result: Ok(()),
        }));
        assert!(events.contains(&WalletEvent::PendingBalanceUpdated(
            TEST_BLOCK_REWARD - amount - fee
        )));

        let sent = alice.get_transaction(id).unwrap();
        assert_eq!(sent.total_amount, -((amount + fee) as i64));
        assert_eq!(sent.fee, fee);
        assert_eq!(sent.transfer_count, 1);
        assert_eq!(
            alice.get_transfer(sent.first_transfer_id).unwrap().amount,
            amount
        );

        // Mine the relayed transaction and mature it.
        let relayed = node.take_relayed();
        assert_eq!(relayed.len(), 1);
        let carol = AccountKeys::generate(&mut rng);
        let height = node.height();
        node.add_block(
            coinbase_to(&carol, height, TEST_BLOCK_REWARD, &mut rng),
            vec![relayed[0].prefix.clone()],
        );
        for age in 1..=10 {
            node.add_block(
                coinbase_to(&carol, height + age, TEST_BLOCK_REWARD, &mut rng),
                vec![],
            );
        }

        alice.synchronize().await.unwrap();
        bob.synchronize().await.unwrap();

        assert_eq!(bob.actual_balance(), amount);
        assert_eq!(alice.actual_balance(), TEST_BLOCK_REWARD - amount - fee);
        assert_eq!(alice.pending_balance(), 0);

        // Alice's entry confirmed in place; its id did not move.
        assert_eq!(
            alice.get_transaction(id).unwrap().block_height,
            height
        );
    }

    #[tokio::test]
    async fn test_insufficient_funds_boundary() {
        let node = MockNode::new();
        let mut rng = StdRng::seed_from_u64(20);
        let mut alice = funded_wallet(&node, 21, &mut rng).await;
        let bob = AccountKeys::generate(&mut rng);
        let bob_address = bob.address().encode(test_currency().address_prefix);

        let fee = 1_000_000;

        // Exactly the whole balance: succeeds.
        let result = alice
            .send_transaction(SendRequest {
                destinations: vec![Destination {
                    address: bob_address.clone(),
                    amount: TEST_BLOCK_REWARD - fee,
                }],
                fee,
                ..Default::default()
            })
            .await;
        assert!(result.is_ok());

        // Roll the spend back so the balance is whole again.
        let id = result.unwrap();
        alice.cancel_transaction(id).unwrap();
        assert_eq!(alice.actual_balance(), TEST_BLOCK_REWARD);

        // One unit more: rejected before any state change.
        let result = alice
            .send_transaction(SendRequest {
                destinations: vec![Destination {
                    address: bob_address,
                    amount: TEST_BLOCK_REWARD - fee + 1,
                }],
                fee,
                ..Default::default()
            })
            .await;
        assert!(matches!(
            result,
            Err(umbra_wallet::WalletError::InsufficientFunds { .. })
        ));
        assert_eq!(alice.actual_balance(), TEST_BLOCK_REWARD);
    }

    #[tokio::test]
    async fn test_validation_failures() {
        let node = MockNode::new();
        let mut rng = StdRng::seed_from_u64(30);
        let mut alice = funded_wallet(&node, 31, &mut rng).await;
        let bob = AccountKeys::generate(&mut rng);
        let bob_address = bob.address().encode(test_currency().address_prefix);

        let no_destinations = alice.send_transaction(SendRequest::default()).await;
        assert_eq!(
            no_destinations.unwrap_err(),
            umbra_wallet::WalletError::ZeroDestination
        );

        let zero_amount = alice
            .send_transaction(SendRequest {
                destinations: vec![Destination {
                    address: bob_address.clone(),
                    amount: 0,
                }],
                ..Default::default()
            })
            .await;
        assert_eq!(zero_amount.unwrap_err(), umbra_wallet::WalletError::WrongAmount);

        let bad_address = alice
            .send_transaction(SendRequest {
                destinations: vec![Destination {
                    address: "definitely not an address".into(),
                    amount: 1_000,
                }],
                ..Default::default()
            })
            .await;
        assert_eq!(bad_address.unwrap_err(), umbra_wallet::WalletError::BadAddress);

        let overflow = alice
            .send_transaction(SendRequest {
                destinations: vec![
                    Destination {
                        address: bob_address.clone(),
                        amount: u64::MAX,
                    },
                    Destination {
                        address: bob_address,
                        amount: u64::MAX,
                    },
                ],
                fee: 1,
                ..Default::default()
            })
            .await;
        assert_eq!(overflow.unwrap_err(), umbra_wallet::WalletError::SumOverflow);

        // None of the rejections touched the wallet.
        assert_eq!(alice.actual_balance(), TEST_BLOCK_REWARD);
        assert_eq!(alice.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_mixin_count_too_big() {
        let node = MockNode::new();
        let mut rng = StdRng::seed_from_u64(40);
        let mut alice = funded_wallet(&node, 41, &mut rng).await;
        let bob = AccountKeys::generate(&mut rng);

        // The node can only produce two candidates per amount.
        node.set_random_outs_override(Some(2));

        let result = alice
            .send_transaction(SendRequest {
                destinations: vec![Destination {
                    address: bob.address().encode(test_currency().address_prefix),
                    amount: 10_000_000,
                }],
                fee: 1_000_000,
                mixin: 3,
                ..Default::default()
            })
            .await;
        assert_eq!(
            result.unwrap_err(),
            umbra_wallet::WalletError::MixinCountTooBig
        );

        // The failed send left no spent marks behind.
        assert_eq!(alice.actual_balance(), TEST_BLOCK_REWARD);
        assert!(node.take_relayed().is_empty());
    }

    #[tokio::test]
    async fn test_mixed_transfer_builds_rings() {
        let node = MockNode::new();
        let mut rng = StdRng::seed_from_u64(45);
        let mut alice = funded_wallet(&node, 46, &mut rng).await;
        let bob = AccountKeys::generate(&mut rng);

        alice
            .send_transaction(SendRequest {
                destinations: vec![Destination {
                    address: bob.address().encode(test_currency().address_prefix),
                    amount: 10_000_000,
                }],
                fee: 1_000_000,
                mixin: 3,
                ..Default::default()
            })
            .await
            .unwrap();

        let relayed = node.take_relayed();
        assert_eq!(relayed.len(), 1);
        let tx = &relayed[0];
        assert_eq!(tx.signatures.len(), tx.prefix.inputs.len());
        for (input, signature) in tx.prefix.inputs.iter().zip(&tx.signatures) {
            let TxInput::Key(key_input) = input else {
                panic!("expected a key input");
            };
            // Ring of mixin + 1, sorted by global index.
            assert_eq!(key_input.ring_indices.len(), 4);
            assert!(key_input
                .ring_indices
                .windows(2)
                .all(|pair| pair[0] < pair[1]));
            assert_eq!(signature.responses.len(), 4);
            assert_eq!(&signature.key_image, &key_input.key_image);
        }
    }

    #[tokio::test]
    async fn test_relay_failure_rolls_back() {
        let node = MockNode::new();
        let mut rng = StdRng::seed_from_u64(50);
        let mut alice = funded_wallet(&node, 51, &mut rng).await;
        let bob = AccountKeys::generate(&mut rng);

        node.set_fail_relay(true);
        let result = alice
            .send_transaction(SendRequest {
                destinations: vec![Destination {
                    address: bob.address().encode(test_currency().address_prefix),
                    amount: 10_000_000,
                }],
                fee: 1_000_000,
                ..Default::default()
            })
            .await;
        assert!(matches!(
            result,
            Err(umbra_wallet::WalletError::Network(_))
        ));

        // Inputs were unspent again and the history entry failed.
        assert_eq!(alice.actual_balance(), TEST_BLOCK_REWARD);
        assert_eq!(alice.pending_balance(), 0);
        let failed = alice.get_transaction(alice.transaction_count() - 1).unwrap();
        assert_eq!(failed.state, TransactionState::Failed);

        // The wallet recovers: the same transfer works once the node does.
        node.set_fail_relay(false);
        alice
            .send_transaction(SendRequest {
                destinations: vec![Destination {
                    address: bob.address().encode(test_currency().address_prefix),
                    amount: 10_000_000,
                }],
                fee: 1_000_000,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(node.take_relayed().len(), 1);
    }
}

// ============================================================================
// Reorganizations
// ============================================================================

mod reorg {
    use super::*;

    #[tokio::test]
    async fn test_reorg_cancels_confirmed_send() {
        let node = MockNode::new();
        let mut rng = StdRng::seed_from_u64(60);
        let mut alice = funded_wallet(&node, 61, &mut rng).await;
        let bob = AccountKeys::generate(&mut rng);

        let id = alice
            .send_transaction(SendRequest {
                destinations: vec![Destination {
                    address: bob.address().encode(test_currency().address_prefix),
                    amount: 5_000_000,
                }],
                fee: 1_000_000,
                ..Default::default()
            })
            .await
            .unwrap();

        // The transfer confirms at the current tip.
        let relayed = node.take_relayed();
        let reorg_height = node.height();
        node.add_block(
            coinbase_to(&bob, reorg_height, TEST_BLOCK_REWARD, &mut rng),
            vec![relayed[0].prefix.clone()],
        );
        alice.synchronize().await.unwrap();
        assert_eq!(
            alice.get_transaction(id).unwrap().block_height,
            reorg_height
        );

        // A competing chain replaces that block.
        node.truncate(reorg_height);
        let carol = AccountKeys::generate(&mut rng);
        node.add_block(coinbase_to(&carol, reorg_height, 1, &mut rng), vec![]);
        node.add_block(coinbase_to(&carol, reorg_height + 1, 1, &mut rng), vec![]);
        alice.synchronize().await.unwrap();

        // The send is gone and the funding outputs are spendable again.
        assert_eq!(alice.actual_balance(), TEST_BLOCK_REWARD);
        assert_eq!(alice.pending_balance(), 0);
        assert_eq!(
            alice.get_transaction(id).unwrap().state,
            TransactionState::Deleted
        );
    }

    #[tokio::test]
    async fn test_reorg_removes_received_output() {
        let node = MockNode::new();
        let mut rng = StdRng::seed_from_u64(70);
        let mut wallet =
            Wallet::generate(test_currency(), Arc::clone(&node) as Arc<dyn NodeClient>)
                .with_deterministic_rng(71);
        let other = AccountKeys::generate(&mut rng);

        node.add_block(coinbase_to(&other, 0, TEST_BLOCK_REWARD, &mut rng), vec![]);
        let incoming =
            external_transfer_to(wallet.account_keys(), 7_000_000, 1_000, None, &mut rng);
        node.add_block(
            coinbase_to(&other, 1, TEST_BLOCK_REWARD, &mut rng),
            vec![incoming],
        );
        wallet.synchronize().await.unwrap();
        assert_eq!(wallet.pending_balance(), 7_000_000);

        // The fork drops the block with the incoming transfer.
        node.truncate(1);
        node.add_block(coinbase_to(&other, 1, 2, &mut rng), vec![]);
        node.add_block(coinbase_to(&other, 2, 2, &mut rng), vec![]);
        wallet.synchronize().await.unwrap();

        assert_eq!(wallet.pending_balance(), 0);
        assert_eq!(wallet.actual_balance(), 0);
    }
}

// ============================================================================
// Pool lifecycle
// ============================================================================

mod pool {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use umbra_wallet::{
        BlockchainSynchronizer, EventSink, TransactionHistory, TransfersContainer,
        UnconfirmedTransactions,
    };

    #[tokio::test]
    async fn test_pool_eviction_of_own_transfer() {
        let node = MockNode::new();
        let mut rng = StdRng::seed_from_u64(80);
        let mut alice = funded_wallet(&node, 81, &mut rng).await;
        let bob = AccountKeys::generate(&mut rng);

        let id = alice
            .send_transaction(SendRequest {
                destinations: vec![Destination {
                    address: bob.address().encode(test_currency().address_prefix),
                    amount: 5_000_000,
                }],
                fee: 1_000_000,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(alice.actual_balance(), 0);

        // The pool sees the transfer, then evicts it without mining it.
        let relayed = node.take_relayed();
        let tx_hash = relayed[0].hash();
        node.add_pool_transaction(relayed[0].prefix.clone());
        alice.synchronize().await.unwrap();

        node.remove_pool_transaction(&tx_hash);
        alice.synchronize().await.unwrap();

        assert_eq!(alice.actual_balance(), TEST_BLOCK_REWARD);
        assert_eq!(alice.pending_balance(), 0);
        assert_eq!(
            alice.get_transaction(id).unwrap().state,
            TransactionState::Deleted
        );
    }

    /// The aging sweep at synchronizer level: an entry whose send time
    /// lies beyond the pool live time is dropped and its inputs return.
    #[tokio::test]
    async fn test_unconfirmed_aging_sweep() {
        let node = MockNode::new();
        let mut rng = StdRng::seed_from_u64(90);

        let currency = test_currency();
        let keys = AccountKeys::generate(&mut rng);
        let mut container = TransfersContainer::new(currency.spendable_age);
        let mut history = TransactionHistory::new();
        let mut unconfirmed = UnconfirmedTransactions::new();
        let (events, _rx) = EventSink::channel();

        // One spendable output, spent by an in-flight transfer sent at
        // the dawn of time.
        let owner = KeyPair::generate(&mut rng);
        let image = umb_crypto::key_image(&owner.secret, &owner.public).unwrap();
        let funding = umbra_wallet::TransferOutput {
            amount: 9_000_000,
            transaction_hash: umb_crypto::hash(b"funding"),
            index_in_transaction: 0,
            global_index: 0,
            tx_public_key: KeyPair::generate(&mut rng).public,
            public_key: owner.public,
            kind: umbra_wallet::OutputKind::Key { key_image: image },
            block_height: 0,
            block_timestamp: 0,
            unlock_time: 0,
        };
        container
            .add_transaction(
                &umbra_wallet::BlockInfo {
                    height: 0,
                    timestamp: 0,
                    transaction_index: 0,
                },
                funding.transaction_hash,
                &TransactionPrefix {
                    version: 1,
                    unlock_time: 0,
                    inputs: vec![],
                    outputs: vec![TxOutput {
                        amount: 9_000_000,
                        target: TxOutputTarget::Key(owner.public),
                    }],
                    extra: vec![],
                },
                vec![funding],
            )
            .unwrap();
        container.advance_height(currency.spendable_age);

        let stale_hash = umb_crypto::hash(b"stale transfer");
        let tx_id = history
            .insert_transaction(umbra_wallet::WalletTransaction {
                state: TransactionState::Active,
                hash: stale_hash,
                total_amount: -6_000_000,
                fee: 1_000_000,
                block_height: umbra_wallet::UNCONFIRMED_HEIGHT,
                timestamp: 0,
                unlock_time: 0,
                is_coinbase: false,
                extra: vec![],
                first_transfer_id: 0,
                transfer_count: 0,
                messages: vec![],
            })
            .unwrap();
        container.mark_spent(&[image], stale_hash).unwrap();
        unconfirmed.add(
            stale_hash,
            umbra_wallet::UnconfirmedTransferDetails {
                transaction_id: tx_id,
                change: 2_000_000,
                sent_time: 1, // long past any live time
                spent_key_images: vec![image],
            },
        );
        assert_eq!(umbra_wallet::OutputState::Spent, container.output_state(&image).unwrap());

        // Chain the synchronizer to the node tip so the pool round runs.
        let other = AccountKeys::generate(&mut rng);
        node.add_block(coinbase_to(&other, 0, 1, &mut rng), vec![]);
        let mut synchronizer = BlockchainSynchronizer::new(0);
        let stopping = AtomicBool::new(false);
        let mut target = umbra_wallet::synchronizer::SyncTarget {
            keys: &keys,
            currency: &currency,
            container: &mut container,
            history: &mut history,
            unconfirmed: &mut unconfirmed,
            events: &events,
        };
        synchronizer
            .sync_chain(node.as_ref(), &mut target, &stopping)
            .await
            .unwrap();
        synchronizer
            .sync_pool(node.as_ref(), &mut target, &stopping)
            .await
            .unwrap();

        // The sweep released the inputs and marked the entry deleted.
        assert!(unconfirmed.is_empty());
        assert_eq!(
            container.output_state(&image).unwrap(),
            umbra_wallet::OutputState::Unlocked
        );
        assert_eq!(
            history.get_transaction(tx_id).unwrap().state,
            TransactionState::Deleted
        );
    }

    #[tokio::test]
    async fn test_key_image_collision_between_pool_and_chain() {
        let node = MockNode::new();
        let mut rng = StdRng::seed_from_u64(100);
        let mut wallet =
            Wallet::generate(test_currency(), Arc::clone(&node) as Arc<dyn NodeClient>)
                .with_deterministic_rng(101);
        let other = AccountKeys::generate(&mut rng);

        node.add_block(coinbase_to(&other, 0, TEST_BLOCK_REWARD, &mut rng), vec![]);
        wallet.synchronize().await.unwrap();

        // Two transactions with identical tx key and output, differing
        // only in unlock-time padding: identical key image, distinct
        // hashes.
        let pool_tx =
            external_transfer_to(wallet.account_keys(), 3_000_000, 500, None, &mut rng);
        let mut chain_tx = pool_tx.clone();
        chain_tx.inputs = vec![TxInput::Key(KeyInput {
            amount: 3_000_500,
            ring_indices: vec![1],
            key_image: {
                let foreign = KeyPair::generate(&mut rng);
                umb_crypto::key_image(&foreign.secret, &foreign.public).unwrap()
            },
        })];
        assert_ne!(pool_tx.hash(), chain_tx.hash());

        node.add_pool_transaction(pool_tx.clone());
        wallet.synchronize().await.unwrap();
        let pending_before = wallet.pending_balance();
        assert_eq!(pending_before, 3_000_000);

        // The chain confirms the double via the other transaction; the
        // pool copy hides and the balance does not double.
        node.add_block(
            coinbase_to(&other, 1, TEST_BLOCK_REWARD, &mut rng),
            vec![chain_tx.clone()],
        );
        wallet.synchronize().await.unwrap();

        assert_eq!(wallet.pending_balance(), 3_000_000);
        let confirmed_id = wallet.find_transaction_by_hash(&chain_tx.hash()).unwrap();
        assert_ne!(
            wallet.find_transaction_by_hash(&pool_tx.hash()),
            Some(confirmed_id)
        );
    }
}

// ============================================================================
// Persistence
// ============================================================================

mod persistence {
    use super::*;

    #[tokio::test]
    async fn test_full_state_survives_save_and_load() {
        let node = MockNode::new();
        let mut rng = StdRng::seed_from_u64(110);
        let mut alice = funded_wallet(&node, 111, &mut rng).await;

        let payment_id = PaymentId([0x42; 32]);
        let incoming = external_transfer_to(
            alice.account_keys(),
            2_000_000,
            100,
            Some(payment_id),
            &mut rng,
        );
        let other = AccountKeys::generate(&mut rng);
        let height = node.height();
        node.add_block(
            coinbase_to(&other, height, TEST_BLOCK_REWARD, &mut rng),
            vec![incoming],
        );
        alice.synchronize().await.unwrap();

        let bytes = alice.save(TEST_PASSWORD, true, true).unwrap();
        let mut restored = Wallet::load(
            test_currency(),
            Arc::clone(&node) as Arc<dyn NodeClient>,
            &bytes,
            TEST_PASSWORD,
        )
        .unwrap();

        assert_eq!(restored.actual_balance(), alice.actual_balance());
        assert_eq!(restored.pending_balance(), alice.pending_balance());
        assert_eq!(restored.transaction_count(), alice.transaction_count());
        assert_eq!(
            restored.get_transactions_by_payment_id(&payment_id),
            alice.get_transactions_by_payment_id(&payment_id)
        );

        // The restored wallet resumes syncing without a rescan.
        node.add_block(
            coinbase_to(&other, height + 1, TEST_BLOCK_REWARD, &mut rng),
            vec![],
        );
        restored.synchronize().await.unwrap();
    }

    #[tokio::test]
    async fn test_wallet_file_rejects_wrong_password() {
        let node = MockNode::new();
        let mut rng = StdRng::seed_from_u64(120);
        let mut alice = funded_wallet(&node, 121, &mut rng).await;

        let bytes = alice.save(TEST_PASSWORD, true, true).unwrap();
        let result = Wallet::load(
            test_currency(),
            Arc::clone(&node) as Arc<dyn NodeClient>,
            &bytes,
            "wrong password",
        );
        assert_eq!(result.unwrap_err(), umbra_wallet::WalletError::WrongPassword);
    }
}
