//! The authoritative ledger of this wallet's spendable outputs.
//!
//! Outputs are keyed by key image and move through four states derived
//! from the chain tip, their unlock time and their spent mark:
//!
//! ```text
//! spent mark present            -> Spent
//! not in a block yet            -> Locked
//! unlock time not reached       -> Locked
//! within the spendable age      -> SoftLocked
//! otherwise                     -> Unlocked
//! ```
//!
//! Two tracked outputs can share a key image while the pool races a
//! block; the container hides such duplicates from balances and
//! selection instead of rejecting them, and re-surfaces the survivor
//! when the conflict resolves. A confirmed duplicate of a confirmed
//! output is a hard [`ContainerError::KeyImageConflict`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use umb_crypto::{Hash32, KeyImage, PublicKey};
use umb_transaction::{unlock, TransactionPrefix};

use crate::types::{UNCONFIRMED_GLOBAL_INDEX, UNCONFIRMED_HEIGHT};

/// Errors raised by container operations. None of them leave partial
/// state behind.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ContainerError {
    #[error("transaction already tracked")]
    AlreadyExists,

    #[error("transaction breaks confirmed insertion order")]
    OrderViolation,

    #[error("key image conflict")]
    KeyImageConflict,

    #[error("transaction not tracked")]
    TransactionNotFound,

    #[error("transaction is already confirmed")]
    AlreadyConfirmed,

    #[error("expected a confirmed block height")]
    InvalidHeight,

    #[error("global index count does not match the transaction's outputs")]
    IndexCountMismatch,

    #[error("no spendable output for key image")]
    OutputNotFound,

    #[error("output is already spent")]
    AlreadySpent,
}

/// Position of a transaction in the chain. `height` is
/// [`UNCONFIRMED_HEIGHT`] for pool transactions.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BlockInfo {
    pub height: u64,
    pub timestamp: u64,
    /// Position within the block; the miner transaction is 0.
    pub transaction_index: u32,
}

impl BlockInfo {
    /// Block info for a pool transaction.
    pub fn unconfirmed() -> Self {
        Self {
            height: UNCONFIRMED_HEIGHT,
            timestamp: 0,
            transaction_index: 0,
        }
    }

    /// Whether this is a confirmed chain position.
    pub fn is_confirmed(&self) -> bool {
        self.height != UNCONFIRMED_HEIGHT
    }
}

/// What kind of output this is.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OutputKind {
    /// A one-time key output, spendable with a ring signature.
    Key { key_image: KeyImage },
    /// An m-of-n multisignature output.
    Multisig { required: u8, key_count: u8 },
}

/// One output this wallet can spend.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TransferOutput {
    pub amount: u64,
    pub transaction_hash: Hash32,
    pub index_in_transaction: u32,
    /// [`UNCONFIRMED_GLOBAL_INDEX`] until confirmation assigns one.
    pub global_index: u32,
    /// The source transaction's public key, needed to re-derive the
    /// one-time secret when spending.
    pub tx_public_key: PublicKey,
    /// The one-time output key.
    pub public_key: PublicKey,
    pub kind: OutputKind,
    pub block_height: u64,
    pub block_timestamp: u64,
    pub unlock_time: u64,
}

impl TransferOutput {
    /// Key image, for key outputs.
    pub fn key_image(&self) -> Option<&KeyImage> {
        match &self.kind {
            OutputKind::Key { key_image } => Some(key_image),
            OutputKind::Multisig { .. } => None,
        }
    }

    fn is_key(&self) -> bool {
        matches!(self.kind, OutputKind::Key { .. })
    }
}

/// Why an output is unavailable: the transaction that consumed it.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SpentMark {
    pub spending_transaction_hash: Hash32,
    /// [`UNCONFIRMED_HEIGHT`] while the spend sits in the pool.
    pub spending_height: u64,
}

/// Lifecycle state of an output.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputState {
    Locked,
    SoftLocked,
    Unlocked,
    Spent,
}

bitflags! {
    /// Filter for balances and output queries: a state dimension and a
    /// type dimension. An output matches when both its state bit and its
    /// type bit are present.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct OutputMask: u16 {
        const LOCKED = 1;
        const SOFT_LOCKED = 1 << 1;
        const UNLOCKED = 1 << 2;
        const SPENT = 1 << 3;

        const KEY = 1 << 8;
        const MULTISIG = 1 << 9;

        const STATE_ALL = Self::LOCKED.bits()
            | Self::SOFT_LOCKED.bits()
            | Self::UNLOCKED.bits()
            | Self::SPENT.bits();
        const TYPE_ALL = Self::KEY.bits() | Self::MULTISIG.bits();

        /// What the sender may pick from.
        const SPENDABLE = Self::UNLOCKED.bits() | Self::KEY.bits();
    }
}

impl OutputState {
    fn flag(self) -> OutputMask {
        match self {
            OutputState::Locked => OutputMask::LOCKED,
            OutputState::SoftLocked => OutputMask::SOFT_LOCKED,
            OutputState::Unlocked => OutputMask::UNLOCKED,
            OutputState::Spent => OutputMask::SPENT,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
struct OutputRecord {
    output: TransferOutput,
    /// Hidden outputs never contribute to balances and are never
    /// selectable; duplicates of one key image hide all but one.
    visible: bool,
    spent_by: Option<SpentMark>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
struct TransactionRecord {
    block: BlockInfo,
    /// Total outputs of the source transaction, tracked or not.
    output_count: usize,
}

/// Summary returned by [`TransfersContainer::get_transaction_information`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransactionInformation {
    pub block: BlockInfo,
    pub output_count: usize,
    pub tracked_outputs: usize,
}

/// The output ledger. See the module docs for the state machine.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TransfersContainer {
    spendable_age: u64,
    current_height: u64,
    transactions: HashMap<Hash32, TransactionRecord>,
    /// (height, index in block, hash) of every confirmed transaction;
    /// insertion must be strictly increasing in (height, index).
    confirmed_order: BTreeSet<(u64, u32, Hash32)>,
    outputs: BTreeMap<u64, OutputRecord>,
    next_slot: u64,
    by_key_image: HashMap<KeyImage, Vec<u64>>,
    by_transaction: HashMap<Hash32, Vec<u64>>,
    /// Confirmed multisig outputs by (amount, global index).
    multisig_by_global: HashMap<(u64, u32), u64>,
}

/// Structural equality, used by the reorg/delete inverse laws. The slot
/// counter is an allocation detail and intentionally excluded.
impl PartialEq for TransfersContainer {
    fn eq(&self, other: &Self) -> bool {
        self.spendable_age == other.spendable_age
            && self.current_height == other.current_height
            && self.transactions == other.transactions
            && self.confirmed_order == other.confirmed_order
            && self.outputs == other.outputs
            && self.by_key_image == other.by_key_image
            && self.by_transaction == other.by_transaction
            && self.multisig_by_global == other.multisig_by_global
    }
}

impl Eq for TransfersContainer {}

fn wall_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl TransfersContainer {
    /// An empty ledger for a chain whose tip is unknown.
    pub fn new(spendable_age: u64) -> Self {
        Self {
            spendable_age,
            current_height: 0,
            transactions: HashMap::new(),
            confirmed_order: BTreeSet::new(),
            outputs: BTreeMap::new(),
            next_slot: 0,
            by_key_image: HashMap::new(),
            by_transaction: HashMap::new(),
            multisig_by_global: HashMap::new(),
        }
    }

    /// Height of the best known block.
    pub fn current_height(&self) -> u64 {
        self.current_height
    }

    /// Raise the chain tip. Returns true when the tip moved, which is
    /// when soft-locked outputs may have crossed into unlocked.
    pub fn advance_height(&mut self, height: u64) -> bool {
        if height > self.current_height {
            self.current_height = height;
            true
        } else {
            false
        }
    }

    /// Number of tracked transactions.
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// Whether `tx_hash` is tracked.
    pub fn is_tracked(&self, tx_hash: &Hash32) -> bool {
        self.transactions.contains_key(tx_hash)
    }

    /// Chain position of a tracked transaction.
    pub fn transaction_block(&self, tx_hash: &Hash32) -> Option<BlockInfo> {
        self.transactions.get(tx_hash).map(|record| record.block)
    }

    /// Summary of a tracked transaction.
    pub fn get_transaction_information(&self, tx_hash: &Hash32) -> Option<TransactionInformation> {
        let record = self.transactions.get(tx_hash)?;
        Some(TransactionInformation {
            block: record.block,
            output_count: record.output_count,
            tracked_outputs: self
                .by_transaction
                .get(tx_hash)
                .map(|slots| slots.len())
                .unwrap_or(0),
        })
    }

    fn state_of(&self, record: &OutputRecord, now: u64) -> OutputState {
        if record.spent_by.is_some() {
            OutputState::Spent
        } else if record.output.block_height == UNCONFIRMED_HEIGHT {
            OutputState::Locked
        } else if !unlock::is_unlocked(record.output.unlock_time, self.current_height, now) {
            OutputState::Locked
        } else if record.output.block_height + self.spendable_age > self.current_height {
            OutputState::SoftLocked
        } else {
            OutputState::Unlocked
        }
    }

    fn matches(&self, record: &OutputRecord, mask: OutputMask, now: u64) -> bool {
        if !record.visible {
            return false;
        }
        let type_flag = if record.output.is_key() {
            OutputMask::KEY
        } else {
            OutputMask::MULTISIG
        };
        mask.contains(type_flag) && mask.contains(self.state_of(record, now).flag())
    }

    /// Insert a transaction the synchronizer matched against this wallet.
    ///
    /// `outputs` are the outputs of `tx` addressed to this wallet, with
    /// heights and global indices already reflecting `block`. Inputs of
    /// `tx` whose key images are tracked here are marked spent. Returns
    /// whether the transaction touched the wallet at all.
    pub fn add_transaction(
        &mut self,
        block: &BlockInfo,
        tx_hash: Hash32,
        tx: &TransactionPrefix,
        outputs: Vec<TransferOutput>,
    ) -> Result<bool, ContainerError> {
        if self.transactions.contains_key(&tx_hash) {
            return Err(ContainerError::AlreadyExists);
        }
        if block.is_confirmed() {
            self.check_confirmed_order(block)?;
        }

        // Validate everything before touching state.
        for output in &outputs {
            if block.is_confirmed() {
                if output.block_height != block.height
                    || output.global_index == UNCONFIRMED_GLOBAL_INDEX
                {
                    return Err(ContainerError::InvalidHeight);
                }
            } else if output.block_height != UNCONFIRMED_HEIGHT
                || output.global_index != UNCONFIRMED_GLOBAL_INDEX
            {
                return Err(ContainerError::InvalidHeight);
            }

            match &output.kind {
                OutputKind::Key { key_image } => {
                    if block.is_confirmed() && self.has_confirmed_with_image(key_image, None) {
                        return Err(ContainerError::KeyImageConflict);
                    }
                }
                OutputKind::Multisig { .. } => {
                    if block.is_confirmed()
                        && self
                            .multisig_by_global
                            .contains_key(&(output.amount, output.global_index))
                    {
                        return Err(ContainerError::KeyImageConflict);
                    }
                }
            }
        }
        self.check_input_marks(tx, &tx_hash, block)?;

        let mut touched = !outputs.is_empty();
        let output_count = tx.outputs.len();

        for output in outputs {
            self.insert_output(tx_hash, output);
        }
        touched |= self.apply_input_marks(tx, tx_hash, block);

        if !touched {
            return Ok(false);
        }

        self.transactions.insert(
            tx_hash,
            TransactionRecord {
                block: *block,
                output_count,
            },
        );
        if block.is_confirmed() {
            self.confirmed_order
                .insert((block.height, block.transaction_index, tx_hash));
        }

        debug!(
            tx = %tx_hash,
            height = block.height,
            "transaction added to transfers container"
        );
        Ok(true)
    }

    fn check_confirmed_order(&self, block: &BlockInfo) -> Result<(), ContainerError> {
        if let Some((height, index, _)) = self.confirmed_order.iter().next_back() {
            if (block.height, block.transaction_index) <= (*height, *index) {
                return Err(ContainerError::OrderViolation);
            }
        }
        Ok(())
    }

    /// True when a confirmed output (spent or not) already carries
    /// `image`. `except` skips one slot during re-checks.
    fn has_confirmed_with_image(&self, image: &KeyImage, except: Option<u64>) -> bool {
        self.by_key_image
            .get(image)
            .into_iter()
            .flatten()
            .any(|slot| {
                Some(*slot) != except
                    && self.outputs[slot].output.block_height != UNCONFIRMED_HEIGHT
            })
    }

    /// Reject input constellations that cannot be applied atomically.
    fn check_input_marks(
        &self,
        tx: &TransactionPrefix,
        tx_hash: &Hash32,
        block: &BlockInfo,
    ) -> Result<(), ContainerError> {
        for input in &tx.inputs {
            let Some(image) = input.key_image() else {
                continue;
            };
            let Some(slot) = self.visible_slot(image) else {
                continue;
            };
            let record = &self.outputs[&slot];
            if let Some(mark) = &record.spent_by {
                if mark.spending_transaction_hash == *tx_hash {
                    continue;
                }
                // A second confirmed spend of the same image cannot
                // exist on one chain.
                if block.is_confirmed() && mark.spending_height != UNCONFIRMED_HEIGHT {
                    return Err(ContainerError::KeyImageConflict);
                }
            }
        }
        Ok(())
    }

    fn apply_input_marks(
        &mut self,
        tx: &TransactionPrefix,
        tx_hash: Hash32,
        block: &BlockInfo,
    ) -> bool {
        let mut touched = false;
        for input in &tx.inputs {
            let Some(image) = input.key_image() else {
                continue;
            };
            let Some(slot) = self.visible_slot(image) else {
                continue;
            };
            let record = self.outputs.get_mut(&slot).expect("slot exists");
            match &record.spent_by {
                None => {
                    record.spent_by = Some(SpentMark {
                        spending_transaction_hash: tx_hash,
                        spending_height: block.height,
                    });
                    touched = true;
                }
                Some(mark) if mark.spending_transaction_hash == tx_hash => {
                    record.spent_by = Some(SpentMark {
                        spending_transaction_hash: tx_hash,
                        spending_height: block.height,
                    });
                    touched = true;
                }
                Some(mark) => {
                    if block.is_confirmed() {
                        // The chain overrules a pool spender; the stale
                        // pool transaction will be evicted.
                        warn!(
                            image = %image,
                            stale = %mark.spending_transaction_hash,
                            winner = %tx_hash,
                            "confirmed spend overrides pool spend"
                        );
                        record.spent_by = Some(SpentMark {
                            spending_transaction_hash: tx_hash,
                            spending_height: block.height,
                        });
                        touched = true;
                    } else {
                        warn!(
                            image = %image,
                            kept = %mark.spending_transaction_hash,
                            ignored = %tx_hash,
                            "ignoring second pool spend of one key image"
                        );
                    }
                }
            }
        }
        touched
    }

    fn visible_slot(&self, image: &KeyImage) -> Option<u64> {
        self.by_key_image
            .get(image)
            .into_iter()
            .flatten()
            .copied()
            .find(|slot| self.outputs[slot].visible)
    }

    fn insert_output(&mut self, tx_hash: Hash32, output: TransferOutput) {
        let slot = self.next_slot;
        self.next_slot += 1;

        if let Some(image) = output.key_image() {
            self.by_key_image.entry(*image).or_default().push(slot);
        }
        if let OutputKind::Multisig { .. } = output.kind {
            if output.global_index != UNCONFIRMED_GLOBAL_INDEX {
                self.multisig_by_global
                    .insert((output.amount, output.global_index), slot);
            }
        }
        self.by_transaction.entry(tx_hash).or_default().push(slot);

        let image = output.key_image().copied();
        self.outputs.insert(
            slot,
            OutputRecord {
                output,
                visible: true,
                spent_by: None,
            },
        );
        if let Some(image) = image {
            self.refresh_visibility(&image);
        }
    }

    /// One visibility rule covers every duplicate constellation: a
    /// confirmed member wins; a lone unconfirmed member shows; two or
    /// more unconfirmed members all hide until the race resolves.
    fn refresh_visibility(&mut self, image: &KeyImage) {
        let Some(slots) = self.by_key_image.get(image).cloned() else {
            return;
        };
        let confirmed: Vec<u64> = slots
            .iter()
            .copied()
            .filter(|slot| self.outputs[slot].output.block_height != UNCONFIRMED_HEIGHT)
            .collect();

        let winner = match (confirmed.first(), slots.len()) {
            (Some(slot), _) => Some(*slot),
            (None, 1) => Some(slots[0]),
            (None, _) => None,
        };

        for slot in slots {
            let record = self.outputs.get_mut(&slot).expect("slot exists");
            record.visible = Some(slot) == winner;
        }
    }

    /// Promote an unconfirmed transaction into `block`, assigning the
    /// real global indices in output order.
    pub fn mark_transaction_confirmed(
        &mut self,
        block: &BlockInfo,
        tx_hash: &Hash32,
        global_indices: &[u32],
    ) -> Result<(), ContainerError> {
        if !block.is_confirmed() {
            return Err(ContainerError::InvalidHeight);
        }
        let record = self
            .transactions
            .get(tx_hash)
            .ok_or(ContainerError::TransactionNotFound)?;
        if record.block.is_confirmed() {
            return Err(ContainerError::AlreadyConfirmed);
        }
        if global_indices.len() != record.output_count {
            return Err(ContainerError::IndexCountMismatch);
        }
        self.check_confirmed_order(block)?;

        let slots = self
            .by_transaction
            .get(tx_hash)
            .cloned()
            .unwrap_or_default();

        // Collision re-check with the real indices, before mutating.
        for slot in &slots {
            let output = &self.outputs[slot].output;
            let global_index = global_indices[output.index_in_transaction as usize];
            match &output.kind {
                OutputKind::Key { key_image } => {
                    if self.has_confirmed_with_image(key_image, Some(*slot)) {
                        return Err(ContainerError::KeyImageConflict);
                    }
                }
                OutputKind::Multisig { .. } => {
                    if self
                        .multisig_by_global
                        .contains_key(&(output.amount, global_index))
                    {
                        return Err(ContainerError::KeyImageConflict);
                    }
                }
            }
        }

        let mut images = Vec::new();
        for slot in &slots {
            let record = self.outputs.get_mut(slot).expect("slot exists");
            let output = &mut record.output;
            output.global_index = global_indices[output.index_in_transaction as usize];
            output.block_height = block.height;
            output.block_timestamp = block.timestamp;
            if let Some(image) = output.key_image() {
                images.push(*image);
            } else {
                self.multisig_by_global
                    .insert((output.amount, output.global_index), *slot);
            }
        }
        for image in images {
            self.refresh_visibility(&image);
        }

        // Spends this transaction performed are confirmed with it.
        for record in self.outputs.values_mut() {
            if let Some(mark) = &mut record.spent_by {
                if mark.spending_transaction_hash == *tx_hash {
                    mark.spending_height = block.height;
                }
            }
        }

        let record = self.transactions.get_mut(tx_hash).expect("checked above");
        record.block = *block;
        self.confirmed_order
            .insert((block.height, block.transaction_index, *tx_hash));

        debug!(tx = %tx_hash, height = block.height, "transaction confirmed");
        Ok(())
    }

    /// Drop an unconfirmed transaction: its outputs disappear and the
    /// inputs it had marked spent become spendable again.
    pub fn delete_unconfirmed_transaction(
        &mut self,
        tx_hash: &Hash32,
    ) -> Result<(), ContainerError> {
        let record = self
            .transactions
            .get(tx_hash)
            .ok_or(ContainerError::TransactionNotFound)?;
        if record.block.is_confirmed() {
            return Err(ContainerError::AlreadyConfirmed);
        }

        self.transactions.remove(tx_hash);
        let images = self.remove_transaction_outputs(tx_hash);

        for record in self.outputs.values_mut() {
            if let Some(mark) = &record.spent_by {
                if mark.spending_transaction_hash == *tx_hash {
                    record.spent_by = None;
                }
            }
        }
        for image in images {
            self.refresh_visibility(&image);
        }

        debug!(tx = %tx_hash, "unconfirmed transaction deleted");
        Ok(())
    }

    fn remove_transaction_outputs(&mut self, tx_hash: &Hash32) -> Vec<KeyImage> {
        let mut images = Vec::new();
        let Some(slots) = self.by_transaction.remove(tx_hash) else {
            return images;
        };
        for slot in slots {
            let Some(record) = self.outputs.remove(&slot) else {
                continue;
            };
            match record.output.kind {
                OutputKind::Key { key_image } => {
                    if let Some(list) = self.by_key_image.get_mut(&key_image) {
                        list.retain(|s| *s != slot);
                        if list.is_empty() {
                            self.by_key_image.remove(&key_image);
                        } else {
                            images.push(key_image);
                        }
                    }
                }
                OutputKind::Multisig { .. } => {
                    self.multisig_by_global
                        .remove(&(record.output.amount, record.output.global_index));
                }
            }
        }
        images
    }

    /// Truncate the confirmed ledger at `height`: every transaction with
    /// `block_height >= height` is removed along with its outputs, and
    /// spent marks made by removed transactions are cleared. Unconfirmed
    /// transactions survive. Returns the removed hashes.
    pub fn detach(&mut self, height: u64) -> Vec<Hash32> {
        let removed: Vec<(u64, u32, Hash32)> = self
            .confirmed_order
            .range((height, 0, Hash32::ZERO)..)
            .cloned()
            .collect();

        let mut removed_hashes = Vec::with_capacity(removed.len());
        let mut images = Vec::new();
        for entry in removed {
            self.confirmed_order.remove(&entry);
            let (_, _, tx_hash) = entry;
            self.transactions.remove(&tx_hash);
            images.extend(self.remove_transaction_outputs(&tx_hash));
            removed_hashes.push(tx_hash);
        }

        for record in self.outputs.values_mut() {
            if let Some(mark) = &record.spent_by {
                if mark.spending_height != UNCONFIRMED_HEIGHT && mark.spending_height >= height {
                    record.spent_by = None;
                }
            }
        }
        for image in images {
            self.refresh_visibility(&image);
        }

        self.current_height = self.current_height.min(height.saturating_sub(1));

        if !removed_hashes.is_empty() {
            debug!(height, removed = removed_hashes.len(), "container detached");
        }
        removed_hashes
    }

    /// Mark outputs spent by an in-flight local transaction. All-or-
    /// nothing: if any image is unknown or already spent, nothing is
    /// marked.
    pub fn mark_spent(
        &mut self,
        images: &[KeyImage],
        spending_tx: Hash32,
    ) -> Result<(), ContainerError> {
        let mut slots = Vec::with_capacity(images.len());
        for image in images {
            let slot = self
                .visible_slot(image)
                .ok_or(ContainerError::OutputNotFound)?;
            if self.outputs[&slot].spent_by.is_some() {
                return Err(ContainerError::AlreadySpent);
            }
            slots.push(slot);
        }
        for slot in slots {
            self.outputs.get_mut(&slot).expect("slot exists").spent_by = Some(SpentMark {
                spending_transaction_hash: spending_tx,
                spending_height: UNCONFIRMED_HEIGHT,
            });
        }
        Ok(())
    }

    /// Undo [`TransfersContainer::mark_spent`] for marks made under
    /// `spending_tx`.
    pub fn unmark_spent(&mut self, images: &[KeyImage], spending_tx: &Hash32) {
        for image in images {
            let Some(slot) = self.visible_slot(image) else {
                continue;
            };
            let record = self.outputs.get_mut(&slot).expect("slot exists");
            if let Some(mark) = &record.spent_by {
                if mark.spending_transaction_hash == *spending_tx {
                    record.spent_by = None;
                }
            }
        }
    }

    /// Whether a visible output carries `image`.
    pub fn is_tracked_key_image(&self, image: &KeyImage) -> bool {
        self.visible_slot(image).is_some()
    }

    /// The visible output for `image`.
    pub fn find_output(&self, image: &KeyImage) -> Option<&TransferOutput> {
        self.visible_slot(image)
            .map(|slot| &self.outputs[&slot].output)
    }

    /// Current state of the visible output for `image`.
    pub fn output_state(&self, image: &KeyImage) -> Option<OutputState> {
        let now = wall_clock();
        self.visible_slot(image)
            .map(|slot| self.state_of(&self.outputs[&slot], now))
    }

    /// Sum of visible output amounts matching `mask`.
    pub fn balance(&self, mask: OutputMask) -> u64 {
        let now = wall_clock();
        self.outputs
            .values()
            .filter(|record| self.matches(record, mask, now))
            .map(|record| record.output.amount)
            .sum()
    }

    /// Visible outputs matching `mask`, in insertion order.
    pub fn get_outputs(&self, mask: OutputMask) -> Vec<TransferOutput> {
        let now = wall_clock();
        self.outputs
            .values()
            .filter(|record| self.matches(record, mask, now))
            .map(|record| record.output.clone())
            .collect()
    }

    /// Visible outputs of one transaction matching `mask`.
    pub fn get_transaction_outputs(&self, tx_hash: &Hash32, mask: OutputMask) -> Vec<TransferOutput> {
        let now = wall_clock();
        let Some(slots) = self.by_transaction.get(tx_hash) else {
            return Vec::new();
        };
        slots
            .iter()
            .filter_map(|slot| self.outputs.get(slot))
            .filter(|record| self.matches(record, mask, now))
            .map(|record| record.output.clone())
            .collect()
    }

    /// Every visible spent output with its mark.
    pub fn get_spent_outputs(&self) -> Vec<(TransferOutput, SpentMark)> {
        self.outputs
            .values()
            .filter(|record| record.visible)
            .filter_map(|record| {
                record
                    .spent_by
                    .map(|mark| (record.output.clone(), mark))
            })
            .collect()
    }
}
