//! Umbra Wallet Transfer Engine
//!
//! Tracks the outputs an account can spend by synchronizing against a
//! remote node, maintains the locked/unlocked/spent lifecycle of each
//! output across reorganizations and mempool churn, and constructs,
//! signs and relays new ring-signature transfers.
//!
//! ## Layering
//!
//! - [`container`]: the authoritative ledger of this wallet's outputs
//! - [`unconfirmed`]: in-flight outgoing transfers
//! - [`sender`]: builds, signs and relays transfers
//! - [`synchronizer`]: drives the container and history from node queries
//! - [`history`]: the user-visible transaction log and payment-id index
//! - [`wallet`]: the facade an application embeds
//!
//! The engine is designed for a current-thread async runtime: every node
//! call is a suspension point and no two engine operations interleave
//! between suspension points.

pub mod account;
pub mod config;
pub mod container;
pub mod events;
pub mod history;
pub mod legacy;
pub mod node;
pub mod sender;
pub mod storage;
pub mod synchronizer;
pub mod types;
pub mod unconfirmed;
pub mod wallet;

mod error;

pub use account::{AccountKeys, Address};
pub use config::Currency;
pub use container::{
    BlockInfo, ContainerError, OutputKind, OutputMask, OutputState, SpentMark, TransferOutput,
    TransfersContainer,
};
pub use error::WalletError;
pub use events::{EventSink, WalletEvent};
pub use history::TransactionHistory;
pub use node::{
    BlockData, BlockShortEntry, NodeClient, NodeError, PoolDifference, RandomOutEntry,
    RandomOuts, TransactionShortInfo,
};
pub use sender::{Destination, DustPolicy, SendRequest, TransactionMessage, TransferSender};
pub use synchronizer::BlockchainSynchronizer;
pub use types::{
    Transfer, TransactionId, TransactionState, TransferId, WalletTransaction,
    INVALID_TRANSACTION_ID, INVALID_TRANSFER_ID, UNCONFIRMED_GLOBAL_INDEX, UNCONFIRMED_HEIGHT,
};
pub use unconfirmed::{UnconfirmedTransactions, UnconfirmedTransferDetails};
pub use wallet::Wallet;
