// Copyright (c) 2019-2025 The Umbra Project developers

//! Umbra transaction data types and wire encoding.
//!
//! The wallet engine builds, hashes and relays transactions through the
//! types in this crate. The canonical byte encoding lives in [`encoding`]
//! and is what both the prefix hash and the relay payload are computed
//! over.

pub mod amounts;
pub mod encoding;
pub mod extra;
pub mod types;
pub mod unlock;

pub use encoding::EncodingError;
pub use types::{
    KeyInput, MultisigInput, PaymentId, Transaction, TransactionPrefix, TxInput, TxOutput,
    TxOutputTarget, CURRENT_TRANSACTION_VERSION,
};
pub use unlock::{is_unlocked, UNLOCK_TIME_HEIGHT_THRESHOLD};
