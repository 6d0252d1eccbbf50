//! Engine error type with the stable wire codes.

use thiserror::Error;

use crate::container::ContainerError;
use crate::node::NodeError;

/// Errors surfaced to the embedding application.
///
/// Every variant maps to a stable `u32` code via [`WalletError::code`];
/// the codes are part of the external interface and never renumbered.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WalletError {
    #[error("wallet is not initialized")]
    NotInitialized,

    #[error("wrong password")]
    WrongPassword,

    #[error("address could not be parsed")]
    BadAddress,

    #[error("no destinations provided")]
    ZeroDestination,

    #[error("destination amount is invalid")]
    WrongAmount,

    #[error("destination amounts overflow")]
    SumOverflow,

    #[error("insufficient funds: {available} available, {required} required")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("not enough outputs on the chain for the requested ring size")]
    MixinCountTooBig,

    #[error("transaction exceeds the relay size limit")]
    TransactionSizeTooBig,

    #[error("internal wallet error: {0}")]
    Internal(String),

    #[error("operation cancelled")]
    TxCancelled,

    #[error("network error: {0}")]
    Network(String),

    #[error("key image conflict")]
    KeyImageConflict,

    #[error("transaction breaks confirmed insertion order")]
    OrderViolation,
}

impl WalletError {
    /// The stable wire code for this error.
    pub fn code(&self) -> u32 {
        match self {
            WalletError::NotInitialized => 1,
            WalletError::WrongPassword => 2,
            WalletError::BadAddress => 3,
            WalletError::ZeroDestination => 4,
            WalletError::WrongAmount => 5,
            WalletError::SumOverflow => 6,
            WalletError::InsufficientFunds { .. } => 7,
            WalletError::MixinCountTooBig => 8,
            WalletError::TransactionSizeTooBig => 9,
            WalletError::Internal(_) => 10,
            WalletError::TxCancelled => 11,
            WalletError::Network(_) => 12,
            WalletError::KeyImageConflict => 13,
            WalletError::OrderViolation => 14,
        }
    }
}

impl From<NodeError> for WalletError {
    fn from(src: NodeError) -> Self {
        WalletError::Network(src.to_string())
    }
}

impl From<ContainerError> for WalletError {
    fn from(src: ContainerError) -> Self {
        match src {
            ContainerError::OrderViolation => WalletError::OrderViolation,
            ContainerError::KeyImageConflict => WalletError::KeyImageConflict,
            other => WalletError::Internal(other.to_string()),
        }
    }
}
