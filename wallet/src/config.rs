//! Currency parameters.

use serde::{Deserialize, Serialize};

/// Chain constants the engine depends on.
///
/// Loadable from the embedder's configuration; [`Currency::default`] is
/// mainnet.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Currency {
    /// Coin ticker, used for display only.
    pub coin_name: String,

    /// Base58 address tag.
    pub address_prefix: u64,

    /// Outputs below this amount are dust: excluded from mixed selection
    /// and folded out of change.
    pub dust_threshold: u64,

    /// Confirmations before a received output becomes spendable.
    pub spendable_age: u64,

    /// Block size zone granted the full reward; bounds transaction size.
    pub block_granted_full_reward_zone: usize,

    /// Bytes reserved in a block for the miner transaction.
    pub miner_tx_blob_reserved_size: usize,

    /// Seconds an unconfirmed transaction may sit in the pool before the
    /// wallet sweeps it.
    pub mempool_tx_live_time: u64,

    /// Ring decoys used when the caller does not specify a mixin.
    pub default_mixin: u16,
}

impl Default for Currency {
    fn default() -> Self {
        Self {
            coin_name: "UMB".to_string(),
            address_prefix: 0x2e,
            dust_threshold: 1_000_000,
            spendable_age: 10,
            block_granted_full_reward_zone: 100_000,
            miner_tx_blob_reserved_size: 600,
            mempool_tx_live_time: 24 * 60 * 60,
            default_mixin: 0,
        }
    }
}

impl Currency {
    /// Largest transaction the wallet will build, in serialized bytes.
    pub fn upper_transaction_size_limit(&self) -> usize {
        self.block_granted_full_reward_zone * 125 / 100 - self.miner_tx_blob_reserved_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_limit_derivation() {
        let currency = Currency::default();
        assert_eq!(currency.upper_transaction_size_limit(), 125_000 - 600);
    }
}
