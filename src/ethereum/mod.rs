pub mod artifact;
pub mod codec;
pub mod confirm;
#[cfg(test)]
pub mod mock;
pub mod provider;
pub mod signer;
pub mod storage;
pub mod transaction;
pub mod utils;

use alloy::primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Success,
    Failure,
}

/// A raw event log as it appears in a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub status: TxStatus,
    pub transaction_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
    pub contract_address: Option<Address>,
    pub logs: Vec<LogEntry>,
}

impl Receipt {
    pub fn succeeded(&self) -> bool {
        self.status == TxStatus::Success
    }

    /// Logs emitted by `address`, in receipt order.
    pub fn logs_from(&self, address: Address) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter().filter(move |log| log.address == address)
    }
}
