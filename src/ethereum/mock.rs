//! In-memory ledger behind [`RpcTransport`] for tests.
//!
//! It accepts raw EIP-155 legacy transactions, checks chain id and nonce the
//! way a node does, and runs a tiny DataStorage contract: creation deploys an
//! empty store, either `save` overload replaces the stored item and emits
//! `DataSaved`, and `data()` returns the current item through `eth_call`.

use alloy::{
    consensus::TxEnvelope,
    eips::eip2718::Decodable2718,
    primitives::{Address, Bytes, TxKind, B256},
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::TransportError;
use crate::ethereum::provider::RpcTransport;
use crate::ethereum::signer;
use crate::ethereum::storage::{tests::data_storage, DataItem, DataStorage};
use crate::ethereum::{LogEntry, Receipt, TxStatus};

#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Receipt lookups answered with "not mined" before the receipt appears.
    pub mine_after_polls: u32,
    pub never_mine: bool,
    /// Every transaction is mined with a failure status.
    pub revert_all: bool,
    /// Only calls to deployed contracts fail.
    pub revert_calls: bool,
    /// Receipt lookups that fail with a transport error first.
    pub failing_receipt_polls: u32,
    /// `eth_getTransactionCount` always answers zero.
    pub stale_nonce: bool,
    pub gas_price_unavailable: bool,
    /// A foreign contract logs a decoy `DataSaved` in every `save` receipt.
    pub decoy_logs: bool,
    /// The stored item differs from the emitted event.
    pub corrupt_storage: bool,
}

#[derive(Debug, Clone)]
pub struct SubmittedTx {
    pub sender: Address,
    pub nonce: u64,
    pub to: Option<Address>,
    pub input: Bytes,
    pub gas_limit: u64,
}

#[derive(Debug, Default)]
struct MockState {
    nonces: HashMap<Address, u64>,
    receipts: HashMap<B256, (u32, Receipt)>,
    contracts: HashMap<Address, Option<DataItem>>,
    submitted: Vec<SubmittedTx>,
    block_number: u64,
    receipt_polls: u32,
    failing_polls_left: u32,
    rejected_sends_left: u32,
}

pub struct MockChain {
    chain_id: u64,
    gas_price: u128,
    behavior: MockBehavior,
    storage: DataStorage,
    state: Mutex<MockState>,
}

const DECOY: Address = Address::repeat_byte(0xde);

impl MockChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            gas_price: 2_000_000_000,
            behavior: MockBehavior::default(),
            storage: data_storage(),
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_behavior(mut self, behavior: MockBehavior) -> Self {
        self.lock().failing_polls_left = behavior.failing_receipt_polls;
        self.behavior = behavior;
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn receipt_polls(&self) -> u32 {
        self.lock().receipt_polls
    }

    pub fn submitted(&self) -> Vec<SubmittedTx> {
        self.lock().submitted.clone()
    }

    /// The next `eth_sendRawTransaction` is refused before it touches the nonce.
    pub fn reject_next_send(&self) {
        self.lock().rejected_sends_left += 1;
    }

    pub fn stored(&self, contract: Address) -> Option<DataItem> {
        self.lock().contracts.get(&contract).cloned().flatten()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn reject(message: &str) -> TransportError {
        TransportError::rpc("eth_sendRawTransaction", -32000, message)
    }

    fn execute(
        &self,
        state: &mut MockState,
        sender: Address,
        nonce: u64,
        kind: TxKind,
        input: &Bytes,
    ) -> (TxStatus, Option<Address>, Vec<LogEntry>) {
        if self.behavior.revert_all {
            return (TxStatus::Failure, None, Vec::new());
        }

        match kind {
            TxKind::Create => {
                let contract = sender.create(nonce);
                state.contracts.insert(contract, None);
                (TxStatus::Success, Some(contract), Vec::new())
            }
            TxKind::Call(to) if state.contracts.contains_key(&to) => {
                if self.behavior.revert_calls {
                    return (TxStatus::Failure, None, Vec::new());
                }
                let item = match self.storage.decode_save_call(input) {
                    Ok(Some(item)) => item,
                    _ => return (TxStatus::Failure, None, Vec::new()),
                };

                let mut logs = Vec::new();
                if self.behavior.decoy_logs {
                    let decoy = DataItem::new("decoy", "decoy", "decoy");
                    logs.push(self.storage.data_saved_log(DECOY, &decoy).unwrap());
                }
                logs.push(self.storage.data_saved_log(to, &item).unwrap());

                let stored = if self.behavior.corrupt_storage {
                    DataItem::new(item.key.clone(), item.field.clone(), "corrupted")
                } else {
                    item
                };
                state.contracts.insert(to, Some(stored));
                (TxStatus::Success, None, logs)
            }
            TxKind::Call(_) => (TxStatus::Success, None, Vec::new()),
        }
    }
}

#[async_trait]
impl RpcTransport for MockChain {
    async fn get_pending_nonce(&self, address: Address) -> Result<u64, TransportError> {
        if self.behavior.stale_nonce {
            return Ok(0);
        }
        Ok(self.lock().nonces.get(&address).copied().unwrap_or(0))
    }

    async fn suggest_gas_price(&self) -> Result<u128, TransportError> {
        if self.behavior.gas_price_unavailable {
            return Err(TransportError::rpc(
                "eth_gasPrice",
                -32601,
                "the method eth_gasPrice does not exist/is not available",
            ));
        }
        Ok(self.gas_price)
    }

    async fn get_chain_id(&self) -> Result<u64, TransportError> {
        Ok(self.chain_id)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, TransportError> {
        let envelope = TxEnvelope::decode_2718(&mut &raw[..])
            .map_err(|e| Self::reject(&format!("rlp: {}", e)))?;
        let signed = envelope
            .as_legacy()
            .ok_or_else(|| Self::reject("transaction type not supported"))?;
        let tx = signed.tx();

        if tx.chain_id != Some(self.chain_id) {
            return Err(Self::reject("invalid chain id for signer"));
        }
        let sender = signer::recover_sender(&envelope, self.chain_id)
            .map_err(|_| Self::reject("invalid sender"))?;

        let mut state = self.lock();
        if state.rejected_sends_left > 0 {
            state.rejected_sends_left -= 1;
            return Err(Self::reject("insufficient funds for gas * price + value"));
        }

        let expected = state.nonces.get(&sender).copied().unwrap_or(0);
        if tx.nonce < expected {
            return Err(Self::reject(&format!(
                "nonce too low: next nonce {}, tx nonce {}",
                expected, tx.nonce
            )));
        }
        if tx.nonce > expected {
            return Err(Self::reject(&format!(
                "nonce too high: next nonce {}, tx nonce {}",
                expected, tx.nonce
            )));
        }
        state.nonces.insert(sender, expected + 1);

        let (status, contract_address, logs) =
            self.execute(&mut state, sender, tx.nonce, tx.to, &tx.input);
        state.block_number += 1;

        let tx_hash = *signed.hash();
        let receipt = Receipt {
            status,
            transaction_hash: tx_hash,
            block_number: state.block_number,
            gas_used: 21_000 + 16 * tx.input.len() as u64,
            contract_address,
            logs,
        };
        state
            .receipts
            .insert(tx_hash, (self.behavior.mine_after_polls, receipt));
        state.submitted.push(SubmittedTx {
            sender,
            nonce: tx.nonce,
            to: tx.to.to().copied(),
            input: tx.input.clone(),
            gas_limit: tx.gas_limit,
        });

        Ok(tx_hash)
    }

    async fn get_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, TransportError> {
        let mut state = self.lock();
        state.receipt_polls += 1;

        if state.failing_polls_left > 0 {
            state.failing_polls_left -= 1;
            return Err(TransportError::Connection {
                method: "eth_getTransactionReceipt".to_string(),
                message: "connection reset by peer".to_string(),
            });
        }

        if self.behavior.never_mine {
            return Ok(None);
        }

        match state.receipts.get_mut(&tx_hash) {
            Some((polls_left, _)) if *polls_left > 0 => {
                *polls_left -= 1;
                Ok(None)
            }
            Some((_, receipt)) => Ok(Some(receipt.clone())),
            None => Ok(None),
        }
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, TransportError> {
        let state = self.lock();
        let stored = state
            .contracts
            .get(&to)
            .ok_or_else(|| TransportError::rpc("eth_call", 3, "execution reverted"))?;

        let getter = self.storage.encode_data_call().unwrap_or_default();
        if data != getter {
            return Err(TransportError::rpc("eth_call", 3, "execution reverted"));
        }

        let item = stored.clone().unwrap_or_else(|| DataItem::new("", "", ""));
        let values = alloy::dyn_abi::DynSolValue::Tuple(item.to_values());
        Ok(values.abi_encode_params().into())
    }
}
