use alloy::{
    consensus::TxLegacy,
    primitives::{Address, Bytes, TxKind, U256},
};

use crate::error::{DeployError, Result};

/// A transaction ready to be signed. Built fresh for every submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub from: Address,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub value: U256,
    /// `None` creates a contract.
    pub to: Option<Address>,
    pub data: Bytes,
}

impl UnsignedTransaction {
    pub fn is_creation(&self) -> bool {
        self.to.is_none()
    }

    pub fn kind(&self) -> TxKind {
        match self.to {
            Some(to) => TxKind::Call(to),
            None => TxKind::Create,
        }
    }

    /// EIP-155 legacy form bound to `chain_id`.
    pub fn to_legacy(&self, chain_id: u64) -> TxLegacy {
        TxLegacy {
            chain_id: Some(chain_id),
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: self.kind(),
            value: self.value,
            input: self.data.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    from: Address,
    nonce: Option<u64>,
    to: Option<Address>,
    data: Bytes,
    value: U256,
    gas_limit: u64,
    gas_price: Option<u128>,
}

impl TransactionBuilder {
    pub fn new(from: Address) -> Self {
        Self {
            from,
            nonce: None,
            to: None,
            data: Bytes::new(),
            value: U256::ZERO,
            gas_limit: 0,
            gas_price: None,
        }
    }

    /// Pending transaction count fetched for `from` right before building.
    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    pub fn input(mut self, data: Bytes) -> Self {
        self.data = data;
        self
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn gas_price(mut self, gas_price: Option<u128>) -> Self {
        self.gas_price = gas_price;
        self
    }

    pub fn build(self) -> Result<UnsignedTransaction> {
        let nonce = self.nonce.ok_or_else(|| {
            DeployError::InsufficientParameters("nonce was not fetched".to_string())
        })?;

        if self.gas_limit == 0 {
            return Err(DeployError::InsufficientParameters(
                "gas limit must be greater than zero".to_string(),
            ));
        }

        let gas_price = self.gas_price.ok_or_else(|| {
            DeployError::InsufficientParameters("no gas price available".to_string())
        })?;

        if self.to.is_none() && self.data.is_empty() {
            return Err(DeployError::InsufficientParameters(
                "contract creation without bytecode".to_string(),
            ));
        }

        Ok(UnsignedTransaction {
            from: self.from,
            nonce,
            gas_limit: self.gas_limit,
            gas_price,
            value: self.value,
            to: self.to,
            data: self.data,
        })
    }
}

/// Hands out nonces for one account during one run.
///
/// The endpoint's pending count is authoritative, except that a nonce is never
/// used twice: if the endpoint lags behind what this run already submitted,
/// the next nonce continues from the last one accepted. A nonce only counts as
/// used once the endpoint has accepted the transaction carrying it.
#[derive(Debug, Default)]
pub struct NonceTracker {
    last: Option<u64>,
}

impl NonceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nonce for the next transaction given the endpoint's pending count.
    pub fn peek(&self, pending: u64) -> u64 {
        match self.last {
            Some(last) if pending <= last => last + 1,
            _ => pending,
        }
    }

    /// Records `nonce` as accepted by the endpoint.
    pub fn commit(&mut self, nonce: u64) {
        self.last = Some(self.last.map_or(nonce, |last| last.max(nonce)));
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }
}
