use alloy::{
    consensus::{SignableTransaction, TxEnvelope},
    eips::eip2718::Encodable2718,
    network::TxSignerSync,
    primitives::{Address, Bytes, B256},
    signers::{local::PrivateKeySigner, Signer},
};
use std::fmt;
use std::str::FromStr;

use crate::error::{DeployError, Result};
use crate::ethereum::transaction::UnsignedTransaction;
use crate::ethereum::utils;

/// The single signing account of a run.
#[derive(Clone)]
pub struct Account {
    signer: PrivateKeySigner,
    chain_id: Option<u64>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.signer.address())
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

impl Account {
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let key = utils::normalize_private_key(private_key)?;
        let signer =
            PrivateKeySigner::from_str(key).map_err(|e| DeployError::InvalidKey(e.to_string()))?;
        Ok(Self {
            signer,
            chain_id: None,
        })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Binds the account to the session's chain. Rebinding to a different
    /// chain is refused.
    pub fn bind_chain(&mut self, chain_id: u64) -> Result<()> {
        match self.chain_id {
            Some(bound) if bound != chain_id => Err(DeployError::Signing(format!(
                "account is bound to chain {}, refusing to rebind to {}",
                bound, chain_id
            ))),
            _ => {
                self.chain_id = Some(chain_id);
                Ok(())
            }
        }
    }

    /// Signs `tx` as an EIP-155 legacy transaction for `chain_id`.
    pub fn sign(&self, tx: &UnsignedTransaction, chain_id: u64) -> Result<SignedTransaction> {
        if let Some(bound) = self.chain_id {
            if bound != chain_id {
                return Err(DeployError::Signing(format!(
                    "account is bound to chain {}, refusing to sign for chain {}",
                    bound, chain_id
                )));
            }
        }

        if tx.from != self.address() {
            return Err(DeployError::Signing(format!(
                "transaction is from {} but the account is {}",
                tx.from,
                self.address()
            )));
        }

        let mut legacy = tx.to_legacy(chain_id);
        let signer = self.signer.clone().with_chain_id(Some(chain_id));
        let signature = signer
            .sign_transaction_sync(&mut legacy)
            .map_err(|e| DeployError::Signing(e.to_string()))?;

        let signed = legacy.into_signed(signature);
        let hash = *signed.hash();
        let envelope = TxEnvelope::from(signed);
        let raw = envelope.encoded_2718().into();

        Ok(SignedTransaction {
            unsigned: tx.clone(),
            chain_id,
            hash,
            raw,
            envelope,
        })
    }
}

/// Address controlled by `private_key`.
pub fn derive_address(private_key: &str) -> Result<Address> {
    Account::from_private_key(private_key).map(|account| account.address())
}

#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub unsigned: UnsignedTransaction,
    pub chain_id: u64,
    hash: B256,
    raw: Bytes,
    envelope: TxEnvelope,
}

impl SignedTransaction {
    pub fn hash(&self) -> B256 {
        self.hash
    }

    /// EIP-2718 encoding for `eth_sendRawTransaction`.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// True when the signature recovers to `expected` on chain `chain_id`.
    pub fn verify(&self, expected: Address, chain_id: u64) -> bool {
        matches!(recover_sender(&self.envelope, chain_id), Ok(sender) if sender == expected)
    }
}

/// Recovers the signer of a legacy transaction as seen by chain `chain_id`.
/// A signature made for another chain recovers to an unrelated address or
/// fails outright.
pub fn recover_sender(envelope: &TxEnvelope, chain_id: u64) -> Result<Address> {
    let signed = envelope.as_legacy().ok_or_else(|| {
        DeployError::Signing("only legacy transactions are supported".to_string())
    })?;

    let mut tx = signed.tx().clone();
    tx.chain_id = Some(chain_id);

    signed
        .signature()
        .recover_address_from_prehash(&tx.signature_hash())
        .map_err(|e| DeployError::Signing(e.to_string()))
}
