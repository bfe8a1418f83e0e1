//! Sequences deployment and the optional post-deployment check of the
//! DataStorage contract.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::EthereumConfig;
use crate::error::{DeployError, Result};
use crate::ethereum::{
    artifact::ContractArtifact,
    codec::AbiCodec,
    confirm::ConfirmationTracker,
    provider::RpcTransport,
    signer::Account,
    storage::{DataItem, DataStorage, SaveOverload},
    transaction::{NonceTracker, TransactionBuilder},
    utils, Receipt,
};

#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub gas_limit: u64,
    pub test_gas_limit: u64,
    pub poll_interval: Duration,
    pub confirmation_timeout: Duration,
}

impl From<&EthereumConfig> for DeploySettings {
    fn from(config: &EthereumConfig) -> Self {
        Self {
            gas_limit: config.gas_limit,
            test_gas_limit: config.test_gas_limit,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            confirmation_timeout: Duration::from_secs(config.confirmation_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentOutcome {
    pub contract_address: Address,
    pub deployer: Address,
    pub transaction_hash: B256,
    pub nonce: u64,
    pub block_number: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestOutcome {
    pub overload: SaveOverload,
    pub transaction_hash: B256,
    pub nonce: u64,
    pub block_number: u64,
    pub gas_used: u64,
    pub logged: DataItem,
    pub stored: DataItem,
}

/// Result of the optional test phase. A failure here never undoes the
/// deployment that preceded it.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TestReport {
    Passed(TestOutcome),
    Failed { category: String, error: String },
}

impl TestReport {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Passed(_))
    }
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub chain_id: u64,
    pub deployment: DeploymentOutcome,
    pub test: Option<TestReport>,
    /// `data()` as read after the last transaction of the run.
    pub final_state: Option<DataItem>,
}

/// Receipt plus what was submitted to get it.
struct Submitted {
    nonce: u64,
    gas_price: u128,
    receipt: Receipt,
}

pub struct Deployer<R> {
    rpc: R,
    account: Account,
    chain_id: u64,
    settings: DeploySettings,
    nonces: NonceTracker,
    cancel: CancellationToken,
}

impl<R: RpcTransport> Deployer<R> {
    /// Establishes the session: the endpoint's chain id must equal the
    /// configured one, and the account is bound to it.
    pub async fn connect(
        rpc: R,
        mut account: Account,
        configured_chain_id: u64,
        settings: DeploySettings,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let reported = rpc.get_chain_id().await?;
        if reported != configured_chain_id {
            return Err(DeployError::ChainMismatch {
                configured: configured_chain_id,
                reported,
            });
        }
        account.bind_chain(reported)?;
        info!(chain_id = reported, account = %account.address(), "Connected to endpoint");

        Ok(Self {
            rpc,
            account,
            chain_id: reported,
            settings,
            nonces: NonceTracker::new(),
            cancel,
        })
    }

    /// Deploys, then runs the test phase when `test` is given.
    pub async fn run(
        &mut self,
        artifact: &ContractArtifact,
        test: Option<(DataItem, SaveOverload)>,
    ) -> Result<RunReport> {
        let deployment = self.deploy(artifact).await?;

        let test = match test {
            Some((item, overload)) => {
                info!("Running contract test");
                let outcome = match DataStorage::new(artifact.abi.clone()) {
                    Ok(storage) => {
                        self.exercise(&storage, deployment.contract_address, &item, overload)
                            .await
                    }
                    Err(e) => Err(e),
                };
                Some(match outcome {
                    Ok(outcome) => TestReport::Passed(outcome),
                    Err(e) => {
                        error!(category = e.category(), "Contract test failed: {}", e);
                        TestReport::Failed {
                            category: e.category().to_string(),
                            error: e.to_string(),
                        }
                    }
                })
            }
            None => None,
        };

        let final_state = match DataStorage::new(artifact.abi.clone()) {
            Ok(storage) => match self.read_state(&storage, deployment.contract_address).await {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!("Could not read final contract state: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("Could not read final contract state: {}", e);
                None
            }
        };

        Ok(RunReport {
            chain_id: self.chain_id,
            deployment,
            test,
            final_state,
        })
    }

    pub async fn deploy(&mut self, artifact: &ContractArtifact) -> Result<DeploymentOutcome> {
        if artifact.bytecode.is_empty() {
            return Err(DeployError::ArtifactInvalid {
                path: format!("{}.bin", artifact.name).into(),
                reason: "empty bytecode".to_string(),
            });
        }

        let codec = AbiCodec::new(artifact.abi.clone());
        let data = codec.encode_deploy(&artifact.bytecode, &[])?;

        info!(contract = %artifact.name, "Deploying contract");
        let submitted = self
            .submit(None, data, self.settings.gas_limit, "deployment")
            .await?;
        let receipt = &submitted.receipt;

        let contract_address =
            receipt
                .contract_address
                .ok_or(DeployError::MissingContractAddress {
                    tx_hash: receipt.transaction_hash,
                })?;

        info!(
            address = %contract_address,
            gas_used = receipt.gas_used,
            block_number = receipt.block_number,
            "Contract deployed successfully"
        );

        Ok(DeploymentOutcome {
            contract_address,
            deployer: self.account.address(),
            transaction_hash: receipt.transaction_hash,
            nonce: submitted.nonce,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            gas_limit: self.settings.gas_limit,
            gas_price: submitted.gas_price,
        })
    }

    /// Calls `save` through `overload`, then checks that the emitted
    /// `DataSaved` event and a fresh `data()` read agree.
    pub async fn exercise(
        &mut self,
        storage: &DataStorage,
        contract: Address,
        item: &DataItem,
        overload: SaveOverload,
    ) -> Result<TestOutcome> {
        info!(
            key = %item.key,
            field = %item.field,
            value = %item.value,
            function = overload.signature(),
            "Calling save"
        );

        let data = storage.encode_save(item, overload)?;
        let submitted = self
            .submit(Some(contract), data, self.settings.test_gas_limit, "save")
            .await?;
        let receipt = submitted.receipt;
        info!("Save function called successfully");

        let mut events = storage.data_saved_events(&receipt, contract)?;
        for event in &events {
            info!(key = %event.key, field = %event.field, value = %event.value, "DataSaved log");
        }
        if events.len() != 1 {
            return Err(DeployError::decode(
                "DataSaved logs",
                format!(
                    "expected exactly one from {}, found {}",
                    contract,
                    events.len()
                ),
            ));
        }
        let logged = events.remove(0);

        let stored = self.read_state(storage, contract).await?;
        info!(key = %stored.key, field = %stored.field, value = %stored.value, "Retrieved data");

        if logged != stored {
            return Err(DeployError::StateMismatch { logged, stored });
        }

        Ok(TestOutcome {
            overload,
            transaction_hash: receipt.transaction_hash,
            nonce: submitted.nonce,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            logged,
            stored,
        })
    }

    /// Reads the contract's current item through `data()`.
    pub async fn read_state(&self, storage: &DataStorage, contract: Address) -> Result<DataItem> {
        let call = storage.encode_data_call()?;
        let output = self.rpc.call(contract, call).await?;
        storage.decode_data(&output)
    }

    /// Builds, signs and submits one transaction, then waits for its receipt.
    async fn submit(
        &mut self,
        to: Option<Address>,
        data: Bytes,
        gas_limit: u64,
        label: &str,
    ) -> Result<Submitted> {
        let from = self.account.address();

        let pending = self.rpc.get_pending_nonce(from).await?;
        let last = self.nonces.last();
        let nonce = self.nonces.peek(pending);
        if nonce != pending {
            warn!(pending, ?last, nonce, "Endpoint reports a stale nonce, continuing from last used");
        }

        let gas_price = self.rpc.suggest_gas_price().await?;
        info!(
            gas_price = %utils::format_gwei(gas_price),
            gas_limit,
            nonce,
            "Prepared {} transaction",
            label
        );

        let mut builder = TransactionBuilder::new(from)
            .nonce(nonce)
            .input(data)
            .value(U256::ZERO)
            .gas_limit(gas_limit)
            .gas_price(Some(gas_price));
        if let Some(to) = to {
            builder = builder.to(to);
        }
        let tx = builder.build()?;

        let signed = self.account.sign(&tx, self.chain_id)?;
        if !signed.verify(from, signed.chain_id) {
            return Err(DeployError::Signing(format!(
                "signature does not recover to {} on chain {}",
                from, signed.chain_id
            )));
        }
        let tx_hash = self.rpc.send_raw_transaction(signed.raw()).await.map_err(|e| {
            error!(
                "Failed to submit {} transaction: {}",
                label,
                utils::interpret_rpc_error(&e.to_string())
            );
            e
        })?;
        self.nonces.commit(nonce);
        if tx_hash != signed.hash() {
            warn!(local = %signed.hash(), remote = %tx_hash, "Endpoint returned a different hash");
        }

        info!(tx_hash = %tx_hash, "Transaction sent");
        if signed.unsigned.is_creation() {
            info!(address = %from.create(nonce), "Expected contract address");
        }

        info!("Waiting for transaction confirmation");
        let tracker = ConfirmationTracker::new(
            &self.rpc,
            self.settings.poll_interval,
            self.settings.confirmation_timeout,
        );
        let receipt = tracker.wait_mined(tx_hash, &self.cancel).await?;

        Ok(Submitted {
            nonce,
            gas_price,
            receipt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::mock::{MockBehavior, MockChain};
    use crate::ethereum::storage::tests::DATA_STORAGE_ABI;

    const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const CHAIN_ID: u64 = 31337;

    fn artifact() -> ContractArtifact {
        ContractArtifact {
            name: "DataStorage".to_string(),
            bytecode: Bytes::from(vec![0x60, 0x01, 0x60, 0x01, 0x55]),
            abi: serde_json::from_str(DATA_STORAGE_ABI).unwrap(),
        }
    }

    fn settings() -> DeploySettings {
        DeploySettings {
            gas_limit: 3_000_000,
            test_gas_limit: 300_000,
            poll_interval: Duration::from_millis(5),
            confirmation_timeout: Duration::from_secs(5),
        }
    }

    async fn deployer(chain: MockChain) -> Deployer<MockChain> {
        let account = Account::from_private_key(KEY).unwrap();
        Deployer::connect(chain, account, CHAIN_ID, settings(), CancellationToken::new())
            .await
            .unwrap()
    }

    fn sample_item() -> DataItem {
        DataItem::new("user1", "email", "a@example.com")
    }

    #[tokio::test]
    async fn test_end_to_end_deploy_and_save() {
        let mut deployer = deployer(MockChain::new(CHAIN_ID)).await;
        let report = deployer
            .run(&artifact(), Some((sample_item(), SaveOverload::Fields)))
            .await
            .unwrap();

        let sender = deployer.account.address();
        assert_eq!(report.chain_id, CHAIN_ID);
        assert_eq!(report.deployment.contract_address, sender.create(0));
        assert_eq!(report.deployment.deployer, sender);
        assert_eq!(report.deployment.gas_price, 2_000_000_000);

        match report.test {
            Some(TestReport::Passed(outcome)) => {
                assert_eq!(outcome.logged, sample_item());
                assert_eq!(outcome.stored, sample_item());
                assert_eq!(outcome.nonce, 1);
            }
            other => panic!("unexpected test report: {:?}", other),
        }

        let submitted = deployer.rpc.submitted();
        assert_eq!(submitted.len(), 2);
        assert!(submitted.iter().all(|tx| tx.sender == sender));
        assert_eq!(submitted[0].to, None);
        assert_eq!(submitted[0].gas_limit, 3_000_000);
        assert_eq!(submitted[1].to, Some(report.deployment.contract_address));
        assert_eq!(submitted[1].gas_limit, 300_000);
        assert_eq!(
            deployer.rpc.stored(report.deployment.contract_address),
            Some(sample_item())
        );
    }

    #[tokio::test]
    async fn test_overloads_produce_identical_state() {
        let mut by_fields = deployer(MockChain::new(CHAIN_ID)).await;
        let mut by_item = deployer(MockChain::new(CHAIN_ID)).await;

        let fields = by_fields
            .run(&artifact(), Some((sample_item(), SaveOverload::Fields)))
            .await
            .unwrap();
        let item = by_item
            .run(&artifact(), Some((sample_item(), SaveOverload::Item)))
            .await
            .unwrap();
        assert!(fields.test.as_ref().unwrap().passed());
        assert!(item.test.as_ref().unwrap().passed());

        let fields_call = &by_fields.rpc.submitted()[1].input;
        let item_call = &by_item.rpc.submitted()[1].input;
        assert_ne!(fields_call[..4], item_call[..4]);

        assert_eq!(
            by_fields.rpc.stored(fields.deployment.contract_address),
            by_item.rpc.stored(item.deployment.contract_address)
        );
    }

    #[tokio::test]
    async fn test_nonces_never_repeat_with_stale_endpoint() {
        let chain = MockChain::new(CHAIN_ID).with_behavior(MockBehavior {
            stale_nonce: true,
            ..Default::default()
        });
        let mut deployer = deployer(chain).await;

        let report = deployer
            .run(&artifact(), Some((sample_item(), SaveOverload::Fields)))
            .await
            .unwrap();
        assert!(report.test.unwrap().passed());

        let nonces: Vec<u64> = deployer.rpc.submitted().iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_rejected_submission_does_not_skip_a_nonce() {
        let mut deployer = deployer(MockChain::new(CHAIN_ID)).await;
        let deployment = deployer.deploy(&artifact()).await.unwrap();
        let storage = DataStorage::new(artifact().abi).unwrap();

        deployer.rpc.reject_next_send();
        let err = deployer
            .exercise(&storage, deployment.contract_address, &sample_item(), SaveOverload::Fields)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "TransportError");

        let outcome = deployer
            .exercise(&storage, deployment.contract_address, &sample_item(), SaveOverload::Fields)
            .await
            .unwrap();
        assert_eq!(outcome.nonce, 1);
        assert_eq!(outcome.stored, sample_item());

        let nonces: Vec<u64> = deployer.rpc.submitted().iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_chain_mismatch_is_rejected() {
        let account = Account::from_private_key(KEY).unwrap();
        let result = Deployer::connect(
            MockChain::new(1),
            account,
            CHAIN_ID,
            settings(),
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            result,
            Err(DeployError::ChainMismatch {
                configured: CHAIN_ID,
                reported: 1
            })
        ));
    }

    #[tokio::test]
    async fn test_reverted_deployment_is_fatal() {
        let chain = MockChain::new(CHAIN_ID).with_behavior(MockBehavior {
            revert_all: true,
            ..Default::default()
        });
        let mut deployer = deployer(chain).await;

        let err = deployer
            .run(&artifact(), Some((sample_item(), SaveOverload::Fields)))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::TransactionReverted { .. }));
        assert_eq!(deployer.rpc.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_test_phase_keeps_deployment() {
        let chain = MockChain::new(CHAIN_ID).with_behavior(MockBehavior {
            revert_calls: true,
            ..Default::default()
        });
        let mut deployer = deployer(chain).await;

        let report = deployer
            .run(&artifact(), Some((sample_item(), SaveOverload::Fields)))
            .await
            .unwrap();

        assert_eq!(
            report.deployment.contract_address,
            deployer.account.address().create(0)
        );
        match report.test {
            Some(TestReport::Failed { category, .. }) => {
                assert_eq!(category, "TransactionReverted")
            }
            other => panic!("unexpected test report: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_decoy_logs_from_other_addresses_are_ignored() {
        let chain = MockChain::new(CHAIN_ID).with_behavior(MockBehavior {
            decoy_logs: true,
            ..Default::default()
        });
        let mut deployer = deployer(chain).await;

        let report = deployer
            .run(&artifact(), Some((sample_item(), SaveOverload::Item)))
            .await
            .unwrap();
        match report.test {
            Some(TestReport::Passed(outcome)) => assert_eq!(outcome.logged, sample_item()),
            other => panic!("unexpected test report: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_state_mismatch_is_reported() {
        let chain = MockChain::new(CHAIN_ID).with_behavior(MockBehavior {
            corrupt_storage: true,
            ..Default::default()
        });
        let mut deployer = deployer(chain).await;

        let report = deployer
            .run(&artifact(), Some((sample_item(), SaveOverload::Fields)))
            .await
            .unwrap();
        match report.test {
            Some(TestReport::Failed { category, error }) => {
                assert_eq!(category, "TransactionReverted");
                assert!(error.contains("disagrees with DataSaved"));
                assert!(error.contains("corrupted"));
            }
            other => panic!("unexpected test report: {:?}", other),
        }
        assert_eq!(report.final_state.unwrap().value, "corrupted");
    }

    #[tokio::test]
    async fn test_missing_gas_price_aborts_before_signing() {
        let chain = MockChain::new(CHAIN_ID).with_behavior(MockBehavior {
            gas_price_unavailable: true,
            ..Default::default()
        });
        let mut deployer = deployer(chain).await;

        let err = deployer.deploy(&artifact()).await.unwrap_err();
        assert_eq!(err.category(), "TransportError");
        assert!(deployer.rpc.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_without_test_phase() {
        let mut deployer = deployer(MockChain::new(CHAIN_ID)).await;
        let report = deployer.run(&artifact(), None).await.unwrap();
        assert!(report.test.is_none());
        assert_eq!(report.final_state, Some(DataItem::new("", "", "")));

        let storage = DataStorage::new(artifact().abi).unwrap();
        let state = deployer
            .read_state(&storage, report.deployment.contract_address)
            .await
            .unwrap();
        assert_eq!(state, DataItem::new("", "", ""));
    }

    #[tokio::test]
    async fn test_unrecognized_abi_still_reports_deployment() {
        let mut deployer = deployer(MockChain::new(CHAIN_ID)).await;
        let mut artifact = artifact();
        artifact.abi = serde_json::from_str("[]").unwrap();

        let report = deployer.run(&artifact, None).await.unwrap();
        assert!(report.test.is_none());
        assert_eq!(report.final_state, None);
        assert_eq!(deployer.rpc.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_report_serializes() {
        let mut deployer = deployer(MockChain::new(CHAIN_ID)).await;
        let report = deployer
            .run(&artifact(), Some((sample_item(), SaveOverload::Item)))
            .await
            .unwrap();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["chain_id"], CHAIN_ID);
        assert_eq!(json["test"]["status"], "passed");
        assert_eq!(json["test"]["overload"], "item");
        assert_eq!(json["test"]["stored"]["value"], "a@example.com");
    }
}
