use alloy::{
    network::ReceiptResponse,
    primitives::{Address, Bytes, B256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::{
        client::RpcClient,
        types::{TransactionReceipt, TransactionRequest},
    },
    transports::{
        http::{reqwest, Client, Http},
        RpcError, TransportError as AlloyTransportError, TransportErrorKind,
    },
};
use async_trait::async_trait;
use std::time::Duration;

use crate::error::{DeployError, Result, TransportError};
use crate::ethereum::{utils, LogEntry, Receipt, TxStatus};

/// The JSON-RPC calls the deployment pipeline needs. Each method is a single
/// request/response; retrying is up to the caller.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// `eth_getTransactionCount(address, "pending")`
    async fn get_pending_nonce(&self, address: Address) -> std::result::Result<u64, TransportError>;

    /// `eth_gasPrice`
    async fn suggest_gas_price(&self) -> std::result::Result<u128, TransportError>;

    /// `eth_chainId`
    async fn get_chain_id(&self) -> std::result::Result<u64, TransportError>;

    /// `eth_sendRawTransaction`
    async fn send_raw_transaction(&self, raw: &[u8]) -> std::result::Result<B256, TransportError>;

    /// `eth_getTransactionReceipt`; `None` while the transaction is not mined.
    async fn get_receipt(&self, tx_hash: B256)
        -> std::result::Result<Option<Receipt>, TransportError>;

    /// `eth_call` against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> std::result::Result<Bytes, TransportError>;
}

/// JSON-RPC over HTTP through alloy's root provider.
#[derive(Debug)]
pub struct HttpRpcClient {
    provider: RootProvider<Http<Client>>,
}

impl HttpRpcClient {
    pub fn new(rpc_url: &str, request_timeout: Duration) -> Result<Self> {
        let url = rpc_url
            .parse()
            .map_err(|e| DeployError::Config(format!("invalid RPC URL '{}': {}", rpc_url, e)))?;

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DeployError::Config(format!("failed to build HTTP client: {}", e)))?;

        let transport = Http::with_client(client, url);
        let provider = ProviderBuilder::new().on_client(RpcClient::new(transport, false));

        Ok(Self { provider })
    }
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    async fn get_pending_nonce(&self, address: Address) -> std::result::Result<u64, TransportError> {
        self.provider
            .get_transaction_count(address)
            .pending()
            .await
            .map_err(|e| classify_error("eth_getTransactionCount", e))
    }

    async fn suggest_gas_price(&self) -> std::result::Result<u128, TransportError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| classify_error("eth_gasPrice", e))
    }

    async fn get_chain_id(&self) -> std::result::Result<u64, TransportError> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| classify_error("eth_chainId", e))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> std::result::Result<B256, TransportError> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| classify_error("eth_sendRawTransaction", e))?;
        Ok(*pending.tx_hash())
    }

    async fn get_receipt(
        &self,
        tx_hash: B256,
    ) -> std::result::Result<Option<Receipt>, TransportError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| classify_error("eth_getTransactionReceipt", e))?;
        Ok(receipt.map(convert_receipt))
    }

    async fn call(&self, to: Address, data: Bytes) -> std::result::Result<Bytes, TransportError> {
        let request = TransactionRequest::default().to(to).input(data.into());
        self.provider
            .call(&request)
            .await
            .map_err(|e| classify_error("eth_call", e))
    }
}

fn convert_receipt(receipt: TransactionReceipt) -> Receipt {
    let logs = receipt
        .inner
        .logs()
        .iter()
        .map(|log| LogEntry {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
        })
        .collect();

    Receipt {
        status: if receipt.status() {
            TxStatus::Success
        } else {
            TxStatus::Failure
        },
        transaction_hash: receipt.transaction_hash,
        block_number: receipt.block_number.unwrap_or_default(),
        gas_used: receipt.gas_used() as u64,
        contract_address: receipt.contract_address,
        logs,
    }
}

/// Sorts an alloy transport failure into connection, timeout, malformed
/// response, or an error object returned by the node.
fn classify_error(method: &str, error: AlloyTransportError) -> TransportError {
    match error {
        RpcError::ErrorResp(payload) => TransportError::Rpc {
            method: method.to_string(),
            code: payload.code,
            message: payload.message.to_string(),
        },
        RpcError::NullResp => TransportError::malformed(method, "null response"),
        RpcError::DeserError { err, text } => {
            TransportError::malformed(method, format!("{} (body: {})", err, truncate(&text, 200)))
        }
        RpcError::SerError(e) => TransportError::malformed(method, e.to_string()),
        RpcError::Transport(kind) => classify_transport(method, kind),
        other => TransportError::malformed(method, other.to_string()),
    }
}

/// reqwest only prints the outermost error, so the HTTP client's failure is
/// classified from its flags and the full source chain is kept as the message.
fn classify_transport(method: &str, kind: TransportErrorKind) -> TransportError {
    match kind {
        TransportErrorKind::HttpError(http) => TransportError::malformed(
            method,
            format!("HTTP status {}: {}", http.status, truncate(&http.body, 200)),
        ),
        TransportErrorKind::Custom(err) => {
            let message = error_chain(err.as_ref());
            match err.downcast_ref::<reqwest::Error>() {
                Some(e) if e.is_timeout() => TransportError::Timeout {
                    method: method.to_string(),
                    message,
                },
                Some(e) if e.is_decode() || e.is_body() => {
                    TransportError::malformed(method, message)
                }
                Some(_) => connection(method, message),
                None => {
                    let lower = message.to_lowercase();
                    if lower.contains("timed out") || lower.contains("timeout") {
                        TransportError::Timeout {
                            method: method.to_string(),
                            message,
                        }
                    } else {
                        connection(method, message)
                    }
                }
            }
        }
        other => connection(method, other.to_string()),
    }
}

fn connection(method: &str, message: String) -> TransportError {
    let hint = utils::interpret_rpc_error(&message);
    let message = if hint == message {
        message
    } else {
        format!("{} ({})", message, hint)
    };
    TransportError::Connection {
        method: method.to_string(),
        message,
    }
}

fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
