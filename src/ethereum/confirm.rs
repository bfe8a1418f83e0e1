use alloy::primitives::B256;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DeployError, Result};
use crate::ethereum::provider::RpcTransport;
use crate::ethereum::Receipt;

/// Polls for a transaction's receipt until it shows up, the deadline passes,
/// or the wait is cancelled.
///
/// A failed receipt lookup counts the same as "not mined yet": the next poll
/// simply tries again. Only the deadline ends the wait.
pub struct ConfirmationTracker<'a, R: ?Sized> {
    rpc: &'a R,
    poll_interval: Duration,
    timeout: Duration,
}

impl<'a, R: RpcTransport + ?Sized> ConfirmationTracker<'a, R> {
    pub fn new(rpc: &'a R, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            rpc,
            poll_interval,
            timeout,
        }
    }

    pub async fn wait_mined(&self, tx_hash: B256, cancel: &CancellationToken) -> Result<Receipt> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;

            let lookup = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DeployError::Cancelled { tx_hash }),
                lookup = timeout_at(deadline, self.rpc.get_receipt(tx_hash)) => lookup,
            };

            match lookup {
                Ok(Ok(Some(receipt))) => {
                    debug!(%tx_hash, attempts, "Receipt received");
                    return check_status(receipt);
                }
                Ok(Ok(None)) => debug!(%tx_hash, attempts, "Transaction not mined yet"),
                Ok(Err(e)) => warn!(%tx_hash, attempts, error = %e, "Receipt lookup failed"),
                Err(_) => debug!(%tx_hash, attempts, "Receipt lookup hit the deadline"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DeployError::ConfirmationTimeout {
                    tx_hash,
                    waited: now - started,
                });
            }

            let pause = self.poll_interval.min(deadline - now);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DeployError::Cancelled { tx_hash }),
                _ = sleep(pause) => {}
            }
        }
    }
}

fn check_status(receipt: Receipt) -> Result<Receipt> {
    if receipt.succeeded() {
        Ok(receipt)
    } else {
        Err(DeployError::TransactionReverted {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
        })
    }
}
