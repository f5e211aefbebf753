use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aegis_core::audit::{PollState, RiskVerdict};
use aegis_core::calldata::CommitProtocol;
use aegis_core::error::AuditError;
use aegis_core::rpc::TransactionReceipt;
use aegis_core::rpc_client::ChainRpcClient;
use aegis_core::wait::CancelSignal;
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::streamer::AuditStreamer;

/// Write access to the receiving contract.
#[async_trait]
pub trait ChainWriter: Send + Sync {
    async fn submit(&self, calldata: Vec<u8>) -> Result<B256, AuditError>;
    async fn receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>, AuditError>;
}

/// Sends from a node-managed account.
pub struct JsonRpcWriter {
    client: ChainRpcClient,
    from: Address,
    to: Address,
}

impl JsonRpcWriter {
    pub fn new(client: ChainRpcClient, from: Address, to: Address) -> Self {
        Self { client, from, to }
    }
}

#[async_trait]
impl ChainWriter for JsonRpcWriter {
    async fn submit(&self, calldata: Vec<u8>) -> Result<B256, AuditError> {
        self.client.send_transaction(self.from, self.to, calldata).await
    }

    async fn receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>, AuditError> {
        self.client.transaction_receipt(hash).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub hash: B256,
    pub block_number: Option<u64>,
}

/// Encodes verdicts for the chain and submits each trade id at most once.
///
/// A trade id is released again when nothing took effect on chain: the
/// submit failed or the mined transaction reverted. A submitted transaction
/// that is still unconfirmed at timeout or cancellation keeps its trade id
/// reserved, since it may yet be mined.
pub struct VerdictCommitter {
    writer: Arc<dyn ChainWriter>,
    protocol: CommitProtocol,
    committed: Mutex<HashSet<U256>>,
    confirm_attempts: u32,
    confirm_interval: Duration,
}

impl VerdictCommitter {
    pub fn new(writer: Arc<dyn ChainWriter>, protocol: CommitProtocol, confirm_attempts: u32) -> Self {
        Self {
            writer,
            protocol,
            committed: Mutex::new(HashSet::new()),
            confirm_attempts,
            confirm_interval: Duration::from_secs(1),
        }
    }

    pub fn with_confirm_interval(mut self, interval: Duration) -> Self {
        self.confirm_interval = interval;
        self
    }

    pub fn is_committed(&self, trade_id: U256) -> bool {
        self.committed
            .lock()
            .map(|set| set.contains(&trade_id))
            .unwrap_or(false)
    }

    pub async fn commit(
        &self,
        verdict: &RiskVerdict,
        streamer: &AuditStreamer,
        cancel: &CancelSignal,
    ) -> Result<CommitReceipt, AuditError> {
        if !verdict.is_committable() {
            return Err(AuditError::pipeline(format!(
                "refusing to commit error verdict for trade {}",
                verdict.trade_id
            )));
        }
        if cancel.is_cancelled() {
            return Err(AuditError::Cancelled {
                operation: "verdict commit".to_string(),
            });
        }
        self.reserve(verdict.trade_id)?;

        let calldata = self.protocol.encode(verdict.trade_id, verdict.risk_score);
        let hash = match self.writer.submit(calldata).await {
            Ok(hash) => hash,
            Err(err) => {
                // Nothing reached the chain; the trade id may be committed later.
                self.release(verdict.trade_id);
                return Err(err);
            }
        };
        let hash_hex = hash.to_string();
        info!(trade_id = %verdict.trade_id, risk_score = verdict.risk_score, tx = %hash_hex, "verdict submitted");
        streamer.transaction_submitted(&hash_hex);

        let mut poll = PollState::new(
            self.confirm_attempts,
            u64::try_from(self.confirm_interval.as_millis()).unwrap_or(u64::MAX),
        );
        while poll.begin_attempt() {
            match self.writer.receipt(hash).await {
                Ok(Some(receipt)) => {
                    let block_number = receipt.block_number.map(|n| n.to::<u64>());
                    let success = receipt.succeeded();
                    streamer.transaction_confirmed(&hash_hex, block_number, success);
                    if !success {
                        self.release(verdict.trade_id);
                        return Err(AuditError::upstream(
                            "receiving-contract",
                            0,
                            format!("verdict transaction {hash_hex} reverted"),
                        ));
                    }
                    return Ok(CommitReceipt { hash, block_number });
                }
                Ok(None) => debug!(tx = %hash_hex, attempt = poll.attempts, "receipt pending"),
                Err(err) => warn!(tx = %hash_hex, error = %err, "receipt lookup failed"),
            }
            if poll.is_exhausted() {
                break;
            }
            cancel.sleep(poll.interval()).await.map_err(|_| AuditError::Cancelled {
                operation: "verdict confirmation".to_string(),
            })?;
        }

        Err(AuditError::Timeout {
            operation: format!("confirmation of {hash_hex}"),
            attempts: poll.attempts,
        })
    }

    fn reserve(&self, trade_id: U256) -> Result<(), AuditError> {
        let mut committed = self
            .committed
            .lock()
            .map_err(|_| AuditError::pipeline("commit ledger poisoned"))?;
        if !committed.insert(trade_id) {
            return Err(AuditError::DuplicateCommit { trade_id });
        }
        Ok(())
    }

    fn release(&self, trade_id: U256) {
        if let Ok(mut committed) = self.committed.lock() {
            committed.remove(&trade_id);
        }
    }
}

/// In-memory chain that mines every transaction after a fixed number of receipt polls.
pub struct RecordingWriter {
    sent: Mutex<Vec<Vec<u8>>>,
    pending_polls: u32,
    polls: Mutex<u32>,
    /// Mined receipts still to report as reverted.
    reverts: Mutex<u32>,
}

impl RecordingWriter {
    pub fn new(pending_polls: u32) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            pending_polls,
            polls: Mutex::new(0),
            reverts: Mutex::new(0),
        }
    }

    /// Report the next `count` mined transactions as reverted.
    pub fn reverting(self, count: u32) -> Self {
        Self {
            reverts: Mutex::new(count),
            ..self
        }
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChainWriter for RecordingWriter {
    async fn submit(&self, calldata: Vec<u8>) -> Result<B256, AuditError> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| AuditError::pipeline("recording writer poisoned"))?;
        sent.push(calldata);
        Ok(B256::with_last_byte(u8::try_from(sent.len()).unwrap_or(u8::MAX)))
    }

    async fn receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>, AuditError> {
        let mut polls = self
            .polls
            .lock()
            .map_err(|_| AuditError::pipeline("recording writer poisoned"))?;
        *polls += 1;
        if *polls <= self.pending_polls {
            return Ok(None);
        }
        let mut reverts = self
            .reverts
            .lock()
            .map_err(|_| AuditError::pipeline("recording writer poisoned"))?;
        let reverted = *reverts > 0;
        *reverts = reverts.saturating_sub(1);
        Ok(Some(TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(alloy_primitives::U64::from(100)),
            status: Some(alloy_primitives::U64::from(u8::from(!reverted))),
        }))
    }
}
