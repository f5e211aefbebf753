use aegis_core::calldata::{
    CLEARANCE_DENIED_SIGNATURE, CLEARANCE_UPDATED_SIGNATURE, WORD_LEN, address_topic, event_topic,
};
use aegis_core::error::AuditError;
use aegis_core::rpc::{LogFilter, RpcLog};
use aegis_core::rpc_client::ChainRpcClient;
use alloy_primitives::{Address, U256};
use async_trait::async_trait;

use crate::poller::ClearanceLogSource;

/// Reads the receiving contract's clearance events over `eth_getLogs`.
pub struct RpcClearanceLogs {
    client: ChainRpcClient,
    module: Address,
}

impl RpcClearanceLogs {
    pub fn new(client: ChainRpcClient, module: Address) -> Self {
        Self { client, module }
    }

    async fn logs(&self, signature: &str, token: Address, from_block: u64) -> Result<Vec<RpcLog>, AuditError> {
        let filter = LogFilter::from_block(
            self.module,
            vec![Some(event_topic(signature)), Some(address_topic(token))],
            from_block,
        );
        self.client.get_logs(&filter).await
    }
}

#[async_trait]
impl ClearanceLogSource for RpcClearanceLogs {
    async fn approved(&self, token: Address, from_block: u64) -> Result<bool, AuditError> {
        Ok(!self
            .logs(CLEARANCE_UPDATED_SIGNATURE, token, from_block)
            .await?
            .is_empty())
    }

    async fn denied(&self, token: Address, from_block: u64) -> Result<Option<U256>, AuditError> {
        let logs = self.logs(CLEARANCE_DENIED_SIGNATURE, token, from_block).await?;
        logs.first().map(denied_risk_score).transpose()
    }
}

/// The denial's only non-indexed field is the uint256 risk score.
fn denied_risk_score(log: &RpcLog) -> Result<U256, AuditError> {
    let word = log.data.get(..WORD_LEN).ok_or_else(|| {
        AuditError::upstream(
            "json-rpc",
            200,
            format!("ClearanceDenied data is {} bytes", log.data.len()),
        )
    })?;
    Ok(U256::from_be_slice(word))
}
