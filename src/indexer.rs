//! Balance of a lock script, read from the CKB node's indexer RPC.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::{address::OnChainAddress, error::IndexerError, poller::BalanceSource, types::U256};

/// Timeout of a single indexer request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<CellsCapacity>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct CellsCapacity {
    capacity: String,
}

fn parse_capacity(s: &str) -> Result<U256, IndexerError> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| IndexerError::Malformed(format!("capacity {s:?}")))?;
    u64::from_str_radix(digits, 16)
        .map(U256::from)
        .map_err(|e| IndexerError::Malformed(format!("capacity {s:?}: {e}")))
}

/// Sums the capacity of all live cells locked by an address.
#[derive(Debug, Clone)]
pub struct CkbIndexerSource {
    url: String,
    http: reqwest::Client,
}

impl CkbIndexerSource {
    /// `url` of the node's JSON-RPC endpoint, like `http://127.0.0.1:8114`.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.to_string(),
            http,
        })
    }

    pub async fn cells_capacity(&self, address: &OnChainAddress) -> Result<U256, IndexerError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "get_cells_capacity",
            "params": [{
                "script": address.lock_script(),
                "script_type": "lock",
            }],
        });

        let response: RpcResponse = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(RpcError { code, message }) = response.error {
            debug!(code, %message, "indexer rpc error");
            return Err(IndexerError::Rpc { code, message });
        }
        // The indexer answers null for a script it has never seen.
        match response.result {
            Some(CellsCapacity { capacity }) => parse_capacity(&capacity),
            None => Ok(U256::zero()),
        }
    }
}

#[async_trait]
impl BalanceSource for CkbIndexerSource {
    type Error = IndexerError;

    async fn balance(&self, address: &OnChainAddress) -> Result<U256, IndexerError> {
        self.cells_capacity(address).await
    }
}
