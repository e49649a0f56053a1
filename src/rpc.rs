//! Collaborator RPC client: holdings index, ledger read/write, inventory.
//!
//! Minimal JSON-RPC over HTTP/1.1 on a plain TCP stream, one connection
//! per call. Every call carries a bounded timeout; an expired call never
//! hangs a request. Treasury submissions are serialized behind a single
//! signer lock and fetch fresh ledger metadata immediately before
//! submission — a stale-metadata rejection surfaces as an error, it is
//! never retried with the stale metadata.

use crate::eligibility::HoldingsLookup;
use crate::error::CollabError;
use crate::payment::{LedgerRead, TransferRecord};
use crate::settlement::{InventoryLookup, LedgerWrite};
use crate::types::Identity;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

/// Response size cap. Collaborator answers are small JSON documents;
/// anything larger is a misbehaving upstream.
const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

pub struct LedgerRpc {
    endpoint: String,
    timeout: Duration,
    /// The treasury signing capability is a single shared resource;
    /// concurrent submissions risk resequencing conflicts on the ledger.
    signer_lock: Mutex<()>,
    next_id: AtomicU64,
}

impl LedgerRpc {
    pub fn new(endpoint: String, timeout_ms: u64) -> Self {
        Self {
            endpoint,
            timeout: Duration::from_millis(timeout_ms),
            signer_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, CollabError> {
        tokio::time::timeout(self.timeout, self.call_inner(method, params))
            .await
            .map_err(|_| CollabError::Timeout)?
    }

    async fn call_inner(&self, method: &str, params: Value) -> Result<Value, CollabError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        })
        .to_string();

        debug!("rpc call {} ({} bytes)", method, body.len());

        let mut stream = TcpStream::connect(&self.endpoint).await?;
        let request = format!(
            "POST / HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.endpoint,
            body.len(),
            body
        );
        stream.write_all(request.as_bytes()).await?;

        let mut raw = Vec::new();
        stream.take(MAX_RESPONSE_BYTES).read_to_end(&mut raw).await?;

        let header_end = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .ok_or_else(|| CollabError::Rpc("malformed http response".into()))?;

        let response: Value = serde_json::from_slice(&raw[header_end + 4..])
            .map_err(|e| CollabError::Rpc(format!("bad json-rpc body: {}", e)))?;

        if let Some(err) = response.get("error").filter(|e| !e.is_null()) {
            return Err(CollabError::Rpc(err.to_string()));
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    fn expect_u64(value: &Value, what: &str) -> Result<u64, CollabError> {
        value
            .as_u64()
            .ok_or_else(|| CollabError::Rpc(format!("{}: expected integer, got {}", what, value)))
    }

    fn expect_string(value: Value, what: &str) -> Result<String, CollabError> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(CollabError::Rpc(format!(
                "{}: expected string, got {}",
                what, other
            ))),
        }
    }

    /// Fresh ledger metadata for signing, fetched under the signer lock.
    async fn ledger_meta(&self) -> Result<Value, CollabError> {
        self.call("getLedgerMeta", json!({})).await
    }
}

impl HoldingsLookup for LedgerRpc {
    async fn count_qualifying_items(
        &self,
        owner: &Identity,
        collection_id: &str,
    ) -> Result<u64, CollabError> {
        let result = self
            .call(
                "countQualifyingItems",
                json!({ "owner": owner.as_str(), "collectionId": collection_id }),
            )
            .await?;
        Self::expect_u64(&result, "countQualifyingItems")
    }

    async fn token_balance(&self, owner: &Identity, token_id: &str) -> Result<u64, CollabError> {
        let result = self
            .call(
                "tokenBalance",
                json!({ "owner": owner.as_str(), "tokenId": token_id }),
            )
            .await?;
        Self::expect_u64(&result, "tokenBalance")
    }
}

impl LedgerRead for LedgerRpc {
    async fn get_transfer(&self, proof: &str) -> Result<Option<TransferRecord>, CollabError> {
        let result = self.call("getTransfer", json!({ "proof": proof })).await?;
        if result.is_null() || result.get("found").and_then(Value::as_bool) == Some(false) {
            return Ok(None);
        }
        let error = result
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string);
        let balance_deltas = result
            .get("balanceDeltas")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CollabError::Rpc(format!("getTransfer deltas: {}", e)))?
            .unwrap_or_default();
        Ok(Some(TransferRecord { error, balance_deltas }))
    }

    async fn account_balance(&self, account: &str) -> Result<u64, CollabError> {
        let result = self
            .call("accountBalance", json!({ "account": account }))
            .await?;
        Self::expect_u64(&result, "accountBalance")
    }
}

impl LedgerWrite for LedgerRpc {
    async fn submit_transfer(
        &self,
        from: &str,
        to: &Identity,
        amount: u64,
    ) -> Result<String, CollabError> {
        let _guard = self.signer_lock.lock().await;
        let meta = self.ledger_meta().await?;
        let result = self
            .call(
                "submitTransfer",
                json!({ "from": from, "to": to.as_str(), "amount": amount, "meta": meta }),
            )
            .await?;
        Self::expect_string(result, "submitTransfer")
    }

    async fn transfer_asset(
        &self,
        from: &str,
        to: &Identity,
        asset_id: &str,
    ) -> Result<String, CollabError> {
        let _guard = self.signer_lock.lock().await;
        let meta = self.ledger_meta().await?;
        let result = self
            .call(
                "transferAsset",
                json!({ "from": from, "to": to.as_str(), "assetId": asset_id, "meta": meta }),
            )
            .await?;
        Self::expect_string(result, "transferAsset")
    }
}

impl InventoryLookup for LedgerRpc {
    async fn pick_available_asset(
        &self,
        owner: &str,
        collection_id: &str,
    ) -> Result<Option<String>, CollabError> {
        let result = self
            .call(
                "pickAvailableAsset",
                json!({ "owner": owner, "collectionId": collection_id }),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        Self::expect_string(result, "pickAvailableAsset").map(Some)
    }
}
