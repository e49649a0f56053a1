//! Process configuration: one explicit context object, constructed at
//! startup and passed by reference into every component. No ambient or
//! static access.

use crate::error::EngineError;
use crate::types::{
    DEFAULT_COOLDOWN_SECS, DEFAULT_PROOF_TTL_SECS, Identity, WeightedOutcome,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One fungible-token threshold that grants Holder standing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenThreshold {
    pub token_id: String,
    pub minimum: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Network label reported by /health (e.g. "mainnet", "devnet").
    pub network: String,

    /// HTTP listen address, e.g. "0.0.0.0:8080".
    pub listen_addr: String,

    /// Directory for the sled store.
    pub data_dir: PathBuf,

    /// Treasury account: receives fees, pays out rewards, owns inventory.
    pub treasury: String,

    /// Fee charged per open, in base units of `fee_label`.
    pub fee_amount: u64,
    pub fee_label: String,

    /// Collection whose items grant Holder / SuperHolder standing.
    pub collection_id: String,

    /// Fungible-token thresholds that also grant Holder standing.
    #[serde(default)]
    pub token_thresholds: Vec<TokenThreshold>,

    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    #[serde(default = "default_proof_ttl")]
    pub proof_ttl_secs: u64,

    /// Collaborator RPC endpoint, "host:port".
    pub rpc_endpoint: String,

    /// Bound on every external call. A timed-out call surfaces as a
    /// failure; it never hangs the request.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,

    /// Prize table: relative weights, renormalized at load.
    pub prizes: Vec<WeightedOutcome>,
}

fn default_cooldown() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

fn default_proof_ttl() -> u64 {
    DEFAULT_PROOF_TTL_SECS
}

fn default_rpc_timeout() -> u64 {
    10_000
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::Config(format!("read config: {}", e)))?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Config(format!("parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if Identity::parse(&self.treasury).is_none() {
            return Err(EngineError::Config("invalid treasury account".into()));
        }
        if self.fee_amount == 0 {
            return Err(EngineError::Config("fee_amount must be positive".into()));
        }
        if self.cooldown_secs == 0 {
            return Err(EngineError::Config("cooldown_secs must be positive".into()));
        }
        if self.prizes.is_empty() {
            return Err(EngineError::Config("prize table is empty".into()));
        }
        Ok(())
    }
}
