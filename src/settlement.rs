//! Settlement dispatch: execute a drawn outcome against the ledger.
//!
//! State machine per accepted open:
//! `Drawn -> Dispatching -> Settled | Degraded | Failed`.
//! Degrade-to-nothing is terminal; a degraded draw is never redrawn.

use crate::error::{CollabError, EngineError};
use crate::types::{Identity, PrizeOutcome, SettlementResult, SettlementStatus};
use tracing::{info, warn};

/// Ledger write access. The implementor owns the treasury signing
/// capability: submissions must be serialized per signer and carry fresh
/// ledger metadata fetched immediately before signing (see `rpc`).
pub trait LedgerWrite {
    /// Submit a currency transfer, returning its settlement reference.
    fn submit_transfer(
        &self,
        from: &str,
        to: &Identity,
        amount: u64,
    ) -> impl Future<Output = Result<String, CollabError>> + Send;

    /// Transfer a single inventory asset, returning its settlement
    /// reference.
    fn transfer_asset(
        &self,
        from: &str,
        to: &Identity,
        asset_id: &str,
    ) -> impl Future<Output = Result<String, CollabError>> + Send;
}

/// Treasury inventory access.
pub trait InventoryLookup {
    /// Pick one available asset of the target collection held by `owner`,
    /// or `None` when the inventory is empty.
    fn pick_available_asset(
        &self,
        owner: &str,
        collection_id: &str,
    ) -> impl Future<Output = Result<Option<String>, CollabError>> + Send;
}

pub struct SettlementDispatcher {
    treasury: String,
    collection_id: String,
}

impl SettlementDispatcher {
    pub fn new(treasury: String, collection_id: String) -> Self {
        Self { treasury, collection_id }
    }

    /// Execute `outcome` for `participant`. Exactly one terminal state is
    /// produced; submission errors surface as `SettlementFailed` with no
    /// silent retry.
    pub async fn settle<C: LedgerWrite + InventoryLookup>(
        &self,
        client: &C,
        participant: &Identity,
        outcome: PrizeOutcome,
    ) -> Result<SettlementResult, EngineError> {
        match outcome {
            PrizeOutcome::Nothing => Ok(SettlementResult {
                status: SettlementStatus::Settled,
                outcome: PrizeOutcome::Nothing,
                settlement_ref: None,
                asset_id: None,
            }),

            PrizeOutcome::Currency { amount, label } => {
                let settlement_ref = client
                    .submit_transfer(&self.treasury, participant, amount)
                    .await
                    .map_err(|e| EngineError::SettlementFailed {
                        reason: format!("currency transfer: {}", e),
                    })?;
                info!(
                    "settled currency {} {} -> {} ref {}",
                    amount, label, participant, settlement_ref
                );
                Ok(SettlementResult {
                    status: SettlementStatus::Settled,
                    outcome: PrizeOutcome::Currency { amount, label },
                    settlement_ref: Some(settlement_ref),
                    asset_id: None,
                })
            }

            PrizeOutcome::Asset { label } => {
                let picked = client
                    .pick_available_asset(&self.treasury, &self.collection_id)
                    .await
                    .map_err(|e| EngineError::SettlementFailed {
                        reason: format!("inventory lookup: {}", e),
                    })?;

                let Some(asset_id) = picked else {
                    // Empty inventory: degrade to Nothing. Terminal, no
                    // transfer attempted, no second draw.
                    warn!(
                        "inventory empty for {} — degrading {} draw for {}",
                        self.collection_id, label, participant
                    );
                    return Ok(SettlementResult {
                        status: SettlementStatus::Degraded,
                        outcome: PrizeOutcome::Nothing,
                        settlement_ref: None,
                        asset_id: None,
                    });
                };

                let settlement_ref = client
                    .transfer_asset(&self.treasury, participant, &asset_id)
                    .await
                    .map_err(|e| EngineError::SettlementFailed {
                        reason: format!("asset transfer: {}", e),
                    })?;
                info!(
                    "settled asset {} ({}) -> {} ref {}",
                    asset_id, label, participant, settlement_ref
                );
                Ok(SettlementResult {
                    status: SettlementStatus::Settled,
                    outcome: PrizeOutcome::Asset { label },
                    settlement_ref: Some(settlement_ref),
                    asset_id: Some(asset_id),
                })
            }
        }
    }
}
