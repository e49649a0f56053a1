//! End-to-end open flow: admission, draw, settlement.
//!
//! Ordering is fixed. Cheap checks run first (eligibility, then the atomic
//! quota reserve), the payment proof is claimed before anything is drawn
//! (a draw only ever happens for a paid request), and settlement runs
//! last. Failures before settlement release both the quota reservation and
//! the proof claim; the settlement-failure path is asymmetric by policy
//! (see DESIGN.md).

use crate::config::Config;
use crate::eligibility::{EligibilityResolver, HoldingsLookup};
use crate::error::EngineError;
use crate::payment::{self, LedgerRead};
use crate::settlement::{InventoryLookup, LedgerWrite, SettlementDispatcher};
use crate::store::{ReservedOpen, Storage};
use crate::types::{
    EligibilitySnapshot, Identity, MAX_PROOF_LEN, OpenQuota, SettlementResult, Tier, now,
};
use crate::weights::{WeightTable, draw_variate};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Everything the engine needs from the outside world. One RPC client
/// typically implements all four collaborator seams.
pub trait LedgerClient:
    HoldingsLookup + LedgerRead + LedgerWrite + InventoryLookup + Send + Sync
{
}

impl<T> LedgerClient for T where
    T: HoldingsLookup + LedgerRead + LedgerWrite + InventoryLookup + Send + Sync
{
}

/// Outcome of one accepted open, returned to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenReceipt {
    #[serde(flatten)]
    pub settlement: SettlementResult,
    pub payment: PaymentSummary,
    pub opens: OpenQuota,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSummary {
    pub proof: String,
    pub amount_received: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedPayment {
    /// Opaque hex-encoded payment intent for the participant to sign.
    pub unsigned_payment_payload: String,
    pub fee_amount: u64,
    pub treasury_address: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub network: String,
    pub treasury: String,
    pub treasury_balance: u64,
}

pub struct OpenBoxEngine<C> {
    config: Arc<Config>,
    store: Storage,
    table: WeightTable,
    resolver: EligibilityResolver,
    dispatcher: SettlementDispatcher,
    client: C,
}

impl<C: LedgerClient> OpenBoxEngine<C> {
    pub fn new(config: Arc<Config>, store: Storage, client: C) -> Result<Self, EngineError> {
        let table = WeightTable::new(config.prizes.clone())?;
        let resolver = EligibilityResolver::new(
            config.collection_id.clone(),
            config.token_thresholds.clone(),
        );
        let dispatcher =
            SettlementDispatcher::new(config.treasury.clone(), config.collection_id.clone());
        Ok(Self { config, store, table, resolver, dispatcher, client })
    }

    pub fn store(&self) -> &Storage {
        &self.store
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Liveness plus a live treasury balance probe.
    pub async fn health(&self) -> Result<HealthReport, EngineError> {
        let treasury_balance = self
            .client
            .account_balance(&self.config.treasury)
            .await
            .map_err(|e| EngineError::upstream(format!("balance probe: {}", e)))?;
        Ok(HealthReport {
            network: self.config.network.clone(),
            treasury: self.config.treasury.clone(),
            treasury_balance,
        })
    }

    /// Read-only standing and quota view.
    pub async fn eligibility(
        &self,
        owner_raw: &str,
    ) -> Result<(EligibilitySnapshot, OpenQuota), EngineError> {
        let owner = parse_identity(owner_raw)?;
        let snapshot = self.resolver.resolve(&self.client, &owner).await;
        let quota = self.store.evaluate(&owner, snapshot.tier.open_limit(), now())?;
        Ok((snapshot, quota))
    }

    /// Build the unsigned fee-payment intent for an eligible participant.
    /// Rejects when standing or quota would reject the open itself.
    pub async fn prepare_payment(&self, owner_raw: &str) -> Result<PreparedPayment, EngineError> {
        let owner = parse_identity(owner_raw)?;
        let snapshot = self.resolver.resolve(&self.client, &owner).await;
        if snapshot.tier == Tier::None {
            return Err(EngineError::AccessDenied);
        }
        let quota = self.store.evaluate(&owner, snapshot.tier.open_limit(), now())?;
        if quota.remaining == 0 {
            return Err(EngineError::QuotaExceeded {
                cooldown_remaining: quota.cooldown_remaining,
            });
        }

        let intent = serde_json::json!({
            "from": owner.as_str(),
            "to": self.config.treasury,
            "amount": self.config.fee_amount,
            "label": self.config.fee_label,
            "memo": "open-box-fee",
        });
        let payload = hex::encode(intent.to_string().as_bytes());

        Ok(PreparedPayment {
            unsigned_payment_payload: payload,
            fee_amount: self.config.fee_amount,
            treasury_address: self.config.treasury.clone(),
        })
    }

    /// The core flow: admission -> draw -> settlement, exactly once per
    /// payment proof.
    pub async fn open(&self, owner_raw: &str, proof_raw: &str) -> Result<OpenReceipt, EngineError> {
        let owner = parse_identity(owner_raw)?;
        let proof = parse_proof(proof_raw)?;

        // Standing first: cheapest external check, no side effects.
        let snapshot = self.resolver.resolve(&self.client, &owner).await;
        if snapshot.tier == Tier::None {
            return Err(EngineError::AccessDenied);
        }

        // Atomic quota reserve. This charges the slot up front; every
        // failure path before settlement hands it back.
        let opened_at = now();
        let reservation = match self
            .store
            .reserve_open(&owner, snapshot.tier.open_limit(), opened_at)?
        {
            Ok(reservation) => reservation,
            Err(quota) => {
                return Err(EngineError::QuotaExceeded {
                    cooldown_remaining: quota.cooldown_remaining,
                });
            }
        };

        // Claim the proof before verification so two concurrent requests
        // citing the same proof cannot both pass the (idempotent, slow)
        // ledger check.
        match self.store.claim_proof(&proof, opened_at) {
            Ok(true) => {}
            Ok(false) => {
                self.release(&reservation, None);
                return Err(EngineError::ProofReplayed);
            }
            Err(e) => {
                self.release(&reservation, None);
                return Err(e);
            }
        }

        let payment = match payment::verify(
            &self.client,
            &proof,
            &owner,
            &self.config.treasury,
            self.config.fee_amount,
        )
        .await
        {
            Ok(payment) => payment,
            Err(e) => {
                // Invalid or unverifiable proof: release the claim so the
                // participant can retry, and hand back the quota slot.
                self.release(&reservation, Some(&proof));
                return Err(e);
            }
        };

        // Paid request: draw.
        let variate = draw_variate();
        let drawn = self.table.draw(variate).clone();
        info!("draw for {}: {:?} (variate {:.6})", owner, drawn, variate);

        match self.dispatcher.settle(&self.client, &owner, drawn.clone()).await {
            Ok(settlement) => {
                info!(
                    "open settled for {}: {:?} ref {:?}",
                    owner, settlement.status, settlement.settlement_ref
                );
                // Fresh timestamp: entries may have aged out while the
                // settlement submission was in flight.
                let opens = self.store.evaluate(&owner, snapshot.tier.open_limit(), now())?;
                Ok(OpenReceipt {
                    settlement,
                    payment: PaymentSummary {
                        proof,
                        amount_received: payment.amount_received,
                    },
                    opens,
                })
            }
            Err(e) => {
                // Policy (documented in DESIGN.md): the proof stays
                // consumed — the submission outcome may be ambiguous and
                // releasing it could double-settle. The quota slot is
                // handed back, and a reconciliation record is emitted for
                // manual remedy of the paid fee.
                self.release(&reservation, None);
                error!(
                    "RECONCILE open failed after payment: owner={} proof={} drawn={:?} err={}",
                    owner, proof, drawn, e
                );
                Err(e)
            }
        }
    }

    /// Best-effort compensation. A failed release is logged, never
    /// escalated over the original rejection.
    fn release(&self, reservation: &ReservedOpen, proof: Option<&str>) {
        if let Err(e) = self.store.release_open(reservation) {
            warn!("failed to release open reservation: {}", e);
        }
        if let Some(proof) = proof {
            if let Err(e) = self.store.release_proof(proof) {
                warn!("failed to release proof claim {}: {}", proof, e);
            }
        }
    }
}

fn parse_identity(raw: &str) -> Result<Identity, EngineError> {
    Identity::parse(raw).ok_or_else(|| EngineError::invalid("malformed owner identity"))
}

fn parse_proof(raw: &str) -> Result<String, EngineError> {
    let ok = !raw.is_empty()
        && raw.len() <= MAX_PROOF_LEN
        && raw.bytes().all(|b| b.is_ascii_alphanumeric());
    if ok {
        Ok(raw.to_string())
    } else {
        Err(EngineError::invalid("malformed payment proof"))
    }
}
