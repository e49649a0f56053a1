//! Payment verification against the external ledger.
//!
//! This check is read-only and idempotent to repeat. It does not prevent
//! reuse of a proof — that is the store's job (`Storage::claim_proof`).

use crate::error::{CollabError, EngineError};
use crate::types::Identity;
use serde::{Deserialize, Serialize};

/// Net balance change for one account in a recorded transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub account: String,
    /// Positive for credit, negative for debit, base units.
    pub delta: i128,
}

/// A transfer as recorded on the ledger, looked up by proof reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Execution error recorded by the ledger, if any.
    pub error: Option<String>,
    pub balance_deltas: Vec<BalanceDelta>,
}

/// Ledger read access.
pub trait LedgerRead {
    /// Look up a recorded transfer by its settlement reference.
    /// `None` means the reference does not exist on the ledger.
    fn get_transfer(
        &self,
        proof: &str,
    ) -> impl Future<Output = Result<Option<TransferRecord>, CollabError>> + Send;

    /// Current spendable balance of an account, base units.
    fn account_balance(
        &self,
        account: &str,
    ) -> impl Future<Output = Result<u64, CollabError>> + Send;
}

/// Amount observed on a successfully verified payment, kept for audit.
#[derive(Debug, Clone, Copy)]
pub struct VerifiedPayment {
    pub amount_received: u64,
}

/// Confirm that `proof` references a real, sufficient transfer from
/// `payer` to `treasury`.
///
/// Rejects when the transfer is missing, recorded as errored, missing
/// either party in its balance deltas, or moved less than `minimum` in
/// either direction. Returns the exact treasury credit observed.
pub async fn verify<L: LedgerRead>(
    ledger: &L,
    proof: &str,
    payer: &Identity,
    treasury: &str,
    minimum: u64,
) -> Result<VerifiedPayment, EngineError> {
    let record = ledger
        .get_transfer(proof)
        .await
        .map_err(|e| EngineError::upstream(format!("ledger read: {}", e)))?;

    let Some(record) = record else {
        return Err(EngineError::PaymentVerificationFailed {
            reason: "transfer not found".into(),
        });
    };

    if let Some(err) = record.error {
        return Err(EngineError::PaymentVerificationFailed {
            reason: format!("transfer errored: {}", err),
        });
    }

    let delta_for = |account: &str| {
        record
            .balance_deltas
            .iter()
            .find(|d| d.account == account)
            .map(|d| d.delta)
    };

    let Some(treasury_delta) = delta_for(treasury) else {
        return Err(EngineError::PaymentVerificationFailed {
            reason: "treasury not present in transfer".into(),
        });
    };
    let Some(payer_delta) = delta_for(payer.as_str()) else {
        return Err(EngineError::PaymentVerificationFailed {
            reason: "payer not present in transfer".into(),
        });
    };

    if treasury_delta < minimum as i128 {
        return Err(EngineError::PaymentVerificationFailed {
            reason: format!(
                "treasury received {} of required {}",
                treasury_delta.max(0),
                minimum
            ),
        });
    }
    if payer_delta > -(minimum as i128) {
        return Err(EngineError::PaymentVerificationFailed {
            reason: "payer debit below required fee".into(),
        });
    }

    Ok(VerifiedPayment { amount_received: treasury_delta as u64 })
}
