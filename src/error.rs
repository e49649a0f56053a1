//! Error taxonomy for the engine and its collaborators.
//!
//! Every failure propagates to the caller with enough detail to decide on
//! resubmission. Nothing in this crate retries automatically; "try again"
//! (`UpstreamUnavailable`) is kept distinct from business-logic denial so
//! callers can tell the two apart.

use thiserror::Error;

/// Transport-level failure talking to an external collaborator
/// (holdings index, ledger, inventory).
#[derive(Error, Debug)]
pub enum CollabError {
    #[error("call timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("rpc error: {0}")]
    Rpc(String),
}

/// Engine-level failure, one variant per rejection class.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed identity or proof. Rejected before any side effect.
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Tier None — rejected before quota and payment checks.
    #[error("not eligible to open")]
    AccessDenied,

    /// Rolling-window quota exhausted for this identity.
    #[error("open quota exceeded, retry in {cooldown_remaining}s")]
    QuotaExceeded { cooldown_remaining: u64 },

    /// Payment proof already consumed within its retention horizon.
    /// Distinct from verification failure: the proof may be perfectly
    /// valid, it has just been spent.
    #[error("payment proof already used")]
    ProofReplayed,

    /// Referenced transfer missing, errored, or insufficient. The proof is
    /// released so the participant may submit a fresh one.
    #[error("payment verification failed: {reason}")]
    PaymentVerificationFailed { reason: String },

    /// Reward transfer submission failed after the proof was consumed.
    /// Surfaced, never swallowed; see DESIGN.md for the compensation
    /// policy.
    #[error("settlement failed: {reason}")]
    SettlementFailed { reason: String },

    /// A collaborator was unreachable or errored where the engine cannot
    /// degrade the result. Caller may retry.
    #[error("upstream unavailable: {what}")]
    UpstreamUnavailable { what: String },

    #[error("storage error: {0}")]
    Store(#[from] sled::Error),

    #[error("storage codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        EngineError::InvalidInput { reason: reason.into() }
    }

    pub fn upstream(what: impl Into<String>) -> Self {
        EngineError::UpstreamUnavailable { what: what.into() }
    }

    /// Stable machine-readable code, used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidInput { .. } => "invalid_input",
            EngineError::AccessDenied => "access_denied",
            EngineError::QuotaExceeded { .. } => "quota_exceeded",
            EngineError::ProofReplayed => "proof_replayed",
            EngineError::PaymentVerificationFailed { .. } => "payment_verification_failed",
            EngineError::SettlementFailed { .. } => "settlement_failed",
            EngineError::UpstreamUnavailable { .. } => "upstream_unavailable",
            EngineError::Store(_) | EngineError::Codec(_) => "storage_error",
            EngineError::Config(_) => "config_error",
        }
    }
}
