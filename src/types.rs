//! Core types and constants for the admission-and-settlement engine.
//!
//! # Design Goals
//!
//! 1. **No double-spend of a payment proof** — a proof is consumed exactly
//!    once within its retention horizon; the store enforces this atomically.
//!
//! 2. **No quota overrun** — per-participant open counts over a rolling
//!    cooldown window are reserved with a single atomic operation, never
//!    check-then-act.
//!
//! 3. **No double-settlement** — a settlement result is produced once per
//!    accepted open and never mutated after construction.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

// =============================================================================
// QUOTA AND RETENTION
// =============================================================================

/// Rolling cooldown window in seconds (24 hours).
/// Each recorded open stays "active" for exactly this long from its own
/// timestamp, then ages out independently. Not a calendar window.
pub const DEFAULT_COOLDOWN_SECS: u64 = 24 * 60 * 60;

/// Retention horizon for consumed payment proofs (7 days).
/// Reuse within this window is rejected. Replay beyond the horizon is an
/// accepted risk: the referenced transfer is that old and the fee pricing
/// makes stale replays uneconomical.
pub const DEFAULT_PROOF_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Qualifying item count at which a participant becomes SuperHolder.
pub const SUPER_HOLDER_THRESHOLD: u64 = 10;

/// Opens per cooldown window for a Holder.
pub const HOLDER_OPEN_LIMIT: u32 = 1;

/// Opens per cooldown window for a SuperHolder.
pub const SUPER_HOLDER_OPEN_LIMIT: u32 = 2;

// =============================================================================
// INPUT BOUNDS
// =============================================================================

/// Maximum accepted length for a participant identity key.
/// Ledger account identifiers are well under this; anything longer is
/// malformed input, rejected before any side effect.
pub const MAX_IDENTITY_LEN: usize = 64;

/// Maximum accepted length for a payment proof reference.
pub const MAX_PROOF_LEN: usize = 128;

/// Current UNIX time in seconds.
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// =============================================================================
// PARTICIPANT
// =============================================================================

/// Stable string key identifying a participant, derived from their public
/// account identifier. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Validate and wrap a raw identity string.
    ///
    /// Accepts 1..=MAX_IDENTITY_LEN alphanumeric characters. Returns None
    /// for malformed input so the caller can reject with no side effects.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw.len() > MAX_IDENTITY_LEN {
            return None;
        }
        if !raw.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Eligibility class derived from holdings. Recomputed per request,
/// never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    None,
    Holder,
    SuperHolder,
}

impl Tier {
    /// Opens allowed per rolling cooldown window for this tier.
    pub fn open_limit(self) -> u32 {
        match self {
            Tier::None => 0,
            Tier::Holder => HOLDER_OPEN_LIMIT,
            Tier::SuperHolder => SUPER_HOLDER_OPEN_LIMIT,
        }
    }
}

/// Standing of one configured fungible-token threshold for a participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenStanding {
    pub token_id: String,
    pub balance: u64,
    pub threshold: u64,
    pub met: bool,
}

/// Ephemeral result of an eligibility resolution. Recomputed per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilitySnapshot {
    pub tier: Tier,
    pub holding_count: u64,
    pub token_balances: Vec<TokenStanding>,
    pub any_token_met: bool,
}

/// Per-participant quota view over the rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenQuota {
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the earliest active open ages out. Zero when an open
    /// slot is currently available.
    pub cooldown_remaining: u64,
}

// =============================================================================
// PRIZES
// =============================================================================

/// One reward outcome. Value type, no identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PrizeOutcome {
    Nothing,
    Asset { label: String },
    Currency { amount: u64, label: String },
}

impl PrizeOutcome {
    pub fn label(&self) -> &str {
        match self {
            PrizeOutcome::Nothing => "nothing",
            PrizeOutcome::Asset { label } => label,
            PrizeOutcome::Currency { label, .. } => label,
        }
    }
}

/// Reward category with its relative weight. Static configuration,
/// immutable at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedOutcome {
    pub weight: f64,
    pub outcome: PrizeOutcome,
}

/// Terminal state of a dispatched settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Settled,
    /// Drawn asset could not be fulfilled from inventory; effective outcome
    /// recorded as Nothing. Terminal — never triggers a second draw.
    Degraded,
}

/// Produced once per accepted open request; never mutated after
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResult {
    pub status: SettlementStatus,
    /// Effective outcome after any degradation. Serialized as `result`,
    /// the stable wire name.
    #[serde(rename = "result")]
    pub outcome: PrizeOutcome,
    pub settlement_ref: Option<String>,
    pub asset_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_validation() {
        assert!(Identity::parse("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin").is_some());
        assert!(Identity::parse("").is_none());
        assert!(Identity::parse("has spaces").is_none());
        assert!(Identity::parse(&"a".repeat(MAX_IDENTITY_LEN + 1)).is_none());
    }

    #[test]
    fn test_tier_limits() {
        assert_eq!(Tier::None.open_limit(), 0);
        assert_eq!(Tier::Holder.open_limit(), 1);
        assert_eq!(Tier::SuperHolder.open_limit(), 2);
    }
}
