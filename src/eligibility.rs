//! Eligibility resolution: participant identity -> tier, via external
//! holdings lookups.

use crate::config::TokenThreshold;
use crate::error::CollabError;
use crate::types::{EligibilitySnapshot, Identity, SUPER_HOLDER_THRESHOLD, Tier, TokenStanding};
use tracing::warn;

/// External holdings index, read-only.
pub trait HoldingsLookup {
    /// Count of qualifying collection items owned by `owner`.
    fn count_qualifying_items(
        &self,
        owner: &Identity,
        collection_id: &str,
    ) -> impl Future<Output = Result<u64, CollabError>> + Send;

    /// Balance of one fungible token held by `owner`.
    fn token_balance(
        &self,
        owner: &Identity,
        token_id: &str,
    ) -> impl Future<Output = Result<u64, CollabError>> + Send;
}

/// Maps a participant to a tier from live holdings. Nothing is persisted;
/// every request recomputes the snapshot.
pub struct EligibilityResolver {
    collection_id: String,
    token_thresholds: Vec<TokenThreshold>,
}

impl EligibilityResolver {
    pub fn new(collection_id: String, token_thresholds: Vec<TokenThreshold>) -> Self {
        Self { collection_id, token_thresholds }
    }

    /// Resolve tier for `owner`.
    ///
    /// Failure policy: a failed lookup contributes a negative result
    /// (fail-closed per lookup) instead of aborting the whole resolution.
    /// A participant whose index is flapping may be under-tiered for a
    /// request; they are never over-tiered.
    pub async fn resolve<H: HoldingsLookup>(
        &self,
        lookup: &H,
        owner: &Identity,
    ) -> EligibilitySnapshot {
        let holding_count = match lookup
            .count_qualifying_items(owner, &self.collection_id)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!("holdings lookup failed for {}: {} (treating as 0)", owner, e);
                0
            }
        };

        let mut token_balances = Vec::with_capacity(self.token_thresholds.len());
        let mut any_token_met = false;
        for threshold in &self.token_thresholds {
            let balance = match lookup.token_balance(owner, &threshold.token_id).await {
                Ok(balance) => balance,
                Err(e) => {
                    warn!(
                        "token balance lookup failed for {} ({}): {} (treating as 0)",
                        owner, threshold.token_id, e
                    );
                    0
                }
            };
            let met = balance >= threshold.minimum;
            any_token_met |= met;
            token_balances.push(TokenStanding {
                token_id: threshold.token_id.clone(),
                balance,
                threshold: threshold.minimum,
                met,
            });
        }

        let tier = if holding_count >= SUPER_HOLDER_THRESHOLD {
            Tier::SuperHolder
        } else if holding_count > 0 || any_token_met {
            Tier::Holder
        } else {
            Tier::None
        };

        EligibilitySnapshot { tier, holding_count, token_balances, any_token_met }
    }
}
