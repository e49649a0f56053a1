//! Persistent state: admission windows and consumed payment proofs.
//!
//! Both record families are TTL-bound key-value entries owned exclusively
//! by this module. All mutations go through `compare_and_swap` loops so
//! that per-identity operations are linearizable — the orchestrator never
//! has to sequence its own read-modify-write, and two concurrent requests
//! for the same identity or the same proof cannot both win.

use crate::error::EngineError;
use crate::types::{Identity, OpenQuota};
use std::path::Path;
use tracing::debug;

/// Token for one successful quota reservation. Held by the orchestrator
/// until the open either settles (reservation stays) or fails before
/// settlement (reservation is released).
#[derive(Debug, Clone)]
pub struct ReservedOpen {
    identity: Identity,
    timestamp: u64,
}

pub struct Storage {
    db: sled::Db,
    /// identity -> bincode Vec<u64> of open timestamps (seconds).
    opens: sled::Tree,
    /// proof -> bincode u64 claim timestamp (seconds).
    proofs: sled::Tree,
    cooldown_secs: u64,
    proof_ttl_secs: u64,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(
        path: P,
        cooldown_secs: u64,
        proof_ttl_secs: u64,
    ) -> Result<Self, EngineError> {
        let db = sled::open(path)?;
        Self::from_db(db, cooldown_secs, proof_ttl_secs)
    }

    /// In-memory store for tests.
    pub fn temporary(cooldown_secs: u64, proof_ttl_secs: u64) -> Result<Self, EngineError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, cooldown_secs, proof_ttl_secs)
    }

    fn from_db(db: sled::Db, cooldown_secs: u64, proof_ttl_secs: u64) -> Result<Self, EngineError> {
        let opens = db.open_tree("opens")?;
        let proofs = db.open_tree("proofs")?;
        Ok(Self { db, opens, proofs, cooldown_secs, proof_ttl_secs })
    }

    pub fn cooldown_secs(&self) -> u64 {
        self.cooldown_secs
    }

    /// Atomically trim expired entries, count active ones, and append a new
    /// open iff the count is under `limit`. Returns the reservation on
    /// success, or the quota view (with remaining cooldown) on rejection.
    ///
    /// This is the single "reserve" primitive: there is no separate
    /// evaluate-then-record pair to race.
    pub fn reserve_open(
        &self,
        identity: &Identity,
        limit: u32,
        now: u64,
    ) -> Result<Result<ReservedOpen, OpenQuota>, EngineError> {
        let key = identity.as_str().as_bytes();
        loop {
            let cur = self.opens.get(key)?;
            let mut stamps: Vec<u64> = match &cur {
                Some(raw) => bincode::deserialize(raw)?,
                None => Vec::new(),
            };
            stamps.retain(|&t| t + self.cooldown_secs > now);

            let used = stamps.len() as u32;
            if used >= limit {
                return Ok(Err(self.quota_view(&stamps, limit, now)));
            }

            stamps.push(now);
            let encoded = bincode::serialize(&stamps)?;
            match self.opens.compare_and_swap(key, cur, Some(encoded))? {
                Ok(()) => {
                    return Ok(Ok(ReservedOpen {
                        identity: identity.clone(),
                        timestamp: now,
                    }));
                }
                // Lost the race for this identity; retry against fresh state.
                Err(_) => continue,
            }
        }
    }

    /// Compensating removal of one reservation. Safe to call once per
    /// token; a missing entry (already aged out or swept) is a no-op.
    pub fn release_open(&self, reservation: &ReservedOpen) -> Result<(), EngineError> {
        let key = reservation.identity.as_str().as_bytes();
        loop {
            let cur = self.opens.get(key)?;
            let mut stamps: Vec<u64> = match &cur {
                Some(raw) => bincode::deserialize(raw)?,
                None => return Ok(()),
            };
            let Some(pos) = stamps.iter().position(|&t| t == reservation.timestamp) else {
                return Ok(());
            };
            stamps.remove(pos);

            let new: Option<Vec<u8>> = if stamps.is_empty() {
                None
            } else {
                Some(bincode::serialize(&stamps)?)
            };
            match self.opens.compare_and_swap(key, cur, new)? {
                Ok(()) => return Ok(()),
                Err(_) => continue,
            }
        }
    }

    /// Read-only quota view for this identity at `now`.
    pub fn evaluate(
        &self,
        identity: &Identity,
        limit: u32,
        now: u64,
    ) -> Result<OpenQuota, EngineError> {
        let mut stamps: Vec<u64> = match self.opens.get(identity.as_str().as_bytes())? {
            Some(raw) => bincode::deserialize(&raw)?,
            None => Vec::new(),
        };
        stamps.retain(|&t| t + self.cooldown_secs > now);
        Ok(self.quota_view(&stamps, limit, now))
    }

    fn quota_view(&self, active: &[u64], limit: u32, now: u64) -> OpenQuota {
        let used = active.len() as u32;
        let remaining = limit.saturating_sub(used);
        let cooldown_remaining = if remaining == 0 {
            // Time until the earliest active open ages out.
            active
                .iter()
                .min()
                .map(|&oldest| (oldest + self.cooldown_secs).saturating_sub(now))
                .unwrap_or(0)
        } else {
            0
        };
        OpenQuota { used, limit, remaining, cooldown_remaining }
    }

    /// Atomically claim a payment proof iff it is absent (or its previous
    /// claim has aged past the retention TTL). Returns whether the claim
    /// succeeded. Exactly one of any number of concurrent claims for the
    /// same proof wins.
    pub fn claim_proof(&self, proof: &str, now: u64) -> Result<bool, EngineError> {
        let key = proof.as_bytes();
        let encoded = bincode::serialize(&now)?;
        loop {
            let cur = self.proofs.get(key)?;
            if let Some(raw) = &cur {
                let claimed_at: u64 = bincode::deserialize(raw)?;
                if claimed_at + self.proof_ttl_secs > now {
                    return Ok(false);
                }
                // Expired claim: replace it, but only if nobody else has.
            }
            match self.proofs.compare_and_swap(key, cur, Some(encoded.clone()))? {
                Ok(()) => return Ok(true),
                Err(_) => continue,
            }
        }
    }

    /// Release a claimed-but-invalid proof so a legitimate retry can cite
    /// a fresh (or the same, now-unclaimed) proof.
    pub fn release_proof(&self, proof: &str) -> Result<(), EngineError> {
        self.proofs.remove(proof.as_bytes())?;
        Ok(())
    }

    /// Garbage-collect aged-out window entries, empty window records, and
    /// expired proof claims. Returns (windows touched, proofs removed).
    pub fn sweep_expired(&self, now: u64) -> Result<(u64, u64), EngineError> {
        let mut windows = 0u64;
        let mut proofs = 0u64;

        for item in self.opens.iter() {
            let (key, raw) = item?;
            let stamps: Vec<u64> = bincode::deserialize(&raw)?;
            let active: Vec<u64> = stamps
                .iter()
                .copied()
                .filter(|&t| t + self.cooldown_secs > now)
                .collect();
            if active.len() == stamps.len() {
                continue;
            }
            let new: Option<Vec<u8>> = if active.is_empty() {
                None
            } else {
                Some(bincode::serialize(&active)?)
            };
            // Concurrent reserve wins over the sweep; skip on conflict.
            if self
                .opens
                .compare_and_swap(&key, Some(raw), new)?
                .is_ok()
            {
                windows += 1;
            }
        }

        for item in self.proofs.iter() {
            let (key, raw) = item?;
            let claimed_at: u64 = bincode::deserialize(&raw)?;
            if claimed_at + self.proof_ttl_secs <= now
                && self
                    .proofs
                    .compare_and_swap(&key, Some(raw), None::<Vec<u8>>)?
                    .is_ok()
            {
                proofs += 1;
            }
        }

        if windows > 0 || proofs > 0 {
            debug!("sweep: trimmed {} windows, removed {} expired proofs", windows, proofs);
        }
        Ok((windows, proofs))
    }

    pub fn flush(&self) -> Result<(), EngineError> {
        self.db.flush()?;
        Ok(())
    }
}
