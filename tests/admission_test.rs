//! Unit tests for the admission window and idempotency store

use openbox::store::Storage;
use openbox::types::Identity;

const HOUR: u64 = 3600;
const COOLDOWN: u64 = 24 * HOUR;
const PROOF_TTL: u64 = 7 * 24 * HOUR;

fn store() -> Storage {
    Storage::temporary(COOLDOWN, PROOF_TTL).unwrap()
}

fn id(raw: &str) -> Identity {
    Identity::parse(raw).unwrap()
}

#[test]
fn test_rolling_window_quota() {
    let s = store();
    let alice = id("alice");
    let t0 = 1_000_000;

    // SuperHolder: limit 2 over a rolling 24h window.
    assert!(s.reserve_open(&alice, 2, t0).unwrap().is_ok());
    assert!(s.reserve_open(&alice, 2, t0 + HOUR).unwrap().is_ok());

    // Third attempt at t0+2h: rejected, earliest entry ages out in 22h.
    let quota = s.reserve_open(&alice, 2, t0 + 2 * HOUR).unwrap().unwrap_err();
    assert_eq!(quota.used, 2);
    assert_eq!(quota.remaining, 0);
    assert_eq!(quota.cooldown_remaining, 22 * HOUR);

    // At t0+25h the t0 entry has aged out; one slot is free again.
    assert!(s.reserve_open(&alice, 2, t0 + 25 * HOUR).unwrap().is_ok());

    // The t0+1h and t0+25h entries are both still active.
    let quota = s.evaluate(&alice, 2, t0 + 25 * HOUR + 1).unwrap();
    assert_eq!(quota.used, 2);
    assert_eq!(quota.remaining, 0);
}

#[test]
fn test_entries_age_out_independently() {
    let s = store();
    let bob = id("bob");
    let t0 = 5_000_000;

    assert!(s.reserve_open(&bob, 2, t0).unwrap().is_ok());
    assert!(s.reserve_open(&bob, 2, t0 + 10 * HOUR).unwrap().is_ok());

    // After the first ages out only one entry remains active.
    let quota = s.evaluate(&bob, 2, t0 + COOLDOWN).unwrap();
    assert_eq!(quota.used, 1);
    assert_eq!(quota.remaining, 1);
    assert_eq!(quota.cooldown_remaining, 0);
}

#[test]
fn test_holder_limit_one() {
    let s = store();
    let carol = id("carol");
    let t0 = 42;

    assert!(s.reserve_open(&carol, 1, t0).unwrap().is_ok());
    let quota = s.reserve_open(&carol, 1, t0 + 1).unwrap().unwrap_err();
    assert_eq!(quota.limit, 1);
    assert_eq!(quota.cooldown_remaining, COOLDOWN - 1);
}

#[test]
fn test_zero_limit_never_admits() {
    let s = store();
    let mallory = id("mallory");
    let quota = s.reserve_open(&mallory, 0, 1000).unwrap().unwrap_err();
    assert_eq!(quota.used, 0);
    assert_eq!(quota.remaining, 0);
    assert_eq!(quota.cooldown_remaining, 0);
}

#[test]
fn test_release_returns_slot() {
    let s = store();
    let dave = id("dave");
    let t0 = 9_000;

    let reservation = s.reserve_open(&dave, 1, t0).unwrap().unwrap();
    assert!(s.reserve_open(&dave, 1, t0 + 1).unwrap().is_err());

    s.release_open(&reservation).unwrap();
    assert!(s.reserve_open(&dave, 1, t0 + 2).unwrap().is_ok());

    // Releasing the same token twice is a no-op.
    s.release_open(&reservation).unwrap();
    let quota = s.evaluate(&dave, 1, t0 + 3).unwrap();
    assert_eq!(quota.used, 1);
}

#[test]
fn test_quota_is_per_identity() {
    let s = store();
    let t0 = 77;
    assert!(s.reserve_open(&id("erin"), 1, t0).unwrap().is_ok());
    assert!(s.reserve_open(&id("frank"), 1, t0).unwrap().is_ok());
    assert!(s.reserve_open(&id("erin"), 1, t0 + 1).unwrap().is_err());
}

#[test]
fn test_proof_claim_single_use() {
    let s = store();
    assert!(s.claim_proof("proofA", 1000).unwrap());
    assert!(!s.claim_proof("proofA", 1000).unwrap());
    assert!(!s.claim_proof("proofA", 1000 + PROOF_TTL - 1).unwrap());
    // Retention horizon passed: replay risk accepted by design.
    assert!(s.claim_proof("proofA", 1000 + PROOF_TTL).unwrap());
}

#[test]
fn test_sweep_reclaims_expired_state() {
    let s = store();
    let grace = id("grace");
    let t0 = 100_000;

    s.reserve_open(&grace, 2, t0).unwrap().unwrap();
    s.reserve_open(&grace, 2, t0 + HOUR).unwrap().unwrap();
    s.claim_proof("oldproof", t0).unwrap();
    s.claim_proof("liveproof", t0 + COOLDOWN).unwrap();

    let (windows, proofs) = s.sweep_expired(t0 + COOLDOWN + 2 * HOUR).unwrap();
    assert_eq!(windows, 1); // both entries aged out, record removed
    assert_eq!(proofs, 0); // proof TTL is 7d, nothing expired yet

    let quota = s.evaluate(&grace, 2, t0 + COOLDOWN + 2 * HOUR).unwrap();
    assert_eq!(quota.used, 0);

    let (_, proofs) = s.sweep_expired(t0 + PROOF_TTL + 1).unwrap();
    assert_eq!(proofs, 1); // oldproof reclaimed, liveproof kept
    assert!(!s.claim_proof("liveproof", t0 + PROOF_TTL + 1).unwrap());
}
