mod common;

use common::{fixed_now, license_payload};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;
use tollgate_license::{LicenseError, MeterAttribute, MeterLedger};

fn seeded(allowed: u64, used: u64) -> MeterLedger {
    let mut payload = license_payload(fixed_now());
    payload.meter_attributes = vec![MeterAttribute {
        name: "exports".to_string(),
        allowed_uses: allowed,
        total_uses: used,
    }];
    let ledger = MeterLedger::new();
    ledger.replace_from(&payload);
    ledger
}

#[test]
fn increment_within_limit() {
    let ledger = seeded(10, 2);
    let attr = ledger.increment("exports", 3).unwrap();
    assert_eq!(attr.total_uses, 5);
    assert_eq!(attr.allowed_uses, 10);
    assert_eq!(ledger.get("exports").unwrap().total_uses, 5);
}

#[test]
fn increment_to_exact_limit_then_refuse() {
    let ledger = seeded(3, 0);
    ledger.increment("exports", 3).unwrap();

    let err = ledger.increment("exports", 1).unwrap_err();
    assert!(matches!(
        err,
        LicenseError::MeterAttributeLimitReached { ref name, allowed: 3 } if name == "exports"
    ));
    assert_eq!(ledger.get("exports").unwrap().total_uses, 3);
}

#[test]
fn overflowing_increment_leaves_counter_unchanged() {
    let ledger = seeded(u64::MAX, 5);
    assert!(ledger.increment("exports", u64::MAX).is_err());
    assert_eq!(ledger.get("exports").unwrap().total_uses, 5);
}

#[test]
fn decrement_saturates_at_zero() {
    let ledger = seeded(10, 2);
    assert_eq!(ledger.decrement("exports", 5).unwrap().total_uses, 0);
}

#[test]
fn reset_zeroes_uses() {
    let ledger = seeded(10, 7);
    ledger.reset("exports").unwrap();
    assert_eq!(ledger.get("exports").unwrap().total_uses, 0);
}

#[test]
fn unknown_attribute() {
    let ledger = seeded(10, 0);
    for result in [
        ledger.get("imports").map(|_| ()),
        ledger.increment("imports", 1).map(|_| ()),
        ledger.decrement("imports", 1).map(|_| ()),
        ledger.reset("imports"),
    ] {
        assert!(matches!(result, Err(LicenseError::MeterAttributeNotFound(ref n)) if n == "imports"));
    }
}

#[test]
fn server_values_replace_local_counts() {
    let ledger = seeded(10, 2);
    ledger.increment("exports", 4).unwrap();

    let mut fresh = license_payload(fixed_now());
    fresh.meter_attributes = vec![
        MeterAttribute {
            name: "exports".to_string(),
            allowed_uses: 20,
            total_uses: 6,
        },
        MeterAttribute {
            name: "seats".to_string(),
            allowed_uses: 5,
            total_uses: 1,
        },
    ];
    ledger.replace_from(&fresh);

    assert_eq!(ledger.pending_uses(), fresh.meter_attributes);
}

#[test]
fn concurrent_increments_never_exceed_limit() {
    let ledger = Arc::new(seeded(100, 0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ledger = ledger.clone();
            thread::spawn(move || {
                let mut granted = 0u64;
                for _ in 0..25 {
                    if ledger.increment("exports", 1).is_ok() {
                        granted += 1;
                    }
                }
                granted
            })
        })
        .collect();

    let granted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(granted, 100);
    assert_eq!(ledger.get("exports").unwrap().total_uses, 100);
    assert!(matches!(
        ledger.increment("exports", 1),
        Err(LicenseError::MeterAttributeLimitReached { .. })
    ));
}

#[test]
fn concurrent_increments_lose_no_updates() {
    let ledger = Arc::new(seeded(1_000, 0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ledger = ledger.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    ledger.increment("exports", 2).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(ledger.get("exports").unwrap().total_uses, 400);
}
