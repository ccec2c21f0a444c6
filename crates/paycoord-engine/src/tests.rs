use std::sync::Arc;

use paycoord_core::secret::Secret;
use paycoord_core::signal::OutboundSignal;
use paycoord_store::StoreDb;

use crate::engine::PayCoordEngine;

fn temp_engine(name: &str) -> PayCoordEngine {
    let dir = std::env::temp_dir().join(format!("paycoord_engine_test_{}", name));
    let _ = std::fs::remove_dir_all(&dir);
    let db = StoreDb::open(&dir).expect("open temp db");
    PayCoordEngine::new(Arc::new(db))
}

const NOW: i64 = 1_700_000_000;
const FAR_FUTURE: i64 = 4_000_000_000;
const FAR_PAST: i64 = 100;

fn simple_offer(engine: &PayCoordEngine, payee_id: i64) -> paycoord_core::Offer {
    engine
        .create_offer(
            payee_id,
            4567,
            vec![-1, -2],
            vec![Some(1000), Some(2000)],
            FAR_FUTURE,
            Some(serde_json::json!({"m": "t"})),
            None,
            0,
            NOW,
        )
        .expect("create_offer")
}

fn swap_offer(engine: &PayCoordEngine, payee_id: i64) -> paycoord_core::Offer {
    engine
        .create_offer(
            payee_id,
            4567,
            vec![-1, -2],
            vec![Some(1000), Some(2000)],
            FAR_FUTURE,
            None,
            Some(-3),
            500,
            NOW,
        )
        .expect("create_offer")
}

#[test]
fn scenario_simple_success() {
    let engine = temp_engine("simple_success");
    let offer = simple_offer(&engine, 1);

    engine
        .make_payment_order(
            1,
            offer.offer_id,
            &offer.offer_secret,
            2,
            8765,
            -1,
            1000,
            Secret::from_bytes(b"123".to_vec()),
            None,
            NOW,
        )
        .expect("make_payment_order");

    let order = engine
        .db
        .get_order(1, offer.offer_id, 2, 8765)
        .unwrap()
        .expect("order exists");
    assert!(!order.is_finalized());

    let signals = engine.db.drain_outbox().unwrap();
    let prepare = signals
        .iter()
        .find_map(|s| match s {
            OutboundSignal::PrepareTransfer { coordinator_request_id, .. } => {
                Some(*coordinator_request_id)
            }
            _ => None,
        })
        .expect("PrepareTransfer emitted");
    assert!(prepare > 0);

    engine
        .on_prepared(1, prepare, -1, 2, 1, 333, 1000, NOW)
        .expect("on_prepared");

    let signals = engine.db.drain_outbox().unwrap();
    let finalize_count = signals
        .iter()
        .filter(|s| matches!(s, OutboundSignal::FinalizePreparedTransfer { transfer_id: 333, committed_amount: 1000, .. }))
        .count();
    assert_eq!(finalize_count, 1);
    let proof_id = signals.iter().find_map(|s| match s {
        OutboundSignal::SuccessfulPayment { proof_id, .. } => Some(*proof_id),
        _ => None,
    }).expect("SuccessfulPayment emitted");

    assert!(engine.db.get_offer(1, offer.offer_id).unwrap().is_none());
    let proof = engine.db.get_proof(1, proof_id).unwrap().expect("proof exists");
    assert_eq!(proof.offer_id, offer.offer_id);
    assert_eq!(proof.amount, 1000);
}

#[test]
fn scenario_swap_success() {
    let engine = temp_engine("swap_success");
    let offer = swap_offer(&engine, 1);

    engine
        .make_payment_order(
            1,
            offer.offer_id,
            &offer.offer_secret,
            2,
            8765,
            -1,
            1000,
            Secret::from_bytes(b"123".to_vec()),
            None,
            NOW,
        )
        .unwrap();

    let signals = engine.db.drain_outbox().unwrap();
    let prepare_count = signals
        .iter()
        .filter(|s| matches!(s, OutboundSignal::PrepareTransfer { .. }))
        .count();
    assert_eq!(prepare_count, 1, "only the primary PrepareTransfer so far");

    engine.on_prepared(1, 1, -1, 2, 1, 333, 1000, NOW).unwrap();

    let signals = engine.db.drain_outbox().unwrap();
    let second_prepare = signals.iter().find_map(|s| match s {
        OutboundSignal::PrepareTransfer { coordinator_request_id, amount, .. } if *coordinator_request_id < 0 => {
            Some(*amount)
        }
        _ => None,
    }).expect("reciprocal PrepareTransfer emitted");
    assert_eq!(second_prepare, 500);

    engine.on_prepared(1, -1, -3, 1, 2, 334, 500, NOW).unwrap();

    let signals = engine.db.drain_outbox().unwrap();
    let committed: Vec<i64> = signals
        .iter()
        .filter_map(|s| match s {
            OutboundSignal::FinalizePreparedTransfer { committed_amount, .. } => Some(*committed_amount),
            _ => None,
        })
        .collect();
    assert_eq!(committed.len(), 2);
    assert!(committed.contains(&1000));
    assert!(committed.contains(&500));
}

#[test]
fn scenario_rejection_on_primary() {
    let engine = temp_engine("rejection_primary");
    let offer = simple_offer(&engine, 1);
    engine
        .make_payment_order(
            1,
            offer.offer_id,
            &offer.offer_secret,
            2,
            8765,
            -1,
            1000,
            Secret::from_bytes(b"123".to_vec()),
            None,
            NOW,
        )
        .unwrap();
    engine.db.drain_outbox().unwrap();

    engine
        .on_rejected(1, 1, serde_json::json!({"error_code": "E1"}), NOW)
        .unwrap();

    let signals = engine.db.drain_outbox().unwrap();
    assert!(signals
        .iter()
        .any(|s| matches!(s, OutboundSignal::FailedPayment { error_code, .. } if error_code == "E1")));
    assert!(!signals
        .iter()
        .any(|s| matches!(s, OutboundSignal::FinalizePreparedTransfer { .. })));
}

#[test]
fn scenario_cancel_with_live_order() {
    let engine = temp_engine("cancel_live_order");
    let offer = simple_offer(&engine, 1);
    engine
        .make_payment_order(
            1,
            offer.offer_id,
            &offer.offer_secret,
            2,
            8765,
            -1,
            1000,
            Secret::from_bytes(b"123".to_vec()),
            None,
            NOW,
        )
        .unwrap();
    engine.db.drain_outbox().unwrap();

    engine
        .cancel_offer(1, offer.offer_id, &offer.offer_secret, NOW)
        .unwrap();

    let signals = engine.db.drain_outbox().unwrap();
    assert!(signals
        .iter()
        .any(|s| matches!(s, OutboundSignal::FailedPayment { error_code, .. } if error_code == "PAY004")));
    assert!(signals.iter().any(|s| matches!(s, OutboundSignal::CanceledOffer { .. })));
    assert!(engine.db.get_offer(1, offer.offer_id).unwrap().is_none());
}

#[test]
fn scenario_redelivered_prepared_after_commit_releases_orphan() {
    let engine = temp_engine("redelivery");
    let offer = simple_offer(&engine, 1);
    engine
        .make_payment_order(
            1,
            offer.offer_id,
            &offer.offer_secret,
            2,
            8765,
            -1,
            1000,
            Secret::from_bytes(b"123".to_vec()),
            None,
            NOW,
        )
        .unwrap();
    engine.db.drain_outbox().unwrap();
    engine.on_prepared(1, 1, -1, 2, 1, 333, 1000, NOW).unwrap();
    let first_pass = engine.db.drain_outbox().unwrap();
    let proofs_before = first_pass
        .iter()
        .filter(|s| matches!(s, OutboundSignal::SuccessfulPayment { .. }))
        .count();
    assert_eq!(proofs_before, 1);

    // Redeliver the same prepared signal.
    engine.on_prepared(1, 1, -1, 2, 1, 333, 1000, NOW).unwrap();
    let second_pass = engine.db.drain_outbox().unwrap();
    assert_eq!(second_pass.len(), 1);
    assert!(matches!(
        second_pass[0],
        OutboundSignal::FinalizePreparedTransfer { committed_amount: 0, .. }
    ));
}

#[test]
fn scenario_expired_offer() {
    let engine = temp_engine("expired_offer");
    let offer = engine
        .create_offer(
            1,
            1,
            vec![-1],
            vec![Some(1000)],
            FAR_PAST,
            Some(serde_json::json!({"m": "old"})),
            None,
            0,
            NOW,
        )
        .unwrap();
    engine.db.drain_outbox().unwrap();

    engine
        .make_payment_order(
            1,
            offer.offer_id,
            &offer.offer_secret,
            2,
            1,
            -1,
            1000,
            Secret::from_bytes(b"123".to_vec()),
            None,
            NOW,
        )
        .unwrap();

    let signals = engine.db.drain_outbox().unwrap();
    assert_eq!(signals.len(), 1);
    assert!(matches!(
        &signals[0],
        OutboundSignal::FailedPayment { error_code, .. } if error_code == "PAY006"
    ));

    // Redeliver make_payment_order: still exactly one FailedPayment (no-op).
    engine
        .make_payment_order(
            1,
            offer.offer_id,
            &offer.offer_secret,
            2,
            1,
            -1,
            1000,
            Secret::from_bytes(b"123".to_vec()),
            None,
            NOW,
        )
        .unwrap();
    assert!(engine.db.drain_outbox().unwrap().is_empty());
}

#[test]
fn wrong_secret_yields_no_order() {
    let engine = temp_engine("wrong_secret");
    let offer = simple_offer(&engine, 1);
    engine.db.drain_outbox().unwrap();
    engine
        .make_payment_order(
            1,
            offer.offer_id,
            &Secret::from_bytes(b"not-the-secret".to_vec()),
            2,
            1,
            -1,
            1000,
            Secret::from_bytes(b"123".to_vec()),
            None,
            NOW,
        )
        .unwrap();

    let signals = engine.db.drain_outbox().unwrap();
    assert_eq!(signals.len(), 1);
    assert!(matches!(
        &signals[0],
        OutboundSignal::FailedPayment { error_code, .. } if error_code == "PAY001"
    ));
    assert!(engine.db.get_order(1, offer.offer_id, 2, 1).unwrap().is_none());
}

#[test]
fn wrong_amount_yields_no_order() {
    let engine = temp_engine("wrong_amount");
    let offer = simple_offer(&engine, 1);
    engine.db.drain_outbox().unwrap();
    engine
        .make_payment_order(
            1,
            offer.offer_id,
            &offer.offer_secret,
            2,
            1,
            -1,
            999,
            Secret::from_bytes(b"123".to_vec()),
            None,
            NOW,
        )
        .unwrap();

    let signals = engine.db.drain_outbox().unwrap();
    assert_eq!(signals.len(), 1);
    assert!(matches!(
        &signals[0],
        OutboundSignal::FailedPayment { error_code, .. } if error_code == "PAY003"
    ));
    assert!(engine.db.get_order(1, offer.offer_id, 2, 1).unwrap().is_none());
}

#[test]
fn zero_amount_order_commits_without_prepare_transfer() {
    let engine = temp_engine("zero_amount");
    let offer = engine
        .create_offer(
            1,
            1,
            vec![-1],
            vec![Some(0)],
            FAR_FUTURE,
            Some(serde_json::json!({"m": "free"})),
            None,
            0,
            NOW,
        )
        .unwrap();
    engine.db.drain_outbox().unwrap();

    engine
        .make_payment_order(
            1,
            offer.offer_id,
            &offer.offer_secret,
            2,
            1,
            -1,
            0,
            Secret::from_bytes(b"123".to_vec()),
            None,
            NOW,
        )
        .unwrap();

    let signals = engine.db.drain_outbox().unwrap();
    assert!(!signals.iter().any(|s| matches!(s, OutboundSignal::PrepareTransfer { .. })));
    assert!(signals.iter().any(|s| matches!(s, OutboundSignal::SuccessfulPayment { .. })));
}
