use paycoord_core::model::{Offer, OrderState, PaymentOrder, PaymentProof};
use paycoord_core::secret::Secret;
use paycoord_core::signal::{FinalizeInfo, Leg, OutboundSignal};
use paycoord_core::types::{
    Amount, CoordinatorRequestId, DebtorId, OfferId, PayeeId, PayerId, PayerSeqnum, Timestamp,
};
use paycoord_core::PayCoordError;
use tracing::{info, warn};

use crate::engine::PayCoordEngine;

/// Build the mutated order and signal set for an abort (§4.2.2 step 3),
/// without touching the store. Callers either persist the result alone
/// (a standalone abort is its own transaction) or fold it into a larger
/// transaction (the commit path aborting every other live order).
pub(crate) fn build_abort(
    order: &PaymentOrder,
    error_code: &str,
    now: Timestamp,
) -> (PaymentOrder, Vec<OutboundSignal>) {
    let mut order = order.clone();
    let mut signals = Vec::new();

    if let Some(transfer_id) = order.payment_transfer_id {
        signals.push(OutboundSignal::FinalizePreparedTransfer {
            payee_id: order.payee_id,
            debtor_id: order.debtor_id,
            sender_id: order.payer_id,
            recipient_id: order.payee_id,
            transfer_id,
            coordinator_request_id: order.coordinator_request_id,
            committed_amount: 0,
            info: None,
        });
    }
    if let Some(transfer_id) = order.reciprocal_payment_transfer_id {
        signals.push(OutboundSignal::FinalizePreparedTransfer {
            payee_id: order.payee_id,
            debtor_id: order.reciprocal_debtor_id.unwrap_or(0),
            sender_id: order.payee_id,
            recipient_id: order.payer_id,
            transfer_id,
            coordinator_request_id: -order.coordinator_request_id,
            committed_amount: 0,
            info: None,
        });
    }

    signals.push(OutboundSignal::FailedPayment {
        payee_id: order.payee_id,
        offer_id: order.offer_id,
        payer_id: order.payer_id,
        payer_seqnum: order.payer_seqnum,
        error_code: error_code.to_string(),
    });

    order.payer_note = None;
    order.proof_secret = None;
    order.finalized_at_ts = Some(now);
    order.proof_id = None;

    (order, signals)
}

impl PayCoordEngine {
    /// C4 `make_payment_order` (§4.2 step 1).
    #[allow(clippy::too_many_arguments)]
    pub fn make_payment_order(
        &self,
        payee_id: PayeeId,
        offer_id: OfferId,
        offer_secret: &Secret,
        payer_id: PayerId,
        payer_seqnum: PayerSeqnum,
        debtor_id: DebtorId,
        amount: Amount,
        proof_secret: Secret,
        payer_note: Option<serde_json::Value>,
        now: Timestamp,
    ) -> Result<(), PayCoordError> {
        let key_guard = self
            .locks
            .lock_order_by_key(payee_id, offer_id, payer_id, payer_seqnum);
        let _held = key_guard.held();

        // Redelivery: identical four-tuple already exists — no-op.
        if self
            .db
            .get_order(payee_id, offer_id, payer_id, payer_seqnum)?
            .is_some()
        {
            return Ok(());
        }

        let offer_guard = self.locks.lock_offer_shared(payee_id, offer_id);
        let _offer_held = offer_guard.held();

        let offer = match self.db.get_offer(payee_id, offer_id)? {
            Some(o) => o,
            None => {
                return self.emit_validation_failure(
                    payee_id,
                    offer_id,
                    payer_id,
                    payer_seqnum,
                    PayCoordError::OfferNotFound,
                )
            }
        };
        if !offer.offer_secret.ct_eq(offer_secret) {
            return self.emit_validation_failure(
                payee_id,
                offer_id,
                payer_id,
                payer_seqnum,
                PayCoordError::OfferNotFound,
            );
        }
        if !offer.debtor_ids.contains(&debtor_id) {
            return self.emit_validation_failure(
                payee_id,
                offer_id,
                payer_id,
                payer_seqnum,
                PayCoordError::DebtorNotAccepted,
            );
        }
        if !offer.accepts(debtor_id, amount) {
            return self.emit_validation_failure(
                payee_id,
                offer_id,
                payer_id,
                payer_seqnum,
                PayCoordError::AmountMismatch,
            );
        }

        let coordinator_request_id = self.db.next_coordinator_request_id()?;
        if coordinator_request_id <= 0 {
            return Err(PayCoordError::InvalidRequestId(coordinator_request_id));
        }

        if now > offer.valid_until_ts {
            let order = PaymentOrder {
                payee_id,
                offer_id,
                payer_id,
                payer_seqnum,
                coordinator_request_id,
                debtor_id,
                amount,
                reciprocal_debtor_id: offer.reciprocal_debtor_id,
                reciprocal_amount: offer.reciprocal_amount,
                payer_note: None,
                proof_secret: None,
                payment_transfer_id: None,
                reciprocal_payment_transfer_id: None,
                finalized_at_ts: Some(now),
                proof_id: None,
            };
            let signal = OutboundSignal::FailedPayment {
                payee_id,
                offer_id,
                payer_id,
                payer_seqnum,
                error_code: "PAY006".to_string(),
            };
            self.db.insert_order_with_signals(&order, vec![signal])?;
            warn!(payee_id, offer_id, payer_id, payer_seqnum, "offer expired at order creation");
            return Ok(());
        }

        let order = PaymentOrder {
            payee_id,
            offer_id,
            payer_id,
            payer_seqnum,
            coordinator_request_id,
            debtor_id,
            amount,
            reciprocal_debtor_id: offer.reciprocal_debtor_id,
            reciprocal_amount: offer.reciprocal_amount,
            payer_note,
            proof_secret: Some(proof_secret),
            payment_transfer_id: None,
            reciprocal_payment_transfer_id: None,
            finalized_at_ts: None,
            proof_id: None,
        };
        self.db.insert_order_with_signals(&order, vec![])?;
        info!(payee_id, offer_id, payer_id, payer_seqnum, coordinator_request_id, "payment order created");

        // `key_guard`/`_held` above are still in scope here — advance the
        // freshly-inserted order directly rather than re-locking its key
        // (the per-order `Mutex` is not reentrant).
        self.try_advance_locked(order, now)
    }

    /// C4 "try advance" (§4.2.2 step 2), entered from outside with no lock
    /// held yet. Takes the order's exclusive lock, re-reads it, and
    /// delegates to [`Self::try_advance_locked`].
    pub fn try_advance(
        &self,
        payee_id: PayeeId,
        offer_id: OfferId,
        payer_id: PayerId,
        payer_seqnum: PayerSeqnum,
        now: Timestamp,
    ) -> Result<(), PayCoordError> {
        let guard = self
            .locks
            .lock_order_by_key(payee_id, offer_id, payer_id, payer_seqnum);
        let _held = guard.held();

        let order = match self.db.get_order(payee_id, offer_id, payer_id, payer_seqnum)? {
            Some(o) => o,
            None => return Ok(()),
        };
        self.try_advance_locked(order, now)
    }

    /// The body of "try advance", assuming the caller already holds the
    /// exclusive lock on `order`'s key and `order` reflects the latest
    /// write under that lock. Never takes a lock itself — callers that
    /// already hold one (`make_payment_order`, `on_prepared`) call this
    /// directly instead of going through [`Self::try_advance`] and
    /// deadlocking on their own mutex.
    fn try_advance_locked(&self, order: PaymentOrder, now: Timestamp) -> Result<(), PayCoordError> {
        match order.live_state() {
            OrderState::LiveNeedsPrimary => {
                let signal = OutboundSignal::PrepareTransfer {
                    coordinator_request_id: order.coordinator_request_id,
                    sender_id: order.payer_id,
                    recipient_id: order.payee_id,
                    debtor_id: order.debtor_id,
                    amount: order.amount,
                };
                self.db.put_order_with_signals(&order, vec![signal])?;
                Ok(())
            }
            OrderState::LiveNeedsReciprocal => {
                let signal = OutboundSignal::PrepareTransfer {
                    coordinator_request_id: -order.coordinator_request_id,
                    sender_id: order.payee_id,
                    recipient_id: order.payer_id,
                    debtor_id: order.reciprocal_debtor_id.unwrap_or(0),
                    amount: order.reciprocal_amount,
                };
                self.db.put_order_with_signals(&order, vec![signal])?;
                Ok(())
            }
            OrderState::LiveReadyToCommit => self.commit(order, now),
            OrderState::FinalizedSuccess | OrderState::FinalizedFailure => Ok(()),
        }
    }

    /// C4 commit path (§4.2.4). Re-locks the offer exclusively, finalizes
    /// the winning order, aborts every other live order against the same
    /// offer, inserts the proof, and deletes the offer — all as one store
    /// transaction.
    fn commit(&self, mut order: PaymentOrder, now: Timestamp) -> Result<(), PayCoordError> {
        let offer_guard = self.locks.lock_offer_exclusive(order.payee_id, order.offer_id);
        let _offer_held = offer_guard.held();

        let offer = self
            .db
            .get_offer(order.payee_id, order.offer_id)?
            .ok_or(PayCoordError::OfferNotFound)?;

        let mut signals = Vec::new();
        if let Some(transfer_id) = order.payment_transfer_id {
            signals.push(OutboundSignal::FinalizePreparedTransfer {
                payee_id: order.payee_id,
                debtor_id: order.debtor_id,
                sender_id: order.payer_id,
                recipient_id: order.payee_id,
                transfer_id,
                coordinator_request_id: order.coordinator_request_id,
                committed_amount: order.amount,
                info: Some(FinalizeInfo {
                    offer_id: order.offer_id,
                    leg: Leg::Primary,
                }),
            });
        }
        if let Some(transfer_id) = order.reciprocal_payment_transfer_id {
            signals.push(OutboundSignal::FinalizePreparedTransfer {
                payee_id: order.payee_id,
                debtor_id: order.reciprocal_debtor_id.unwrap_or(0),
                sender_id: order.payee_id,
                recipient_id: order.payer_id,
                transfer_id,
                coordinator_request_id: -order.coordinator_request_id,
                committed_amount: order.reciprocal_amount,
                info: Some(FinalizeInfo {
                    offer_id: order.offer_id,
                    leg: Leg::Reciprocal,
                }),
            });
        }

        let proof_id = self.db.next_proof_id(order.payee_id)?;
        let proof = PaymentProof {
            payee_id: order.payee_id,
            proof_id,
            proof_secret: order.proof_secret.clone().unwrap_or_else(|| Secret::from_bytes(vec![])),
            payer_id: order.payer_id,
            debtor_id: order.debtor_id,
            amount: order.amount,
            payer_note: order.payer_note.clone(),
            reciprocal_debtor_id: order.reciprocal_debtor_id,
            reciprocal_amount: order.reciprocal_amount,
            paid_at_ts: now,
            offer_id: offer.offer_id,
            offer_created_at_ts: offer.created_at_ts,
            offer_description: offer.description.clone(),
        };
        signals.push(OutboundSignal::SuccessfulPayment {
            payee_id: order.payee_id,
            offer_id: order.offer_id,
            payer_id: order.payer_id,
            payer_seqnum: order.payer_seqnum,
            proof_id,
        });

        order.payer_note = None;
        order.proof_secret = None;
        order.finalized_at_ts = Some(now);
        order.proof_id = Some(proof_id);

        // Lock every other live order on this offer before touching it, the
        // same way `cancel_offer` does — otherwise a concurrent prepared/
        // rejected signal for one of them could race the abort this commit
        // is about to write. The guards are collected up front (so the Vec
        // never reallocates once we start calling `.held()` on its
        // elements) and held until `commit_offer_payment` below has
        // finished writing.
        let mut other_keys = Vec::new();
        for other in self.db.iter_orders_for_offer(offer.payee_id, offer.offer_id)? {
            if other.key() != order.key() && !other.is_finalized() {
                other_keys.push(other.key());
            }
        }
        let order_guards: Vec<_> = other_keys
            .iter()
            .map(|&(p, o, pr, sq)| self.locks.lock_order_by_key(p, o, pr, sq))
            .collect();

        let mut aborted_orders = Vec::new();
        let mut held_guards = Vec::with_capacity(order_guards.len());
        for (guard, &(p, o, pr, sq)) in order_guards.iter().zip(other_keys.iter()) {
            held_guards.push(guard.held());
            let fresh = match self.db.get_order(p, o, pr, sq)? {
                Some(ord) if !ord.is_finalized() => ord,
                _ => continue,
            };
            let (aborted, mut abort_signals) = build_abort(&fresh, "OFFER_PAID", now);
            signals.append(&mut abort_signals);
            aborted_orders.push(aborted);
        }

        self.db.commit_offer_payment(
            offer.payee_id,
            offer.offer_id,
            &order,
            &aborted_orders,
            &proof,
            signals,
        )?;
        info!(payee_id = order.payee_id, offer_id = order.offer_id, proof_id, "payment committed");
        Ok(())
    }

    /// C5→C4 `on_prepared_payment_transfer_signal` (§4.2.3).
    #[allow(clippy::too_many_arguments)]
    pub fn on_prepared(
        &self,
        coordinator_id: PayeeId,
        coordinator_request_id: CoordinatorRequestId,
        debtor_id: DebtorId,
        sender_id: i64,
        recipient_id: i64,
        transfer_id: i64,
        locked_amount: Amount,
        now: Timestamp,
    ) -> Result<(), PayCoordError> {
        // The index is keyed by the always-positive id assigned at order
        // creation; the reciprocal leg is addressed by its negation. Resolve
        // the order's four-part key first so the rest of this handler locks
        // on the exact same mutex `make_payment_order`/`try_advance`/`cancel_offer`
        // use for this order — a lock keyed on the request id alone would be
        // a second, unsynchronized lock domain for the same row.
        let is_reciprocal = coordinator_request_id < 0;
        let lookup = self
            .db
            .get_order_by_request_id(coordinator_id, coordinator_request_id.abs())?;
        let key = match &lookup {
            Some(o) => o.key(),
            None => {
                self.release_orphan(
                    coordinator_id,
                    debtor_id,
                    sender_id,
                    recipient_id,
                    transfer_id,
                    coordinator_request_id,
                )?;
                return Ok(());
            }
        };

        let guard = self.locks.lock_order_by_key(key.0, key.1, key.2, key.3);
        let _held = guard.held();

        // Re-read under the lock: the lookup above ran unlocked, so the row
        // may have changed (or vanished via housekeeping) by now.
        let order = self.db.get_order(key.0, key.1, key.2, key.3)?;

        let mut order = match order {
            Some(o) if !o.is_finalized() => o,
            _ => {
                self.release_orphan(
                    coordinator_id,
                    debtor_id,
                    sender_id,
                    recipient_id,
                    transfer_id,
                    coordinator_request_id,
                )?;
                return Ok(());
            }
        };

        let existing_slot = if is_reciprocal {
            order.reciprocal_payment_transfer_id
        } else {
            order.payment_transfer_id
        };

        match existing_slot {
            Some(existing) if existing == transfer_id => return Ok(()), // redelivery, no-op
            Some(_) => {
                self.release_orphan(
                    coordinator_id,
                    debtor_id,
                    sender_id,
                    recipient_id,
                    transfer_id,
                    coordinator_request_id,
                )?;
                return Ok(());
            }
            None => {}
        }

        let leg_matches = if is_reciprocal {
            order.reciprocal_debtor_id == Some(debtor_id)
                && order.reciprocal_amount == locked_amount
                && sender_id == order.payee_id
                && recipient_id == order.payer_id
        } else {
            order.debtor_id == debtor_id
                && order.amount == locked_amount
                && sender_id == order.payer_id
                && recipient_id == order.payee_id
        };
        if !leg_matches {
            return Err(PayCoordError::PreparedLegMismatch {
                payee_id: order.payee_id,
                offer_id: order.offer_id,
            });
        }

        if is_reciprocal {
            order.reciprocal_payment_transfer_id = Some(transfer_id);
        } else {
            order.payment_transfer_id = Some(transfer_id);
        }
        self.db.put_order_with_signals(&order, vec![])?;

        // `guard`/`_held` above are still in scope — advance using the
        // lock already held rather than calling the lock-taking `try_advance`.
        self.try_advance_locked(order, now)
    }

    /// Reject `make_payment_order` before any order row exists (PAY001/
    /// PAY002/PAY003 — offer not found, wrong debtor, wrong amount). Per
    /// SPEC_FULL §8 boundary behaviors no `PaymentOrder` is persisted for
    /// these; only the `FailedPayment` signal is, so callers and idempotent
    /// redelivery have nothing stored to correlate against. `error` must be
    /// one of the variants `PayCoordError::pay_code()` maps to a PAY-code.
    fn emit_validation_failure(
        &self,
        payee_id: PayeeId,
        offer_id: OfferId,
        payer_id: PayerId,
        payer_seqnum: PayerSeqnum,
        error: PayCoordError,
    ) -> Result<(), PayCoordError> {
        let error_code = error.pay_code().unwrap_or("UNKNOWN").to_string();
        let signal = OutboundSignal::FailedPayment {
            payee_id,
            offer_id,
            payer_id,
            payer_seqnum,
            error_code,
        };
        self.db.append_signal(signal)?;
        warn!(payee_id, offer_id, payer_id, payer_seqnum, %error, "payment order rejected before creation");
        Ok(())
    }

    /// Release a prepared transfer the coordinator no longer recognizes
    /// (order gone, finalized, or slot filled by a different transfer).
    fn release_orphan(
        &self,
        payee_id: PayeeId,
        debtor_id: DebtorId,
        sender_id: i64,
        recipient_id: i64,
        transfer_id: i64,
        coordinator_request_id: CoordinatorRequestId,
    ) -> Result<(), PayCoordError> {
        let signal = OutboundSignal::FinalizePreparedTransfer {
            payee_id,
            debtor_id,
            sender_id,
            recipient_id,
            transfer_id,
            coordinator_request_id,
            committed_amount: 0,
            info: None,
        };
        self.db.append_signal(signal)?;
        warn!(payee_id, coordinator_request_id, transfer_id, "releasing orphaned prepared transfer");
        Ok(())
    }

    /// C5→C4 `on_rejected_payment_transfer_signal` (§4.2.5).
    pub fn on_rejected(
        &self,
        coordinator_id: PayeeId,
        coordinator_request_id: CoordinatorRequestId,
        details: serde_json::Value,
        now: Timestamp,
    ) -> Result<(), PayCoordError> {
        // Same key-resolution dance as `on_prepared`: lock on the order's
        // four-part key, not a second lock domain keyed by request id.
        let lookup = self
            .db
            .get_order_by_request_id(coordinator_id, coordinator_request_id.abs())?;
        let key = match &lookup {
            Some(o) => o.key(),
            None => return Ok(()),
        };
        let guard = self.locks.lock_order_by_key(key.0, key.1, key.2, key.3);
        let _held = guard.held();

        let order = match self.db.get_order(key.0, key.1, key.2, key.3)? {
            Some(o) if !o.is_finalized() => o,
            _ => return Ok(()),
        };

        let error_code = if coordinator_request_id < 0 {
            "PAY005".to_string()
        } else {
            details
                .get("error_code")
                .and_then(|v| v.as_str())
                .unwrap_or("UNKNOWN")
                .to_string()
        };

        let (aborted, signals) = build_abort(&order, &error_code, now);
        self.db.put_order_with_signals(&aborted, signals)?;
        Ok(())
    }
}
