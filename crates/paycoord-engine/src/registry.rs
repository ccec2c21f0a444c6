use paycoord_core::model::{Offer, PaymentProof};
use paycoord_core::secret::Secret;
use paycoord_core::signal::OutboundSignal;
use paycoord_core::types::{AnnouncementId, Amount, DebtorId, OfferId, PayeeId, ProofId, Timestamp};
use paycoord_core::PayCoordError;
use tracing::info;

use crate::engine::PayCoordEngine;
use crate::orders::build_abort;

/// Default length for a freshly generated offer secret. The source
/// requires at least 6 bytes; this is comfortably above that.
const OFFER_SECRET_LEN: usize = 18;

impl PayCoordEngine {
    /// C3 `create_offer` (§4.1). Validates the cross-field rules of §3,
    /// generates a fresh secret, and inserts the offer together with its
    /// `CreatedOffer` signal in one store transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn create_offer(
        &self,
        payee_id: PayeeId,
        announcement_id: AnnouncementId,
        debtor_ids: Vec<DebtorId>,
        debtor_amounts: Vec<Option<Amount>>,
        valid_until_ts: Timestamp,
        description: Option<serde_json::Value>,
        reciprocal_debtor_id: Option<DebtorId>,
        reciprocal_amount: Amount,
        now: Timestamp,
    ) -> Result<Offer, PayCoordError> {
        if debtor_ids.len() != debtor_amounts.len() {
            return Err(PayCoordError::RouteLengthMismatch);
        }
        if reciprocal_amount < 0 {
            return Err(PayCoordError::NegativeReciprocalAmount);
        }
        if reciprocal_debtor_id.is_none() && reciprocal_amount != 0 {
            return Err(PayCoordError::ReciprocalAmountWithoutDebtor);
        }
        let has_description = description.is_some();
        let has_reciprocal = reciprocal_debtor_id.is_some();
        if has_description == has_reciprocal {
            return Err(PayCoordError::DescriptionReciprocalConflict);
        }

        let offer_id = self.db.next_offer_id(payee_id)?;
        let offer_secret = Secret::generate(OFFER_SECRET_LEN);
        let offer = Offer {
            payee_id,
            offer_id,
            offer_secret: offer_secret.clone(),
            debtor_ids,
            debtor_amounts,
            description,
            reciprocal_debtor_id,
            reciprocal_amount,
            valid_until_ts,
            created_at_ts: now,
        };

        let signal = OutboundSignal::CreatedOffer {
            payee_id,
            offer_id,
            announcement_id,
            offer_secret_b64: offer_secret.to_base64url(),
            created_at_ts: now,
        };
        self.db.insert_offer_with_signal(&offer, signal)?;
        info!(payee_id, offer_id, "offer created");
        Ok(offer)
    }

    /// C3 `cancel_offer` (§4.1). A no-op if the offer is absent or the
    /// secret doesn't match. Otherwise aborts every non-finalized order
    /// against the offer, then deletes it and emits `CanceledOffer` — both
    /// under the offer's exclusive lock, per SPEC_FULL §9
    /// "abort-on-cancel must hold the offer lock".
    pub fn cancel_offer(
        &self,
        payee_id: PayeeId,
        offer_id: OfferId,
        offer_secret: &Secret,
        now: Timestamp,
    ) -> Result<(), PayCoordError> {
        let guard = self.locks.lock_offer_exclusive(payee_id, offer_id);
        let _held = guard.held();

        let offer = match self.db.get_offer(payee_id, offer_id)? {
            Some(o) => o,
            None => return Ok(()),
        };
        if !offer.offer_secret.ct_eq(offer_secret) {
            return Ok(());
        }

        for order in self.db.iter_orders_for_offer(payee_id, offer_id)? {
            if order.is_finalized() {
                continue;
            }
            let order_guard = self
                .locks
                .lock_order_by_key(order.payee_id, order.offer_id, order.payer_id, order.payer_seqnum);
            let _order_held = order_guard.held();
            let (aborted, signals) = build_abort(&order, "PAY004", now);
            self.db.put_order_with_signals(&aborted, signals)?;
        }

        self.db.delete_offer_with_signals(
            payee_id,
            offer_id,
            vec![OutboundSignal::CanceledOffer { payee_id, offer_id }],
        )?;
        info!(payee_id, offer_id, "offer canceled");
        Ok(())
    }

    /// Read-only lookup; returns the offer only if `offer_secret` matches
    /// byte-for-byte under a constant-time comparison.
    pub fn get_offer(
        &self,
        payee_id: PayeeId,
        offer_id: OfferId,
        offer_secret: &Secret,
    ) -> Result<Option<Offer>, PayCoordError> {
        match self.db.get_offer(payee_id, offer_id)? {
            Some(offer) if offer.offer_secret.ct_eq(offer_secret) => Ok(Some(offer)),
            _ => Ok(None),
        }
    }

    /// Read-only lookup; returns the proof only if `proof_secret` matches
    /// byte-for-byte under a constant-time comparison.
    pub fn get_proof(
        &self,
        payee_id: PayeeId,
        proof_id: ProofId,
        proof_secret: &Secret,
    ) -> Result<Option<PaymentProof>, PayCoordError> {
        match self.db.get_proof(payee_id, proof_id)? {
            Some(proof) if proof.proof_secret.ct_eq(proof_secret) => Ok(Some(proof)),
            _ => Ok(None),
        }
    }
}

