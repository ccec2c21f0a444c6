use serde::{Deserialize, Serialize};

use crate::sanitize::sanitize_amount;
use crate::secret::Secret;
use crate::types::{
    Amount, CoordinatorRequestId, DebtorId, OfferId, PayeeId, PayerId, PayerSeqnum, ProofId,
    Timestamp, TransferId,
};

/// The payee's published invitation. Never mutated after creation — only
/// read-locked or deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Offer {
    pub payee_id: PayeeId,
    pub offer_id: OfferId,
    pub offer_secret: Secret,
    pub debtor_ids: Vec<DebtorId>,
    pub debtor_amounts: Vec<Option<Amount>>,
    pub description: Option<serde_json::Value>,
    pub reciprocal_debtor_id: Option<DebtorId>,
    pub reciprocal_amount: Amount,
    pub valid_until_ts: Timestamp,
    pub created_at_ts: Timestamp,
}

impl Offer {
    /// True if `debtor_id` is one of the accepted routes and `amount`
    /// matches the amount advertised for that route. Both the route's
    /// advertised amount and the caller's claimed amount are zero-sanitized
    /// before comparing (§4.2, step 1).
    pub fn accepts(&self, debtor_id: DebtorId, amount: Amount) -> bool {
        let sanitized_claim = sanitize_amount(Some(amount));
        self.debtor_ids
            .iter()
            .zip(self.debtor_amounts.iter())
            .any(|(&d, &a)| d == debtor_id && sanitize_amount(a) == sanitized_claim)
    }

    pub fn has_reciprocal(&self) -> bool {
        self.reciprocal_debtor_id.is_some()
    }
}

/// The logical (derived) state of a [`PaymentOrder`]. Never stored —
/// computed fresh from field presence every time it is needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderState {
    LiveNeedsPrimary,
    LiveNeedsReciprocal,
    LiveReadyToCommit,
    FinalizedSuccess,
    FinalizedFailure,
}

/// A payer's attempt to pay one offer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub payee_id: PayeeId,
    pub offer_id: OfferId,
    pub payer_id: PayerId,
    pub payer_seqnum: PayerSeqnum,
    pub coordinator_request_id: CoordinatorRequestId,
    pub debtor_id: DebtorId,
    pub amount: Amount,
    pub reciprocal_debtor_id: Option<DebtorId>,
    pub reciprocal_amount: Amount,
    pub payer_note: Option<serde_json::Value>,
    pub proof_secret: Option<Secret>,
    pub payment_transfer_id: Option<TransferId>,
    pub reciprocal_payment_transfer_id: Option<TransferId>,
    pub finalized_at_ts: Option<Timestamp>,
    /// Set only by the commit path (§4.2.4), never by abort. Recording it
    /// is what lets `live_state()` tell `FinalizedSuccess` apart from
    /// `FinalizedFailure` without consulting the proof table: the two
    /// finalization paths are mutually exclusive in the engine, so this
    /// field alone reconstructs which one happened.
    pub proof_id: Option<ProofId>,
}

impl PaymentOrder {
    pub fn needs_reciprocal(&self) -> bool {
        self.reciprocal_debtor_id.is_some() && self.reciprocal_amount > 0
    }

    /// Pure function from field presence to logical state — see
    /// SPEC_FULL §9 "state is derived, not stored".
    pub fn live_state(&self) -> OrderState {
        if self.finalized_at_ts.is_some() {
            return if self.proof_id.is_some() {
                OrderState::FinalizedSuccess
            } else {
                OrderState::FinalizedFailure
            };
        }
        if self.payment_transfer_id.is_none() {
            if self.amount > 0 {
                return OrderState::LiveNeedsPrimary;
            }
            // amount == 0: the primary leg needs no transfer at all.
            return if self.needs_reciprocal() && self.reciprocal_payment_transfer_id.is_none() {
                OrderState::LiveNeedsReciprocal
            } else {
                OrderState::LiveReadyToCommit
            };
        }
        if self.needs_reciprocal() && self.reciprocal_payment_transfer_id.is_none() {
            return OrderState::LiveNeedsReciprocal;
        }
        OrderState::LiveReadyToCommit
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized_at_ts.is_some()
    }

    /// The four-part identity key used to detect redelivered creates.
    pub fn key(&self) -> (PayeeId, OfferId, PayerId, PayerSeqnum) {
        (self.payee_id, self.offer_id, self.payer_id, self.payer_seqnum)
    }
}

/// Immutable receipt persisted on a successful payment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentProof {
    pub payee_id: PayeeId,
    pub proof_id: ProofId,
    pub proof_secret: Secret,
    pub payer_id: PayerId,
    pub debtor_id: DebtorId,
    pub amount: Amount,
    pub payer_note: Option<serde_json::Value>,
    pub reciprocal_debtor_id: Option<DebtorId>,
    pub reciprocal_amount: Amount,
    pub paid_at_ts: Timestamp,
    pub offer_id: OfferId,
    pub offer_created_at_ts: Timestamp,
    pub offer_description: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_order() -> PaymentOrder {
        PaymentOrder {
            payee_id: 1,
            offer_id: 1,
            payer_id: 2,
            payer_seqnum: 8765,
            coordinator_request_id: 1,
            debtor_id: -1,
            amount: 1000,
            reciprocal_debtor_id: None,
            reciprocal_amount: 0,
            payer_note: None,
            proof_secret: Some(Secret::generate(6)),
            payment_transfer_id: None,
            reciprocal_payment_transfer_id: None,
            finalized_at_ts: None,
            proof_id: None,
        }
    }

    #[test]
    fn needs_primary_before_any_prepare() {
        assert_eq!(base_order().live_state(), OrderState::LiveNeedsPrimary);
    }

    #[test]
    fn ready_to_commit_once_primary_prepared_with_no_reciprocal() {
        let mut o = base_order();
        o.payment_transfer_id = Some(333);
        assert_eq!(o.live_state(), OrderState::LiveReadyToCommit);
    }

    #[test]
    fn needs_reciprocal_after_primary_when_offer_has_one() {
        let mut o = base_order();
        o.reciprocal_debtor_id = Some(-3);
        o.reciprocal_amount = 500;
        o.payment_transfer_id = Some(333);
        assert_eq!(o.live_state(), OrderState::LiveNeedsReciprocal);
        o.reciprocal_payment_transfer_id = Some(334);
        assert_eq!(o.live_state(), OrderState::LiveReadyToCommit);
    }

    #[test]
    fn zero_amount_order_is_ready_immediately() {
        let mut o = base_order();
        o.amount = 0;
        assert_eq!(o.live_state(), OrderState::LiveReadyToCommit);
    }

    #[test]
    fn finalized_success_requires_proof_id() {
        let mut o = base_order();
        o.finalized_at_ts = Some(42);
        o.proof_id = Some(7);
        assert_eq!(o.live_state(), OrderState::FinalizedSuccess);
    }

    #[test]
    fn finalized_without_proof_is_failure() {
        let mut o = base_order();
        o.finalized_at_ts = Some(42);
        assert_eq!(o.live_state(), OrderState::FinalizedFailure);
    }
}
