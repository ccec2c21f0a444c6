use thiserror::Error;

use crate::types::{CoordinatorRequestId, OfferId, PayeeId};

#[derive(Debug, Error)]
pub enum PayCoordError {
    // ── Storage / serialization ──────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    // ── Offer registry validation ────────────────────────────────────────────
    #[error("debtor_ids and debtor_amounts must have equal length")]
    RouteLengthMismatch,

    #[error("reciprocal_amount must be >= 0")]
    NegativeReciprocalAmount,

    #[error("reciprocal_debtor_id absent but reciprocal_amount is nonzero")]
    ReciprocalAmountWithoutDebtor,

    #[error("exactly one of description or reciprocal_debtor_id must be present")]
    DescriptionReciprocalConflict,

    // ── Payment-order business errors (§4.2.6 PAY-codes) ─────────────────────
    #[error("offer not found or wrong secret")]
    OfferNotFound,

    #[error("debtor not in the offer's accepted routes")]
    DebtorNotAccepted,

    #[error("amount does not match the route")]
    AmountMismatch,

    #[error("offer was canceled by payee while order was live")]
    OfferCanceled,

    #[error("reciprocal transfer could not be prepared")]
    ReciprocalRejected,

    #[error("offer expired before order was accepted")]
    OfferExpired,

    // ── Invariant / assertion failures ───────────────────────────────────────
    #[error("coordinator_request_id must be > 0, got {0}")]
    InvalidRequestId(CoordinatorRequestId),

    #[error("prepared-transfer leg mismatch for order {offer_id} of payee {payee_id}")]
    PreparedLegMismatch {
        payee_id: PayeeId,
        offer_id: OfferId,
    },

    #[error("{0}")]
    Other(String),
}

impl PayCoordError {
    /// The PAY-code string carried in a `FailedPayment.details.error_code`,
    /// for the variants that represent a business failure. `None` for
    /// errors that never surface as a coordinator-originated PAY-code
    /// (e.g. a passthrough error_code from the accounts service).
    pub fn pay_code(&self) -> Option<&'static str> {
        match self {
            PayCoordError::OfferNotFound => Some("PAY001"),
            PayCoordError::DebtorNotAccepted => Some("PAY002"),
            PayCoordError::AmountMismatch => Some("PAY003"),
            PayCoordError::OfferCanceled => Some("PAY004"),
            PayCoordError::ReciprocalRejected => Some("PAY005"),
            PayCoordError::OfferExpired => Some("PAY006"),
            _ => None,
        }
    }
}
