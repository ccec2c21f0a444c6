use serde::{Deserialize, Serialize};

use crate::types::{
    Amount, AnnouncementId, CoordinatorRequestId, DebtorId, OfferId, PayeeId, PayerId,
    PayerSeqnum, ProofId, Timestamp, TransferId,
};

/// Which leg a `FinalizePreparedTransfer` settles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Leg {
    Primary,
    Reciprocal,
}

/// Present on a `FinalizePreparedTransfer` that actually commits a leg
/// (§4.2.4 step 2); absent on an orphan release (§4.2.3), since an orphan
/// carries no known offer to attribute the commit to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinalizeInfo {
    pub offer_id: OfferId,
    pub leg: Leg,
}

/// Rows inserted into the outbound signal log (outbox pattern, C2). Each
/// is written in the same store transaction as the mutation that produced
/// it; an external relay drains this log and publishes independently.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum OutboundSignal {
    CreatedOffer {
        payee_id: PayeeId,
        offer_id: OfferId,
        announcement_id: AnnouncementId,
        offer_secret_b64: String,
        created_at_ts: Timestamp,
    },
    CanceledOffer {
        payee_id: PayeeId,
        offer_id: OfferId,
    },
    PrepareTransfer {
        coordinator_request_id: CoordinatorRequestId,
        sender_id: i64,
        recipient_id: i64,
        debtor_id: DebtorId,
        amount: Amount,
    },
    FinalizePreparedTransfer {
        payee_id: PayeeId,
        debtor_id: DebtorId,
        sender_id: i64,
        recipient_id: i64,
        transfer_id: TransferId,
        coordinator_request_id: CoordinatorRequestId,
        committed_amount: Amount,
        info: Option<FinalizeInfo>,
    },
    SuccessfulPayment {
        payee_id: PayeeId,
        offer_id: OfferId,
        payer_id: PayerId,
        payer_seqnum: PayerSeqnum,
        proof_id: ProofId,
    },
    FailedPayment {
        payee_id: PayeeId,
        offer_id: OfferId,
        payer_id: PayerId,
        payer_seqnum: PayerSeqnum,
        error_code: String,
    },
}

/// Inbound message: `create_offer` actor payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateOfferMsg {
    pub payee_id: PayeeId,
    pub announcement_id: AnnouncementId,
    pub debtor_ids: Vec<DebtorId>,
    pub debtor_amounts: Vec<Option<Amount>>,
    pub valid_until_ts: Timestamp,
    pub description: Option<serde_json::Value>,
    pub reciprocal_debtor_id: Option<DebtorId>,
    pub reciprocal_amount: Amount,
}

/// Inbound message: `cancel_offer` actor payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CancelOfferMsg {
    pub payee_id: PayeeId,
    pub offer_id: OfferId,
    pub offer_secret_b64: String,
}

/// Inbound message: `make_payment_order` actor payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MakePaymentOrderMsg {
    pub payee_id: PayeeId,
    pub offer_id: OfferId,
    pub offer_secret_b64: String,
    pub payer_id: PayerId,
    pub payer_seqnum: PayerSeqnum,
    pub debtor_id: DebtorId,
    pub amount: Amount,
    pub proof_secret_b64: String,
    pub payer_note: Option<serde_json::Value>,
}

/// Inbound message: `on_prepared_payment_transfer_signal`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreparedTransferMsg {
    pub debtor_id: DebtorId,
    pub sender_id: i64,
    pub transfer_id: TransferId,
    pub coordinator_type: String,
    pub recipient_id: i64,
    pub sender_locked_amount: Amount,
    pub prepared_at_ts: Timestamp,
    pub coordinator_id: PayeeId,
    pub coordinator_request_id: CoordinatorRequestId,
}

/// Inbound message: `on_rejected_payment_transfer_signal`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RejectedTransferMsg {
    pub coordinator_type: String,
    pub coordinator_id: PayeeId,
    pub coordinator_request_id: CoordinatorRequestId,
    pub details: serde_json::Value,
}

/// The envelope one line of the `serve` subcommand's NDJSON stdin feed is
/// deserialized into. One variant per actor in SPEC_FULL §6.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    #[serde(rename = "create_offer")]
    CreateOffer(CreateOfferMsg),
    #[serde(rename = "cancel_offer")]
    CancelOffer(CancelOfferMsg),
    #[serde(rename = "make_payment_order")]
    MakePaymentOrder(MakePaymentOrderMsg),
    #[serde(rename = "on_prepared_payment_transfer_signal")]
    Prepared(PreparedTransferMsg),
    #[serde(rename = "on_rejected_payment_transfer_signal")]
    Rejected(RejectedTransferMsg),
}
