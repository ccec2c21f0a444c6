use paycoord_core::signal::{PreparedTransferMsg, RejectedTransferMsg};
use paycoord_core::types::Timestamp;
use paycoord_core::PayCoordError;

use crate::engine::PayCoordEngine;

const COORDINATOR_TYPE: &str = "payment";

impl PayCoordEngine {
    /// C5: dispatch an inbound `on_prepared_payment_transfer_signal` to the
    /// payment order engine. Stateless beyond the `coordinator_type`
    /// assertion — everything else is §4.2.3.
    pub fn on_prepared_signal(
        &self,
        msg: PreparedTransferMsg,
        now: Timestamp,
    ) -> Result<(), PayCoordError> {
        if msg.coordinator_type != COORDINATOR_TYPE {
            return Err(PayCoordError::Other(format!(
                "unexpected coordinator_type {:?} on prepared signal",
                msg.coordinator_type
            )));
        }
        self.on_prepared(
            msg.coordinator_id,
            msg.coordinator_request_id,
            msg.debtor_id,
            msg.sender_id,
            msg.recipient_id,
            msg.transfer_id,
            msg.sender_locked_amount,
            now,
        )
    }

    /// C5: dispatch an inbound `on_rejected_payment_transfer_signal`.
    pub fn on_rejected_signal(
        &self,
        msg: RejectedTransferMsg,
        now: Timestamp,
    ) -> Result<(), PayCoordError> {
        if msg.coordinator_type != COORDINATOR_TYPE {
            return Err(PayCoordError::Other(format!(
                "unexpected coordinator_type {:?} on rejected signal",
                msg.coordinator_type
            )));
        }
        self.on_rejected(msg.coordinator_id, msg.coordinator_request_id, msg.details, now)
    }
}
