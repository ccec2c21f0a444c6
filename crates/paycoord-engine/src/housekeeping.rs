use paycoord_core::types::Timestamp;
use paycoord_core::PayCoordError;
use tracing::info;

use crate::engine::PayCoordEngine;

impl PayCoordEngine {
    /// C6 `flush_orders`: deletes finalized PaymentOrders with
    /// `finalized_at_ts <= cutoff_ts`. Live orders are never touched.
    pub fn flush_orders(&self, cutoff_ts: Timestamp) -> Result<u64, PayCoordError> {
        let deleted = self.db.flush_orders(cutoff_ts)?;
        info!(cutoff_ts, deleted, "flushed payment orders");
        Ok(deleted)
    }

    /// C6 `flush_proofs`: deletes PaymentProofs with
    /// `paid_at_ts <= cutoff_ts`.
    pub fn flush_proofs(&self, cutoff_ts: Timestamp) -> Result<u64, PayCoordError> {
        let deleted = self.db.flush_proofs(cutoff_ts)?;
        info!(cutoff_ts, deleted, "flushed payment proofs");
        Ok(deleted)
    }
}
