use std::sync::Arc;

use paycoord_store::StoreDb;

use crate::locks::LockTable;

/// The payment coordinator: C3 (offer registry), C4 (payment order
/// engine), C5 (transfer-signal router) and C6 (housekeeping) are all
/// methods on this single handle, mirroring the reference state engine's
/// "one engine struct, one db handle, operations as inherent methods"
/// shape — split across `registry.rs`, `orders.rs`, `router.rs` and
/// `housekeeping.rs` by responsibility rather than by file-per-struct.
pub struct PayCoordEngine {
    pub db: Arc<StoreDb>,
    pub(crate) locks: LockTable,
}

impl PayCoordEngine {
    pub fn new(db: Arc<StoreDb>) -> Self {
        Self {
            db,
            locks: LockTable::new(),
        }
    }
}
