use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use paycoord_core::types::{OfferId, PayeeId, PayerId, PayerSeqnum};

/// Emulates the row-level locking discipline of SPEC_FULL §5 on top of a
/// store (sled) that has no row-lock primitive of its own: one `RwLock`
/// per offer (shared for order creation, exclusive for cancel/commit), and
/// one `Mutex` per payment order (exclusive, for create/advance/prepared/
/// rejected handling — every entry point for a given order locks on the
/// same four-part key, never a second lock domain keyed by request id,
/// so a signal handler and an advance call for the same order can never
/// interleave).
///
/// These maps only ever grow for the lifetime of the process — a held
/// lock's entry is never evicted while in use, and an idle entry costs one
/// `Arc` + a no-op lock. A production build would trim entries behind a
/// periodic sweep; this workspace does not need that yet.
#[derive(Default)]
pub struct LockTable {
    offers: Mutex<HashMap<(PayeeId, OfferId), Arc<RwLock<()>>>>,
    orders_by_key: Mutex<HashMap<(PayeeId, OfferId, PayerId, PayerSeqnum), Arc<Mutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn offer_entry(&self, payee_id: PayeeId, offer_id: OfferId) -> Arc<RwLock<()>> {
        let mut map = self.offers.lock().expect("offer lock table poisoned");
        map.entry((payee_id, offer_id))
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Shared lock on an Offer row (order creation).
    pub fn lock_offer_shared(&self, payee_id: PayeeId, offer_id: OfferId) -> OfferReadGuard {
        let lock = self.offer_entry(payee_id, offer_id);
        OfferReadGuard { lock }
    }

    /// Exclusive lock on an Offer row (cancel, commit).
    pub fn lock_offer_exclusive(&self, payee_id: PayeeId, offer_id: OfferId) -> OfferWriteGuard {
        let lock = self.offer_entry(payee_id, offer_id);
        OfferWriteGuard { lock }
    }

    /// Exclusive lock keyed by the order's four-part identity. Every
    /// order-specific entry point (create, advance, prepared/rejected
    /// signal handling, the commit path's abort of other live orders)
    /// takes this same lock for the same key, so none of them can
    /// interleave on one order.
    pub fn lock_order_by_key(
        &self,
        payee_id: PayeeId,
        offer_id: OfferId,
        payer_id: PayerId,
        payer_seqnum: PayerSeqnum,
    ) -> OrderKeyGuard {
        let mut map = self.orders_by_key.lock().expect("order lock table poisoned");
        let lock = map
            .entry((payee_id, offer_id, payer_id, payer_seqnum))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        OrderKeyGuard { lock }
    }
}

/// Holds a shared-read guard on an offer row for the guard's lifetime.
pub struct OfferReadGuard {
    lock: Arc<RwLock<()>>,
}

impl OfferReadGuard {
    pub fn held(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().expect("offer RwLock poisoned")
    }
}

/// Holds an exclusive-write guard on an offer row for the guard's lifetime.
pub struct OfferWriteGuard {
    lock: Arc<RwLock<()>>,
}

impl OfferWriteGuard {
    pub fn held(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().expect("offer RwLock poisoned")
    }
}

/// Holds an exclusive lock on a single payment order.
pub struct OrderKeyGuard {
    lock: Arc<Mutex<()>>,
}

impl OrderKeyGuard {
    pub fn held(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().expect("order Mutex poisoned")
    }
}
