use std::path::Path;

use paycoord_core::model::{Offer, PaymentOrder, PaymentProof};
use paycoord_core::signal::OutboundSignal;
use paycoord_core::types::{CoordinatorRequestId, OfferId, PayeeId, PayerId, PayerSeqnum, ProofId};
use paycoord_core::PayCoordError;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use tracing::debug;

/// Durable store (C1) + outbound signal log (C2).
///
/// Named trees:
///   offers              — (payee_id, offer_id) be-bytes     → bincode(Offer)
///   payment_orders      — (payee_id, offer_id, payer_id, payer_seqnum) be-bytes → bincode(PaymentOrder)
///   order_request_index — coordinator_request_id be-bytes   → the order's 4-tuple key bytes
///   payment_proofs      — (payee_id, proof_id) be-bytes      → bincode(PaymentProof)
///   outbox              — u64 be-bytes (insertion sequence)  → bincode(OutboundSignal)
///   meta                — utf8 key bytes                     → raw bytes (sequence counters)
pub struct StoreDb {
    _db: sled::Db,
    offers: sled::Tree,
    payment_orders: sled::Tree,
    order_request_index: sled::Tree,
    payment_proofs: sled::Tree,
    outbox: sled::Tree,
    meta: sled::Tree,
}

fn storage_err<E: std::fmt::Display>(e: E) -> PayCoordError {
    PayCoordError::Storage(e.to_string())
}

fn ser_err<E: std::fmt::Display>(e: E) -> PayCoordError {
    PayCoordError::Serialization(e.to_string())
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, PayCoordError> {
    bincode::serialize(value).map_err(ser_err)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, PayCoordError> {
    bincode::deserialize(bytes).map_err(ser_err)
}

const NEXT_OUTBOX_SEQ: &[u8] = b"next_outbox_seq";

/// Allocate the next outbox insertion sequence from within an open
/// transaction, so the counter advances atomically with the signal rows
/// it numbers.
fn next_outbox_seq_tx(
    meta: &sled::transaction::TransactionalTree,
) -> Result<[u8; 8], sled::transaction::UnabortableTransactionError> {
    let current = meta.get(NEXT_OUTBOX_SEQ)?.map(|b| {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&b[..8]);
        u64::from_be_bytes(arr)
    }).unwrap_or(0);
    meta.insert(NEXT_OUTBOX_SEQ, &(current + 1).to_be_bytes())?;
    Ok(current.to_be_bytes())
}

/// (payee_id, offer_id) → big-endian key bytes.
pub fn offer_key(payee_id: PayeeId, offer_id: OfferId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&payee_id.to_be_bytes());
    key[8..].copy_from_slice(&offer_id.to_be_bytes());
    key
}

/// (payee_id, offer_id, payer_id, payer_seqnum) → big-endian key bytes.
pub fn order_key(
    payee_id: PayeeId,
    offer_id: OfferId,
    payer_id: PayerId,
    payer_seqnum: PayerSeqnum,
) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[0..8].copy_from_slice(&payee_id.to_be_bytes());
    key[8..16].copy_from_slice(&offer_id.to_be_bytes());
    key[16..24].copy_from_slice(&payer_id.to_be_bytes());
    key[24..32].copy_from_slice(&payer_seqnum.to_be_bytes());
    key
}

/// (payee_id, proof_id) → big-endian key bytes.
pub fn proof_key(payee_id: PayeeId, proof_id: ProofId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&payee_id.to_be_bytes());
    key[8..].copy_from_slice(&proof_id.to_be_bytes());
    key
}

/// Prefix matching every offer/order/proof row belonging to `payee_id`.
pub fn payee_prefix(payee_id: PayeeId) -> [u8; 8] {
    payee_id.to_be_bytes()
}

impl StoreDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PayCoordError> {
        let db = sled::open(path).map_err(storage_err)?;
        let offers = db.open_tree("offers").map_err(storage_err)?;
        let payment_orders = db.open_tree("payment_orders").map_err(storage_err)?;
        let order_request_index = db.open_tree("order_request_index").map_err(storage_err)?;
        let payment_proofs = db.open_tree("payment_proofs").map_err(storage_err)?;
        let outbox = db.open_tree("outbox").map_err(storage_err)?;
        let meta = db.open_tree("meta").map_err(storage_err)?;
        debug!(path = %path.as_ref().display(), "store opened");
        Ok(Self {
            _db: db,
            offers,
            payment_orders,
            order_request_index,
            payment_proofs,
            outbox,
            meta,
        })
    }

    // ── Sequence counters ────────────────────────────────────────────────────

    fn next_seq(&self, meta_key: &str, start: u64) -> Result<u64, PayCoordError> {
        let current = self
            .meta
            .get(meta_key.as_bytes())
            .map_err(storage_err)?
            .map(|b| {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&b[..8]);
                u64::from_be_bytes(arr)
            })
            .unwrap_or(start);
        self.meta
            .insert(meta_key.as_bytes(), &(current + 1).to_be_bytes())
            .map_err(storage_err)?;
        Ok(current)
    }

    /// Store-wide sequence: see SPEC_FULL §4.2.1 / DESIGN.md OQ-1.
    pub fn next_coordinator_request_id(&self) -> Result<CoordinatorRequestId, PayCoordError> {
        let id = self.next_seq("next_coordinator_request_id", 1)?;
        Ok(id as CoordinatorRequestId)
    }

    /// Per-payee sequence: see SPEC_FULL §3.
    pub fn next_offer_id(&self, payee_id: PayeeId) -> Result<OfferId, PayCoordError> {
        let key = format!("next_offer_id:{payee_id}");
        let id = self.next_seq(&key, 1)?;
        Ok(id as OfferId)
    }

    /// Per-payee sequence: see SPEC_FULL §3 / DESIGN.md OQ-2.
    pub fn next_proof_id(&self, payee_id: PayeeId) -> Result<ProofId, PayCoordError> {
        let key = format!("next_proof_id:{payee_id}");
        let id = self.next_seq(&key, 1)?;
        Ok(id as ProofId)
    }

    // ── Offers ───────────────────────────────────────────────────────────────

    pub fn get_offer(
        &self,
        payee_id: PayeeId,
        offer_id: OfferId,
    ) -> Result<Option<Offer>, PayCoordError> {
        match self
            .offers
            .get(offer_key(payee_id, offer_id))
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Insert a fresh offer together with its `CreatedOffer` signal in one
    /// transaction (outbox pattern).
    pub fn insert_offer_with_signal(
        &self,
        offer: &Offer,
        signal: OutboundSignal,
    ) -> Result<(), PayCoordError> {
        let key = offer_key(offer.payee_id, offer.offer_id);
        let offer_bytes = encode(offer)?;
        let signal_bytes = encode(&signal)?;
        (&self.offers, &self.outbox, &self.meta)
            .transaction(|(offers, outbox, meta)| {
                offers.insert(&key[..], offer_bytes.clone())?;
                let seq = next_outbox_seq_tx(meta)?;
                outbox.insert(&seq[..], signal_bytes.clone())?;
                Ok::<(), ConflictableTransactionError<PayCoordError>>(())
            })
            .map_err(tx_err)
    }

    /// Delete an offer and append one or more signals (cancel, or the
    /// final step of a commit) in one transaction.
    pub fn delete_offer_with_signals(
        &self,
        payee_id: PayeeId,
        offer_id: OfferId,
        signals: Vec<OutboundSignal>,
    ) -> Result<(), PayCoordError> {
        let key = offer_key(payee_id, offer_id);
        let encoded: Vec<Vec<u8>> = signals.iter().map(encode).collect::<Result<_, _>>()?;
        (&self.offers, &self.outbox, &self.meta)
            .transaction(|(offers, outbox, meta)| {
                offers.remove(&key[..])?;
                for s in &encoded {
                    let seq = next_outbox_seq_tx(meta)?;
                    outbox.insert(&seq[..], s.clone())?;
                }
                Ok::<(), ConflictableTransactionError<PayCoordError>>(())
            })
            .map_err(tx_err)
    }

    /// All non-finalized orders against this offer, used by cancel/commit
    /// to find orders that must be aborted.
    pub fn iter_orders_for_offer(
        &self,
        payee_id: PayeeId,
        offer_id: OfferId,
    ) -> Result<Vec<PaymentOrder>, PayCoordError> {
        let mut prefix = Vec::with_capacity(16);
        prefix.extend_from_slice(&payee_id.to_be_bytes());
        prefix.extend_from_slice(&offer_id.to_be_bytes());
        let mut out = Vec::new();
        for item in self.payment_orders.scan_prefix(prefix) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    // ── Payment orders ───────────────────────────────────────────────────────

    pub fn get_order(
        &self,
        payee_id: PayeeId,
        offer_id: OfferId,
        payer_id: PayerId,
        payer_seqnum: PayerSeqnum,
    ) -> Result<Option<PaymentOrder>, PayCoordError> {
        match self
            .payment_orders
            .get(order_key(payee_id, offer_id, payer_id, payer_seqnum))
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_order_by_request_id(
        &self,
        payee_id: PayeeId,
        coordinator_request_id: CoordinatorRequestId,
    ) -> Result<Option<PaymentOrder>, PayCoordError> {
        match self
            .order_request_index
            .get(coordinator_request_id.to_be_bytes())
            .map_err(storage_err)?
        {
            Some(order_key_bytes) => {
                match self
                    .payment_orders
                    .get(&order_key_bytes)
                    .map_err(storage_err)?
                {
                    Some(bytes) => {
                        let order: PaymentOrder = decode(&bytes)?;
                        if order.payee_id == payee_id {
                            Ok(Some(order))
                        } else {
                            Ok(None)
                        }
                    }
                    None => Ok(None),
                }
            }
            None => Ok(None),
        }
    }

    /// Insert a brand-new order, its request-id index entry, and any
    /// signals produced by the same transition (e.g. the first
    /// `PrepareTransfer`, or an immediate `FailedPayment`/`FinalizePreparedTransfer`
    /// pair for an already-expired offer), atomically.
    pub fn insert_order_with_signals(
        &self,
        order: &PaymentOrder,
        signals: Vec<OutboundSignal>,
    ) -> Result<(), PayCoordError> {
        let key = order_key(
            order.payee_id,
            order.offer_id,
            order.payer_id,
            order.payer_seqnum,
        );
        let order_bytes = encode(order)?;
        let req_id_key = order.coordinator_request_id.to_be_bytes();
        let encoded: Vec<Vec<u8>> = signals.iter().map(encode).collect::<Result<_, _>>()?;
        (
            &self.payment_orders,
            &self.order_request_index,
            &self.outbox,
            &self.meta,
        )
            .transaction(|(orders, index, outbox, meta)| {
                orders.insert(&key[..], order_bytes.clone())?;
                index.insert(&req_id_key[..], &key[..])?;
                for s in &encoded {
                    let seq = next_outbox_seq_tx(meta)?;
                    outbox.insert(&seq[..], s.clone())?;
                }
                Ok::<(), ConflictableTransactionError<PayCoordError>>(())
            })
            .map_err(tx_err)
    }

    /// Overwrite an existing order (slot fill, finalize) and append
    /// signals produced by the same transition, atomically.
    pub fn put_order_with_signals(
        &self,
        order: &PaymentOrder,
        signals: Vec<OutboundSignal>,
    ) -> Result<(), PayCoordError> {
        let key = order_key(
            order.payee_id,
            order.offer_id,
            order.payer_id,
            order.payer_seqnum,
        );
        let order_bytes = encode(order)?;
        let encoded: Vec<Vec<u8>> = signals.iter().map(encode).collect::<Result<_, _>>()?;
        (&self.payment_orders, &self.outbox, &self.meta)
            .transaction(|(orders, outbox, meta)| {
                orders.insert(&key[..], order_bytes.clone())?;
                for s in &encoded {
                    let seq = next_outbox_seq_tx(meta)?;
                    outbox.insert(&seq[..], s.clone())?;
                }
                Ok::<(), ConflictableTransactionError<PayCoordError>>(())
            })
            .map_err(tx_err)
    }

    /// The commit path (§4.2.4) touches the order being committed, every
    /// other live order on the same offer (aborted), the new proof row,
    /// and the offer deletion, plus every signal from all of the above —
    /// all in one transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn commit_offer_payment(
        &self,
        payee_id: PayeeId,
        offer_id: OfferId,
        winning_order: &PaymentOrder,
        aborted_orders: &[PaymentOrder],
        proof: &PaymentProof,
        signals: Vec<OutboundSignal>,
    ) -> Result<(), PayCoordError> {
        let offer_k = offer_key(payee_id, offer_id);
        let winning_key = order_key(
            winning_order.payee_id,
            winning_order.offer_id,
            winning_order.payer_id,
            winning_order.payer_seqnum,
        );
        let winning_bytes = encode(winning_order)?;
        let proof_k = proof_key(payee_id, proof.proof_id);
        let proof_bytes = encode(proof)?;
        let aborted_encoded: Vec<([u8; 32], Vec<u8>)> = aborted_orders
            .iter()
            .map(|o| {
                let k = order_key(o.payee_id, o.offer_id, o.payer_id, o.payer_seqnum);
                encode(o).map(|b| (k, b))
            })
            .collect::<Result<_, _>>()?;
        let signal_bytes: Vec<Vec<u8>> = signals.iter().map(encode).collect::<Result<_, _>>()?;

        (
            &self.offers,
            &self.payment_orders,
            &self.payment_proofs,
            &self.outbox,
            &self.meta,
        )
            .transaction(|(offers, orders, proofs, outbox, meta)| {
                offers.remove(&offer_k[..])?;
                orders.insert(&winning_key[..], winning_bytes.clone())?;
                for (k, b) in &aborted_encoded {
                    orders.insert(&k[..], b.clone())?;
                }
                proofs.insert(&proof_k[..], proof_bytes.clone())?;
                for s in &signal_bytes {
                    let seq = next_outbox_seq_tx(meta)?;
                    outbox.insert(&seq[..], s.clone())?;
                }
                Ok::<(), ConflictableTransactionError<PayCoordError>>(())
            })
            .map_err(tx_err)
    }

    /// Append a single signal with no accompanying row mutation — used for
    /// orphan-transfer releases (§4.2.3), where there is no order row left
    /// to rewrite.
    pub fn append_signal(&self, signal: OutboundSignal) -> Result<(), PayCoordError> {
        let bytes = encode(&signal)?;
        (&self.outbox, &self.meta)
            .transaction(|(outbox, meta)| {
                let seq = next_outbox_seq_tx(meta)?;
                outbox.insert(&seq[..], bytes.clone())?;
                Ok::<(), ConflictableTransactionError<PayCoordError>>(())
            })
            .map_err(tx_err)
    }

    // ── Payment proofs ───────────────────────────────────────────────────────

    pub fn get_proof(
        &self,
        payee_id: PayeeId,
        proof_id: ProofId,
    ) -> Result<Option<PaymentProof>, PayCoordError> {
        match self
            .payment_proofs
            .get(proof_key(payee_id, proof_id))
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // ── Housekeeping (C6) ─────────────────────────────────────────────────────

    /// Delete every finalized order with `finalized_at_ts <= cutoff_ts`.
    /// Returns the number of rows deleted.
    pub fn flush_orders(&self, cutoff_ts: i64) -> Result<u64, PayCoordError> {
        let mut to_delete = Vec::new();
        for item in self.payment_orders.iter() {
            let (key, bytes) = item.map_err(storage_err)?;
            let order: PaymentOrder = decode(&bytes)?;
            if let Some(ts) = order.finalized_at_ts {
                if ts <= cutoff_ts {
                    to_delete.push((key, order.coordinator_request_id));
                }
            }
        }
        let count = to_delete.len() as u64;
        for (key, req_id) in to_delete {
            self.payment_orders.remove(&key).map_err(storage_err)?;
            self.order_request_index
                .remove(req_id.to_be_bytes())
                .map_err(storage_err)?;
        }
        Ok(count)
    }

    /// Delete every proof with `paid_at_ts <= cutoff_ts`. Returns the
    /// number of rows deleted.
    pub fn flush_proofs(&self, cutoff_ts: i64) -> Result<u64, PayCoordError> {
        let mut to_delete = Vec::new();
        for item in self.payment_proofs.iter() {
            let (key, bytes) = item.map_err(storage_err)?;
            let proof: PaymentProof = decode(&bytes)?;
            if proof.paid_at_ts <= cutoff_ts {
                to_delete.push(key);
            }
        }
        let count = to_delete.len() as u64;
        for key in to_delete {
            self.payment_proofs.remove(&key).map_err(storage_err)?;
        }
        Ok(count)
    }

    /// Drain every pending outbound signal (for the external relay / for
    /// tests asserting on what was emitted).
    pub fn drain_outbox(&self) -> Result<Vec<OutboundSignal>, PayCoordError> {
        let mut out = Vec::new();
        let mut keys = Vec::new();
        for item in self.outbox.iter() {
            let (key, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
            keys.push(key);
        }
        for key in keys {
            self.outbox.remove(&key).map_err(storage_err)?;
        }
        Ok(out)
    }

    pub fn flush(&self) -> Result<(), PayCoordError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }
}

fn tx_err(e: TransactionError<PayCoordError>) -> PayCoordError {
    match e {
        TransactionError::Abort(inner) => inner,
        TransactionError::Storage(err) => PayCoordError::Storage(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paycoord_core::secret::Secret;

    fn temp_db(name: &str) -> StoreDb {
        let dir = std::env::temp_dir().join(format!("paycoord_store_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        StoreDb::open(&dir).expect("open temp db")
    }

    fn sample_offer(payee_id: PayeeId, offer_id: OfferId) -> Offer {
        Offer {
            payee_id,
            offer_id,
            offer_secret: Secret::generate(6),
            debtor_ids: vec![-1, -2],
            debtor_amounts: vec![Some(1000), Some(2000)],
            description: Some(serde_json::json!({"m": "t"})),
            reciprocal_debtor_id: None,
            reciprocal_amount: 0,
            valid_until_ts: 4_000_000_000,
            created_at_ts: 1_000,
        }
    }

    #[test]
    fn sequence_counters_advance_monotonically() {
        let db = temp_db("seq");
        assert_eq!(db.next_offer_id(1).unwrap(), 1);
        assert_eq!(db.next_offer_id(1).unwrap(), 2);
        assert_eq!(db.next_offer_id(2).unwrap(), 1);
        assert_eq!(db.next_coordinator_request_id().unwrap(), 1);
        assert_eq!(db.next_coordinator_request_id().unwrap(), 2);
    }

    #[test]
    fn offer_roundtrips_with_signal() {
        let db = temp_db("offer_roundtrip");
        let offer = sample_offer(1, 1);
        db.insert_offer_with_signal(
            &offer,
            OutboundSignal::CreatedOffer {
                payee_id: 1,
                offer_id: 1,
                announcement_id: 4567,
                offer_secret_b64: offer.offer_secret.to_base64url(),
                created_at_ts: offer.created_at_ts,
            },
        )
        .unwrap();
        let fetched = db.get_offer(1, 1).unwrap().expect("offer present");
        assert_eq!(fetched.offer_id, 1);
        let drained = db.drain_outbox().unwrap();
        assert_eq!(drained.len(), 1);
    }

    #[test]
    fn delete_offer_removes_row_and_emits_signal() {
        let db = temp_db("offer_delete");
        let offer = sample_offer(1, 1);
        db.insert_offer_with_signal(
            &offer,
            OutboundSignal::CreatedOffer {
                payee_id: 1,
                offer_id: 1,
                announcement_id: 1,
                offer_secret_b64: offer.offer_secret.to_base64url(),
                created_at_ts: offer.created_at_ts,
            },
        )
        .unwrap();
        db.drain_outbox().unwrap();
        db.delete_offer_with_signals(1, 1, vec![OutboundSignal::CanceledOffer { payee_id: 1, offer_id: 1 }])
            .unwrap();
        assert!(db.get_offer(1, 1).unwrap().is_none());
        assert_eq!(db.drain_outbox().unwrap().len(), 1);
    }

    #[test]
    fn flush_orders_only_deletes_finalized_past_cutoff() {
        let db = temp_db("flush_orders");
        let mut live = sample_order(1, 1, 2, 1, 1);
        live.finalized_at_ts = None;
        let mut finalized_old = sample_order(1, 1, 2, 2, 2);
        finalized_old.finalized_at_ts = Some(100);
        let mut finalized_new = sample_order(1, 1, 2, 3, 3);
        finalized_new.finalized_at_ts = Some(900);

        for o in [&live, &finalized_old, &finalized_new] {
            db.insert_order_with_signals(o, vec![]).unwrap();
        }

        let deleted = db.flush_orders(500).unwrap();
        assert_eq!(deleted, 1);
        assert!(db.get_order(1, 1, 2, 1).unwrap().is_some());
        assert!(db.get_order(1, 1, 2, 2).unwrap().is_none());
        assert!(db.get_order(1, 1, 2, 3).unwrap().is_some());
    }

    fn sample_order(
        payee_id: PayeeId,
        offer_id: OfferId,
        payer_id: PayerId,
        payer_seqnum: PayerSeqnum,
        coordinator_request_id: CoordinatorRequestId,
    ) -> PaymentOrder {
        PaymentOrder {
            payee_id,
            offer_id,
            payer_id,
            payer_seqnum,
            coordinator_request_id,
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
}
