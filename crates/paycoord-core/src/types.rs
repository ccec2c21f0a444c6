//! Identifier and scalar aliases shared across the coordinator.
//!
//! Everything here is a plain alias rather than a newtype: none of these
//! values are derived hashes or encoded keys, they are just integers handed
//! to us by the accounts service or by callers, so a newtype would buy
//! nothing but ceremony.

/// The payee's account identifier, as assigned by the accounts service.
pub type PayeeId = i64;

/// The payer's account identifier, as assigned by the accounts service.
pub type PayerId = i64;

/// Identifies a currency-route the accounts service knows about.
pub type DebtorId = i64;

/// Store-assigned, monotonically increasing per payee.
pub type OfferId = i64;

/// Store-assigned, monotonically increasing per payee.
pub type ProofId = i64;

/// Positive 63-bit identifier assigned from a single store-wide sequence.
/// Sign carries which leg a reply refers to; only positive values are ever
/// persisted (see [`crate::model::PaymentOrder`]).
pub type CoordinatorRequestId = i64;

/// An opaque, broker-assigned identifier for a prepared transfer.
pub type TransferId = i64;

/// A payer's own per-offer attempt counter, chosen by the payer.
pub type PayerSeqnum = i64;

/// A payee's own correlation id for a pending offer announcement. Echoed
/// back in `CreatedOffer`, never stored.
pub type AnnouncementId = i64;

/// A ledger amount. Negative amounts never appear in persisted state, but
/// the type is signed because callers and the sanitization rule both deal
/// in potentially-negative integers before they are validated.
pub type Amount = i64;

/// Unix timestamp, seconds, UTC.
pub type Timestamp = i64;
