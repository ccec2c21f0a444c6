pub mod error;
pub mod model;
pub mod sanitize;
pub mod secret;
pub mod signal;
pub mod types;

pub use error::PayCoordError;
pub use model::{Offer, OrderState, PaymentOrder, PaymentProof};
pub use secret::Secret;
pub use signal::OutboundSignal;
