//! Message Ingress
//!
//! HTTP producer: authenticates, validates, and normalizes a single chat
//! message, then hands it to the queue. Nothing is retried here; a failed
//! enqueue is reported to the client as `INTERNAL_ERROR`.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod types;

pub use error::IngressError;
pub use handlers::ingest_message;
pub use types::{normalize_message, BufferApiResponse};
