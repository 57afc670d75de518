//! Transport provider implementations.

pub mod memory;
pub mod sqs;

pub use memory::{InMemoryTransport, TransportStats};
pub use sqs::SqsTransport;
