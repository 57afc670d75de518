//! # Conveyor Engine
//!
//! Durable-queue consumer/producer engine mediating asynchronous work: it
//! accepts work items for later processing, polls for them, dispatches them
//! to a caller-supplied handler under strict sequencing and retry rules, and
//! cooperates with an external rate limiter to defer work without failing it.
//!
//! Guarantees:
//! - At-most-one handler invocation in flight per engine instance, enforced
//!   structurally by a single sequential polling loop
//! - Every handler failure resolves to either deletion or a scheduled
//!   redelivery; nothing is silently dropped
//! - Rate-limited work is handed back to the durable transport with a delay
//!   instead of being held in process
//! - `stop()` resolves only once the in-flight cycle has drained
//!
//! ## Module Organization
//!
//! - [`dispatch`] - Per-delivery data model and collaborator verdict types
//! - [`hooks`] - Caller-supplied collaborator traits and the metrics sink
//! - [`engine`] - The queue engine: lifecycle, polling loop, retry arithmetic
//! - [`error`] - Engine error types

// Module declarations
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod hooks;

// Re-export commonly used types at crate root for convenience
pub use dispatch::{DispatchContext, Envelope, RateLimitVerdict, RetryDecision, WorkPayload};
pub use engine::{clamp_delay, LifecycleState, QueueEngine, MAX_DELAY_SECONDS};
pub use error::EngineError;
pub use hooks::{ErrorClassifier, MetricsSink, NoOpMetricsSink, RateLimitChecker, RequestHandler};
