//! Caller-supplied collaborator traits.
//!
//! The engine never implements business policy itself: processing, retry
//! classification, and throttling are pure interfaces injected at
//! construction and owned by the engine instance. This keeps attempt
//! exhaustion and failure taxonomy a business-logic concern, and makes the
//! engine deterministic to test with substitutable fakes.

use crate::dispatch::{DispatchContext, RateLimitVerdict, RetryDecision};
use async_trait::async_trait;

/// Performs the business processing of one message
///
/// Returning an error signals failure; the engine routes every failure
/// through the [`ErrorClassifier`].
#[async_trait]
pub trait RequestHandler<T>: Send + Sync {
    async fn handle(&self, ctx: &DispatchContext<T>) -> Result<(), anyhow::Error>;
}

/// Maps a processing failure to a retry decision
///
/// The classifier alone decides when retrying halts; the engine only
/// supplies accurate receive-count and last-attempt signals in the context.
/// A classifier error is fatal to the cycle: the message is left undeleted
/// for natural redelivery.
pub trait ErrorClassifier<T>: Send + Sync {
    fn classify(
        &self,
        error: &anyhow::Error,
        ctx: &DispatchContext<T>,
    ) -> Result<RetryDecision, anyhow::Error>;
}

/// Reports whether a tenant currently exceeds its allowed throughput
///
/// Consulted before every handler invocation. A checker error is fatal to
/// the cycle: the message is left undeleted for natural redelivery.
#[async_trait]
pub trait RateLimitChecker<T>: Send + Sync {
    async fn check(
        &self,
        tenant_key: &str,
        payload: &T,
    ) -> Result<RateLimitVerdict, anyhow::Error>;
}

/// Counter metrics sink, tagged by tenant
///
/// Implementations must be best-effort: recording failures are never allowed
/// to block or fail message processing.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &str, tags: &[(&str, &str)]);
}

/// No-op metrics sink for tests and metric-less deployments
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetricsSink;

impl MetricsSink for NoOpMetricsSink {
    fn increment(&self, _name: &str, _tags: &[(&str, &str)]) {
        // No-op
    }
}
