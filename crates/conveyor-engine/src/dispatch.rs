//! Per-delivery data model and collaborator verdict types.
//!
//! Everything here is created per receive cycle and destroyed once the
//! dispatch outcome (delete, retry-leave, or requeue) is finalized; no
//! envelope outlives its dispatch.

use conveyor_transport::{DeliveredMessage, DeliveryToken, TransportError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::Span;

/// Work item payload carried through the queue
///
/// The tenant key scopes rate limiting and metrics to a logical customer.
/// `mark_rate_limited` adds the marker the preemption path attaches before
/// re-enqueueing a throttled item, so downstream processing can tell a
/// deferred delivery from a fresh one.
pub trait WorkPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Tenant identifier used for logging, metrics, and rate-limit tags
    fn tenant_key(&self) -> String;

    /// Mark this payload as having been deferred by the rate limiter
    fn mark_rate_limited(&mut self);
}

/// A received unit of work
///
/// Pairs the deserialized payload with the delivery metadata needed to
/// resolve it: the token (required to delete or defer), the provider's
/// receive count, and the advisory last-attempt flag.
#[derive(Debug)]
pub struct Envelope<T> {
    pub token: DeliveryToken,
    pub payload: T,
    pub receive_count: u32,
    pub last_attempt: bool,
}

impl<T: WorkPayload> Envelope<T> {
    /// Decode a transport delivery into an envelope
    ///
    /// `last_attempt` is derived from the provider's receive count against the
    /// configured maximum; it is advisory only, the engine never enforces it.
    pub fn decode(message: &DeliveredMessage, max_attempts: u32) -> Result<Self, TransportError> {
        let payload: T = serde_json::from_slice(&message.body).map_err(|e| {
            TransportError::Serialization {
                message: format!("payload decode failed: {}", e),
            }
        })?;

        Ok(Self {
            token: message.token.clone(),
            payload,
            receive_count: message.delivery_count,
            last_attempt: message.delivery_count >= max_attempts,
        })
    }
}

/// Context handed to the handler and error classifier for one dispatch
///
/// Owned exclusively by one in-flight dispatch and discarded afterwards. The
/// span carries queue, message, and tenant fields so all log lines for one
/// message's lifecycle correlate.
#[derive(Debug)]
pub struct DispatchContext<T> {
    pub payload: T,
    pub receive_count: u32,
    pub last_attempt: bool,
    pub tenant_key: String,
    pub span: Span,
}

/// Retry decision produced by the error classifier
///
/// `is_failure` is independent of `retryable`: it only controls whether a
/// failure metric is recorded for this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDecision {
    pub retryable: bool,
    /// Redelivery delay, present only when retryable
    pub retry_delay_seconds: Option<u32>,
    pub is_failure: bool,
}

impl RetryDecision {
    /// Retry after the given delay, recording a failure metric
    pub fn retry_after(delay_seconds: u32) -> Self {
        Self {
            retryable: true,
            retry_delay_seconds: Some(delay_seconds),
            is_failure: true,
        }
    }

    /// Abandon the attempt and record a failure metric
    pub fn abandon() -> Self {
        Self {
            retryable: false,
            retry_delay_seconds: None,
            is_failure: true,
        }
    }

    /// Abandon the attempt without recording a failure metric
    pub fn discard() -> Self {
        Self {
            retryable: false,
            retry_delay_seconds: None,
            is_failure: false,
        }
    }
}

/// Rate limiter verdict for one tenant and message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitVerdict {
    pub exceeded: bool,
    /// Suggested cool-down, present only when exceeded
    pub cooldown_seconds: Option<u32>,
}

impl RateLimitVerdict {
    /// Tenant is within its allowed throughput
    pub fn allowed() -> Self {
        Self {
            exceeded: false,
            cooldown_seconds: None,
        }
    }

    /// Tenant exceeded its threshold; defer by the suggested cool-down
    pub fn exceeded(cooldown_seconds: u32) -> Self {
        Self {
            exceeded: true,
            cooldown_seconds: Some(cooldown_seconds),
        }
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
