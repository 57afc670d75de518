//! The transport capability trait consumed by the queue engine.

use crate::error::TransportError;
use crate::message::{DeliveredMessage, DeliveryToken, MessageId};
use async_trait::async_trait;
use bytes::Bytes;

/// At-least-once durable queue bound to one logical queue
///
/// Implementations must be safe for concurrent use: producers may call
/// [`send`](QueueTransport::send) from any number of tasks while one consumer
/// loop drives receive/delete/visibility operations.
///
/// Redelivery semantics: a received message stays invisible for the
/// configured visibility timeout; unless deleted, the provider redelivers it
/// afterwards with an incremented delivery count and a fresh token.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Enqueue a message body, optionally delayed by `delay_seconds`
    ///
    /// Returns once the provider acknowledges the enqueue. Failures are
    /// surfaced to the caller, never swallowed.
    async fn send(
        &self,
        body: Bytes,
        delay_seconds: Option<u32>,
    ) -> Result<MessageId, TransportError>;

    /// Long-poll for messages, bounded by the configured wait duration
    ///
    /// Returns zero or more messages in delivery order.
    async fn receive(&self) -> Result<Vec<DeliveredMessage>, TransportError>;

    /// Delete a delivered message, acknowledging processing
    async fn delete(&self, token: &DeliveryToken) -> Result<(), TransportError>;

    /// Defer redelivery of the same delivery by `delay_seconds`
    ///
    /// The message keeps its identity and delivery-count bookkeeping; it
    /// becomes eligible for redelivery once the deferral elapses.
    async fn change_visibility(
        &self,
        token: &DeliveryToken,
        delay_seconds: u32,
    ) -> Result<(), TransportError>;

    /// Remove all visible, delayed, and in-flight messages from the queue
    async fn purge(&self) -> Result<(), TransportError>;
}
