//! In-memory transport implementation for testing and development.
//!
//! This module provides a fully functional single-queue implementation that:
//! - Supports enqueue delays and visibility timeouts
//! - Tracks per-message delivery counts across redeliveries
//! - Returns lock-expired in-flight messages to the visible queue
//! - Provides thread-safe concurrent access
//!
//! This provider is intended for:
//! - Unit testing of transport consumers
//! - Development and prototyping
//! - Reference implementation for the SQS provider semantics

use crate::client::QueueTransport;
use crate::config::QueueConfig;
use crate::error::TransportError;
use crate::message::{DeliveredMessage, DeliveryToken, MessageId};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Granularity of the emulated long-poll re-check loop
const POLL_INTERVAL_MS: u64 = 25;

/// Maximum messages returned by a single receive call, matching SQS
const MAX_RECEIVE_BATCH: usize = 10;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// A message stored in the queue with delivery bookkeeping
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    /// Enqueue order, preserved across redeliveries
    sequence: u64,
    delivery_count: u32,
    available_at: DateTime<Utc>,
}

impl StoredMessage {
    fn is_available(&self, now: DateTime<Utc>) -> bool {
        now >= self.available_at
    }
}

/// A message currently delivered and invisible to other receives
struct InFlightMessage {
    message: StoredMessage,
    lock_expires_at: DateTime<Utc>,
}

/// Queue state behind the shared lock
struct QueueState {
    /// Messages awaiting delivery, in enqueue order (visible or delayed)
    pending: Vec<StoredMessage>,
    /// Delivered-but-unacknowledged messages keyed by delivery token
    in_flight: HashMap<String, InFlightMessage>,
    /// Monotonic enqueue sequence counter
    next_sequence: u64,
}

impl QueueState {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
            in_flight: HashMap::new(),
            next_sequence: 0,
        }
    }

    /// Return lock-expired in-flight messages to the pending list
    ///
    /// Delivery counts are preserved, which is how receive-count bookkeeping
    /// stays accurate across redeliveries.
    fn release_expired(&mut self, now: DateTime<Utc>) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, in_flight)| now >= in_flight.lock_expires_at)
            .map(|(token, _)| token.clone())
            .collect();

        for token in expired {
            if let Some(in_flight) = self.in_flight.remove(&token) {
                let mut message = in_flight.message;
                message.available_at = now;
                self.pending.push(message);
            }
        }

        // Keep enqueue order stable after returns
        self.pending.sort_by_key(|m| m.sequence);
    }
}

// ============================================================================
// InMemoryTransport
// ============================================================================

/// In-memory queue transport bound to one logical queue
///
/// Cloning yields a handle to the same underlying queue, so producers and a
/// consumer loop can share one instance across tasks.
#[derive(Clone)]
pub struct InMemoryTransport {
    config: QueueConfig,
    state: Arc<Mutex<QueueState>>,
}

/// Point-in-time depths of the queue buckets, for test assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportStats {
    /// Messages deliverable right now
    pub visible: usize,
    /// Messages whose enqueue delay has not yet elapsed
    pub delayed: usize,
    /// Delivered messages awaiting delete or redelivery
    pub in_flight: usize,
}

impl InMemoryTransport {
    /// Create a new empty queue with the given configuration
    pub fn new(config: QueueConfig) -> Result<Self, TransportError> {
        config.validate()?;

        Ok(Self {
            config,
            state: Arc::new(Mutex::new(QueueState::new())),
        })
    }

    /// Current depths of the visible, delayed, and in-flight buckets
    pub fn stats(&self) -> TransportStats {
        let now = Utc::now();
        let state = self.state.lock().expect("queue state lock poisoned");

        let visible = state.pending.iter().filter(|m| m.is_available(now)).count();

        TransportStats {
            visible,
            delayed: state.pending.len() - visible,
            in_flight: state.in_flight.len(),
        }
    }

    /// Take up to a batch of available messages, marking them in flight
    fn take_available(&self, now: DateTime<Utc>) -> Vec<DeliveredMessage> {
        let mut state = self.state.lock().expect("queue state lock poisoned");
        state.release_expired(now);

        let mut delivered = Vec::new();
        let mut index = 0;

        while index < state.pending.len() && delivered.len() < MAX_RECEIVE_BATCH {
            if state.pending[index].is_available(now) {
                let mut message = state.pending.remove(index);
                message.delivery_count += 1;

                let token = uuid::Uuid::new_v4().to_string();
                delivered.push(DeliveredMessage {
                    message_id: message.message_id.clone(),
                    body: message.body.clone(),
                    token: DeliveryToken::new(token.clone())
                        .expect("generated token is never empty"),
                    delivery_count: message.delivery_count,
                    delivered_at: now,
                });

                let lock_expires_at = now
                    + Duration::seconds(i64::from(self.config.visibility_timeout_seconds));
                state.in_flight.insert(
                    token,
                    InFlightMessage {
                        message,
                        lock_expires_at,
                    },
                );
            } else {
                index += 1;
            }
        }

        delivered
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn send(
        &self,
        body: Bytes,
        delay_seconds: Option<u32>,
    ) -> Result<MessageId, TransportError> {
        let message_id = MessageId::new();
        let now = Utc::now();
        let available_at = now + Duration::seconds(i64::from(delay_seconds.unwrap_or(0)));

        let mut state = self.state.lock().expect("queue state lock poisoned");
        let sequence = state.next_sequence;
        state.next_sequence += 1;

        state.pending.push(StoredMessage {
            message_id: message_id.clone(),
            body,
            sequence,
            delivery_count: 0,
            available_at,
        });

        Ok(message_id)
    }

    async fn receive(&self) -> Result<Vec<DeliveredMessage>, TransportError> {
        let deadline = Utc::now() + Duration::seconds(i64::from(self.config.wait_seconds));

        loop {
            let now = Utc::now();
            let delivered = self.take_available(now);

            if !delivered.is_empty() {
                return Ok(delivered);
            }

            if now >= deadline {
                return Ok(Vec::new());
            }

            tokio::time::sleep(std::time::Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
    }

    async fn delete(&self, token: &DeliveryToken) -> Result<(), TransportError> {
        let mut state = self.state.lock().expect("queue state lock poisoned");

        state
            .in_flight
            .remove(token.as_str())
            .map(|_| ())
            .ok_or_else(|| TransportError::MessageNotFound {
                token: token.as_str().to_string(),
            })
    }

    async fn change_visibility(
        &self,
        token: &DeliveryToken,
        delay_seconds: u32,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().expect("queue state lock poisoned");

        match state.in_flight.get_mut(token.as_str()) {
            Some(in_flight) => {
                in_flight.lock_expires_at =
                    Utc::now() + Duration::seconds(i64::from(delay_seconds));
                Ok(())
            }
            None => Err(TransportError::MessageNotFound {
                token: token.as_str().to_string(),
            }),
        }
    }

    async fn purge(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().expect("queue state lock poisoned");
        state.pending.clear();
        state.in_flight.clear();
        Ok(())
    }
}
