//! # Conveyor Transport
//!
//! Durable-queue transport abstraction for at-least-once message processing,
//! with an SQS-compatible HTTP provider and an in-memory implementation.
//!
//! This library provides:
//! - A provider-agnostic [`QueueTransport`] capability trait bound to one queue
//! - Send with optional enqueue delay
//! - Long-poll receive returning delivery tokens and receive counts
//! - Delete-by-token and per-delivery visibility deferral
//! - Queue purge for test isolation
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all transport operations
//! - [`message`] - Message structures and delivery tokens
//! - [`config`] - Queue configuration and credentials
//! - [`client`] - The transport capability trait
//! - [`providers`] - SQS and in-memory implementations

// Module declarations
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use client::QueueTransport;
pub use config::{QueueConfig, SqsCredentials};
pub use error::{TransportError, ValidationError};
pub use message::{DeliveredMessage, DeliveryToken, MessageId, QueueName};
pub use providers::{InMemoryTransport, SqsTransport};
