//! Queue configuration and provider credentials.

use crate::error::ValidationError;
use crate::message::QueueName;
use serde::{Deserialize, Serialize};

/// Configuration for one logical queue, set at construction and immutable
/// for the lifetime of a transport or engine instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Logical queue name
    pub queue_name: QueueName,
    /// Transport address (the queue URL)
    pub queue_url: String,
    /// Long-poll wait bound in seconds; clamped to the provider maximum on use
    pub wait_seconds: u32,
    /// Per-message processing timeout in seconds, used as the visibility
    /// timeout baseline. Must be > 0.
    pub visibility_timeout_seconds: u32,
    /// Advisory maximum attempt count, used only to derive the last-attempt
    /// flag handed to the caller. Must be >= 1.
    pub max_attempts: u32,
}

impl QueueConfig {
    /// Create configuration with default polling and visibility settings
    pub fn new(queue_name: QueueName, queue_url: String) -> Self {
        Self {
            queue_name,
            queue_url,
            wait_seconds: 20,
            visibility_timeout_seconds: 30,
            max_attempts: 3,
        }
    }

    /// Set long-poll wait bound
    pub fn with_wait_seconds(mut self, wait_seconds: u32) -> Self {
        self.wait_seconds = wait_seconds;
        self
    }

    /// Set visibility timeout baseline
    pub fn with_visibility_timeout_seconds(mut self, seconds: u32) -> Self {
        self.visibility_timeout_seconds = seconds;
        self
    }

    /// Set advisory maximum attempt count
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Validate configuration invariants
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.queue_url.is_empty() {
            return Err(ValidationError::Required {
                field: "queue_url".to_string(),
            });
        }

        if self.visibility_timeout_seconds == 0 {
            return Err(ValidationError::OutOfRange {
                field: "visibility_timeout_seconds".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.max_attempts == 0 {
            return Err(ValidationError::OutOfRange {
                field: "max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

/// Credentials for AWS Signature V4 request signing
#[derive(Debug, Clone)]
pub struct SqsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

impl SqsCredentials {
    pub fn new(access_key_id: String, secret_access_key: String, region: String) -> Self {
        Self {
            access_key_id,
            secret_access_key,
            region,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
