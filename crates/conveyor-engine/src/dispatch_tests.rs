//! Tests for the per-delivery data model.

use super::*;
use bytes::Bytes;
use chrono::Utc;
use conveyor_transport::DeliveredMessage;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, serde::Serialize, Deserialize)]
struct TestJob {
    tenant: String,
    #[serde(default)]
    rate_limited: bool,
}

impl WorkPayload for TestJob {
    fn tenant_key(&self) -> String {
        self.tenant.clone()
    }

    fn mark_rate_limited(&mut self) {
        self.rate_limited = true;
    }
}

fn delivery(body: &str, delivery_count: u32) -> DeliveredMessage {
    DeliveredMessage {
        message_id: conveyor_transport::MessageId::new(),
        body: Bytes::from(body.to_string()),
        token: DeliveryToken::new("token-1".to_string()).unwrap(),
        delivery_count,
        delivered_at: Utc::now(),
    }
}

mod envelope {
    use super::*;

    /// Verify a valid body decodes with its delivery metadata.
    #[test]
    fn test_decode_valid_payload() {
        let message = delivery(r#"{"tenant":"acme"}"#, 1);
        let envelope = Envelope::<TestJob>::decode(&message, 3).unwrap();

        assert_eq!(envelope.payload.tenant, "acme");
        assert_eq!(envelope.receive_count, 1);
        assert!(!envelope.last_attempt);
        assert_eq!(envelope.token.as_str(), "token-1");
    }

    /// Verify last_attempt flips once receive count reaches max_attempts.
    #[test]
    fn test_last_attempt_derivation() {
        let message = delivery(r#"{"tenant":"acme"}"#, 2);
        assert!(!Envelope::<TestJob>::decode(&message, 3).unwrap().last_attempt);

        let message = delivery(r#"{"tenant":"acme"}"#, 3);
        assert!(Envelope::<TestJob>::decode(&message, 3).unwrap().last_attempt);

        let message = delivery(r#"{"tenant":"acme"}"#, 4);
        assert!(Envelope::<TestJob>::decode(&message, 3).unwrap().last_attempt);
    }

    /// Verify an undecodable body is rejected.
    #[test]
    fn test_decode_invalid_payload() {
        let message = delivery("not json", 1);
        assert!(Envelope::<TestJob>::decode(&message, 3).is_err());
    }
}

mod verdicts {
    use super::*;

    /// Verify the retry decision constructors carry the right flags.
    #[test]
    fn test_retry_decision_constructors() {
        let retry = RetryDecision::retry_after(30);
        assert!(retry.retryable);
        assert_eq!(retry.retry_delay_seconds, Some(30));
        assert!(retry.is_failure);

        let abandon = RetryDecision::abandon();
        assert!(!abandon.retryable);
        assert_eq!(abandon.retry_delay_seconds, None);
        assert!(abandon.is_failure);

        let discard = RetryDecision::discard();
        assert!(!discard.retryable);
        assert!(!discard.is_failure);
    }

    /// Verify the rate limit verdict constructors.
    #[test]
    fn test_rate_limit_verdict_constructors() {
        let allowed = RateLimitVerdict::allowed();
        assert!(!allowed.exceeded);
        assert_eq!(allowed.cooldown_seconds, None);

        let exceeded = RateLimitVerdict::exceeded(123);
        assert!(exceeded.exceeded);
        assert_eq!(exceeded.cooldown_seconds, Some(123));
    }
}

mod payload {
    use super::*;

    /// Verify the rate-limited marker survives a serialization round trip.
    #[test]
    fn test_rate_limited_marker_round_trip() {
        let mut job = TestJob {
            tenant: "acme".to_string(),
            rate_limited: false,
        };
        job.mark_rate_limited();

        let body = serde_json::to_string(&job).unwrap();
        let decoded: TestJob = serde_json::from_str(&body).unwrap();
        assert!(decoded.rate_limited);
        assert_eq!(decoded.tenant, "acme");
    }
}
