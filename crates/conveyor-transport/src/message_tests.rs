//! Tests for message types and identifiers.

use super::*;

mod queue_name {
    use super::*;

    /// Verify valid queue names are accepted.
    #[test]
    fn test_valid_names() {
        assert!(QueueName::new("work-items".to_string()).is_ok());
        assert!(QueueName::new("work_items_2".to_string()).is_ok());
        assert!(QueueName::new("q".to_string()).is_ok());
    }

    /// Verify length limits are enforced.
    #[test]
    fn test_length_limits() {
        assert!(QueueName::new(String::new()).is_err());
        assert!(QueueName::new("a".repeat(261)).is_err());
        assert!(QueueName::new("a".repeat(260)).is_ok());
    }

    /// Verify character and hyphen restrictions.
    #[test]
    fn test_invalid_characters() {
        assert!(QueueName::new("has space".to_string()).is_err());
        assert!(QueueName::new("has/slash".to_string()).is_err());
        assert!(QueueName::new("-leading".to_string()).is_err());
        assert!(QueueName::new("trailing-".to_string()).is_err());
        assert!(QueueName::new("double--hyphen".to_string()).is_err());
    }

    /// Verify FromStr round-trips through Display.
    #[test]
    fn test_from_str_display() {
        let name: QueueName = "work-items".parse().unwrap();
        assert_eq!(name.to_string(), "work-items");
        assert_eq!(name.as_str(), "work-items");
    }
}

mod message_id {
    use super::*;
    use std::str::FromStr;

    /// Verify generated IDs are unique.
    #[test]
    fn test_generated_ids_unique() {
        let a = MessageId::new();
        let b = MessageId::new();
        assert_ne!(a, b);
    }

    /// Verify provider-assigned IDs parse, empty IDs do not.
    #[test]
    fn test_from_str() {
        assert!(MessageId::from_str("sqs-assigned-id").is_ok());
        assert!(MessageId::from_str("").is_err());
    }
}

mod delivery_token {
    use super::*;

    /// Verify tokens must be non-empty.
    #[test]
    fn test_empty_token_rejected() {
        assert!(DeliveryToken::new(String::new()).is_err());
        assert!(DeliveryToken::new("receipt".to_string()).is_ok());
    }

    /// Verify token string round-trips.
    #[test]
    fn test_token_round_trip() {
        let token = DeliveryToken::new("opaque-receipt-handle".to_string()).unwrap();
        assert_eq!(token.as_str(), "opaque-receipt-handle");
        assert_eq!(token.to_string(), "opaque-receipt-handle");
    }
}
