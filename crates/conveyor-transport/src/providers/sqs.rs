//! AWS SQS transport implementation using the HTTP query API.
//!
//! Talks to SQS through direct HTTP calls signed with AWS Signature V4
//! instead of the AWS SDK, which keeps the dependency surface small and the
//! request/response handling transparent and testable.
//!
//! Operations used:
//! - `SendMessage` with optional `DelaySeconds`
//! - `ReceiveMessage` with long-poll `WaitTimeSeconds` and all attributes
//! - `DeleteMessage` by receipt handle
//! - `ChangeMessageVisibility` for per-delivery redelivery deferral
//! - `PurgeQueue`
//!
//! Message bodies are base64 encoded on the wire. `ApproximateReceiveCount`
//! from the receive response becomes the delivery count.

use crate::client::QueueTransport;
use crate::config::{QueueConfig, SqsCredentials};
use crate::error::TransportError;
use crate::message::{DeliveredMessage, DeliveryToken, MessageId};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client as HttpClient;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};
use url::Url;

#[cfg(test)]
#[path = "sqs_tests.rs"]
mod tests;

/// SQS rejects bodies larger than 256KB
const MAX_MESSAGE_SIZE: usize = 256 * 1024;

/// SQS caps long-poll waits at 20 seconds
const MAX_WAIT_SECONDS: u32 = 20;

/// SQS query API version
const API_VERSION: &str = "2012-11-05";

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

/// AWS Signature Version 4 signer for request authentication
///
/// Implements the V4 signing process: canonical request, string to sign,
/// 4-level HMAC key derivation, Authorization header assembly.
#[derive(Clone)]
struct SigV4Signer {
    access_key: String,
    secret_key: String,
    region: String,
    service: String,
}

impl SigV4Signer {
    fn new(credentials: &SqsCredentials) -> Self {
        Self {
            access_key: credentials.access_key_id.clone(),
            secret_key: credentials.secret_access_key.clone(),
            region: credentials.region.clone(),
            service: "sqs".to_string(),
        }
    }

    /// Sign an HTTP request, returning the headers to attach
    fn sign_request(
        &self,
        method: &str,
        host: &str,
        path: &str,
        query_params: &HashMap<String, String>,
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> HashMap<String, String> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        // Canonical request
        let mut canonical_query: Vec<String> = query_params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        canonical_query.sort();
        let canonical_query = canonical_query.join("&");

        let canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let signed_headers = "host;x-amz-date";
        let payload_hash = format!("{:x}", Sha256::digest(body.as_bytes()));

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        // String to sign
        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let request_hash = format!("{:x}", Sha256::digest(canonical_request.as_bytes()));
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            algorithm, amz_date, credential_scope, request_hash
        );

        // Signature
        let signature = self.calculate_signature(&string_to_sign, &date_stamp);

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.access_key, credential_scope, signed_headers, signature
        );

        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), authorization);
        headers.insert("x-amz-date".to_string(), amz_date);
        headers.insert("host".to_string(), host.to_string());

        headers
    }

    /// Derive the signing key and sign the string-to-sign
    ///
    /// Key derivation chain: date -> region -> service -> "aws4_request".
    fn calculate_signature(&self, string_to_sign: &str, date_stamp: &str) -> String {
        let k_secret = format!("AWS4{}", self.secret_key);
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        let signature = hmac_sha256(&k_signing, string_to_sign.as_bytes());

        hex::encode(signature)
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

// ============================================================================
// XML Response Parsing
// ============================================================================

/// Extract the text content of the first occurrence of `tag`
fn xml_text(xml: &str, tag: &str) -> Option<String> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut inside = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == tag.as_bytes() => inside = true,
            Ok(Event::Text(e)) if inside => {
                return e.unescape().ok().map(|s| s.into_owned());
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == tag.as_bytes() => inside = false,
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

/// One `<Message>` element from a ReceiveMessage response
#[derive(Debug, Default)]
struct RawMessage {
    message_id: Option<String>,
    receipt_handle: Option<String>,
    body: Option<String>,
    receive_count: u32,
}

/// Parse all `<Message>` elements from a ReceiveMessage response
fn parse_receive_response(xml: &str) -> Result<Vec<RawMessage>, TransportError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut messages = Vec::new();
    let mut current: Option<RawMessage> = None;
    let mut text_target: Option<&'static str> = None;
    let mut attribute_name: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Message" => current = Some(RawMessage::default()),
                b"MessageId" if current.is_some() => text_target = Some("message_id"),
                b"ReceiptHandle" if current.is_some() => text_target = Some("receipt_handle"),
                b"Body" if current.is_some() => text_target = Some("body"),
                b"Name" if current.is_some() => text_target = Some("attribute_name"),
                b"Value" if current.is_some() => text_target = Some("attribute_value"),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                let text = e.unescape().ok().map(|s| s.into_owned());
                if let (Some(target), Some(message)) = (text_target.take(), current.as_mut()) {
                    match target {
                        "message_id" => message.message_id = text,
                        "receipt_handle" => message.receipt_handle = text,
                        "body" => message.body = text,
                        "attribute_name" => attribute_name = text,
                        "attribute_value" => {
                            if attribute_name.as_deref() == Some("ApproximateReceiveCount") {
                                if let Some(count) = text {
                                    message.receive_count = count.parse().unwrap_or(1);
                                }
                            }
                            attribute_name = None;
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Message" => {
                if let Some(message) = current.take() {
                    messages.push(message);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(TransportError::Serialization {
                    message: format!("XML parsing error: {}", e),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(messages)
}

/// Extract the provider-assigned id from a SendMessage response
///
/// The id is part of the enqueue acknowledgement; a response without one is
/// malformed and must fail the send rather than fabricate an identity.
fn parse_send_response(xml: &str) -> Result<MessageId, TransportError> {
    let message_id = xml_text(xml, "MessageId").ok_or_else(|| TransportError::Serialization {
        message: "MessageId not found in SendMessage response".to_string(),
    })?;

    MessageId::from_str(&message_id).map_err(|_| TransportError::Serialization {
        message: "Empty MessageId in SendMessage response".to_string(),
    })
}

/// Convert one parsed message into a delivery, or skip it
///
/// A skipped message stays invisible until its visibility timeout elapses and
/// then redelivers on its own; failing the whole batch would stall its
/// well-formed siblings the same way.
fn into_delivered(raw: RawMessage, delivered_at: DateTime<Utc>) -> Option<DeliveredMessage> {
    let RawMessage {
        message_id,
        receipt_handle,
        body,
        receive_count,
    } = raw;

    let (Some(body_base64), Some(receipt_handle)) = (body, receipt_handle) else {
        warn!(
            message_id = message_id.as_deref().unwrap_or("unknown"),
            "Skipping received message without body or receipt handle"
        );
        return None;
    };

    let body_bytes = match BASE64.decode(&body_base64) {
        Ok(bytes) => bytes,
        Err(decode_error) => {
            warn!(
                message_id = message_id.as_deref().unwrap_or("unknown"),
                error = %decode_error,
                "Skipping received message with undecodable body"
            );
            return None;
        }
    };

    let token = match DeliveryToken::new(receipt_handle) {
        Ok(token) => token,
        Err(token_error) => {
            warn!(
                message_id = message_id.as_deref().unwrap_or("unknown"),
                error = %token_error,
                "Skipping received message with unusable receipt handle"
            );
            return None;
        }
    };

    let message_id = message_id
        .and_then(|id| MessageId::from_str(&id).ok())
        .unwrap_or_default();

    Some(DeliveredMessage {
        message_id,
        body: Bytes::from(body_bytes),
        token,
        delivery_count: receive_count.max(1),
        delivered_at,
    })
}

/// Map an SQS error response onto a transport error
fn parse_error_response(xml: &str, status_code: u16, queue_name: &str) -> TransportError {
    let code = xml_text(xml, "Code").unwrap_or_else(|| "Unknown".to_string());
    let message = xml_text(xml, "Message").unwrap_or_else(|| "Unknown error".to_string());

    match code.as_str() {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            TransportError::QueueNotFound {
                queue_name: queue_name.to_string(),
            }
        }
        "InvalidClientTokenId" | "UnrecognizedClientException" | "SignatureDoesNotMatch" => {
            TransportError::AuthenticationFailed {
                message: format!("{}: {}", code, message),
            }
        }
        "InvalidReceiptHandle" | "ReceiptHandleIsInvalid" => TransportError::MessageNotFound {
            token: message,
        },
        _ if status_code == 401 || status_code == 403 => TransportError::AuthenticationFailed {
            message: format!("{}: {}", code, message),
        },
        _ => TransportError::ProviderError { code, message },
    }
}

// ============================================================================
// SQS Transport
// ============================================================================

/// AWS SQS transport bound to one queue URL
///
/// Thread-safe; share across tasks with `Arc` or by cloning. The internal
/// HTTP client handles connection pooling.
#[derive(Clone)]
pub struct SqsTransport {
    http_client: HttpClient,
    signer: SigV4Signer,
    config: QueueConfig,
    endpoint: String,
    host: String,
}

impl SqsTransport {
    /// Create a transport for the queue named in `config`
    ///
    /// The endpoint is derived from the queue URL in the configuration.
    pub fn new(config: QueueConfig, credentials: SqsCredentials) -> Result<Self, TransportError> {
        config.validate()?;

        let url = Url::parse(&config.queue_url).map_err(|e| {
            TransportError::Validation(crate::error::ValidationError::InvalidFormat {
                field: "queue_url".to_string(),
                message: format!("not a valid URL: {}", e),
            })
        })?;

        let host = url
            .host_str()
            .ok_or_else(|| {
                TransportError::Validation(crate::error::ValidationError::InvalidFormat {
                    field: "queue_url".to_string(),
                    message: "missing host".to_string(),
                })
            })?
            .to_string();
        let endpoint = format!("{}://{}", url.scheme(), host);

        let http_client = HttpClient::builder()
            // Above the 20s long-poll ceiling so receives are not cut short
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::ConnectionFailed {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            signer: SigV4Signer::new(&credentials),
            config,
            endpoint,
            host,
        })
    }

    /// Issue a signed query-API request and return the response body
    async fn make_request(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<String, TransportError> {
        let action = params.get("Action").map(String::as_str).unwrap_or("unknown");
        debug!(
            queue = %self.config.queue_name,
            action,
            "Sending SQS request"
        );

        let timestamp = Utc::now();
        let auth_headers = self
            .signer
            .sign_request("POST", &self.host, "/", params, "", &timestamp);

        let query_string = params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let url = format!("{}/?{}", self.endpoint, query_string);

        let mut request = self.http_client.post(&url);
        for (key, value) in auth_headers {
            request = request.header(&key, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    operation: params
                        .get("Action")
                        .cloned()
                        .unwrap_or_else(|| "unknown".to_string()),
                }
            } else {
                TransportError::ConnectionFailed {
                    message: format!("HTTP request failed: {}", e),
                }
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                message: format!("Failed to read response body: {}", e),
            })?;

        if !status.is_success() {
            let error = parse_error_response(&body, status.as_u16(), self.config.queue_name.as_str());
            warn!(
                queue = %self.config.queue_name,
                action,
                status = status.as_u16(),
                error = %error,
                "SQS request failed"
            );
            return Err(error);
        }

        Ok(body)
    }

    fn base_params(&self, action: &str) -> HashMap<String, String> {
        let mut params = HashMap::new();
        params.insert("Action".to_string(), action.to_string());
        params.insert("Version".to_string(), API_VERSION.to_string());
        params.insert("QueueUrl".to_string(), self.config.queue_url.clone());
        params
    }
}

impl fmt::Debug for SqsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsTransport")
            .field("queue_name", &self.config.queue_name)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[async_trait]
impl QueueTransport for SqsTransport {
    async fn send(
        &self,
        body: Bytes,
        delay_seconds: Option<u32>,
    ) -> Result<MessageId, TransportError> {
        let body_base64 = BASE64.encode(&body);

        if body_base64.len() > MAX_MESSAGE_SIZE {
            return Err(TransportError::MessageTooLarge {
                size: body_base64.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }

        let mut params = self.base_params("SendMessage");
        params.insert("MessageBody".to_string(), body_base64);
        if let Some(delay) = delay_seconds {
            if delay > 0 {
                params.insert("DelaySeconds".to_string(), delay.to_string());
            }
        }

        let response = self.make_request(&params).await?;
        parse_send_response(&response)
    }

    async fn receive(&self) -> Result<Vec<DeliveredMessage>, TransportError> {
        let wait_seconds = self.config.wait_seconds.min(MAX_WAIT_SECONDS);

        let mut params = self.base_params("ReceiveMessage");
        params.insert("MaxNumberOfMessages".to_string(), "10".to_string());
        params.insert("WaitTimeSeconds".to_string(), wait_seconds.to_string());
        params.insert("AttributeName.1".to_string(), "All".to_string());
        params.insert(
            "VisibilityTimeout".to_string(),
            self.config.visibility_timeout_seconds.to_string(),
        );

        let response = self.make_request(&params).await?;
        let raw_messages = parse_receive_response(&response)?;

        let delivered_at = Utc::now();
        Ok(raw_messages
            .into_iter()
            .filter_map(|raw| into_delivered(raw, delivered_at))
            .collect())
    }

    async fn delete(&self, token: &DeliveryToken) -> Result<(), TransportError> {
        let mut params = self.base_params("DeleteMessage");
        params.insert("ReceiptHandle".to_string(), token.as_str().to_string());

        // Empty response body on success
        self.make_request(&params).await?;
        Ok(())
    }

    async fn change_visibility(
        &self,
        token: &DeliveryToken,
        delay_seconds: u32,
    ) -> Result<(), TransportError> {
        let mut params = self.base_params("ChangeMessageVisibility");
        params.insert("ReceiptHandle".to_string(), token.as_str().to_string());
        params.insert("VisibilityTimeout".to_string(), delay_seconds.to_string());

        self.make_request(&params).await?;
        Ok(())
    }

    async fn purge(&self) -> Result<(), TransportError> {
        let params = self.base_params("PurgeQueue");
        self.make_request(&params).await?;
        Ok(())
    }
}
