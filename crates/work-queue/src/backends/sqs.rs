//! Amazon SQS backend using the HTTP query API.
//!
//! Requests are built by hand and signed with AWS Signature Version 4 rather
//! than going through the AWS SDK, so the wire traffic can be exercised
//! against a mock HTTP server in tests and against LocalStack in development.
//!
//! ## Operations
//!
//! | backend operation           | SQS action                |
//! |-----------------------------|---------------------------|
//! | `create_queue`              | `CreateQueue`             |
//! | `send_message`              | `SendMessage`             |
//! | `receive_messages`          | `ReceiveMessage`          |
//! | `delete_message`            | `DeleteMessage`           |
//! | `change_message_visibility` | `ChangeMessageVisibility` |
//! | `purge_queue`               | `PurgeQueue`              |
//! | `get_queue_attributes`      | `GetQueueAttributes`      |
//!
//! Every call is made exactly once. Transport failures surface as
//! [`QueueError::ConnectionFailed`]; retrying is left to the caller.
//!
//! ## Authentication
//!
//! Credentials come from [`SqsConfig`] or, when absent there, from the
//! `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY` environment variables.
//! Without credentials every request fails with
//! [`QueueError::AuthenticationFailed`].

use crate::backend::{BackendMessage, QueueBackend, ReceiveRequest};
use crate::config::{SqsConfig, MAX_RECEIVE_BATCH, MAX_WAIT_TIME_SECONDS};
use crate::error::{ConfigurationError, QueueError, SerializationError};
use crate::message::{QueueEndpoint, QueueName};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client as HttpClient;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;
use zeroize::Zeroizing;

#[cfg(test)]
#[path = "sqs_tests.rs"]
mod tests;

const PROVIDER_NAME: &str = "AwsSqs";

const API_VERSION: &str = "2012-11-05";

/// SQS message body limit
const MAX_MESSAGE_SIZE: usize = 256 * 1024;

/// Group used for every message sent to a FIFO queue
const FIFO_MESSAGE_GROUP: &str = "work-queue";

// ============================================================================
// Error Types
// ============================================================================

/// AWS SQS specific errors
#[derive(Debug, thiserror::Error)]
pub enum SqsError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("SQS service error: {code} - {message}")]
    ServiceError { code: String, message: String },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl SqsError {
    /// Map SQS error to QueueError
    pub fn into_queue_error(self) -> QueueError {
        match self {
            Self::Authentication(message) => QueueError::AuthenticationFailed { message },
            Self::NetworkError(message) => QueueError::ConnectionFailed { message },
            Self::ServiceError { code, message } => QueueError::ProviderError {
                provider: PROVIDER_NAME.to_string(),
                code,
                message,
            },
            Self::QueueNotFound(queue_name) => QueueError::QueueNotFound { queue_name },
            Self::InvalidReceipt(receipt) => QueueError::MessageNotFound { receipt },
            Self::MessageTooLarge { size, max_size } => {
                QueueError::MessageTooLarge { size, max_size }
            }
            Self::ConfigurationError(message) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message })
            }
            Self::SerializationError(message) => {
                QueueError::SerializationError(SerializationError::InvalidResponse { message })
            }
        }
    }
}

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// AWS Signature Version 4 signer
///
/// 1. Create canonical request (method, URI, query, headers, payload)
/// 2. Create string to sign (algorithm, timestamp, scope, request hash)
/// 3. Derive signing key (4-level HMAC chain)
/// 4. Calculate signature and build Authorization header
#[derive(Clone)]
struct AwsV4Signer {
    access_key: String,
    secret_key: Zeroizing<String>,
    region: String,
    service: String,
}

impl AwsV4Signer {
    fn new(access_key: String, secret_key: String, region: String) -> Self {
        Self {
            access_key,
            secret_key: Zeroizing::new(secret_key),
            region,
            service: "sqs".to_string(),
        }
    }

    /// Sign a request, returning the headers to attach to it
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

        let canonical_query_string = encode_query(query_params);

        // Canonical headers must be sorted
        let canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let signed_headers = "host;x-amz-date";

        let payload_hash = format!("{:x}", Sha256::digest(body.as_bytes()));

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query_string, canonical_headers, signed_headers, payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let canonical_request_hash = format!("{:x}", Sha256::digest(canonical_request.as_bytes()));

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            algorithm, amz_date, credential_scope, canonical_request_hash
        );

        let signature = self.calculate_signature(&string_to_sign, &date_stamp);

        let authorization_header = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.access_key, credential_scope, signed_headers, signature
        );

        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), authorization_header);
        headers.insert("x-amz-date".to_string(), amz_date);
        headers.insert("host".to_string(), host.to_string());

        headers
    }

    /// kSigning = HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")
    fn calculate_signature(&self, string_to_sign: &str, date_stamp: &str) -> String {
        let k_secret = Zeroizing::new(format!("AWS4{}", self.secret_key.as_str()));
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        let signature = hmac_sha256(&k_signing, string_to_sign.as_bytes());

        hex::encode(signature)
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Sorted, percent-encoded `k=v&k=v` query string
fn encode_query(params: &HashMap<String, String>) -> String {
    let mut pairs = params
        .iter()
        .map(|(k, v)| (urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Resolve credentials from configuration, falling back to `lookup`
fn resolve_credentials<F>(config: &SqsConfig, lookup: F) -> Option<(String, String)>
where
    F: Fn(&str) -> Option<String>,
{
    let access_key = config
        .access_key_id
        .clone()
        .or_else(|| lookup("AWS_ACCESS_KEY_ID"))?;
    let secret_key = config
        .secret_access_key
        .clone()
        .or_else(|| lookup("AWS_SECRET_ACCESS_KEY"))?;
    Some((access_key, secret_key))
}

// ============================================================================
// SQS Backend
// ============================================================================

/// Queue backend talking to Amazon SQS (or a compatible endpoint)
pub struct SqsBackend {
    http_client: HttpClient,
    signer: Option<AwsV4Signer>,
    config: SqsConfig,
    endpoint: String,
    host: String,
}

impl SqsBackend {
    /// Create new SQS backend
    ///
    /// # Errors
    ///
    /// Returns error if the region is empty, the endpoint URL is invalid, or
    /// the HTTP client cannot be built.
    pub async fn new(config: SqsConfig) -> Result<Self, SqsError> {
        Self::with_credential_lookup(config, |key| std::env::var(key).ok())
    }

    fn with_credential_lookup<F>(config: SqsConfig, lookup: F) -> Result<Self, SqsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if config.region.is_empty() {
            return Err(SqsError::ConfigurationError(
                "Region cannot be empty".to_string(),
            ));
        }

        // A long poll must finish before the HTTP client gives up on it
        if config.request_timeout_seconds <= MAX_WAIT_TIME_SECONDS as u64 {
            return Err(SqsError::ConfigurationError(format!(
                "Request timeout must exceed the {} second long-poll wait, got {}",
                MAX_WAIT_TIME_SECONDS, config.request_timeout_seconds
            )));
        }

        let signer = resolve_credentials(&config, lookup).map(|(access_key, secret_key)| {
            AwsV4Signer::new(access_key, secret_key, config.region.clone())
        });

        let endpoint = config
            .endpoint_url
            .clone()
            .unwrap_or_else(|| format!("https://sqs.{}.amazonaws.com", config.region))
            .trim_end_matches('/')
            .to_string();

        let parsed = url::Url::parse(&endpoint).map_err(|e| {
            SqsError::ConfigurationError(format!("Invalid endpoint URL '{}': {}", endpoint, e))
        })?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(SqsError::ConfigurationError(format!(
                    "Endpoint URL '{}' has no host",
                    endpoint
                )))
            }
        };

        let http_client = HttpClient::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| SqsError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            signer,
            config,
            endpoint,
            host,
        })
    }

    /// Base parameters shared by every action
    fn action_params(action: &str) -> HashMap<String, String> {
        let mut params = HashMap::new();
        params.insert("Action".to_string(), action.to_string());
        params.insert("Version".to_string(), API_VERSION.to_string());
        params
    }

    /// Base parameters for an action on an existing queue
    fn queue_params(action: &str, endpoint: &QueueEndpoint) -> HashMap<String, String> {
        let mut params = Self::action_params(action);
        params.insert("QueueUrl".to_string(), endpoint.as_str().to_string());
        params
    }

    /// Make a signed request to SQS and return the response body
    async fn make_request(&self, params: &HashMap<String, String>) -> Result<String, SqsError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| SqsError::Authentication("No credentials configured".to_string()))?;

        let method = "POST";
        let path = "/";
        let timestamp = Utc::now();
        let auth_headers = signer.sign_request(method, &self.host, path, params, "", &timestamp);

        let url = format!("{}{}?{}", self.endpoint, path, encode_query(params));

        debug!(
            action = params.get("Action").map(String::as_str).unwrap_or(""),
            "Sending SQS request"
        );

        let mut request = self.http_client.post(&url);
        for (key, value) in auth_headers {
            request = request.header(&key, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SqsError::NetworkError(format!("Request timeout: {}", e))
            } else if e.is_connect() {
                SqsError::NetworkError(format!("Connection failed: {}", e))
            } else {
                SqsError::NetworkError(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| SqsError::NetworkError(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(parse_error_response(&response_body, status.as_u16()));
        }

        Ok(response_body)
    }

    fn is_fifo_endpoint(endpoint: &QueueEndpoint) -> bool {
        endpoint.as_str().ends_with(".fifo")
    }
}

impl fmt::Debug for SqsBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsBackend")
            .field("config", &self.config)
            .field("endpoint", &self.endpoint)
            .field("has_credentials", &self.signer.is_some())
            .finish()
    }
}

#[async_trait]
impl QueueBackend for SqsBackend {
    async fn create_queue(
        &self,
        name: &QueueName,
        attributes: &HashMap<String, String>,
    ) -> Result<QueueEndpoint, QueueError> {
        let mut params = Self::action_params("CreateQueue");
        params.insert("QueueName".to_string(), name.as_str().to_string());

        let mut sorted: Vec<_> = attributes.iter().collect();
        sorted.sort();
        for (idx, (key, value)) in sorted.into_iter().enumerate() {
            params.insert(format!("Attribute.{}.Name", idx + 1), key.clone());
            params.insert(format!("Attribute.{}.Value", idx + 1), value.clone());
        }

        let response = self
            .make_request(&params)
            .await
            .map_err(|e| e.into_queue_error())?;

        let queue_url = parse_queue_url_response(&response).map_err(|e| e.into_queue_error())?;
        QueueEndpoint::new(queue_url).map_err(QueueError::ValidationError)
    }

    async fn send_message(
        &self,
        endpoint: &QueueEndpoint,
        body: &str,
        delay_seconds: u32,
    ) -> Result<(), QueueError> {
        if body.len() > MAX_MESSAGE_SIZE {
            return Err(SqsError::MessageTooLarge {
                size: body.len(),
                max_size: MAX_MESSAGE_SIZE,
            }
            .into_queue_error());
        }

        let mut params = Self::queue_params("SendMessage", endpoint);
        params.insert("MessageBody".to_string(), body.to_string());
        if delay_seconds > 0 {
            params.insert("DelaySeconds".to_string(), delay_seconds.to_string());
        }

        if Self::is_fifo_endpoint(endpoint) {
            params.insert(
                "MessageGroupId".to_string(),
                FIFO_MESSAGE_GROUP.to_string(),
            );
            params.insert(
                "MessageDeduplicationId".to_string(),
                uuid::Uuid::new_v4().to_string(),
            );
        }

        let response = self
            .make_request(&params)
            .await
            .map_err(|e| e.into_queue_error())?;

        // The backend's message id is not surfaced by the contract
        parse_send_message_response(&response).map_err(|e| e.into_queue_error())?;
        Ok(())
    }

    async fn receive_messages(
        &self,
        endpoint: &QueueEndpoint,
        request: &ReceiveRequest,
    ) -> Result<Vec<BackendMessage>, QueueError> {
        let wait_time_seconds = i64::from(request.wait_time_seconds).min(MAX_WAIT_TIME_SECONDS);

        let mut params = Self::queue_params("ReceiveMessage", endpoint);
        params.insert(
            "MaxNumberOfMessages".to_string(),
            request.max_messages.clamp(1, MAX_RECEIVE_BATCH).to_string(),
        );
        params.insert("WaitTimeSeconds".to_string(), wait_time_seconds.to_string());
        params.insert(
            "VisibilityTimeout".to_string(),
            request.visibility_timeout_seconds.to_string(),
        );
        for (idx, name) in request.attribute_names.iter().enumerate() {
            params.insert(format!("AttributeName.{}", idx + 1), name.clone());
        }

        let response = self
            .make_request(&params)
            .await
            .map_err(|e| e.into_queue_error())?;

        parse_receive_message_response(&response).map_err(|e| e.into_queue_error())
    }

    async fn delete_message(
        &self,
        endpoint: &QueueEndpoint,
        receipt_handle: &str,
    ) -> Result<(), QueueError> {
        let mut params = Self::queue_params("DeleteMessage", endpoint);
        params.insert("ReceiptHandle".to_string(), receipt_handle.to_string());

        // DeleteMessage returns an empty result on success
        self.make_request(&params)
            .await
            .map_err(|e| e.into_queue_error())?;
        Ok(())
    }

    async fn change_message_visibility(
        &self,
        endpoint: &QueueEndpoint,
        receipt_handle: &str,
        visibility_timeout_seconds: u32,
    ) -> Result<(), QueueError> {
        let mut params = Self::queue_params("ChangeMessageVisibility", endpoint);
        params.insert("ReceiptHandle".to_string(), receipt_handle.to_string());
        params.insert(
            "VisibilityTimeout".to_string(),
            visibility_timeout_seconds.to_string(),
        );

        self.make_request(&params)
            .await
            .map_err(|e| e.into_queue_error())?;
        Ok(())
    }

    async fn purge_queue(&self, endpoint: &QueueEndpoint) -> Result<(), QueueError> {
        let params = Self::queue_params("PurgeQueue", endpoint);

        self.make_request(&params)
            .await
            .map_err(|e| e.into_queue_error())?;
        Ok(())
    }

    async fn get_queue_attributes(
        &self,
        endpoint: &QueueEndpoint,
        names: &[String],
    ) -> Result<HashMap<String, String>, QueueError> {
        let mut params = Self::queue_params("GetQueueAttributes", endpoint);
        for (idx, name) in names.iter().enumerate() {
            params.insert(format!("AttributeName.{}", idx + 1), name.clone());
        }

        let response = self
            .make_request(&params)
            .await
            .map_err(|e| e.into_queue_error())?;

        parse_queue_attributes_response(&response).map_err(|e| e.into_queue_error())
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }
}

// ============================================================================
// XML Response Parsing
// ============================================================================

fn xml_error(e: impl fmt::Display) -> SqsError {
    SqsError::SerializationError(format!("XML parsing error: {}", e))
}

/// Parse the `QueueUrl` out of a CreateQueue or GetQueueUrl response
fn parse_queue_url_response(xml: &str) -> Result<String, SqsError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut in_queue_url = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"QueueUrl" => {
                in_queue_url = true;
            }
            Ok(Event::Text(e)) if in_queue_url => {
                return e.unescape().map(|s| s.into_owned()).map_err(xml_error);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Err(SqsError::SerializationError(
        "QueueUrl not found in response".to_string(),
    ))
}

/// Check that a SendMessage response carries a MessageId
fn parse_send_message_response(xml: &str) -> Result<String, SqsError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut in_message_id = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"MessageId" => {
                in_message_id = true;
            }
            Ok(Event::Text(e)) if in_message_id => {
                return e.unescape().map(|s| s.into_owned()).map_err(xml_error);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Err(SqsError::SerializationError(
        "MessageId not found in response".to_string(),
    ))
}

/// Parse the messages of a ReceiveMessage response
fn parse_receive_message_response(xml: &str) -> Result<Vec<BackendMessage>, SqsError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut messages = Vec::new();
    let mut in_message = false;
    let mut current_message_id: Option<String> = None;
    let mut current_receipt_handle: Option<String> = None;
    let mut current_body: Option<String> = None;
    let mut current_attributes: HashMap<String, String> = HashMap::new();

    let mut in_message_id = false;
    let mut in_receipt_handle = false;
    let mut in_body = false;
    let mut in_attribute_name = false;
    let mut in_attribute_value = false;
    let mut current_attribute_name: Option<String> = None;

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Message" => {
                    in_message = true;
                    current_message_id = None;
                    current_receipt_handle = None;
                    current_body = None;
                    current_attributes = HashMap::new();
                }
                b"MessageId" if in_message => in_message_id = true,
                b"ReceiptHandle" if in_message => in_receipt_handle = true,
                b"Body" if in_message => in_body = true,
                b"Name" if in_message => in_attribute_name = true,
                b"Value" if in_message => in_attribute_value = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                let text = e.unescape().map(|s| s.into_owned()).map_err(xml_error)?;
                if in_message_id {
                    current_message_id = Some(text);
                    in_message_id = false;
                } else if in_receipt_handle {
                    current_receipt_handle = Some(text);
                    in_receipt_handle = false;
                } else if in_body {
                    current_body = Some(text);
                    in_body = false;
                } else if in_attribute_name {
                    current_attribute_name = Some(text);
                    in_attribute_name = false;
                } else if in_attribute_value {
                    if let Some(name) = current_attribute_name.take() {
                        current_attributes.insert(name, text);
                    }
                    in_attribute_value = false;
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Message" => {
                in_message = false;

                match (current_receipt_handle.take(), current_body.take()) {
                    (Some(receipt_handle), Some(body)) => messages.push(BackendMessage {
                        message_id: current_message_id.take(),
                        receipt_handle,
                        body,
                        attributes: std::mem::take(&mut current_attributes),
                    }),
                    _ => {
                        return Err(SqsError::SerializationError(
                            "Message without ReceiptHandle or Body in response".to_string(),
                        ))
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(messages)
}

/// Parse the Name/Value pairs of a GetQueueAttributes response
fn parse_queue_attributes_response(xml: &str) -> Result<HashMap<String, String>, SqsError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut attributes = HashMap::new();
    let mut in_attribute = false;
    let mut in_name = false;
    let mut in_value = false;
    let mut current_name: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Attribute" => in_attribute = true,
                b"Name" if in_attribute => in_name = true,
                b"Value" if in_attribute => in_value = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                let text = e.unescape().map(|s| s.into_owned()).map_err(xml_error)?;
                if in_name {
                    current_name = Some(text);
                    in_name = false;
                } else if in_value {
                    if let Some(name) = current_name.take() {
                        attributes.insert(name, text);
                    }
                    in_value = false;
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Attribute" => {
                in_attribute = false;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(attributes)
}

/// Map an SQS error document to an [`SqsError`]
fn parse_error_response(xml: &str, status_code: u16) -> SqsError {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut error_code = None;
    let mut error_message = None;
    let mut in_error = false;
    let mut in_code = false;
    let mut in_message = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Error" => in_error = true,
                b"Code" if in_error => in_code = true,
                b"Message" if in_error => in_message = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_code {
                    error_code = e.unescape().ok().map(|s| s.into_owned());
                    in_code = false;
                } else if in_message {
                    error_message = e.unescape().ok().map(|s| s.into_owned());
                    in_message = false;
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Error" => {
                in_error = false;
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    let code = error_code.unwrap_or_else(|| format!("HTTP{}", status_code));
    let message = error_message.unwrap_or_else(|| "Unknown error".to_string());

    match code.as_str() {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            SqsError::QueueNotFound(message)
        }
        "InvalidClientTokenId"
        | "UnrecognizedClientException"
        | "SignatureDoesNotMatch"
        | "AccessDenied"
        | "MissingAuthenticationToken" => {
            SqsError::Authentication(format!("{}: {}", code, message))
        }
        "InvalidReceiptHandle"
        | "ReceiptHandleIsInvalid"
        | "AWS.SimpleQueueService.MessageNotInflight"
        | "MessageNotInflight" => SqsError::InvalidReceipt(message),
        _ if status_code == 401 || status_code == 403 => {
            SqsError::Authentication(format!("{}: {}", code, message))
        }
        _ => SqsError::ServiceError { code, message },
    }
}
