//! Twilio REST transport for emergency messages and voice calls
//!
//! One `TwilioClient` is constructed at startup and shared for the life of
//! the process; it implements both the notification transport and the
//! recipient directory (recipients are the account's verified caller IDs).

use crate::domain::types::{CallRecord, CallStatus, Recipient};
use crate::infra::config::Config;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Request timeout for all transport calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Page size for call log queries; comfortably above any recipient list
const CALL_LOG_PAGE_SIZE: u32 = 50;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid transport response: {0}")]
    InvalidResponse(String),
}

/// Sends emergency messages and places voice calls
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send_message(&self, to: &Recipient, body: &str) -> Result<(), TransportError>;

    async fn place_call(&self, to: &Recipient) -> Result<(), TransportError>;

    /// Call records for this account, bounded below by `since` (coarse,
    /// date-granular on the API side; callers filter strictly).
    async fn list_calls_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<CallRecord>, TransportError>;
}

/// Resolves the current broadcast list
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn list_recipients(&self) -> Result<Vec<Recipient>, TransportError>;
}

#[derive(Debug, Deserialize)]
struct CallsPage {
    calls: Vec<CallResource>,
}

#[derive(Debug, Deserialize)]
struct CallResource {
    to: String,
    status: String,
    /// RFC 2822; absent while the call is still queued
    start_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallerIdsPage {
    outgoing_caller_ids: Vec<CallerIdResource>,
}

/// Error envelope returned by the REST API
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct CallerIdResource {
    phone_number: String,
}

/// Twilio REST API session
pub struct TwilioClient {
    http: reqwest::Client,
    api_base: String,
    account_sid: String,
    from_number: String,
    call_url: String,
    call_timeout_secs: u32,
    auth_header: String,
}

impl TwilioClient {
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        // Create the HTTP client once for reuse (connection pooling)
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .http1_only()
            .build()?;

        Ok(Self {
            http,
            api_base: config.transport_api_base().trim_end_matches('/').to_string(),
            account_sid: config.account_sid().to_string(),
            from_number: config.from_number().to_string(),
            call_url: config.call_url().to_string(),
            call_timeout_secs: config.call_timeout_secs(),
            auth_header: basic_auth_header(config.account_sid(), config.auth_token()),
        })
    }

    fn resource_url(&self, resource: &str) -> String {
        format!("{}/2010-04-01/Accounts/{}/{}", self.api_base, self.account_sid, resource)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // The API wraps errors in a JSON envelope; fall back to the raw
            // body when it does not
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            return Err(TransportError::Api { status: status.as_u16(), body: message });
        }
        Ok(response)
    }

    async fn post_form(
        &self,
        resource: &str,
        params: &[(&str, &str)],
    ) -> Result<(), TransportError> {
        let response = self
            .http
            .post(self.resource_url(resource))
            .header("Authorization", &self.auth_header)
            .form(params)
            .send()
            .await?;
        Self::check_status(response).await.map(|_| ())
    }

    /// Convert one API call resource into a record. Calls that never started
    /// carry no start time and cannot be attributed to an episode; malformed
    /// timestamps are dropped rather than failing the whole page.
    fn parse_call_record(resource: &CallResource) -> Option<CallRecord> {
        let raw = resource.start_time.as_deref()?;
        let started_at = match DateTime::parse_from_rfc2822(raw) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(e) => {
                warn!(start_time = %raw, error = %e, "call_record_bad_timestamp");
                return None;
            }
        };
        Some(CallRecord {
            recipient: Recipient(resource.to.clone()),
            status: CallStatus::from_api(&resource.status),
            started_at,
        })
    }
}

/// Build a Basic auth header from account credentials
fn basic_auth_header(sid: &str, token: &str) -> String {
    let credentials = format!("{}:{}", sid, token);
    format!("Basic {}", STANDARD.encode(credentials.as_bytes()))
}

#[async_trait]
impl NotificationTransport for TwilioClient {
    async fn send_message(&self, to: &Recipient, body: &str) -> Result<(), TransportError> {
        self.post_form(
            "Messages.json",
            &[("To", to.as_str()), ("From", &self.from_number), ("Body", body)],
        )
        .await?;
        debug!(to = %to, "message_accepted");
        Ok(())
    }

    async fn place_call(&self, to: &Recipient) -> Result<(), TransportError> {
        let timeout = self.call_timeout_secs.to_string();
        self.post_form(
            "Calls.json",
            &[
                ("To", to.as_str()),
                ("From", &self.from_number),
                ("Url", &self.call_url),
                ("Timeout", &timeout),
            ],
        )
        .await?;
        debug!(to = %to, "call_accepted");
        Ok(())
    }

    async fn list_calls_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<CallRecord>, TransportError> {
        let response = self
            .http
            .get(self.resource_url("Calls.json"))
            .header("Authorization", &self.auth_header)
            .query(&[
                ("StartTime>", since.format("%Y-%m-%d").to_string()),
                ("PageSize", CALL_LOG_PAGE_SIZE.to_string()),
            ])
            .send()
            .await?;
        let page: CallsPage = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

        Ok(page.calls.iter().filter_map(Self::parse_call_record).collect())
    }
}

#[async_trait]
impl RecipientDirectory for TwilioClient {
    async fn list_recipients(&self) -> Result<Vec<Recipient>, TransportError> {
        let response = self
            .http
            .get(self.resource_url("OutgoingCallerIds.json"))
            .header("Authorization", &self.auth_header)
            .send()
            .await?;
        let page: CallerIdsPage = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

        // Preserve order, drop duplicate registrations
        let mut recipients: Vec<Recipient> = Vec::with_capacity(page.outgoing_caller_ids.len());
        for caller_id in page.outgoing_caller_ids {
            let recipient = Recipient(caller_id.phone_number);
            if !recipients.contains(&recipient) {
                recipients.push(recipient);
            }
        }
        Ok(recipients)
    }
}
