use std::time::Duration as StdDuration;

use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;

use crate::error::{ServiceError, ServiceResult};

pub mod query;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
const API_BASE_ENV: &str = "NEWSROOM_GMAIL_API_URL";
const MAX_RATE_LIMIT_RETRIES: usize = 5;
const REDACTED_BODY_MAX_LEN: usize = 200;

pub const UNREAD_LABEL: &str = "UNREAD";
pub const TRASH_LABEL: &str = "TRASH";

/// Truncates an upstream response body before it reaches logs or error
/// messages; Gmail error payloads can embed request URLs and tokens.
pub fn redact_response_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= REDACTED_BODY_MAX_LEN {
        trimmed.to_string()
    } else {
        format!(
            "{}…[truncated {} bytes]",
            &trimmed[..REDACTED_BODY_MAX_LEN],
            trimmed.len()
        )
    }
}

/// Thin client over the Gmail REST surface: message-id search, full
/// message fetch, and the four label/trash mutations. Authenticated per
/// call with a bearer token supplied by the session layer.
#[derive(Debug, Clone)]
pub struct GmailClient {
    client: Client,
    api_base: String,
}

impl Default for GmailClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GmailClient {
    pub fn new() -> Self {
        let api_base = std::env::var(API_BASE_ENV)
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| GMAIL_API_BASE.to_string());

        Self {
            client: Client::new(),
            api_base,
        }
    }

    /// Issues one search query and returns the first page of matching
    /// message ids, capped at `max_results`. No pagination: bounding
    /// latency and quota cost matters more than completeness here.
    pub async fn list_message_ids(
        &self,
        token: &str,
        search_query: &str,
        max_results: usize,
    ) -> ServiceResult<Vec<MessageStub>> {
        let url = Url::parse_with_params(
            &format!("{}/users/me/messages", self.api_base),
            &[
                ("maxResults", max_results.to_string().as_str()),
                ("q", search_query),
            ],
        )
        .map_err(|e| ServiceError::Provider(format!("invalid message list url: {e}")))?;

        let body = self.fetch_with_retry(token, url.as_str()).await?;
        let list: MessageList = serde_json::from_str(&body)
            .map_err(|e| ServiceError::Provider(format!("decode gmail message list: {e}")))?;
        Ok(list.messages.unwrap_or_default())
    }

    pub async fn get_message(&self, token: &str, message_id: &str) -> ServiceResult<RawMessage> {
        let url = format!("{}/users/me/messages/{message_id}?format=full", self.api_base);
        let body = self.fetch_with_retry(token, &url).await?;
        serde_json::from_str(&body)
            .map_err(|e| ServiceError::Provider(format!("decode gmail message: {e}")))
    }

    pub async fn remove_unread_label(&self, token: &str, message_id: &str) -> ServiceResult<()> {
        self.modify_labels(token, message_id, &[], &[UNREAD_LABEL])
            .await
    }

    pub async fn add_unread_label(&self, token: &str, message_id: &str) -> ServiceResult<()> {
        self.modify_labels(token, message_id, &[UNREAD_LABEL], &[])
            .await
    }

    pub async fn trash_message(&self, token: &str, message_id: &str) -> ServiceResult<()> {
        let url = format!("{}/users/me/messages/{message_id}/trash", self.api_base);
        self.post_action(token, &url, json!({})).await
    }

    pub async fn untrash_message(&self, token: &str, message_id: &str) -> ServiceResult<()> {
        let url = format!("{}/users/me/messages/{message_id}/untrash", self.api_base);
        self.post_action(token, &url, json!({})).await
    }

    async fn modify_labels(
        &self,
        token: &str,
        message_id: &str,
        add: &[&str],
        remove: &[&str],
    ) -> ServiceResult<()> {
        let url = format!("{}/users/me/messages/{message_id}/modify", self.api_base);
        self.post_action(
            token,
            &url,
            json!({
                "addLabelIds": add,
                "removeLabelIds": remove,
            }),
        )
        .await
    }

    /// Single-attempt mutation. Label-set and trash operations are safe
    /// to repeat, so retries are left to the caller.
    async fn post_action(
        &self,
        token: &str,
        url: &str,
        payload: serde_json::Value,
    ) -> ServiceResult<()> {
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ServiceError::Provider(format!("gmail api request: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::Provider(format!("read gmail api response body: {e}")))?;
        Err(error_for_status(status, &body))
    }

    /// GETs retry on 429 with exponential backoff, honoring a numeric
    /// `Retry-After` header when the provider sends one.
    async fn fetch_with_retry(&self, token: &str, url: &str) -> ServiceResult<String> {
        let mut backoff_seconds = 1u64;

        for attempt in 0..=MAX_RATE_LIMIT_RETRIES {
            let response = self
                .client
                .get(url)
                .bearer_auth(token)
                .header("accept", "application/json")
                .send()
                .await
                .map_err(|e| ServiceError::Provider(format!("gmail api request: {e}")))?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt == MAX_RATE_LIMIT_RETRIES {
                    let body = response.text().await.map_err(|e| {
                        ServiceError::Provider(format!("read gmail 429 response body: {e}"))
                    })?;
                    return Err(ServiceError::Provider(format!(
                        "gmail api request exhausted retries: {}",
                        redact_response_body(&body)
                    )));
                }

                let retry_after_seconds = response
                    .headers()
                    .get("retry-after")
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(backoff_seconds);

                sleep(StdDuration::from_secs(retry_after_seconds)).await;
                backoff_seconds = (backoff_seconds * 2).min(32);
                continue;
            }

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| ServiceError::Provider(format!("read gmail api response body: {e}")))?;
            if !status.is_success() {
                return Err(error_for_status(status, &body));
            }

            return Ok(body);
        }

        Err(ServiceError::Provider(
            "gmail api request failed without response".to_string(),
        ))
    }
}

/// 401/403 mean the bearer token is no longer accepted; only a fresh
/// consent flow can recover, so those map to the session-expired class.
fn error_for_status(status: StatusCode, body: &str) -> ServiceError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return ServiceError::session_expired(format!(
            "gmail rejected credentials: status={status} body={}",
            redact_response_body(body)
        ));
    }
    ServiceError::Provider(format!(
        "gmail api request failed: status={status} body={}",
        redact_response_body(body)
    ))
}

// --- Raw message payload schema, validated at the ingestion boundary ---

#[derive(Debug, Clone, Deserialize)]
struct MessageList {
    messages: Option<Vec<MessageStub>>,
    #[serde(rename = "nextPageToken")]
    #[allow(dead_code)]
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageStub {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
}

/// One message as returned by a `format=full` fetch: label metadata plus
/// the MIME payload tree.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    #[serde(rename = "labelIds")]
    pub label_ids: Option<Vec<String>>,
    pub snippet: Option<String>,
    pub payload: MessagePayload,
    #[serde(rename = "internalDate")]
    pub internal_date: Option<String>,
}

/// A MIME part. Single-part messages carry their body at the top level;
/// multi-part messages nest further parts under `parts`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
    pub headers: Option<Vec<MessageHeader>>,
    pub body: Option<MessageBody>,
    pub parts: Option<Vec<MessagePayload>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageBody {
    pub size: Option<u64>,
    pub data: Option<String>,
}
