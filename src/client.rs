//! Gmail API client with timeout and retry logic

use async_trait::async_trait;
use google_gmail1::{
    api::{Label, Message, ModifyMessageRequest},
    hyper_rustls, hyper_util, Gmail,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{GmailError, Result};

const MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";
const LABELS_SCOPE: &str = "https://www.googleapis.com/auth/gmail.labels";

/// Label info returned from Gmail API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// One `name: value` header as returned by the metadata endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

impl MessageHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Message metadata as fetched: headers in provider order plus label IDs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: String,
    pub headers: Vec<MessageHeader>,
    pub label_ids: Vec<String>,
}

/// Trait defining Gmail client operations for easier testing
#[async_trait]
pub trait GmailClient: Send + Sync {
    /// List all labels in the account
    async fn list_labels(&self) -> Result<Vec<LabelInfo>>;

    /// Create a new label, returning its ID
    async fn create_label(&self, name: &str) -> Result<String>;

    /// List all message IDs matching a query
    async fn list_message_ids(&self, query: &str) -> Result<Vec<String>>;

    /// Fetch headers and label IDs for one message
    async fn get_message(&self, id: &str) -> Result<RawMessage>;

    /// Add and/or remove label IDs on a single message
    async fn modify_message_labels(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()>;
}

/// Gmail hub type produced by [`crate::auth::initialize_gmail_hub`]
pub type GmailHub =
    Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// Production Gmail client
///
/// Every call is bounded by the configured timeout and transient failures
/// (rate limiting, 5xx, network) are retried with exponential backoff.
/// Label creation is only retried on rate limiting and 5xx; a 409 is
/// answered by looking the label up.
pub struct ProductionGmailClient {
    hub: GmailHub,
    max_retries: u32,
    timeout: Duration,
}

impl ProductionGmailClient {
    /// Create a new production Gmail client
    pub fn new(hub: GmailHub, config: &ClientConfig) -> Self {
        Self {
            hub,
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    /// Check if an error is retryable
    fn should_retry(error: &GmailError) -> bool {
        matches!(
            error,
            GmailError::ServerError { .. }
                | GmailError::RateLimitExceeded { .. }
                | GmailError::NetworkError(_)
        )
    }

    /// Retry policy for label creation, which is not idempotent; a timed-out
    /// create may already be committed
    fn should_retry_create(error: &GmailError) -> bool {
        matches!(
            error,
            GmailError::ServerError { .. } | GmailError::RateLimitExceeded { .. }
        )
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(operation_name: &str, max_retries: u32, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        Self::with_retry_when(operation_name, max_retries, Self::should_retry, operation).await
    }

    /// Like [`Self::with_retry`], retrying only errors accepted by `retryable`
    async fn with_retry_when<T, F, Fut>(
        operation_name: &str,
        max_retries: u32,
        retryable: fn(&GmailError) -> bool,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_secs(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if retryable(&e) && attempts <= max_retries => {
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Wrap an API call in a timeout to prevent indefinite hangs
    async fn with_timeout<T, Fut>(&self, operation_name: &str, call: Fut) -> Result<T>
    where
        Fut: std::future::Future<Output = std::result::Result<T, google_gmail1::Error>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(GmailError::from),
            Err(_) => {
                warn!("Gmail API {} call timed out after {:?}", operation_name, self.timeout);
                Err(GmailError::NetworkError(format!(
                    "API call timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }
}

/// ID of the label called `name`, for a create that hit an existing label
fn existing_label_id(labels: Vec<LabelInfo>, name: &str) -> Result<String> {
    labels
        .into_iter()
        .find(|label| label.name == name)
        .map(|label| label.id)
        .ok_or_else(|| {
            GmailError::LabelError(format!(
                "Label '{}' conflicts with an existing label but is not listed",
                name
            ))
        })
}

/// Convert a Gmail API message into headers and label IDs
fn into_raw_message(msg: Message) -> Result<RawMessage> {
    let id = msg
        .id
        .ok_or_else(|| GmailError::InvalidMessageFormat("Missing message ID".to_string()))?;

    let headers = msg
        .payload
        .and_then(|p| p.headers)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|h| match (h.name, h.value) {
            (Some(name), Some(value)) => Some(MessageHeader { name, value }),
            _ => None,
        })
        .collect();

    Ok(RawMessage {
        id,
        headers,
        label_ids: msg.label_ids.unwrap_or_default(),
    })
}

#[async_trait]
impl GmailClient for ProductionGmailClient {
    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        Self::with_retry("list_labels", self.max_retries, || async {
            debug!("Calling Gmail API to list labels...");
            let (_, response) = self
                .with_timeout(
                    "list_labels",
                    self.hub.users().labels_list("me").add_scope(LABELS_SCOPE).doit(),
                )
                .await?;

            let labels: Vec<LabelInfo> = response
                .labels
                .unwrap_or_default()
                .into_iter()
                .filter_map(|label| match (label.id, label.name) {
                    (Some(id), Some(name)) => Some(LabelInfo { id, name }),
                    _ => None,
                })
                .collect();

            debug!("Successfully parsed {} labels", labels.len());
            Ok(labels)
        })
        .await
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        let created = Self::with_retry_when(
            "create_label",
            self.max_retries,
            Self::should_retry_create,
            || async {
                let label = Label {
                    name: Some(name.to_string()),
                    message_list_visibility: Some("show".to_string()),
                    label_list_visibility: Some("labelShow".to_string()),
                    ..Default::default()
                };

                let (_, created_label) = self
                    .with_timeout(
                        "create_label",
                        self.hub
                            .users()
                            .labels_create(label, "me")
                            .add_scope(LABELS_SCOPE)
                            .doit(),
                    )
                    .await?;

                created_label
                    .id
                    .ok_or_else(|| GmailError::LabelError("Created label has no ID".to_string()))
            },
        )
        .await;

        match created {
            Err(GmailError::Conflict(message)) => {
                warn!("Label '{}' already exists ({}); looking up its ID", name, message);
                existing_label_id(self.list_labels().await?, name)
            }
            other => other,
        }
    }

    async fn list_message_ids(&self, query: &str) -> Result<Vec<String>> {
        let mut all_ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = page_token.clone();
            let (_, response) = Self::with_retry("list_message_ids", self.max_retries, || {
                let token = token.clone();
                async move {
                    let mut call = self
                        .hub
                        .users()
                        .messages_list("me")
                        .q(query)
                        .max_results(100);

                    if let Some(token) = token.as_ref() {
                        call = call.page_token(token);
                    }

                    self.with_timeout("list_message_ids", call.add_scope(MODIFY_SCOPE).doit())
                        .await
                }
            })
            .await?;

            if let Some(messages) = response.messages {
                all_ids.extend(messages.into_iter().filter_map(|msg_ref| msg_ref.id));
            }

            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(all_ids)
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage> {
        let (_, msg) = Self::with_retry("get_message", self.max_retries, || async {
            // Metadata format returns headers only, never the (possibly huge) body
            self.with_timeout(
                "get_message",
                self.hub
                    .users()
                    .messages_get("me", id)
                    .format("metadata")
                    .add_scope(MODIFY_SCOPE)
                    .doit(),
            )
            .await
        })
        .await?;

        into_raw_message(msg)
    }

    async fn modify_message_labels(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        Self::with_retry("modify_message_labels", self.max_retries, || async {
            let request = ModifyMessageRequest {
                add_label_ids: (!add_label_ids.is_empty()).then(|| add_label_ids.to_vec()),
                remove_label_ids: (!remove_label_ids.is_empty())
                    .then(|| remove_label_ids.to_vec()),
            };

            self.with_timeout(
                "modify_message_labels",
                self.hub
                    .users()
                    .messages_modify(request, "me", message_id)
                    .add_scope(MODIFY_SCOPE)
                    .doit(),
            )
            .await?;

            Ok(())
        })
        .await
    }
}

// Implement GmailClient for Arc<T> to allow shared ownership
#[async_trait]
impl<T: GmailClient + ?Sized> GmailClient for Arc<T> {
    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        self.as_ref().list_labels().await
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        self.as_ref().create_label(name).await
    }

    async fn list_message_ids(&self, query: &str) -> Result<Vec<String>> {
        self.as_ref().list_message_ids(query).await
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage> {
        self.as_ref().get_message(id).await
    }

    async fn modify_message_labels(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        self.as_ref()
            .modify_message_labels(message_id, add_label_ids, remove_label_ids)
            .await
    }
}
