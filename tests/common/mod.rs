//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use gmail_labeller::client::{GmailClient, LabelInfo, MessageHeader, RawMessage};
use gmail_labeller::error::{GmailError, Result};
use mockall::mock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// One modify request as received by the fake mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub message_id: String,
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl Modification {
    pub fn add(message_id: &str, label_id: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            add: vec![label_id.to_string()],
            remove: Vec::new(),
        }
    }

    pub fn remove(message_id: &str, label_id: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            add: Vec::new(),
            remove: vec![label_id.to_string()],
        }
    }
}

/// Stateful stand-in for a Gmail account
///
/// Listing returns every registered id in insertion order, including ids
/// registered as unfetchable.
#[derive(Default)]
pub struct InMemoryMailbox {
    labels: Mutex<Vec<LabelInfo>>,
    listing: Vec<String>,
    messages: Vec<RawMessage>,
    modifications: Mutex<Vec<Modification>>,
    creates: AtomicUsize,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(self, id: &str, name: &str) -> Self {
        self.labels
            .lock()
            .unwrap()
            .push(create_test_label_info(id, name));
        self
    }

    pub fn with_message(mut self, message: RawMessage) -> Self {
        self.listing.push(message.id.clone());
        self.messages.push(message);
        self
    }

    /// Listed by queries but fails on fetch
    pub fn with_unfetchable(mut self, id: &str) -> Self {
        self.listing.push(id.to_string());
        self
    }

    pub fn modifications(&self) -> Vec<Modification> {
        self.modifications.lock().unwrap().clone()
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn label_id(&self, name: &str) -> Option<String> {
        self.labels
            .lock()
            .unwrap()
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.id.clone())
    }
}

#[async_trait]
impl GmailClient for InMemoryMailbox {
    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        Ok(self.labels.lock().unwrap().clone())
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        let n = self.creates.fetch_add(1, Ordering::SeqCst);
        let mut labels = self.labels.lock().unwrap();
        if labels.iter().any(|l| l.name == name) {
            return Err(GmailError::BadRequest(format!("Label name exists: {}", name)));
        }
        let id = format!("Label_{}", 100 + n);
        labels.push(create_test_label_info(&id, name));
        Ok(id)
    }

    async fn list_message_ids(&self, _query: &str) -> Result<Vec<String>> {
        Ok(self.listing.clone())
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage> {
        self.messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| GmailError::MessageNotFound(id.to_string()))
    }

    async fn modify_message_labels(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        self.modifications.lock().unwrap().push(Modification {
            message_id: message_id.to_string(),
            add: add_label_ids.to_vec(),
            remove: remove_label_ids.to_vec(),
        });
        Ok(())
    }
}

pub fn create_test_label_info(id: &str, name: &str) -> LabelInfo {
    LabelInfo {
        id: id.to_string(),
        name: name.to_string(),
    }
}

/// Message with the given headers and label ids
pub fn create_test_message(id: &str, headers: &[(&str, &str)], label_ids: &[&str]) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        headers: headers
            .iter()
            .map(|(name, value)| MessageHeader::new(*name, *value))
            .collect(),
        label_ids: label_ids.iter().map(|s| s.to_string()).collect(),
    }
}

/// Unread inbox message with From/To/Subject set
pub fn create_inbox_message(id: &str, from: &str, to: &str, subject: &str) -> RawMessage {
    create_test_message(
        id,
        &[("From", from), ("To", to), ("Subject", subject)],
        &["INBOX", "UNREAD"],
    )
}

/// Write a rule script into `dir` and return its path
pub fn write_script(dir: &Path, source: &str) -> PathBuf {
    let path = dir.join("labeller.rhai");
    std::fs::write(&path, source).unwrap();
    path
}

mock! {
    pub GmailClient {}

    #[async_trait]
    impl GmailClient for GmailClient {
        async fn list_labels(&self) -> Result<Vec<LabelInfo>>;
        async fn create_label(&self, name: &str) -> Result<String>;
        async fn list_message_ids(&self, query: &str) -> Result<Vec<String>>;
        async fn get_message(&self, id: &str) -> Result<RawMessage>;
        async fn modify_message_labels(&self, message_id: &str, add_label_ids: &[String], remove_label_ids: &[String]) -> Result<()>;
    }
}
