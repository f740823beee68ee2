//! Per-message fact records handed to the rule script

use serde::Serialize;
use tracing::{debug, warn};

use crate::address::{parse_address, parse_address_list, Address};
use crate::client::RawMessage;
use crate::error::{GmailError, Result};
use crate::label_cache::LabelCache;

/// Immutable summary of one message
///
/// Recipients from `To` and `Cc` are merged into one list in header order;
/// nothing records which header a recipient came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactRecord {
    from: Option<Address>,
    to: Vec<Address>,
    subject: String,
    existing_labels: Vec<String>,
}

impl FactRecord {
    pub fn from(&self) -> Option<&Address> {
        self.from.as_ref()
    }

    /// Sender address, or `""` when there was no usable From header
    pub fn from_address(&self) -> &str {
        self.from.as_ref().map(|a| a.full.as_str()).unwrap_or_default()
    }

    pub fn from_local_part(&self) -> &str {
        self.from
            .as_ref()
            .map(|a| a.local_part.as_str())
            .unwrap_or_default()
    }

    pub fn from_domain(&self) -> &str {
        self.from.as_ref().map(|a| a.domain.as_str()).unwrap_or_default()
    }

    pub fn to(&self) -> &[Address] {
        &self.to
    }

    pub fn to_addresses(&self) -> Vec<&str> {
        self.to.iter().map(|a| a.full.as_str()).collect()
    }

    pub fn to_local_parts(&self) -> Vec<&str> {
        self.to.iter().map(|a| a.local_part.as_str()).collect()
    }

    pub fn to_domains(&self) -> Vec<&str> {
        self.to.iter().map(|a| a.domain.as_str()).collect()
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn existing_labels(&self) -> &[String] {
        &self.existing_labels
    }

    /// The field layout rule scripts are written against
    pub fn script_view(&self) -> ScriptFacts {
        ScriptFacts {
            to: self.to_addresses().into_iter().map(String::from).collect(),
            to_part: self.to_local_parts().into_iter().map(String::from).collect(),
            to_domain: self.to_domains().into_iter().map(String::from).collect(),
            from: self.from_address().to_string(),
            from_part: self.from_local_part().to_string(),
            from_domain: self.from_domain().to_string(),
            subject: self.subject.clone(),
            labels: self.existing_labels.clone(),
        }
    }
}

/// Flattened, script-facing copy of a [`FactRecord`]
///
/// `to`, `to_part` and `to_domain` are index-aligned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptFacts {
    pub to: Vec<String>,
    pub to_part: Vec<String>,
    pub to_domain: Vec<String>,
    pub from: String,
    pub from_part: String,
    pub from_domain: String,
    pub subject: String,
    pub labels: Vec<String>,
}

/// Accumulates headers and labels into a [`FactRecord`]
#[derive(Debug, Default)]
pub struct FactRecordBuilder {
    record: FactRecord,
}

impl FactRecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one header; names are matched exactly
    ///
    /// Address headers without an `@` are ignored, and addresses that fail to
    /// parse are dropped with a warning.
    pub fn header(&mut self, name: &str, value: &str) -> &mut Self {
        match name {
            "From" if value.contains('@') => match parse_address(value) {
                Ok(address) => self.record.from = Some(address),
                Err(e) => warn!("Dropping From header {:?}: {}", value, e),
            },
            "To" | "Cc" if value.contains('@') => {
                for parsed in parse_address_list(value) {
                    match parsed {
                        Ok(address) => self.record.to.push(address),
                        Err(e) => warn!("Dropping {} recipient in {:?}: {}", name, value, e),
                    }
                }
            }
            "Subject" => self.record.subject = value.to_string(),
            _ => {}
        }
        self
    }

    /// Record the name of a label already on the message
    pub fn existing_label(&mut self, name: impl Into<String>) -> &mut Self {
        self.record.existing_labels.push(name.into());
        self
    }

    pub fn build(self) -> FactRecord {
        self.record
    }

    /// Build the record for a fetched message
    ///
    /// Label IDs are resolved through the cache; an ID that cannot be resolved
    /// is logged and left out. Only a message without an ID is rejected.
    pub async fn build_from_message(
        message: &RawMessage,
        cache: &mut LabelCache,
    ) -> Result<FactRecord> {
        if message.id.is_empty() {
            return Err(GmailError::InvalidMessageFormat(
                "Missing message ID".to_string(),
            ));
        }

        let mut builder = Self::new();

        for id in &message.label_ids {
            match cache.resolve_to_name(id).await {
                Ok(name) => {
                    debug!("Label on message {}: {}", message.id, name);
                    builder.existing_label(name);
                }
                Err(e) => warn!("Omitting label {} on message {}: {}", id, message.id, e),
            }
        }

        for header in &message.headers {
            builder.header(&header.name, &header.value);
        }

        Ok(builder.build())
    }
}
