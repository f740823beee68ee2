//! Gmail Rule Labeller
//!
//! Fetches messages matching a Gmail query, turns each one into a small
//! record of facts (sender, recipients, subject, existing labels) and runs a
//! user-written [Rhai](https://rhai.rs) script against it. The script changes
//! labels only through two host functions, `add(label)` and `remove(label)`;
//! labels are referenced by name and created on first use.
//!
//! # Example Usage
//!
//! ```no_run
//! use gmail_labeller::{auth, client::ProductionGmailClient, config::Config};
//! use gmail_labeller::{ClassificationPipeline, ScriptEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let rules = ScriptEngine::load(&config.rules.script).await?;
//!
//!     let hub = auth::initialize_gmail_hub(
//!         "credentials.json".as_ref(),
//!         ".gmail-labeller/token.json".as_ref(),
//!     )
//!     .await?;
//!     let client = Arc::new(ProductionGmailClient::new(hub, &config.client));
//!
//!     let pipeline = ClassificationPipeline::new(client, Arc::new(rules), false);
//!     let summary = pipeline.run(&config.scan.query).await?;
//!     println!("{}", summary.to_text());
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`address`] - Mailbox parsing and local-part/domain split
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`bridge`] - Host functions that turn label names into modify requests
//! - [`cli`] - Command-line interface and command handlers
//! - [`client`] - Gmail API client with timeout and retry logic
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`facts`] - Per-message fact records
//! - [`label_cache`] - Bidirectional label name/ID cache
//! - [`pipeline`] - The per-message classification loop
//! - [`rules`] - Rule evaluation seam and the Rhai script engine

pub mod address;
pub mod auth;
pub mod bridge;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod facts;
pub mod label_cache;
pub mod pipeline;
pub mod rules;

pub use error::{GmailError, Result};

pub use address::{parse_address, parse_address_list, Address};
pub use bridge::{BridgeCounts, EvaluationContext, RuleEngineBridge};
pub use client::{GmailClient, LabelInfo, MessageHeader, ProductionGmailClient, RawMessage};
pub use config::{ClientConfig, Config, ExecutionConfig, RulesConfig, ScanConfig};
pub use facts::{FactRecord, FactRecordBuilder, ScriptFacts};
pub use label_cache::LabelCache;
pub use pipeline::{ClassificationPipeline, RunSummary};
pub use rules::{LabelActions, RuleEvaluator, ScriptEngine};

pub use cli::{Cli, Commands, ProgressReporter};
