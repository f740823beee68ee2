//! Host-function bridge between rule scripts and the mail provider
//!
//! Scripts ask for labels by name. The bridge resolves each name through the
//! shared [`LabelCache`] and sends one modify request per call, immediately.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::GmailClient;
use crate::label_cache::LabelCache;
use crate::rules::LabelActions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelOp {
    Add,
    Remove,
}

impl LabelOp {
    fn verb(self) -> &'static str {
        match self {
            LabelOp::Add => "add",
            LabelOp::Remove => "remove",
        }
    }
}

/// Request counters kept by the bridge
#[derive(Debug, Default)]
pub struct BridgeStats {
    adds: AtomicUsize,
    removes: AtomicUsize,
    failed: AtomicUsize,
    would_create: AtomicUsize,
}

/// Point-in-time copy of [`BridgeStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeCounts {
    pub add_requests: usize,
    pub remove_requests: usize,
    pub failed_requests: usize,
    /// Distinct missing label names seen in dry-run
    pub would_create: usize,
}

impl BridgeStats {
    fn record(&self, op: LabelOp) {
        match op {
            LabelOp::Add => self.adds.fetch_add(1, Ordering::Relaxed),
            LabelOp::Remove => self.removes.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn snapshot(&self) -> BridgeCounts {
        BridgeCounts {
            add_requests: self.adds.load(Ordering::Relaxed),
            remove_requests: self.removes.load(Ordering::Relaxed),
            failed_requests: self.failed.load(Ordering::Relaxed),
            would_create: self.would_create.load(Ordering::Relaxed),
        }
    }
}

/// Resolves label names and issues single-label modify requests
///
/// The bridge holds no notion of a current message; callers pass the message
/// id explicitly, usually through an [`EvaluationContext`].
pub struct RuleEngineBridge {
    cache: Arc<Mutex<LabelCache>>,
    client: Arc<dyn GmailClient>,
    dry_run: bool,
    stats: BridgeStats,
    /// Names a dry run would have created, each counted once
    planned: Mutex<HashSet<String>>,
}

impl RuleEngineBridge {
    pub fn new(cache: Arc<Mutex<LabelCache>>, client: Arc<dyn GmailClient>, dry_run: bool) -> Self {
        Self {
            cache,
            client,
            dry_run,
            stats: BridgeStats::default(),
            planned: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn stats(&self) -> BridgeCounts {
        self.stats.snapshot()
    }

    /// Attach `name` to the message; false if nothing was sent
    pub async fn request_add_label(&self, message_id: &str, name: &str) -> bool {
        self.request(message_id, name, LabelOp::Add).await
    }

    /// Detach `name` from the message; false if nothing was sent
    pub async fn request_remove_label(&self, message_id: &str, name: &str) -> bool {
        self.request(message_id, name, LabelOp::Remove).await
    }

    async fn request(&self, message_id: &str, name: &str, op: LabelOp) -> bool {
        debug!("Script requested {} of label '{}' on message {}", op.verb(), name, message_id);

        if self.dry_run {
            return self.preview(message_id, name, op).await;
        }

        let resolved = {
            let mut cache = self.cache.lock().await;
            cache.resolve_to_id(name).await
        };
        let label_id = match resolved {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    "Abandoning {} of label '{}' on message {}: {}",
                    op.verb(),
                    name,
                    message_id,
                    e
                );
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };

        let ids = [label_id];
        let result = match op {
            LabelOp::Add => self.client.modify_message_labels(message_id, &ids, &[]).await,
            LabelOp::Remove => self.client.modify_message_labels(message_id, &[], &ids).await,
        };

        match result {
            Ok(()) => {
                debug!("Applied {} of label '{}' ({}) on message {}", op.verb(), name, ids[0], message_id);
                self.stats.record(op);
                true
            }
            Err(e) => {
                warn!(
                    "Failed to {} label '{}' on message {}: {}",
                    op.verb(),
                    name,
                    message_id,
                    e
                );
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Dry-run path: resolve without creating, log instead of sending
    async fn preview(&self, message_id: &str, name: &str, op: LabelOp) -> bool {
        let looked_up = {
            let mut cache = self.cache.lock().await;
            cache.lookup_id(name).await
        };

        match looked_up {
            Ok(Some(id)) => {
                info!("[DRY RUN] Would {} label '{}' ({}) on message {}", op.verb(), name, id, message_id);
            }
            Ok(None) => {
                match op {
                    LabelOp::Add => info!(
                        "[DRY RUN] Would create label '{}' and add it on message {}",
                        name, message_id
                    ),
                    LabelOp::Remove => info!(
                        "[DRY RUN] Label '{}' does not exist yet; removing it from message {} would create it first",
                        name, message_id
                    ),
                }
                if self.planned.lock().await.insert(name.to_string()) {
                    self.stats.would_create.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                warn!("Cannot resolve label '{}' for message {}: {}", name, message_id, e);
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }

        self.stats.record(op);
        true
    }
}

/// The message a single script evaluation acts on
///
/// Created fresh for every message and handed to the evaluator, so nothing
/// about the current message outlives its evaluation. Must be used from a
/// blocking thread (e.g. inside `spawn_blocking`), never from async code.
pub struct EvaluationContext {
    message_id: String,
    bridge: Arc<RuleEngineBridge>,
    handle: Handle,
}

impl EvaluationContext {
    pub fn new(message_id: impl Into<String>, bridge: Arc<RuleEngineBridge>, handle: Handle) -> Self {
        Self {
            message_id: message_id.into(),
            bridge,
            handle,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }
}

impl LabelActions for EvaluationContext {
    fn add_label(&self, name: &str) -> bool {
        self.handle
            .block_on(self.bridge.request_add_label(&self.message_id, name))
    }

    fn remove_label(&self, name: &str) -> bool {
        self.handle
            .block_on(self.bridge.request_remove_label(&self.message_id, name))
    }
}
