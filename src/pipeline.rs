//! Per-message classification loop

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::{EvaluationContext, RuleEngineBridge};
use crate::client::GmailClient;
use crate::error::Result;
use crate::facts::FactRecordBuilder;
use crate::label_cache::LabelCache;
use crate::rules::{LabelActions, RuleEvaluator};

/// Called after each message with `(done, total)`
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Outcome counts for one run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub query: String,
    pub dry_run: bool,
    pub messages_found: usize,
    /// Messages whose rules were evaluated, including failed evaluations
    pub messages_processed: usize,
    /// Messages dropped before evaluation (fetch or build failure)
    pub messages_skipped: usize,
    pub script_failures: usize,
    pub add_requests: usize,
    pub remove_requests: usize,
    pub failed_requests: usize,
    /// Labels created during the run, or that would have been in dry-run
    pub labels_created: usize,
}

impl RunSummary {
    pub fn duration_seconds(&self) -> i64 {
        (self.completed_at - self.started_at).num_seconds()
    }

    /// Human readable summary printed at the end of `run`
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        if self.dry_run {
            out.push_str("Run summary (DRY RUN, no changes were made)\n");
        } else {
            out.push_str("Run summary\n");
        }
        out.push_str(&format!("  Run ID:            {}\n", self.run_id));
        out.push_str(&format!("  Query:             {}\n", self.query));
        out.push_str(&format!("  Messages found:    {}\n", self.messages_found));
        out.push_str(&format!("  Processed:         {}\n", self.messages_processed));
        out.push_str(&format!("  Skipped:           {}\n", self.messages_skipped));
        out.push_str(&format!("  Script failures:   {}\n", self.script_failures));
        out.push_str(&format!("  Labels added:      {}\n", self.add_requests));
        out.push_str(&format!("  Labels removed:    {}\n", self.remove_requests));
        out.push_str(&format!("  Labels created:    {}\n", self.labels_created));
        out.push_str(&format!("  Failed requests:   {}\n", self.failed_requests));
        out.push_str(&format!(
            "  Duration:          {}m {}s\n",
            self.duration_seconds() / 60,
            self.duration_seconds() % 60
        ));
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageOutcome {
    Evaluated,
    Skipped,
    ScriptFailed,
}

/// Fetch, build facts, evaluate; one message at a time
///
/// Setup failures (label listing, message listing) abort the run. Anything
/// that goes wrong with a single message is logged and the loop moves on.
/// Label requests already issued by a failing script are not rolled back.
pub struct ClassificationPipeline {
    client: Arc<dyn GmailClient>,
    cache: Arc<Mutex<LabelCache>>,
    bridge: Arc<RuleEngineBridge>,
    evaluator: Arc<dyn RuleEvaluator>,
    progress: Option<ProgressCallback>,
}

impl ClassificationPipeline {
    pub fn new(client: Arc<dyn GmailClient>, evaluator: Arc<dyn RuleEvaluator>, dry_run: bool) -> Self {
        let cache = Arc::new(Mutex::new(LabelCache::new(Arc::clone(&client))));
        let bridge = Arc::new(RuleEngineBridge::new(
            Arc::clone(&cache),
            Arc::clone(&client),
            dry_run,
        ));

        Self {
            client,
            cache,
            bridge,
            evaluator,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Shared label cache, e.g. for inspection after a run
    pub fn cache(&self) -> Arc<Mutex<LabelCache>> {
        Arc::clone(&self.cache)
    }

    pub async fn run(&self, query: &str) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();
        info!("Starting labelling run {} with query: {}", run_id, query);

        self.cache.lock().await.ensure_loaded().await?;

        let message_ids = self.client.list_message_ids(query).await?;
        let total = message_ids.len();
        info!("Found {} messages to process", total);

        let mut processed = 0;
        let mut skipped = 0;
        let mut script_failures = 0;

        for (index, message_id) in message_ids.iter().enumerate() {
            match self.process_message(message_id).await {
                MessageOutcome::Evaluated => processed += 1,
                MessageOutcome::ScriptFailed => {
                    processed += 1;
                    script_failures += 1;
                }
                MessageOutcome::Skipped => skipped += 1,
            }

            if let Some(progress) = &self.progress {
                progress(index + 1, total);
            }
        }

        let counts = self.bridge.stats();
        let labels_created = if self.bridge.is_dry_run() {
            counts.would_create
        } else {
            self.cache.lock().await.created_labels().len()
        };

        let summary = RunSummary {
            run_id,
            started_at,
            completed_at: Utc::now(),
            query: query.to_string(),
            dry_run: self.bridge.is_dry_run(),
            messages_found: total,
            messages_processed: processed,
            messages_skipped: skipped,
            script_failures,
            add_requests: counts.add_requests,
            remove_requests: counts.remove_requests,
            failed_requests: counts.failed_requests,
            labels_created,
        };

        info!(
            "Run {} complete: {} processed, {} skipped, {} script failures",
            summary.run_id, processed, skipped, script_failures
        );
        Ok(summary)
    }

    async fn process_message(&self, message_id: &str) -> MessageOutcome {
        debug!("Processing message {}", message_id);

        let raw = match self.client.get_message(message_id).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Skipping message {}: fetch failed: {}", message_id, e);
                return MessageOutcome::Skipped;
            }
        };

        let built = {
            let mut cache = self.cache.lock().await;
            FactRecordBuilder::build_from_message(&raw, &mut cache).await
        };
        let facts = match built {
            Ok(facts) => facts,
            Err(e) => {
                warn!("Skipping message {}: {}", message_id, e);
                return MessageOutcome::Skipped;
            }
        };

        if let Ok(json) = serde_json::to_string(&facts.script_view()) {
            debug!("Facts for message {}: {}", message_id, json);
        }

        let context: Arc<dyn LabelActions> = Arc::new(EvaluationContext::new(
            message_id,
            Arc::clone(&self.bridge),
            Handle::current(),
        ));
        let evaluator = Arc::clone(&self.evaluator);

        // Host functions block on the runtime, so the script runs off the async workers
        let result = tokio::task::spawn_blocking(move || evaluator.evaluate(&facts, context)).await;

        match result {
            Ok(Ok(())) => MessageOutcome::Evaluated,
            Ok(Err(e)) => {
                warn!("Rule script failed on message {}: {}", message_id, e);
                MessageOutcome::ScriptFailed
            }
            Err(e) => {
                warn!("Rule evaluation for message {} did not complete: {}", message_id, e);
                MessageOutcome::ScriptFailed
            }
        }
    }
}
