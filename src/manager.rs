//! Manager (spec §4.7): the orchestration entry point. Gates on
//! conversation size, splits recent vs. archived messages, acquires the
//! index (awaiting a first build, backgrounding subsequent ones), calls
//! the retriever, assembles the synthetic prompt block, and enforces the
//! final budget cap.

use std::sync::{Arc, Mutex as StdMutex};

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::indexer::{self, BuildIndexInput};
use crate::queue::BuildQueue;
use crate::retriever;
use crate::storage::Storage;
use crate::summarizer::Summarizer;
use crate::token;
use crate::types::{
    ApplicationResult, FallbackEvent, IndexDocument, Layer, ManagerMetrics, Message, Role,
    Selection,
};

/// Input to [`Manager::apply`].
pub struct ApplyInput<'a> {
    pub session_key: &'a str,
    pub query: &'a str,
    pub messages: &'a [Message],
    pub config: &'a EngineConfig,
}

/// Orchestrates the engine's components for one conversation turn.
pub struct Manager {
    storage: Arc<dyn Storage>,
    summarizer: Arc<dyn Summarizer>,
    queue: Arc<BuildQueue>,
    metrics: Arc<StdMutex<ManagerMetrics>>,
}

impl Manager {
    pub fn new(storage: Arc<dyn Storage>, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            storage,
            summarizer,
            queue: Arc::new(BuildQueue::new()),
            metrics: Arc::new(StdMutex::new(ManagerMetrics::default())),
        }
    }

    /// Point-in-time snapshot of the running totals.
    pub fn metrics_snapshot(&self) -> ManagerMetrics {
        self.metrics.lock().expect("metrics lock poisoned").clone()
    }

    fn pass_through(messages: &[Message], archived_message_count: usize) -> ApplicationResult {
        ApplicationResult {
            applied: false,
            updated_messages: messages.to_vec(),
            retrieval: None,
            fallback_events: Vec::new(),
            archived_message_count,
        }
    }

    async fn run_build(
        &self,
        session_key: &str,
        archived: &[Message],
        config: &EngineConfig,
    ) -> Result<indexer::BuildIndexResult> {
        {
            let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
            metrics.builds_started += 1;
        }
        let result = indexer::build_index(
            self.storage.as_ref(),
            self.summarizer.as_ref(),
            BuildIndexInput {
                session_key,
                archived_messages: archived,
                config,
            },
        )
        .await;
        let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
        match &result {
            Ok(_) => metrics.builds_completed += 1,
            Err(e) => {
                metrics.builds_failed += 1;
                warn!(session_key, error = %e, "index build failed");
            }
        }
        drop(metrics);
        result
    }

    /// `apply`: the single public operation of this module.
    pub async fn apply(&self, input: ApplyInput<'_>) -> Result<ApplicationResult> {
        let config = input.config;

        // 1. Gating.
        if !config.enable_session_compression
            || input.messages.len() <= config.max_recent_messages + 1
        {
            return Ok(Self::pass_through(input.messages, 0));
        }

        // 2. Split off the current message.
        let (historical, current) = input.messages.split_at(input.messages.len() - 1);
        let current_message = current[0].clone();

        if historical.len() <= config.max_recent_messages {
            return Ok(Self::pass_through(input.messages, 0));
        }

        // 3. Split historical into archived prefix and recent tail.
        let split_at = historical.len() - config.max_recent_messages;
        let archived_messages = &historical[..split_at];
        let recent_messages = &historical[split_at..];

        // 4. Index acquisition.
        let mut fallback_events: Vec<FallbackEvent> = Vec::new();
        let existing = self.storage.load_index(input.session_key).await?;

        let index: IndexDocument = match existing {
            Some(idx) => {
                let session_key = input.session_key.to_string();
                let archived_owned = archived_messages.to_vec();
                let config_owned = config.clone();
                let storage = Arc::clone(&self.storage);
                let summarizer = Arc::clone(&self.summarizer);
                let metrics = Arc::clone(&self.metrics);
                Arc::clone(&self.queue).spawn(&session_key, move || async move {
                    metrics.lock().expect("metrics lock poisoned").builds_started += 1;
                    let result = indexer::build_index(
                        storage.as_ref(),
                        summarizer.as_ref(),
                        BuildIndexInput {
                            session_key: &session_key,
                            archived_messages: &archived_owned,
                            config: &config_owned,
                        },
                    )
                    .await;
                    let mut guard = metrics.lock().expect("metrics lock poisoned");
                    match &result {
                        Ok(r) => {
                            guard.builds_completed += 1;
                            drop(guard);
                            debug!(
                                session_key,
                                fallback_count = r.fallback_events.len(),
                                "background index build completed"
                            );
                        }
                        Err(e) => {
                            guard.builds_failed += 1;
                            drop(guard);
                            warn!(session_key, error = %e, "background index build failed");
                        }
                    }
                });
                idx
            }
            None => {
                let session_key = input.session_key.to_string();
                let built = self
                    .queue
                    .run(&session_key, || {
                        self.run_build(input.session_key, archived_messages, config)
                    })
                    .await?;
                fallback_events.extend(built.fallback_events);
                built.index
            }
        };

        // 5. Empty index short-circuits.
        if index.is_empty() {
            return Ok(ApplicationResult {
                applied: false,
                updated_messages: input.messages.to_vec(),
                retrieval: None,
                fallback_events: fallback_events.iter().map(describe).collect(),
                archived_message_count: archived_messages.len(),
            });
        }

        // 6. Retrieve.
        let retrieval = retriever::retrieve(self.storage.as_ref(), &index, input.query, config).await;
        fallback_events.extend(retrieval.fallback_events.clone());

        {
            let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
            metrics.total_runs += 1;
            metrics.total_savings_tokens += retrieval.token_usage.savings as u64;
            metrics.avg_savings_tokens =
                metrics.total_savings_tokens as f64 / metrics.total_runs as f64;
            let ratio_sum = metrics.avg_savings_ratio * (metrics.total_runs - 1) as f64
                + retrieval.token_usage.savings_ratio;
            metrics.avg_savings_ratio = ratio_sum / metrics.total_runs as f64;
            metrics.fallback_events += fallback_events.len() as u64;
        }

        // 7. Assemble the synthetic prompt block.
        let synthetic_text = render_synthetic_block(&retrieval);
        let synthetic_role = if recent_messages
            .first()
            .map(|m| m.role == Role::User)
            .unwrap_or(true)
        {
            Role::Assistant
        } else {
            Role::User
        };
        let synthetic_block = Message::text(synthetic_role, synthetic_text);

        let mut updated_messages = Vec::with_capacity(recent_messages.len() + 2);
        updated_messages.push(synthetic_block);
        updated_messages.extend(recent_messages.iter().cloned());
        updated_messages.push(current_message);

        // 8. Budget cap: drop the oldest recent (position 1) until within
        // budget. Positions 0 and last are never removed.
        while token::estimate_messages(&updated_messages) > config.max_prompt_tokens
            && updated_messages.len() > 2
        {
            updated_messages.remove(1);
        }

        Ok(ApplicationResult {
            applied: true,
            updated_messages,
            retrieval: Some(retrieval),
            fallback_events: fallback_events.iter().map(describe).collect(),
            archived_message_count: archived_messages.len(),
        })
    }
}

fn describe(event: &FallbackEvent) -> String {
    match &event.node_id {
        Some(id) => format!("{id}: {}", event.reason),
        None => event.reason.clone(),
    }
}

/// Render the plain-text synthetic context block described in spec §4.7
/// step 7.
fn render_synthetic_block(retrieval: &crate::types::RetrievalResult) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "Context package — reached {:?}, reason: {:?}",
        retrieval.decision.reached_layer, retrieval.decision.reason
    ));

    for layer in [Layer::L0, Layer::L1, Layer::L2] {
        lines.push(String::new());
        lines.push(format!("{layer:?} context:"));
        let items: Vec<&Selection> = retrieval
            .selections
            .iter()
            .filter(|s| s.layer == layer)
            .collect();
        if items.is_empty() {
            lines.push("(none)".to_string());
        }
        for item in items {
            lines.push(format!(
                "- {} (score {:.3}, ~{} tokens): {}",
                item.node_id, item.score, item.estimated_tokens, item.content
            ));
        }
    }

    lines.push(String::new());
    let usage = &retrieval.token_usage;
    lines.push(format!(
        "l0={} l1={} l2={} total={}",
        usage.l0, usage.l1, usage.l2, usage.total
    ));
    lines.push(format!(
        "baselineL2={} savings={} savingsRatio={:.1}%",
        usage.baseline_l2,
        usage.savings,
        usage.savings_ratio * 100.0
    ));

    lines.join("\n")
}
