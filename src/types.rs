//! Data model shared by every component: messages, archive chunks, context
//! nodes, and the index document that ties them together.
//!
//! Field names track spec terminology (`abstract`, `overview`, `checksum`,
//! `recencyRank`) so the on-disk JSON stays self-describing; `abstract` is
//! a reserved word in Rust, so the struct field is `abstract_text` renamed
//! on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a [`Message`]. The engine treats content as opaque beyond
/// token estimation, but role still drives synthetic-block placement.
/// Spec §3 names exactly `{user, assistant}`; tool-use/tool-result content
/// is represented as a [`ContentBlock`] *within* a message rather than as
/// a distinct message role, so no wider variant set is needed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A tool result's content, which may be a plain string or a sequence of
/// blocks (per spec §4.1, array-valued tool results sum their inner
/// text/image contributions instead of being costed as opaque JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Items(Vec<ToolResultItem>),
}

impl ToolResultContent {
    pub fn as_text(&self) -> String {
        match self {
            ToolResultContent::Text(s) => s.clone(),
            ToolResultContent::Items(items) => items
                .iter()
                .map(ToolResultItem::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One inner item of an array-valued tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultItem {
    Text { text: String },
    Image { data: String },
}

impl ToolResultItem {
    fn as_text(&self) -> String {
        match self {
            ToolResultItem::Text { text } => text.clone(),
            ToolResultItem::Image { .. } => String::new(),
        }
    }
}

/// A single structured piece of message content, a closed tagged variant
/// per Design Note §9 rather than a dynamic/ad-hoc object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Images and image-results are costed as a fixed token price
    /// regardless of payload size; the engine never inspects pixel data.
    Image {
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: ToolResultContent,
        is_error: bool,
    },
}

impl ContentBlock {
    /// Text this block contributes to lexical scoring and concatenated
    /// transcript rendering.
    pub fn as_text(&self) -> String {
        match self {
            ContentBlock::Text { text } => text.clone(),
            ContentBlock::Image { .. } => String::new(),
            ContentBlock::ToolUse { name, input, .. } => format!("{name}({input})"),
            ContentBlock::ToolResult { content, .. } => content.as_text(),
        }
    }
}

/// A message's content: either plain text or a sequence of structured
/// blocks, matching spec §3's `content: text | sequence of blocks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .map(ContentBlock::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One turn in the append-only conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Flattened text, used for transcript rendering and lexical scoring.
    pub fn flat_text(&self) -> String {
        self.content.as_text()
    }

    /// `"<role>: <content>"`, the canonical per-message line used when
    /// joining a chunk into its transcript (spec §4.5 step 3).
    pub fn transcript_line(&self) -> String {
        format!("{}: {}", role_label(self.role), self.flat_text())
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// The three content tiers a node is represented at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Layer {
    L0 = 0,
    L1 = 1,
    L2 = 2,
}

/// Positional metadata for a node, indexed over the bounded archived
/// prefix (not the full conversation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub start_message_index: usize,
    pub end_message_index: usize,
    pub message_count: usize,
    pub recency_rank: usize,
}

/// Token estimates for a node's three resolutions, captured at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenEstimate {
    pub l0: usize,
    pub l1: usize,
    pub l2: usize,
}

/// The persisted body of an archived chunk: its verbatim messages and the
/// canonical transcript they were chunked from, addressed so unchanged
/// chunks are reused across rebuilds rather than re-summarized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveBody {
    pub session_key: String,
    pub node_id: String,
    pub transcript: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
}

/// One node in the hierarchical index: one archived chunk, represented at
/// up to three resolutions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextNode {
    pub id: String,
    /// Always the sentinel `"root"`; nodes never hold a pointer back to
    /// the root, only this tag (Design Note §9: no cycles).
    pub parent_id: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub overview: String,
    /// Handle returned by `Storage::write_archive`, used to reload the L2
    /// body on demand.
    pub full_content_path: String,
    pub keywords: Vec<String>,
    pub checksum: String,
    pub metadata: NodeMetadata,
    pub token_estimate: TokenEstimate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The root rollup: a summary over all retained nodes' overviews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootSummary {
    pub id: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub overview: String,
    pub keywords: Vec<String>,
    /// Same order as `IndexDocument::nodes`.
    pub child_ids: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// The persisted, per-session index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub version: u32,
    pub session_key: String,
    pub root: RootSummary,
    /// Ordered by `end_message_index` descending (most recent first).
    pub nodes: Vec<ContextNode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IndexDocument {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A tagged substitute recorded whenever the summarizer or an archive read
/// is replaced by a deterministic fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackEvent {
    pub node_id: Option<String>,
    pub reason: String,
}

/// One item chosen by the retriever, at the layer it was served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub node_id: String,
    pub layer: Layer,
    pub score: f64,
    pub content: String,
    pub estimated_tokens: usize,
}

/// Why the retriever stopped at the layer it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
    BroadQuery,
    PreciseQuery,
    Ambiguous,
}

/// The retriever's escalation decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub reached_layer: Layer,
    pub reason: Reason,
    /// The query's similarity against the root rollup's abstract+overview
    /// (spec §4.6 step 1), computed alongside per-node scores for decision
    /// purposes. The per-node top1/top2 comparison (step 3) is what
    /// actually drives `reached_layer`; this is carried for observability
    /// and to let callers sanity-check a node-level escalation against the
    /// conversation's overall relevance to the query.
    pub root_score: f64,
}

/// Token accounting for one retrieval, used both for the synthetic block
/// and for universal invariant 4 (savings bounded by baseline).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub l0: usize,
    pub l1: usize,
    pub l2: usize,
    pub total: usize,
    pub baseline_l2: usize,
    pub savings: usize,
    pub savings_ratio: f64,
}

/// Result of one retrieval pass over a built index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub selections: Vec<Selection>,
    pub decision: Decision,
    pub token_usage: TokenUsage,
    pub fallback_events: Vec<FallbackEvent>,
}

/// The context package handed back to the caller by [`crate::manager::Manager::apply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationResult {
    pub applied: bool,
    pub updated_messages: Vec<Message>,
    pub retrieval: Option<RetrievalResult>,
    pub fallback_events: Vec<String>,
    pub archived_message_count: usize,
}

/// Running totals exposed for observability, mirroring the shape the
/// teacher's scheduler keeps for its job bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerMetrics {
    pub total_runs: u64,
    pub total_savings_tokens: u64,
    pub avg_savings_tokens: f64,
    pub avg_savings_ratio: f64,
    pub fallback_events: u64,
    /// Builds attempted, completed, and failed; not part of the spec's
    /// metrics tuple but natural observability to carry alongside it.
    #[serde(default)]
    pub builds_started: u64,
    #[serde(default)]
    pub builds_completed: u64,
    #[serde(default)]
    pub builds_failed: u64,
}
