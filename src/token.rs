//! Deterministic token estimation (spec §4.1).
//!
//! No tokenizer dependency: the engine never calls out to a model's real
//! BPE vocabulary, so estimates are cheap, synchronous, and stable across
//! model providers. `estimate_text` is the single character-counting rule
//! everything else is built from.

use crate::types::{ContentBlock, Message, MessageContent, ToolResultContent, ToolResultItem};

/// Flat cost charged for an image or image-result block, regardless of
/// payload size.
const IMAGE_TOKEN_COST: usize = 2000;

/// Conservative characters-per-token ratio; prefers over- to
/// under-counting.
const CHARS_PER_TOKEN: usize = 3;

/// Estimate the token cost of a plain string: `ceil(length / 3)`.
pub fn estimate_text(text: &str) -> usize {
    let len = text.chars().count();
    if len == 0 {
        return 0;
    }
    (len + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN
}

fn estimate_tool_result_item(item: &ToolResultItem) -> usize {
    match item {
        ToolResultItem::Text { text } => estimate_text(text),
        ToolResultItem::Image { .. } => IMAGE_TOKEN_COST,
    }
}

/// Estimate the token cost of one content block.
pub fn estimate_block(block: &ContentBlock) -> usize {
    match block {
        ContentBlock::Text { text } => estimate_text(text),
        ContentBlock::Image { .. } => IMAGE_TOKEN_COST,
        ContentBlock::ToolUse { .. } => estimate_json(block),
        ContentBlock::ToolResult { content, .. } => match content {
            ToolResultContent::Items(items) => {
                items.iter().map(estimate_tool_result_item).sum()
            }
            ToolResultContent::Text(_) => estimate_json(block),
        },
    }
}

/// `ceil(json-serialize(block).length / 3)`, the fallback rule for
/// tool-use and scalar tool-result blocks.
fn estimate_json(block: &ContentBlock) -> usize {
    let serialized = serde_json::to_string(block).unwrap_or_default();
    estimate_text(&serialized)
}

/// Estimate the token cost of a message: the character rule for plain
/// text content, or the summed block costs for structured content.
pub fn estimate_message(message: &Message) -> usize {
    match &message.content {
        MessageContent::Text(text) => estimate_text(text),
        MessageContent::Blocks(blocks) => blocks.iter().map(estimate_block).sum(),
    }
}

/// Estimate the total token cost of a slice of messages.
pub fn estimate_messages(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message).sum()
}
