//! Indexer (spec §4.5): chunk the archived prefix, reuse unchanged chunks
//! by checksum, summarize the rest, roll up a root summary, and persist
//! the result atomically.

use chrono::Utc;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::storage::{self, Storage};
use crate::summarizer::{self, Summarizer};
use crate::text;
use crate::token;
use crate::types::{
    ArchiveBody, ContextNode, FallbackEvent, IndexDocument, Message, NodeMetadata, RootSummary,
    TokenEstimate,
};

/// Input to [`build_index`].
pub struct BuildIndexInput<'a> {
    pub session_key: &'a str,
    pub archived_messages: &'a [Message],
    pub config: &'a EngineConfig,
}

/// Result of one build: the new index plus every fallback taken along the
/// way.
pub struct BuildIndexResult {
    pub index: IndexDocument,
    pub fallback_events: Vec<FallbackEvent>,
}

const NODE_ID_PREFIX_LEN: usize = 14;
const SENTINEL_NO_ARCHIVE: &str = "No archived context is available.";

/// Join a chunk's messages into its canonical transcript: `"<role>:
/// <content>"` lines separated by blank lines.
fn build_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(Message::transcript_line)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn node_id_from_checksum(checksum: &str) -> String {
    let prefix: String = checksum.chars().take(NODE_ID_PREFIX_LEN).collect();
    format!("node-{prefix}")
}

/// `buildIndex`: the single public operation of this module.
///
/// Persistence errors propagate and fail the build; summarizer errors
/// never do — they degrade through the fallback path and are folded into
/// the returned `fallback_events`.
pub async fn build_index(
    storage: &dyn Storage,
    summarizer: &dyn Summarizer,
    input: BuildIndexInput<'_>,
) -> Result<BuildIndexResult> {
    let config = input.config;
    let mut fallback_events = Vec::new();

    let prior_index = storage.load_index(input.session_key).await?;

    // 1. Bound input to the last `maxArchives * archiveChunkSize` messages.
    let max_messages = config.max_archives * config.archive_chunk_size;
    let bounded: &[Message] = if input.archived_messages.len() > max_messages {
        &input.archived_messages[input.archived_messages.len() - max_messages..]
    } else {
        input.archived_messages
    };

    // 2 & 3. Chunk and build/reuse each node.
    let mut new_nodes: Vec<ContextNode> = Vec::new();
    let mut start = 0usize;
    for chunk in bounded.chunks(config.archive_chunk_size) {
        let end = start + chunk.len() - 1;
        let transcript = build_transcript(chunk);
        if transcript.is_empty() {
            start += chunk.len();
            continue;
        }
        let checksum = storage::checksum(transcript.as_bytes());

        let reused = prior_index
            .as_ref()
            .and_then(|idx| idx.nodes.iter().find(|n| n.checksum == checksum));

        let node = if let Some(prior_node) = reused {
            ContextNode {
                id: prior_node.id.clone(),
                parent_id: "root".to_string(),
                abstract_text: prior_node.abstract_text.clone(),
                overview: prior_node.overview.clone(),
                full_content_path: prior_node.full_content_path.clone(),
                keywords: prior_node.keywords.clone(),
                checksum: prior_node.checksum.clone(),
                metadata: NodeMetadata {
                    start_message_index: start,
                    end_message_index: end,
                    message_count: chunk.len(),
                    recency_rank: 0,
                },
                token_estimate: prior_node.token_estimate,
                created_at: prior_node.created_at,
                updated_at: Utc::now(),
            }
        } else {
            let overview_outcome = summarizer::generate_overview_with_fallback(
                summarizer,
                &transcript,
                config.l1_target_tokens,
            )
            .await;
            let abstract_outcome = summarizer::generate_abstract_with_fallback(
                summarizer,
                &overview_outcome.text,
                config.l0_target_tokens,
            )
            .await;

            let node_id = node_id_from_checksum(&checksum);

            if let Some(reason) = &overview_outcome.fallback_reason {
                fallback_events.push(FallbackEvent {
                    node_id: Some(node_id.clone()),
                    reason: reason.clone(),
                });
            }
            if let Some(reason) = &abstract_outcome.fallback_reason {
                fallback_events.push(FallbackEvent {
                    node_id: Some(node_id.clone()),
                    reason: reason.clone(),
                });
            }

            let body = ArchiveBody {
                session_key: input.session_key.to_string(),
                node_id: node_id.clone(),
                transcript: transcript.clone(),
                messages: chunk.to_vec(),
                created_at: Utc::now(),
            };
            let full_content_path = storage
                .write_archive(input.session_key, &node_id, &body)
                .await?;

            let keywords =
                text::extract_top_keywords(&format!("{}\n{}", abstract_outcome.text, overview_outcome.text), text::DEFAULT_MAX_KEYWORDS);

            ContextNode {
                id: node_id,
                parent_id: "root".to_string(),
                abstract_text: abstract_outcome.text,
                overview: overview_outcome.text.clone(),
                full_content_path,
                keywords,
                checksum,
                metadata: NodeMetadata {
                    start_message_index: start,
                    end_message_index: end,
                    message_count: chunk.len(),
                    recency_rank: 0,
                },
                token_estimate: TokenEstimate {
                    l0: token::estimate_text(&abstract_outcome.text),
                    l1: token::estimate_text(&overview_outcome.text),
                    l2: token::estimate_text(&transcript),
                },
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }
        };

        new_nodes.push(node);
        start += chunk.len();
    }

    // 4. Eviction: most-recent-first, capped at maxArchives.
    new_nodes.sort_by(|a, b| b.metadata.end_message_index.cmp(&a.metadata.end_message_index));
    new_nodes.truncate(config.max_archives);
    for (i, node) in new_nodes.iter_mut().enumerate() {
        node.metadata.recency_rank = i + 1;
    }

    // 5. Root rollup.
    let archive_blocks: Vec<String> = new_nodes
        .iter()
        .map(|n| format!("Archive {}\n{}", n.id, n.overview))
        .collect();
    let rollup_source = if archive_blocks.is_empty() {
        SENTINEL_NO_ARCHIVE.to_string()
    } else {
        archive_blocks.join("\n\n")
    };

    let root_overview_outcome = summarizer::generate_overview_with_fallback(
        summarizer,
        &rollup_source,
        config.l1_target_tokens,
    )
    .await;
    let root_abstract_outcome = summarizer::generate_abstract_with_fallback(
        summarizer,
        &root_overview_outcome.text,
        config.l0_target_tokens,
    )
    .await;
    if let Some(reason) = &root_overview_outcome.fallback_reason {
        fallback_events.push(FallbackEvent {
            node_id: None,
            reason: reason.clone(),
        });
    }
    if let Some(reason) = &root_abstract_outcome.fallback_reason {
        fallback_events.push(FallbackEvent {
            node_id: None,
            reason: reason.clone(),
        });
    }

    let all_node_keywords = new_nodes
        .iter()
        .flat_map(|n| n.keywords.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ");
    let root_keywords = text::extract_top_keywords(
        &format!(
            "{}\n{} {}",
            root_abstract_outcome.text, root_overview_outcome.text, all_node_keywords
        ),
        text::DEFAULT_MAX_KEYWORDS,
    );

    let now = Utc::now();
    let created_at = prior_index.as_ref().map(|idx| idx.created_at).unwrap_or(now);
    let child_ids: Vec<String> = new_nodes.iter().map(|n| n.id.clone()).collect();

    let index = IndexDocument {
        version: 1,
        session_key: input.session_key.to_string(),
        root: RootSummary {
            id: "root".to_string(),
            abstract_text: root_abstract_outcome.text,
            overview: root_overview_outcome.text,
            keywords: root_keywords,
            child_ids: child_ids.clone(),
            updated_at: now,
        },
        nodes: new_nodes,
        created_at,
        updated_at: now,
    };

    // 6. Persist, then garbage-collect orphaned archive bodies.
    storage.save_index(&index).await?;
    storage.cleanup_archives(input.session_key, &child_ids).await?;

    Ok(BuildIndexResult {
        index,
        fallback_events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileStorage;
    use crate::summarizer::NullSummarizer;
    use crate::types::Role;
    use tempfile::TempDir;

    fn messages(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| Message::text(Role::User, format!("message number {i}")))
            .collect()
    }

    async fn storage_in(dir: &TempDir) -> FileStorage {
        FileStorage::open(dir.path()).await.unwrap()
    }

    #[tokio::test]
    async fn chunks_partition_the_bounded_prefix_in_order() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir).await;
        let summarizer = NullSummarizer;
        let config = EngineConfig {
            archive_chunk_size: 4,
            max_archives: 10,
            ..EngineConfig::default()
        };
        let msgs = messages(10);
        let result = build_index(
            &storage,
            &summarizer,
            BuildIndexInput {
                session_key: "s1",
                archived_messages: &msgs,
                config: &config,
            },
        )
        .await
        .unwrap();

        assert_eq!(result.index.nodes.len(), 3); // 4, 4, 2
        let total_messages: usize = result.index.nodes.iter().map(|n| n.metadata.message_count).sum();
        assert_eq!(total_messages, 10);
    }

    #[tokio::test]
    async fn eviction_caps_node_count_and_assigns_recency_rank() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir).await;
        let summarizer = NullSummarizer;
        let config = EngineConfig {
            archive_chunk_size: 2,
            max_archives: 3,
            ..EngineConfig::default()
        };
        let msgs = messages(20);
        let result = build_index(
            &storage,
            &summarizer,
            BuildIndexInput {
                session_key: "s1",
                archived_messages: &msgs,
                config: &config,
            },
        )
        .await
        .unwrap();

        assert_eq!(result.index.nodes.len(), 3);
        for (i, node) in result.index.nodes.iter().enumerate() {
            assert_eq!(node.metadata.recency_rank, i + 1);
        }
        for pair in result.index.nodes.windows(2) {
            assert!(pair[0].metadata.end_message_index > pair[1].metadata.end_message_index);
        }
    }

    #[tokio::test]
    async fn rebuild_with_unchanged_messages_reuses_nodes_and_skips_summarizer() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir).await;
        let summarizer = NullSummarizer;
        let config = EngineConfig {
            archive_chunk_size: 4,
            max_archives: 10,
            ..EngineConfig::default()
        };
        let msgs = messages(8);

        let first = build_index(
            &storage,
            &summarizer,
            BuildIndexInput {
                session_key: "s1",
                archived_messages: &msgs,
                config: &config,
            },
        )
        .await
        .unwrap();

        let second = build_index(
            &storage,
            &summarizer,
            BuildIndexInput {
                session_key: "s1",
                archived_messages: &msgs,
                config: &config,
            },
        )
        .await
        .unwrap();

        assert_eq!(first.index.nodes.len(), second.index.nodes.len());
        for (a, b) in first.index.nodes.iter().zip(second.index.nodes.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.abstract_text, b.abstract_text);
            assert_eq!(a.overview, b.overview);
            assert_eq!(a.full_content_path, b.full_content_path);
        }
    }

    #[tokio::test]
    async fn summarizer_failure_still_yields_non_empty_summaries_and_fallback_events() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir).await;
        let summarizer = NullSummarizer;
        let config = EngineConfig {
            archive_chunk_size: 4,
            max_archives: 10,
            ..EngineConfig::default()
        };
        let msgs = messages(8);

        let result = build_index(
            &storage,
            &summarizer,
            BuildIndexInput {
                session_key: "s1",
                archived_messages: &msgs,
                config: &config,
            },
        )
        .await
        .unwrap();

        assert!(!result.fallback_events.is_empty());
        for node in &result.index.nodes {
            assert!(!node.abstract_text.is_empty());
            assert!(!node.overview.is_empty());
        }
    }

    #[tokio::test]
    async fn empty_archive_uses_sentinel_root_source() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir).await;
        let summarizer = NullSummarizer;
        let config = EngineConfig::default();

        let result = build_index(
            &storage,
            &summarizer,
            BuildIndexInput {
                session_key: "s1",
                archived_messages: &[],
                config: &config,
            },
        )
        .await
        .unwrap();

        assert!(result.index.nodes.is_empty());
        assert!(!result.index.root.abstract_text.is_empty());
    }
}
