//! End-to-end scenarios S1-S6 plus cross-cutting universal invariants
//! that don't fit naturally as a single module's unit test.

use std::sync::Arc;

use ctxlayer::prelude::*;
use ctxlayer::manager::ApplyInput;
use ctxlayer::types::{Layer, Reason};
use tempfile::TempDir;

async fn manager_in(dir: &TempDir) -> Manager {
    let storage = Arc::new(FileStorage::open(dir.path()).await.unwrap());
    Manager::new(storage, Arc::new(NullSummarizer))
}

fn user(text: impl Into<String>) -> Message {
    Message::text(Role::User, text)
}

fn assistant(text: impl Into<String>) -> Message {
    Message::text(Role::Assistant, text)
}

/// S1: short-conversation pass-through.
#[tokio::test]
async fn s1_short_conversation_passes_through() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir).await;
    let config = EngineConfig::default();

    let mut messages: Vec<Message> = (0..9).map(|i| user(format!("turn {i}"))).collect();
    messages.push(user("hello"));
    assert_eq!(messages.len(), 10);

    let result = manager
        .apply(ApplyInput {
            session_key: "telegram:s1",
            query: "hello",
            messages: &messages,
            config: &config,
        })
        .await
        .unwrap();

    assert!(!result.applied);
    assert_eq!(result.updated_messages.len(), 10);
}

/// S2: archive-and-retrieve broad query.
#[tokio::test]
async fn s2_archive_and_retrieve_broad_query() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir).await;
    let config = EngineConfig {
        max_recent_messages: 8,
        archive_chunk_size: 6,
        max_archives: 8,
        max_prompt_tokens: 2500,
        ..EngineConfig::default()
    };

    let mut messages: Vec<Message> = Vec::new();
    for i in 0..20 {
        messages.push(user(format!("Release checklist item {i}")));
        messages.push(assistant(format!("Acknowledged checklist item {i}")));
    }
    messages.push(user("release checklist overview"));

    let result = manager
        .apply(ApplyInput {
            session_key: "telegram:s2",
            query: "release checklist overview",
            messages: &messages,
            config: &config,
        })
        .await
        .unwrap();

    assert!(result.applied);
    let synthetic = result.updated_messages.first().unwrap().flat_text();
    assert!(synthetic.to_lowercase().contains("release checklist"));
    let usage = result.retrieval.as_ref().unwrap().token_usage;
    assert!(usage.total < usage.baseline_l2);
    assert!(usage.savings > 0);
}

/// S3: a precise query reaches L2 for the distinctively matching node.
#[tokio::test]
async fn s3_precise_query_reaches_l2() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir).await;
    let config = EngineConfig {
        max_recent_messages: 4,
        archive_chunk_size: 6,
        max_archives: 8,
        ..EngineConfig::default()
    };

    let mut messages: Vec<Message> = Vec::new();
    for i in 0..6 {
        messages.push(user(format!(
            "exact invoice retry parameter in billing migration detail {i}"
        )));
        messages.push(assistant("on it".to_string()));
    }
    for i in 0..6 {
        messages.push(user(format!("weather forecast small talk chat {i}")));
        messages.push(assistant("sure".to_string()));
    }
    messages.push(user("exact invoice retry parameter in billing migration"));

    let result = manager
        .apply(ApplyInput {
            session_key: "telegram:s3",
            query: "exact invoice retry parameter in billing migration",
            messages: &messages,
            config: &config,
        })
        .await
        .unwrap();

    assert!(result.applied);
    let retrieval = result.retrieval.unwrap();
    assert_eq!(retrieval.decision.reached_layer, Layer::L2);
    assert_eq!(retrieval.decision.reason, Reason::PreciseQuery);
    assert!(retrieval
        .selections
        .iter()
        .any(|s| s.layer == Layer::L2));
}

/// S4: budget trim drops L2 before L1/L0 and never exceeds the cap.
#[tokio::test]
async fn s4_budget_trim_respects_priority_and_cap() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir).await;
    let config = EngineConfig {
        max_recent_messages: 4,
        archive_chunk_size: 10,
        max_archives: 6,
        max_prompt_tokens: 420,
        ..EngineConfig::default()
    };

    let long_padding = "billing migration invoice retry parameter detail ".repeat(200);
    let mut messages: Vec<Message> = Vec::new();
    for i in 0..40 {
        messages.push(user(format!("{long_padding} chunk {i}")));
    }
    messages.push(user("billing migration invoice retry parameter"));

    let result = manager
        .apply(ApplyInput {
            session_key: "telegram:s4",
            query: "billing migration invoice retry parameter",
            messages: &messages,
            config: &config,
        })
        .await
        .unwrap();

    let retrieval = result.retrieval.unwrap();
    assert!(retrieval.token_usage.total <= 420);
    assert!(!retrieval.selections.is_empty());
}

/// S5: checksum reuse across consecutive builds with unchanged archived
/// messages.
#[tokio::test]
async fn s5_checksum_reuse_across_rebuilds() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(FileStorage::open(dir.path()).await.unwrap());
    let config = EngineConfig {
        archive_chunk_size: 4,
        max_archives: 10,
        ..EngineConfig::default()
    };
    let messages: Vec<Message> = (0..8).map(|i| user(format!("message {i}"))).collect();

    let first = ctxlayer::indexer::build_index(
        storage.as_ref(),
        &NullSummarizer,
        ctxlayer::indexer::BuildIndexInput {
            session_key: "s5",
            archived_messages: &messages,
            config: &config,
        },
    )
    .await
    .unwrap();

    let second = ctxlayer::indexer::build_index(
        storage.as_ref(),
        &NullSummarizer,
        ctxlayer::indexer::BuildIndexInput {
            session_key: "s5",
            archived_messages: &messages,
            config: &config,
        },
    )
    .await
    .unwrap();

    assert_eq!(first.index.nodes.len(), second.index.nodes.len());
    for (a, b) in first.index.nodes.iter().zip(second.index.nodes.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.full_content_path, b.full_content_path);
    }
}

/// S6: summarizer failure on every call still yields non-empty
/// abstracts/overviews and non-empty fallback events.
#[tokio::test]
async fn s6_summarizer_failure_fallback() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(FileStorage::open(dir.path()).await.unwrap());
    let config = EngineConfig {
        archive_chunk_size: 4,
        max_archives: 10,
        ..EngineConfig::default()
    };
    let messages: Vec<Message> = (0..12).map(|i| user(format!("message {i}"))).collect();

    let result = ctxlayer::indexer::build_index(
        storage.as_ref(),
        &NullSummarizer,
        ctxlayer::indexer::BuildIndexInput {
            session_key: "s6",
            archived_messages: &messages,
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

/// Universal invariant 2: synthetic block at position 0, current message
/// at the final position, recents keep relative order.
#[tokio::test]
async fn order_invariant_holds() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir).await;
    let config = EngineConfig {
        max_recent_messages: 6,
        archive_chunk_size: 5,
        max_archives: 10,
        ..EngineConfig::default()
    };

    let mut messages: Vec<Message> = (0..30).map(|i| user(format!("turn {i}"))).collect();
    messages.push(user("final query"));

    let result = manager
        .apply(ApplyInput {
            session_key: "telegram:order",
            query: "final query",
            messages: &messages,
            config: &config,
        })
        .await
        .unwrap();

    assert!(result.applied);
    assert_eq!(
        result.updated_messages.last().unwrap().flat_text(),
        "final query"
    );
    let recents: Vec<String> = result.updated_messages[1..result.updated_messages.len() - 1]
        .iter()
        .map(|m| m.flat_text())
        .collect();
    let mut last_seen_turn: i64 = -1;
    for text in &recents {
        if let Some(num_str) = text.strip_prefix("turn ") {
            let n: i64 = num_str.parse().unwrap();
            assert!(n > last_seen_turn, "recents must preserve original order");
            last_seen_turn = n;
        }
    }
}

/// Universal invariant 8: two builds enqueued on the same session key
/// produce a result equivalent to running them sequentially.
#[tokio::test]
async fn per_session_builds_serialize_to_a_consistent_result() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(FileStorage::open(dir.path()).await.unwrap());
    let queue = Arc::new(ctxlayer::queue::BuildQueue::new());
    let config = EngineConfig {
        archive_chunk_size: 4,
        max_archives: 10,
        ..EngineConfig::default()
    };

    let first_batch: Vec<Message> = (0..4).map(|i| user(format!("batch-one {i}"))).collect();
    let second_batch: Vec<Message> = (0..8).map(|i| user(format!("batch-two {i}"))).collect();

    let s1 = storage.clone();
    let c1 = config.clone();
    let fb1 = first_batch.clone();
    let q1 = queue.clone();
    let h1 = tokio::spawn(async move {
        q1.run("shared-session", || async move {
            ctxlayer::indexer::build_index(
                s1.as_ref(),
                &NullSummarizer,
                ctxlayer::indexer::BuildIndexInput {
                    session_key: "shared-session",
                    archived_messages: &fb1,
                    config: &c1,
                },
            )
            .await
        })
        .await
    });
    h1.await.unwrap().unwrap();

    let result = queue
        .run("shared-session", || async {
            ctxlayer::indexer::build_index(
                storage.as_ref(),
                &NullSummarizer,
                ctxlayer::indexer::BuildIndexInput {
                    session_key: "shared-session",
                    archived_messages: &second_batch,
                    config: &config,
                },
            )
            .await
        })
        .await
        .unwrap();

    // The second build observed the first build's persisted index as its
    // prior index (same session key, serialized through one lane).
    assert_eq!(result.index.nodes.len(), 2);
}
