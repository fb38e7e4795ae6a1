//! Retriever (spec §4.6): score nodes against the query, decide an
//! escalation tier, load content for the chosen layer, and enforce the
//! prompt token budget.

use crate::config::EngineConfig;
use crate::storage::Storage;
use crate::text;
use crate::token;
use crate::types::{
    ContextNode, Decision, FallbackEvent, IndexDocument, Layer, Reason, RetrievalResult,
    Selection, TokenUsage,
};

struct ScoredNode<'a> {
    node: &'a ContextNode,
    score: f64,
}

fn joined_keywords(node: &ContextNode) -> String {
    node.keywords.join(" ")
}

fn score_node(query: &str, node: &ContextNode) -> f64 {
    let by_abstract = text::similarity(query, &node.abstract_text);
    let by_overview = text::similarity(query, &node.overview);
    let by_keywords = text::similarity(query, &joined_keywords(node));
    by_abstract.max(by_overview).max(by_keywords)
}

/// The query's similarity against the root rollup's abstract+overview
/// (spec §4.6 step 1: "Also compute a root-level score against root
/// abstract+overview for decision purposes").
fn score_root(query: &str, index: &IndexDocument) -> f64 {
    let by_abstract = text::similarity(query, &index.root.abstract_text);
    let by_overview = text::similarity(query, &index.root.overview);
    by_abstract.max(by_overview)
}

/// `retrieve`: the single public operation of this module.
pub async fn retrieve(
    storage: &dyn Storage,
    index: &IndexDocument,
    query: &str,
    config: &EngineConfig,
) -> RetrievalResult {
    let mut fallback_events = Vec::new();

    // 1. Score every node; rank by score desc, ties by recencyRank asc.
    let mut scored: Vec<ScoredNode> = index
        .nodes
        .iter()
        .map(|node| ScoredNode {
            node,
            score: score_node(query, node),
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.node.metadata.recency_rank.cmp(&b.node.metadata.recency_rank))
    });

    let root_score = score_root(query, index);

    // 3. Decide the reached layer.
    let above_threshold: Vec<&ScoredNode> = scored
        .iter()
        .filter(|s| s.score >= config.score_threshold_high)
        .collect();

    let decision = if above_threshold.is_empty() {
        Decision {
            reached_layer: Layer::L0,
            reason: Reason::BroadQuery,
            root_score,
        }
    } else {
        let top1 = above_threshold[0].score;
        let top2 = above_threshold.get(1).map(|s| s.score);
        let clear_leader = match top2 {
            None => true,
            Some(second) => top1 - second >= config.top1_top2_margin,
        };
        if clear_leader {
            Decision {
                reached_layer: Layer::L2,
                reason: Reason::PreciseQuery,
                root_score,
            }
        } else {
            Decision {
                reached_layer: Layer::L1,
                reason: Reason::Ambiguous,
                root_score,
            }
        }
    };

    let mut selections: Vec<Selection> = Vec::new();

    match decision.reached_layer {
        Layer::L0 => {
            for s in scored.iter().take(config.max_items_for_l1) {
                selections.push(Selection {
                    node_id: s.node.id.clone(),
                    layer: Layer::L0,
                    score: s.score,
                    content: s.node.abstract_text.clone(),
                    estimated_tokens: s.node.token_estimate.l0,
                });
            }
        }
        Layer::L2 => {
            let l2_count = config.max_items_for_l2.min(scored.len());
            for s in scored.iter().take(l2_count) {
                let (content, layer, estimated_tokens) =
                    load_l2_content(storage, s.node, &mut fallback_events).await;
                selections.push(Selection {
                    node_id: s.node.id.clone(),
                    layer,
                    score: s.score,
                    content,
                    estimated_tokens,
                });
            }
            let remaining_slots = config.max_items_for_l1.saturating_sub(l2_count);
            for s in scored
                .iter()
                .skip(l2_count)
                .filter(|s| s.score >= config.score_threshold_high)
                .take(remaining_slots)
            {
                selections.push(Selection {
                    node_id: s.node.id.clone(),
                    layer: Layer::L1,
                    score: s.score,
                    content: s.node.overview.clone(),
                    estimated_tokens: s.node.token_estimate.l1,
                });
            }
        }
        Layer::L1 => {
            let l1_count = config.max_items_for_l1.min(scored.len());
            for s in scored.iter().take(l1_count) {
                selections.push(Selection {
                    node_id: s.node.id.clone(),
                    layer: Layer::L1,
                    score: s.score,
                    content: s.node.overview.clone(),
                    estimated_tokens: s.node.token_estimate.l1,
                });
            }
            for s in scored.iter().skip(l1_count).take(config.max_items_for_l1) {
                selections.push(Selection {
                    node_id: s.node.id.clone(),
                    layer: Layer::L0,
                    score: s.score,
                    content: s.node.abstract_text.clone(),
                    estimated_tokens: s.node.token_estimate.l0,
                });
            }
        }
    }

    // 5. Budget enforcement.
    enforce_budget(&mut selections, &scored, config);

    // Selections are reported layer ascending, score descending (spec §4.6).
    selections.sort_by(|a, b| {
        a.layer
            .cmp(&b.layer)
            .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal))
    });

    // 6. Telemetry.
    let baseline_l2: usize = index.nodes.iter().map(|n| n.token_estimate.l2).sum();
    let (l0, l1, l2, total) = tally(&selections);
    let savings = baseline_l2.saturating_sub(total);
    let savings_ratio = savings as f64 / baseline_l2.max(1) as f64;

    RetrievalResult {
        selections,
        decision,
        token_usage: TokenUsage {
            l0,
            l1,
            l2,
            total,
            baseline_l2,
            savings,
            savings_ratio,
        },
        fallback_events,
    }
}

/// Load a node's transcript via storage; on failure, downgrade to its
/// overview and record a fallback event (spec §4.6 step 4).
async fn load_l2_content(
    storage: &dyn Storage,
    node: &ContextNode,
    fallback_events: &mut Vec<FallbackEvent>,
) -> (String, Layer, usize) {
    match storage.read_archive(&node.full_content_path).await {
        Ok(Some(body)) => (body.transcript, Layer::L2, node.token_estimate.l2),
        _ => {
            fallback_events.push(FallbackEvent {
                node_id: Some(node.id.clone()),
                reason: "archive-body-missing".to_string(),
            });
            (node.overview.clone(), Layer::L1, node.token_estimate.l1)
        }
    }
}

fn tally(selections: &[Selection]) -> (usize, usize, usize, usize) {
    let mut l0 = 0;
    let mut l1 = 0;
    let mut l2 = 0;
    for s in selections {
        match s.layer {
            Layer::L0 => l0 += s.estimated_tokens,
            Layer::L1 => l1 += s.estimated_tokens,
            Layer::L2 => l2 += s.estimated_tokens,
        }
    }
    (l0, l1, l2, l0 + l1 + l2)
}

/// While the total exceeds `maxPromptTokens`, drop items in priority:
/// lowest-score L2 first, then lowest-score L1, then lowest-score L0.
/// Never leaves an empty selection if a node was eligible: the final
/// fallback is the single highest-scoring abstract, trimmed to fit.
fn enforce_budget(selections: &mut Vec<Selection>, scored: &[ScoredNode], config: &EngineConfig) {
    let budget = config.max_prompt_tokens;

    loop {
        let total: usize = selections.iter().map(|s| s.estimated_tokens).sum();
        if total <= budget {
            break;
        }
        let drop_index = drop_candidate(selections);
        match drop_index {
            Some(idx) => {
                selections.remove(idx);
            }
            None => break,
        }
    }

    if selections.is_empty() {
        if let Some(best) = scored.first() {
            let trimmed = text::trim_to_token_target(&best.node.abstract_text, budget);
            let estimated_tokens = token::estimate_text(&trimmed);
            selections.push(Selection {
                node_id: best.node.id.clone(),
                layer: Layer::L0,
                score: best.score,
                content: trimmed,
                estimated_tokens,
            });
        }
    }
}

fn drop_candidate(selections: &[Selection]) -> Option<usize> {
    for target_layer in [Layer::L2, Layer::L1, Layer::L0] {
        let candidate = selections
            .iter()
            .enumerate()
            .filter(|(_, s)| s.layer == target_layer)
            .min_by(|(_, a), (_, b)| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
        if let Some((idx, _)) = candidate {
            return Some(idx);
        }
    }
    None
}
