//! Summarization capability (spec §4.4).
//!
//! `Summarizer` is a capability trait the same way the teacher's
//! `ModelProvider` is: the engine depends on the trait, not on any
//! particular LLM backend. The indexer never aborts a build because a
//! summarizer call failed or because none was configured — it always
//! falls back to `trim_to_token_target` and records a fallback reason.

use std::time::Duration;

use async_trait::async_trait;

use crate::text;

/// Internal deadline for one summarizer call (spec §4.4's "internal
/// deadline"). A real LLM-backed provider can hang on a slow network call;
/// this bounds how long a single build waits before falling back.
const SUMMARIZER_DEADLINE: Duration = Duration::from_secs(30);

/// Outcome of a summarization call: the text (always non-empty if the
/// input was non-empty) plus whether — and why — a fallback was used.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryOutcome {
    pub text: String,
    pub fallback_used: bool,
    pub fallback_reason: Option<String>,
}

/// A pluggable text-summarization backend. Implementations that fail
/// SHOULD return `Err`; the engine treats any error as a fallback trigger
/// and never propagates it.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Ask for a faithful medium-length summary fitting `l1_target` tokens.
    async fn generate_overview(
        &self,
        transcript: &str,
        l1_target: usize,
    ) -> std::result::Result<String, String>;

    /// Ask for a concise abstract of `overview` fitting `l0_target` tokens.
    async fn generate_abstract(
        &self,
        overview: &str,
        l0_target: usize,
    ) -> std::result::Result<String, String>;
}

/// A summarizer that always fails with `"no-provider"`, used when no
/// capability is configured. Combined with the fallback wrappers below,
/// this is equivalent to "extractive summaries only" — the spec's
/// Non-goal of not requiring an LLM dependency to function.
pub struct NullSummarizer;

#[async_trait]
impl Summarizer for NullSummarizer {
    async fn generate_overview(
        &self,
        _transcript: &str,
        _l1_target: usize,
    ) -> std::result::Result<String, String> {
        Err("no-provider".to_string())
    }

    async fn generate_abstract(
        &self,
        _overview: &str,
        _l0_target: usize,
    ) -> std::result::Result<String, String> {
        Err("no-provider".to_string())
    }
}

/// A deterministic summarizer that succeeds by trimming its input to the
/// requested token target rather than calling out to any model. Useful as
/// a safe, dependency-free default and in tests that want a `Summarizer`
/// which never takes the fallback path (distinct from `NullSummarizer`,
/// which always does).
pub struct TrimmingSummarizer;

#[async_trait]
impl Summarizer for TrimmingSummarizer {
    async fn generate_overview(
        &self,
        transcript: &str,
        l1_target: usize,
    ) -> std::result::Result<String, String> {
        Ok(text::trim_to_token_target(transcript, l1_target))
    }

    async fn generate_abstract(
        &self,
        overview: &str,
        l0_target: usize,
    ) -> std::result::Result<String, String> {
        Ok(text::trim_to_token_target(overview, l0_target))
    }
}

/// Call `generate_overview`, recovering to `trim_to_token_target` on any
/// error, empty response, or exceeded deadline. The fallback path is
/// referentially transparent, as required by spec §4.4.
pub async fn generate_overview_with_fallback(
    summarizer: &dyn Summarizer,
    transcript: &str,
    l1_target: usize,
) -> SummaryOutcome {
    match tokio::time::timeout(
        SUMMARIZER_DEADLINE,
        summarizer.generate_overview(transcript, l1_target),
    )
    .await
    {
        Ok(Ok(text)) if !text.trim().is_empty() => SummaryOutcome {
            text,
            fallback_used: false,
            fallback_reason: None,
        },
        Ok(Ok(_)) => fallback(transcript, l1_target, "empty-response"),
        Ok(Err(kind)) => fallback(transcript, l1_target, &format!("error:{kind}")),
        Err(_elapsed) => fallback(transcript, l1_target, "timeout"),
    }
}

/// Call `generate_abstract`, recovering to `trim_to_token_target` on any
/// error, empty response, or exceeded deadline.
pub async fn generate_abstract_with_fallback(
    summarizer: &dyn Summarizer,
    overview: &str,
    l0_target: usize,
) -> SummaryOutcome {
    match tokio::time::timeout(
        SUMMARIZER_DEADLINE,
        summarizer.generate_abstract(overview, l0_target),
    )
    .await
    {
        Ok(Ok(text)) if !text.trim().is_empty() => SummaryOutcome {
            text,
            fallback_used: false,
            fallback_reason: None,
        },
        Ok(Ok(_)) => fallback(overview, l0_target, "empty-response"),
        Ok(Err(kind)) => fallback(overview, l0_target, &format!("error:{kind}")),
        Err(_elapsed) => fallback(overview, l0_target, "timeout"),
    }
}

fn fallback(input: &str, target: usize, reason: &str) -> SummaryOutcome {
    SummaryOutcome {
        text: text::trim_to_token_target(input, target),
        fallback_used: true,
        fallback_reason: Some(reason.to_string()),
    }
}
