//! Engine configuration: the tunables in spec.md §3's configuration table.
//!
//! Values are carried per-call rather than read from a global, in line with
//! Design Note §9 ("No global mutable state"). [`EngineConfig::validate`]
//! rejects out-of-range values the way the teacher's `config::Config`
//! rejects unknown YAML fields up front rather than failing deep inside a
//! run.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tunable knobs for the context engine. See spec.md §3 for the full
/// rationale behind each field's range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Abstract (L0) length target, in estimated tokens. Range 40–300.
    #[serde(default = "default_l0_target_tokens")]
    pub l0_target_tokens: usize,

    /// Overview (L1) length target, in estimated tokens. Range 300–4000.
    #[serde(default = "default_l1_target_tokens")]
    pub l1_target_tokens: usize,

    /// Hard cap on the assembled prompt's message tokens. Range 4000–160000.
    #[serde(default = "default_max_prompt_tokens")]
    pub max_prompt_tokens: usize,

    /// Score at/above which a node is a strong match. Range 0.1–0.99.
    #[serde(default = "default_score_threshold_high")]
    pub score_threshold_high: f64,

    /// Minimum gap between top two scorers to avoid ambiguity. Range 0.01–0.8.
    #[serde(default = "default_top1_top2_margin")]
    pub top1_top2_margin: f64,

    /// Cap on L1 selections. Range 1–12.
    #[serde(default = "default_max_items_for_l1")]
    pub max_items_for_l1: usize,

    /// Cap on L2 selections. Range 1–6.
    #[serde(default = "default_max_items_for_l2")]
    pub max_items_for_l2: usize,

    /// Master switch for the whole engine.
    #[serde(default = "default_true")]
    pub enable_session_compression: bool,

    /// Retained node count. Range 1–60.
    #[serde(default = "default_max_archives")]
    pub max_archives: usize,

    /// Messages preserved verbatim at the tail. Range 2–120.
    #[serde(default = "default_max_recent_messages")]
    pub max_recent_messages: usize,

    /// Chunk size for the archived prefix. Range 2–30.
    #[serde(default = "default_archive_chunk_size")]
    pub archive_chunk_size: usize,
}

fn default_l0_target_tokens() -> usize {
    120
}
fn default_l1_target_tokens() -> usize {
    1200
}
fn default_max_prompt_tokens() -> usize {
    32_000
}
fn default_score_threshold_high() -> f64 {
    0.64
}
fn default_top1_top2_margin() -> f64 {
    0.08
}
fn default_max_items_for_l1() -> usize {
    4
}
fn default_max_items_for_l2() -> usize {
    2
}
fn default_true() -> bool {
    true
}
fn default_max_archives() -> usize {
    12
}
fn default_max_recent_messages() -> usize {
    24
}
fn default_archive_chunk_size() -> usize {
    8
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            l0_target_tokens: default_l0_target_tokens(),
            l1_target_tokens: default_l1_target_tokens(),
            max_prompt_tokens: default_max_prompt_tokens(),
            score_threshold_high: default_score_threshold_high(),
            top1_top2_margin: default_top1_top2_margin(),
            max_items_for_l1: default_max_items_for_l1(),
            max_items_for_l2: default_max_items_for_l2(),
            enable_session_compression: default_true(),
            max_archives: default_max_archives(),
            max_recent_messages: default_max_recent_messages(),
            archive_chunk_size: default_archive_chunk_size(),
        }
    }
}

impl EngineConfig {
    /// Validate that every field is within its documented range.
    ///
    /// Called explicitly by callers that load config from an external
    /// source; construction via [`Default::default`] or the builder-style
    /// setters always yields a valid config, so this is not run implicitly
    /// on every use.
    pub fn validate(&self) -> Result<()> {
        check_range("l0_target_tokens", self.l0_target_tokens, 40, 300)?;
        check_range("l1_target_tokens", self.l1_target_tokens, 300, 4000)?;
        check_range(
            "max_prompt_tokens",
            self.max_prompt_tokens,
            4_000,
            160_000,
        )?;
        check_range_f64(
            "score_threshold_high",
            self.score_threshold_high,
            0.1,
            0.99,
        )?;
        check_range_f64("top1_top2_margin", self.top1_top2_margin, 0.01, 0.8)?;
        check_range("max_items_for_l1", self.max_items_for_l1, 1, 12)?;
        check_range("max_items_for_l2", self.max_items_for_l2, 1, 6)?;
        check_range("max_archives", self.max_archives, 1, 60)?;
        check_range("max_recent_messages", self.max_recent_messages, 2, 120)?;
        check_range("archive_chunk_size", self.archive_chunk_size, 2, 30)?;
        Ok(())
    }
}

fn check_range(name: &str, value: usize, min: usize, max: usize) -> Result<()> {
    if value < min || value > max {
        return Err(Error::InvalidConfig(format!(
            "{name} must be in [{min}, {max}], got {value}"
        )));
    }
    Ok(())
}

fn check_range_f64(name: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if value < min || value > max {
        return Err(Error::InvalidConfig(format!(
            "{name} must be in [{min}, {max}], got {value}"
        )));
    }
    Ok(())
}
