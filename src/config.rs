//! TOML-based configuration for the engine.
//!
//! Every constant the protocol leaves open — refinement bound, relevance
//! floor, fusion constant, freshness window, worker count — is a tunable
//! here rather than a hard-coded value. `EngineConfig::default()` is a
//! working configuration; a `vera.toml` file overrides individual fields.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::{AppError, Result};

/// Root configuration structure loaded from vera.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Language-model endpoint settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Planner settings.
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Acquisition-loop settings.
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Auditor settings.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Retrieval fusion settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Document parser settings.
    #[serde(default)]
    pub parser: ParserConfig,

    /// Top-level orchestration settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            AppError::Config(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml(&raw)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| AppError::Config(format!("Invalid config: {}", e)))
    }
}

// ============= Language Model =============

/// OpenAI-compatible chat-completions endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the chat-completions API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model identifier sent with each request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Completion token cap.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    2048
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

// ============= Planner =============

/// Planner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Results requested by the terminology pre-search.
    #[serde(default = "default_presearch_results")]
    pub presearch_results: usize,

    /// Upper bound on vectors a single plan may produce.
    #[serde(default = "default_max_vectors")]
    pub max_vectors: usize,
}

fn default_presearch_results() -> usize {
    5
}

fn default_max_vectors() -> usize {
    12
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            presearch_results: default_presearch_results(),
            max_vectors: default_max_vectors(),
        }
    }
}

// ============= Acquisition =============

/// Acquisition-loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Candidates requested from the search collaborator per query.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Snippet relevance below this is filtered out before fetching.
    #[serde(default = "default_relevance_floor")]
    pub relevance_floor: f32,

    /// Fetch cap per query, bounding cost per acquisition pass.
    #[serde(default = "default_max_fetch_per_query")]
    pub max_fetch_per_query: usize,
}

fn default_max_candidates() -> usize {
    8
}

fn default_relevance_floor() -> f32 {
    0.2
}

fn default_max_fetch_per_query() -> usize {
    3
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            max_candidates: default_max_candidates(),
            relevance_floor: default_relevance_floor(),
            max_fetch_per_query: default_max_fetch_per_query(),
        }
    }
}

// ============= Audit =============

/// Auditor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// A publication hint older than this many years counts as stale for
    /// time-sensitive vectors.
    #[serde(default = "default_freshness_window_years")]
    pub freshness_window_years: i32,
}

fn default_freshness_window_years() -> i32 {
    3
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            freshness_window_years: default_freshness_window_years(),
        }
    }
}

// ============= Retrieval =============

/// Retrieval fusion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Reciprocal-rank-fusion constant.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,

    /// Results requested from each retrieval method before fusion.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_rrf_k() -> f32 {
    60.0
}

fn default_top_k() -> usize {
    8
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            top_k: default_top_k(),
        }
    }
}

// ============= Parser =============

/// Document parser settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Maximum words per prose chunk.
    #[serde(default = "default_chunk_words")]
    pub chunk_words: usize,

    /// Word overlap between consecutive prose chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_chunk_words() -> usize {
    220
}

fn default_chunk_overlap() -> usize {
    30
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            chunk_words: default_chunk_words(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

// ============= Orchestrator =============

/// Top-level orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Refinement bound per vector; the loop terminates within
    /// `|vectors| * (max_refinements + 1)` audit cycles.
    #[serde(default = "default_max_refinements")]
    pub max_refinements: u8,

    /// Concurrent vector acquisitions, bounding collaborator load.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Replans allowed per session before the outline is frozen.
    #[serde(default = "default_max_replans")]
    pub max_replans: usize,
}

fn default_max_refinements() -> u8 {
    3
}

fn default_worker_count() -> usize {
    4
}

fn default_max_replans() -> usize {
    2
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_refinements: default_max_refinements(),
            worker_count: default_worker_count(),
            max_replans: default_max_replans(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_complete() {
        let config = EngineConfig::default();
        assert_eq!(config.orchestrator.max_refinements, 3);
        assert_eq!(config.retrieval.rrf_k, 60.0);
        assert!(config.acquisition.relevance_floor > 0.0);
        assert!(config.orchestrator.worker_count >= 1);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config.acquisition.max_fetch_per_query, 3);
        assert_eq!(config.audit.freshness_window_years, 3);
    }

    #[test]
    fn test_partial_override() {
        let config = EngineConfig::from_toml(
            r#"
            [orchestrator]
            max_refinements = 1
            worker_count = 2

            [retrieval]
            rrf_k = 30.0
            "#,
        )
        .unwrap();
        assert_eq!(config.orchestrator.max_refinements, 1);
        assert_eq!(config.orchestrator.worker_count, 2);
        assert_eq!(config.retrieval.rrf_k, 30.0);
        // Untouched sections keep defaults
        assert_eq!(config.acquisition.max_candidates, 8);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = EngineConfig::from_toml("orchestrator = 3").unwrap_err();
        assert!(err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vera.toml");
        std::fs::write(&path, "[audit]\nfreshness_window_years = 5\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.audit.freshness_window_years, 5);
    }
}
