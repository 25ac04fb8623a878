//! Core types shared across the engine: session and vector state, evidence
//! provenance, verdicts, ingest outcomes, and the crate-wide error type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============= Identifiers =============

/// Opaque identifier scoping all ledger entries and vectors to one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Mint a fresh session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| AppError::InvalidInput(format!("Invalid session id '{}': {}", s, e)))
    }
}

/// Identifier of a research vector within a session (e.g. `v3`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorId(pub String);

impl std::fmt::Display for VectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable per-session identifier of an evidence chunk (e.g. `s12`).
///
/// This is the token cited in the final report as `[s12]`; it must resolve to
/// exactly one ledger chunk with non-empty content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============= Session & Vector State =============

/// Lifecycle of a research vector.
///
/// A vector only reaches `Verified` via a positive auditor verdict, and only
/// reaches `Exhausted` once its refinement count hits the configured bound
/// without one. Both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorStatus {
    /// Waiting for (re-)acquisition.
    Pending,
    /// Acquisition in flight.
    Ingesting,
    /// Evidence audited as sufficient.
    Verified,
    /// Refinement bound hit without sufficient evidence.
    Exhausted,
}

impl VectorStatus {
    /// Whether the vector can make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Exhausted)
    }
}

impl std::fmt::Display for VectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Ingesting => "ingesting",
            Self::Verified => "verified",
            Self::Exhausted => "exhausted",
        };
        write!(f, "{}", name)
    }
}

/// Two sources disagreeing on a fact, recorded so the writer can surface the
/// discrepancy instead of silently picking one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictNote {
    /// First source involved.
    pub source_a: SourceId,
    /// Second source involved.
    pub source_b: SourceId,
    /// What the sources disagree about.
    pub detail: String,
}

/// An atomic, independently verifiable research sub-question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchVector {
    /// Vector id, unique within the session.
    pub id: VectorId,
    /// Human-readable sub-question.
    pub topic: String,
    /// Outline section this vector belongs to.
    pub section: String,
    /// Candidate queries, ordered broad to specific; refinements append here.
    pub search_queries: Vec<String>,
    /// Current lifecycle state.
    pub status: VectorStatus,
    /// Refinement attempts so far, capped by `max_refinements`.
    pub refinement_count: u8,
    /// Whether stale evidence should be rejected for this topic.
    pub time_sensitive: bool,
    /// Conflicts the auditor recorded for this vector's evidence.
    pub conflicts: Vec<ConflictNote>,
}

impl ResearchVector {
    /// The query the next acquisition attempt should issue: the most specific
    /// (last) entry, falling back to the topic text.
    pub fn current_query(&self) -> &str {
        self.search_queries
            .last()
            .map(String::as_str)
            .unwrap_or(&self.topic)
    }
}

/// One full research run: outline, vectors, and (eventually) the report.
///
/// Mutated by the planner (outline, vector set) and the orchestration loop
/// (vector status); immutable once `final_report` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchSession {
    /// Scope for all ledger entries and vectors.
    pub session_id: SessionId,
    /// The original natural-language question.
    pub user_query: String,
    /// Ordered section titles; the planner may rewrite non-verified parts.
    pub outline: Vec<String>,
    /// Vectors keyed by id.
    pub vectors: std::collections::BTreeMap<VectorId, ResearchVector>,
    /// Finished report, present only in the terminal state.
    pub final_report: Option<String>,
}

impl ResearchSession {
    /// Create an empty session for a user query.
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            session_id: SessionId::new(),
            user_query: user_query.into(),
            outline: Vec::new(),
            vectors: std::collections::BTreeMap::new(),
            final_report: None,
        }
    }

    /// Vectors attached to an outline section, in id order.
    pub fn vectors_in_section<'a>(&'a self, section: &str) -> Vec<&'a ResearchVector> {
        self.vectors
            .values()
            .filter(|v| v.section == section)
            .collect()
    }

    /// Whether every vector has reached a terminal status.
    pub fn all_vectors_terminal(&self) -> bool {
        self.vectors.values().all(|v| v.status.is_terminal())
    }
}

// ============= Evidence =============

/// The kind of structural span a chunk was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    /// Running text.
    #[default]
    Prose,
    /// A table, preserved as its source rows rather than flattened.
    Table,
    /// A fenced code block.
    Code,
}

/// Positional/structural metadata carried by every chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StructureMetadata {
    /// Heading path from the document root down to the chunk.
    pub heading_path: Vec<String>,
    /// Span kind of the chunk body.
    pub kind: SpanKind,
}

/// A normalized text chunk with provenance, as stored in the evidence ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceChunk {
    /// Stable citation id, unique within the session.
    pub source_id: SourceId,
    /// Where the content was fetched from.
    pub url: String,
    /// Normalized text; never empty in the ledger.
    pub content: String,
    /// When the content was retrieved.
    pub retrieved_at: DateTime<Utc>,
    /// Which vector the chunk was gathered for; chunks may satisfy several.
    pub vector_id: Option<VectorId>,
    /// Structural metadata from the document parser.
    pub structure: StructureMetadata,
    /// Publication-year signal extracted at parse time, if any.
    pub published_hint: Option<i32>,
}

/// Parser output: a chunk before the ledger assigns provenance ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedChunk {
    /// Normalized text.
    pub text: String,
    /// Structural metadata.
    pub structure: StructureMetadata,
    /// Publication-year signal, if detected.
    pub published_hint: Option<i32>,
}

/// A ranked candidate returned by the search collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Result title.
    pub title: String,
    /// Candidate URL.
    pub url: String,
    /// Result snippet used for relevance filtering.
    pub snippet: String,
    /// Provider rank, 0 is best.
    pub rank: usize,
}

/// Fetched page content as returned by the page-fetching collaborator.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// The fetched URL.
    pub url: String,
    /// Page content, normalized by the fetcher (typically markdown).
    pub content: String,
    /// Content type of `content`.
    pub content_type: String,
}

// ============= Acquisition Outcomes =============

/// Per-URL outcome of one acquisition attempt. Every attempted URL gets
/// exactly one of these; none is dropped without a reason code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UrlOutcome {
    /// Content fetched, parsed, and written to the ledger.
    Ingested {
        /// Chunks written (or matched via dedup) for this URL.
        chunk_count: usize,
    },
    /// The fetch collaborator failed or timed out; recorded, not fatal.
    FetchFailed {
        /// Collaborator error text.
        error: String,
    },
    /// Snippet relevance fell below the floor or the fetch cap was reached.
    FilteredOut {
        /// The relevance score that was rejected.
        score: f32,
    },
    /// Fetch succeeded but parsing produced no usable chunks.
    ParseEmpty,
}

/// Outcome for a single attempted URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlReport {
    /// The attempted URL.
    pub url: String,
    /// What happened to it.
    pub outcome: UrlOutcome,
}

/// Result of one acquisition pass for a vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    /// The vector the pass ran for.
    pub vector_id: VectorId,
    /// The query that was issued.
    pub query: String,
    /// Per-URL outcomes, in candidate order. Empty when search returned
    /// no candidates at all.
    pub outcomes: Vec<UrlReport>,
}

impl IngestReport {
    /// Total chunks ingested across all URLs.
    pub fn ingested_chunks(&self) -> usize {
        self.outcomes
            .iter()
            .map(|r| match r.outcome {
                UrlOutcome::Ingested { chunk_count } => chunk_count,
                _ => 0,
            })
            .sum()
    }

    /// Whether the pass added no evidence at all.
    pub fn is_empty_handed(&self) -> bool {
        self.ingested_chunks() == 0
    }
}

// ============= Verdicts =============

/// Auditor verdict for one vector, produced only from constrained model
/// output and deterministic checks — never from free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum AuditVerdict {
    /// Evidence is sufficient; the vector may be marked verified.
    Ready {
        /// Conflicts detected among this vector's sources, if any.
        conflicts: Vec<ConflictNote>,
    },
    /// Evidence does not answer the topic; retry with the refined query.
    Insufficient {
        /// Why the evidence fell short.
        reason: String,
        /// A more specific query; must differ from the one it refines.
        refined_query: String,
    },
    /// All matching evidence is older than the freshness window.
    Outdated {
        /// The stale sources that were rejected.
        stale_source_ids: Vec<SourceId>,
        /// A recency-biased refined query.
        refined_query: String,
    },
}

// ============= Status Reporting =============

/// Per-vector slice of a status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStatusEntry {
    /// Vector id.
    pub id: VectorId,
    /// Sub-question text.
    pub topic: String,
    /// Owning outline section.
    pub section: String,
    /// Current status.
    pub status: VectorStatus,
    /// Refinements consumed so far.
    pub refinement_count: u8,
}

/// Phase of a session's top-level run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// Planner is producing the outline.
    Planning,
    /// Vectors are being executed and audited.
    Acquiring,
    /// Writer is synthesizing the report.
    Writing,
    /// Report available.
    Complete,
    /// Cancelled before completion.
    Cancelled,
    /// Aborted by a fatal collaborator failure.
    Failed(String),
}

/// Snapshot returned by `get_session_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    /// The session in question.
    pub session_id: SessionId,
    /// Current run phase.
    pub phase: SessionPhase,
    /// Current outline section titles, in order.
    pub outline: Vec<String>,
    /// Vector statuses and refinement counts.
    pub vectors: Vec<VectorStatusEntry>,
}

/// Result of `get_report`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReportState {
    /// The finished report text.
    Ready {
        /// Final report markdown.
        report: String,
    },
    /// The session has not reached its terminal state.
    NotReady,
}

// ============= Error Types =============

/// Crate-wide error type.
///
/// Acquisition-level failures (`Search`, `Fetch`, `Parse`) are recorded
/// per-URL by the executor and normally never surface here; only classes
/// with no local recovery (`Llm`, `Ledger`) abort a session.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Search collaborator failure.
    #[error("Search error: {0}")]
    Search(String),

    /// Page fetch failure for a single URL.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Document parsing failure.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Language-model endpoint failure; fatal for the session.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Planner degradation that could not be recovered locally.
    #[error("Planning error: {0}")]
    Planning(String),

    /// Evidence ledger failure; fatal for the session.
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Unknown session id.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Configuration loading or validation failure.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid caller input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unexpected internal failure (worker panic, poisoned state).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_status_terminal() {
        assert!(!VectorStatus::Pending.is_terminal());
        assert!(!VectorStatus::Ingesting.is_terminal());
        assert!(VectorStatus::Verified.is_terminal());
        assert!(VectorStatus::Exhausted.is_terminal());
    }

    #[test]
    fn test_current_query_prefers_latest_refinement() {
        let mut vector = ResearchVector {
            id: VectorId("v1".to_string()),
            topic: "Model X pricing".to_string(),
            section: "Pricing".to_string(),
            search_queries: vec!["Model X price".to_string()],
            status: VectorStatus::Pending,
            refinement_count: 0,
            time_sensitive: true,
            conflicts: vec![],
        };
        assert_eq!(vector.current_query(), "Model X price");

        vector.search_queries.push("Model X price 2025".to_string());
        assert_eq!(vector.current_query(), "Model X price 2025");
    }

    #[test]
    fn test_current_query_falls_back_to_topic() {
        let vector = ResearchVector {
            id: VectorId("v1".to_string()),
            topic: "Model X pricing".to_string(),
            section: "Pricing".to_string(),
            search_queries: vec![],
            status: VectorStatus::Pending,
            refinement_count: 0,
            time_sensitive: false,
            conflicts: vec![],
        };
        assert_eq!(vector.current_query(), "Model X pricing");
    }

    #[test]
    fn test_ingest_report_counts() {
        let report = IngestReport {
            vector_id: VectorId("v1".to_string()),
            query: "q".to_string(),
            outcomes: vec![
                UrlReport {
                    url: "https://a.example".to_string(),
                    outcome: UrlOutcome::Ingested { chunk_count: 3 },
                },
                UrlReport {
                    url: "https://b.example".to_string(),
                    outcome: UrlOutcome::FetchFailed {
                        error: "timeout".to_string(),
                    },
                },
                UrlReport {
                    url: "https://c.example".to_string(),
                    outcome: UrlOutcome::FilteredOut { score: 0.05 },
                },
            ],
        };
        assert_eq!(report.ingested_chunks(), 3);
        assert!(!report.is_empty_handed());
    }

    #[test]
    fn test_verdict_serialization_is_tagged() {
        let verdict = AuditVerdict::Insufficient {
            reason: "no coverage".to_string(),
            refined_query: "sharper query".to_string(),
        };
        let json = serde_json::to_string(&verdict).unwrap();
        assert!(json.contains("\"verdict\":\"insufficient\""));

        let parsed: AuditVerdict = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, verdict);
    }
}
