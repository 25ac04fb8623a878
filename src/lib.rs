//! # V.E.R.A - Verified Evidence Research Agent
//!
//! A research orchestration engine: give it a natural-language question and
//! it coordinates planning, evidence acquisition, evidence auditing, and
//! closed-book synthesis into a cited, structurally-organized report.
//!
//! ## Overview
//!
//! V.E.R.A can be used in two ways:
//!
//! 1. **As a CLI** - Run the `vera` binary with a question
//! 2. **As a library** - Embed the engine in your own Rust project
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vera::{EngineConfig, ReportState, ResearchEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(ResearchEngine::with_defaults(EngineConfig::default()));
//!
//!     let session_id = engine.start_session("What does Model X cost in 2025?")?;
//!
//!     // Poll while the pipeline runs
//!     loop {
//!         match engine.get_report(session_id)? {
//!             ReportState::Ready { report } => {
//!                 println!("{report}");
//!                 break;
//!             }
//!             ReportState::NotReady => {
//!                 tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Pipeline
//!
//! 1. **Plan** - a pre-search-informed outline decomposed into atomic
//!    research vectors
//! 2. **Execute** - per vector: search, filter, fetch, parse, ingest into
//!    the evidence ledger
//! 3. **Audit** - per vector: coverage, freshness, and sufficiency checks
//!    producing an enumerated verdict; insufficient evidence refines the
//!    query, bounded by `max_refinements`
//! 4. **Write** - closed-book synthesis per outline section, every claim
//!    cited as `[sN]` against the ledger
//!
//! The loop is guaranteed to terminate within
//! `|vectors| * (max_refinements + 1)` audit cycles, and every citation in
//! the final report resolves to a ledger chunk with non-empty content.
//!
//! ## Modules
//!
//! - [`engine`] - planner, executor, auditor, writer, orchestration
//! - [`ledger`] - append-only, session-scoped evidence store
//! - [`retrieval`] - dense/lexical/graph retrieval with RRF fusion
//! - [`ingest`] - document-structure parsing
//! - [`collab`] - search and fetch collaborator contracts
//! - [`llm`] - language-model client abstraction
//! - [`types`] - core types and error handling
//! - [`config`] - TOML configuration for every tunable

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

/// External collaborator contracts (search, fetch).
pub mod collab;
/// TOML configuration.
pub mod config;
/// Planner, executor, auditor, writer, and the orchestration state machine.
pub mod engine;
/// Document-structure parsing.
pub mod ingest;
/// Append-only, session-scoped evidence ledger.
pub mod ledger;
/// LLM client abstractions.
pub mod llm;
/// Retrieval fusion over the evidence index.
pub mod retrieval;
/// Core types (sessions, vectors, evidence, errors).
pub mod types;

// Re-export commonly used types
pub use collab::{DaedraFetcher, DaedraSearch, PageFetcher, SearchProvider};
pub use config::EngineConfig;
pub use engine::{Collaborators, ResearchEngine, SessionStore};
pub use ingest::{DocumentParser, StructuralParser};
pub use ledger::EvidenceLedger;
pub use llm::{LanguageModel, OpenAiCompatClient};
pub use retrieval::{Embedder, EntityQuery, EvidenceIndex, MemoryIndex, Retriever, RrfFusion};
pub use types::{
    AppError, AuditVerdict, EvidenceChunk, ReportState, ResearchSession, ResearchVector, Result,
    SessionId, SessionStatus, SourceId, VectorId, VectorStatus,
};
