//! Retrieval: per-method search plus reciprocal-rank fusion.
//!
//! The [`Retriever`] runs dense, lexical, and (when the question names an
//! entity) graph lookups against the [`EvidenceIndex`](index::EvidenceIndex),
//! fuses the ranked lists, and hydrates the winners from the evidence
//! ledger. A graph-only path serves explicitly relational questions.

pub mod fusion;
pub mod index;

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::ledger::EvidenceLedger;
use crate::types::{EvidenceChunk, Result, SessionId};

pub use fusion::{FusedHit, RankedList, RetrievalMethod, RrfFusion};
pub use index::{Embedder, EntityQuery, EvidenceIndex, MemoryIndex};

/// A fused, hydrated retrieval result.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// The ledger chunk.
    pub chunk: EvidenceChunk,
    /// Fused score.
    pub score: f32,
    /// Methods that surfaced the chunk.
    pub methods: Vec<RetrievalMethod>,
}

/// Fused retrieval over a session's evidence.
pub struct Retriever {
    index: Arc<dyn EvidenceIndex>,
    ledger: Arc<EvidenceLedger>,
    fusion: RrfFusion,
    top_k: usize,
}

impl Retriever {
    /// Wire a retriever over an index and ledger.
    pub fn new(
        index: Arc<dyn EvidenceIndex>,
        ledger: Arc<EvidenceLedger>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            index,
            ledger,
            fusion: RrfFusion::with_k(config.rrf_k),
            top_k: config.top_k,
        }
    }

    /// Fused retrieval for a question, scoped to one session.
    pub async fn retrieve(
        &self,
        session_id: SessionId,
        question: &str,
    ) -> Result<Vec<ScoredChunk>> {
        let dense = self.index.dense(session_id, question, self.top_k).await?;
        let lexical = self.index.lexical(session_id, question, self.top_k).await?;
        let graph = match EntityQuery::infer(question) {
            Some(eq) => self.index.graph(session_id, &eq).await?,
            None => Vec::new(),
        };

        let mut lists = Vec::new();
        if !dense.is_empty() {
            lists.push(RankedList {
                method: RetrievalMethod::Dense,
                entries: dense,
            });
        }
        if !lexical.is_empty() {
            lists.push(RankedList {
                method: RetrievalMethod::Lexical,
                entries: lexical,
            });
        }
        if !graph.is_empty() {
            lists.push(RankedList {
                method: RetrievalMethod::Graph,
                entries: graph,
            });
        }

        let fused = self.fusion.fuse(&lists);
        tracing::debug!(
            session = %session_id,
            question,
            methods = lists.len(),
            hits = fused.len(),
            "Fused retrieval"
        );

        Ok(self.hydrate(session_id, fused))
    }

    /// Graph-only lookup for an explicitly relational question: returns the
    /// directly matched chunks with provenance, no fusion.
    pub async fn retrieve_relational(
        &self,
        session_id: SessionId,
        query: &EntityQuery,
    ) -> Result<Vec<ScoredChunk>> {
        let hits = self.index.graph(session_id, query).await?;
        Ok(hits
            .into_iter()
            .filter_map(|(source_id, score)| {
                self.ledger.get(session_id, &source_id).map(|chunk| ScoredChunk {
                    chunk,
                    score,
                    methods: vec![RetrievalMethod::Graph],
                })
            })
            .collect())
    }

    fn hydrate(&self, session_id: SessionId, fused: Vec<FusedHit>) -> Vec<ScoredChunk> {
        fused
            .into_iter()
            .filter_map(|hit| {
                let chunk = self.ledger.get(session_id, &hit.source_id);
                if chunk.is_none() {
                    // Index and ledger disagree; skip rather than cite a ghost
                    tracing::warn!(source = %hit.source_id, "Indexed chunk missing from ledger");
                }
                chunk.map(|chunk| ScoredChunk {
                    chunk,
                    score: hit.score,
                    methods: hit.methods,
                })
            })
            .take(self.top_k)
            .collect()
    }
}
