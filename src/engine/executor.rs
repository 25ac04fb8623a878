//! The acquisition loop: search, filter, fetch, parse, ingest.
//!
//! One `execute` call runs the current (possibly refined) query of a single
//! vector. Every attempted URL ends up in the returned report with exactly
//! one reason code; a failing fetch is recorded against its URL and never
//! aborts the batch. Only ledger failures propagate — without the ledger
//! there is no forward progress.

use std::sync::Arc;

use chrono::Utc;

use crate::collab::{PageFetcher, SearchProvider};
use crate::config::AcquisitionConfig;
use crate::ingest::DocumentParser;
use crate::ledger::EvidenceLedger;
use crate::retrieval::EvidenceIndex;
use crate::types::{
    IngestReport, ResearchVector, Result, SearchHit, SessionId, UrlOutcome, UrlReport,
};

/// Runs acquisition passes for vectors.
pub struct Executor {
    search: Arc<dyn SearchProvider>,
    fetcher: Arc<dyn PageFetcher>,
    parser: Arc<dyn DocumentParser>,
    ledger: Arc<EvidenceLedger>,
    index: Arc<dyn EvidenceIndex>,
    config: AcquisitionConfig,
}

impl Executor {
    /// Wire an executor.
    pub fn new(
        search: Arc<dyn SearchProvider>,
        fetcher: Arc<dyn PageFetcher>,
        parser: Arc<dyn DocumentParser>,
        ledger: Arc<EvidenceLedger>,
        index: Arc<dyn EvidenceIndex>,
        config: AcquisitionConfig,
    ) -> Self {
        Self {
            search,
            fetcher,
            parser,
            ledger,
            index,
            config,
        }
    }

    /// Run one acquisition pass for a vector's current query.
    pub async fn execute(
        &self,
        session_id: SessionId,
        vector: &ResearchVector,
    ) -> Result<IngestReport> {
        let query = vector.current_query().to_string();
        tracing::info!(session = %session_id, vector = %vector.id, %query, "Acquisition pass");

        let hits = match self.search.search(&query, self.config.max_candidates).await {
            Ok(hits) => hits,
            Err(e) => {
                // An unreachable search provider yields an empty-handed pass;
                // the auditor turns that into a refinement
                tracing::warn!(vector = %vector.id, error = %e, "Search failed; no candidates");
                Vec::new()
            }
        };

        let mut outcomes = Vec::with_capacity(hits.len());
        let mut fetched = 0usize;

        for hit in &hits {
            let score = snippet_relevance(&vector.topic, hit);

            if score < self.config.relevance_floor || fetched >= self.config.max_fetch_per_query {
                outcomes.push(UrlReport {
                    url: hit.url.clone(),
                    outcome: UrlOutcome::FilteredOut { score },
                });
                continue;
            }
            fetched += 1;

            let outcome = self.acquire_url(session_id, vector, &hit.url).await?;
            outcomes.push(UrlReport {
                url: hit.url.clone(),
                outcome,
            });
        }

        let report = IngestReport {
            vector_id: vector.id.clone(),
            query,
            outcomes,
        };
        tracing::info!(
            vector = %vector.id,
            attempted = report.outcomes.len(),
            ingested = report.ingested_chunks(),
            "Acquisition pass finished"
        );
        Ok(report)
    }

    /// Fetch, parse, and ingest one selected URL. Fetch/parse problems are
    /// returned as outcomes; only ledger errors escape.
    async fn acquire_url(
        &self,
        session_id: SessionId,
        vector: &ResearchVector,
        url: &str,
    ) -> Result<UrlOutcome> {
        let page = match self.fetcher.fetch(url).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(vector = %vector.id, url, error = %e, "Fetch failed");
                return Ok(UrlOutcome::FetchFailed {
                    error: e.to_string(),
                });
            }
        };

        let chunks = match self.parser.parse(&page.content, &page.content_type) {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!(vector = %vector.id, url, error = %e, "Parse failed");
                return Ok(UrlOutcome::ParseEmpty);
            }
        };
        if chunks.iter().all(|c| c.text.trim().is_empty()) {
            return Ok(UrlOutcome::ParseEmpty);
        }

        let retrieved_at = Utc::now();
        let mut chunk_count = 0usize;
        for chunk in chunks {
            if chunk.text.trim().is_empty() {
                continue;
            }
            let appended = self.ledger.append(
                session_id,
                &page.url,
                Some(vector.id.clone()),
                chunk,
                retrieved_at,
            )?;
            chunk_count += 1;
            if !appended.deduplicated {
                if let Some(stored) = self.ledger.get(session_id, &appended.source_id) {
                    self.index.index(session_id, &stored).await?;
                }
            }
        }

        Ok(UrlOutcome::Ingested { chunk_count })
    }
}

/// Lexical overlap between the vector topic and a search hit, in [0, 1].
fn snippet_relevance(topic: &str, hit: &SearchHit) -> f32 {
    let topic_terms: Vec<String> = tokenize(topic);
    if topic_terms.is_empty() {
        return 0.0;
    }
    let hit_terms: std::collections::HashSet<String> =
        tokenize(&format!("{} {}", hit.title, hit.snippet))
            .into_iter()
            .collect();

    let matched = topic_terms
        .iter()
        .filter(|t| hit_terms.contains(*t))
        .count();
    matched as f32 / topic_terms.len() as f32
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty() && s.len() > 1)
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(title: &str, snippet: &str) -> SearchHit {
        SearchHit {
            title: title.to_string(),
            url: "https://x.example".to_string(),
            snippet: snippet.to_string(),
            rank: 0,
        }
    }

    #[test]
    fn test_snippet_relevance_full_overlap() {
        let score = snippet_relevance(
            "rust async runtime",
            &hit("Rust async runtime comparison", "benchmarks of async runtimes in Rust"),
        );
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_snippet_relevance_disjoint() {
        let score = snippet_relevance("rust async runtime", &hit("Gardening", "tomato tips"));
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_snippet_relevance_partial() {
        let score = snippet_relevance("rust async runtime", &hit("Intro to Rust", "a language"));
        assert!(score > 0.0 && score < 1.0);
    }
}
