//! The writer: closed-book synthesis of the final report.
//!
//! One outline section at a time, the writer retrieves the fused evidence
//! for that section's vectors, hands the model ONLY those chunks, and
//! post-processes the generated prose so that every surviving `[sN]` token
//! resolves to a ledger chunk with non-empty content. Sections without
//! evidence state the gap explicitly; recorded conflicts are rendered
//! deterministically, naming both sources.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::ledger::EvidenceLedger;
use crate::llm::LanguageModel;
use crate::retrieval::{Retriever, ScoredChunk};
use crate::types::{ResearchSession, Result, SourceId, VectorStatus};

const WRITE_SYSTEM: &str = r#"You write one section of a research report from supplied sources ONLY.

Rules:
- Every factual claim must cite a supplied source id in square brackets, e.g. [s3], immediately after the claim.
- Use ONLY the supplied sources. Do not use background knowledge. Do not invent source ids.
- If the sources do not cover part of the question, say so explicitly instead of filling the gap.
- If two sources disagree, name both ids and state the discrepancy.
- Plain prose, no heading (the section title is added by the caller)."#;

/// Synthesizes the final report from ledger evidence.
pub struct Writer {
    llm: Arc<dyn LanguageModel>,
    retriever: Arc<Retriever>,
    ledger: Arc<EvidenceLedger>,
}

impl Writer {
    /// Wire a writer.
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        retriever: Arc<Retriever>,
        ledger: Arc<EvidenceLedger>,
    ) -> Self {
        Self {
            llm,
            retriever,
            ledger,
        }
    }

    /// Produce the final report for a session whose vectors are all
    /// terminal.
    pub async fn write(&self, session: &ResearchSession) -> Result<String> {
        let session_id = session.session_id;
        let mut report = format!("# {}\n\n", session.user_query.trim());

        for section in &session.outline {
            let body = self.write_section(session, section).await?;
            report.push_str(&format!("## {}\n\n{}\n\n", section, body));
        }

        // Source list for every citation that survived
        let cited = extract_citations(&report);
        if !cited.is_empty() {
            report.push_str("## Sources\n\n");
            for source_id in &cited {
                if let Some(chunk) = self.ledger.get(session_id, source_id) {
                    report.push_str(&format!("- [{}] {}\n", source_id, chunk.url));
                }
            }
        }

        tracing::info!(
            session = %session_id,
            sections = session.outline.len(),
            citations = cited.len(),
            "Report written"
        );
        Ok(report)
    }

    async fn write_section(&self, session: &ResearchSession, section: &str) -> Result<String> {
        let session_id = session.session_id;
        let vectors = session.vectors_in_section(section);

        // Union of fused evidence across the section's vectors, deduplicated
        // by source id
        let mut evidence: BTreeMap<SourceId, ScoredChunk> = BTreeMap::new();
        for vector in &vectors {
            for scored in self.retriever.retrieve(session_id, &vector.topic).await? {
                evidence
                    .entry(scored.chunk.source_id.clone())
                    .or_insert(scored);
            }
        }

        let exhausted: Vec<&str> = vectors
            .iter()
            .filter(|v| v.status == VectorStatus::Exhausted)
            .map(|v| v.topic.as_str())
            .collect();

        let mut body = if evidence.is_empty() {
            // Nothing to cite: state the gap, never fabricate
            let topics: Vec<&str> = vectors.iter().map(|v| v.topic.as_str()).collect();
            if topics.is_empty() {
                "Insufficient evidence was found for this section.".to_string()
            } else {
                format!(
                    "Insufficient evidence was found for: {}.",
                    topics.join("; ")
                )
            }
        } else {
            let allowed: BTreeSet<SourceId> = evidence
                .values()
                .filter(|c| self.ledger.resolves(session_id, &c.chunk.source_id))
                .map(|c| c.chunk.source_id.clone())
                .collect();

            let prompt = section_prompt(session, section, &vectors, &evidence);
            let raw = self.llm.complete(WRITE_SYSTEM, &prompt).await?;

            let (clean, dropped) = sanitize_citations(&raw, &allowed);
            if dropped > 0 {
                tracing::warn!(
                    section,
                    dropped,
                    "Removed citations that do not resolve to ledger evidence"
                );
            }
            clean
        };

        // Gaps for exhausted vectors are stated even when neighbors have
        // evidence
        for topic in &exhausted {
            body.push_str(&format!(
                "\n\nNote: evidence for \"{}\" remained insufficient after the configured number of refinement attempts.",
                topic
            ));
        }

        // Recorded conflicts are rendered deterministically; the model's own
        // mention (if any) does not replace this
        for vector in &vectors {
            for conflict in &vector.conflicts {
                body.push_str(&format!(
                    "\n\n> Conflicting evidence: [{}] and [{}] disagree: {}",
                    conflict.source_a, conflict.source_b, conflict.detail
                ));
            }
        }

        Ok(body.trim().to_string())
    }
}

fn section_prompt(
    session: &ResearchSession,
    section: &str,
    vectors: &[&crate::types::ResearchVector],
    evidence: &BTreeMap<SourceId, ScoredChunk>,
) -> String {
    let mut sources = String::new();
    for scored in evidence.values() {
        let excerpt: String = scored.chunk.content.chars().take(900).collect();
        sources.push_str(&format!(
            "[{}] ({})\n{}\n\n",
            scored.chunk.source_id, scored.chunk.url, excerpt
        ));
    }
    let questions: Vec<String> = vectors.iter().map(|v| format!("- {}", v.topic)).collect();

    format!(
        "Report question: {}\nSection: {}\nSub-questions for this section:\n{}\n\nSources:\n{}",
        session.user_query,
        section,
        questions.join("\n"),
        sources
    )
}

/// Remove `[sN]` tokens that are not in the allowed set; returns the cleaned
/// text and how many tokens were dropped.
fn sanitize_citations(text: &str, allowed: &BTreeSet<SourceId>) -> (String, usize) {
    let mut out = String::with_capacity(text.len());
    let mut dropped = 0usize;
    let mut rest = text;

    while let Some(open) = rest.find('[') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        match tail.find(']') {
            Some(close) => {
                let token = &tail[1..close];
                if is_citation_token(token) {
                    if allowed.contains(&SourceId(token.to_string())) {
                        out.push_str(&tail[..=close]);
                    } else {
                        dropped += 1;
                    }
                } else {
                    out.push_str(&tail[..=close]);
                }
                rest = &tail[close + 1..];
            }
            None => {
                out.push_str(tail);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    (out, dropped)
}

fn is_citation_token(token: &str) -> bool {
    token
        .strip_prefix('s')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// All citation tokens in a report, in first-occurrence order, deduplicated.
pub fn extract_citations(text: &str) -> Vec<SourceId> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find('[') {
        let tail = &rest[open..];
        match tail.find(']') {
            Some(close) => {
                let token = &tail[1..close];
                if is_citation_token(token) {
                    let id = SourceId(token.to_string());
                    if seen.insert(id.clone()) {
                        out.push(id);
                    }
                }
                rest = &tail[close + 1..];
            }
            None => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> SourceId {
        SourceId(s.to_string())
    }

    #[test]
    fn test_extract_citations_dedups_in_order() {
        let cited = extract_citations("claim [s2], more [s1], again [s2].");
        assert_eq!(cited, vec![sid("s2"), sid("s1")]);
    }

    #[test]
    fn test_extract_ignores_non_citation_brackets() {
        let cited = extract_citations("array[0] and [see note] and [s10]");
        assert_eq!(cited, vec![sid("s10")]);
    }

    #[test]
    fn test_sanitize_removes_unknown_citations() {
        let allowed: BTreeSet<SourceId> = [sid("s1")].into_iter().collect();
        let (clean, dropped) = sanitize_citations("good [s1] bad [s99] prose", &allowed);
        assert_eq!(clean, "good [s1] bad  prose");
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_sanitize_keeps_non_citation_brackets() {
        let allowed = BTreeSet::new();
        let (clean, dropped) = sanitize_citations("matrix [1,2] stays", &allowed);
        assert_eq!(clean, "matrix [1,2] stays");
        assert_eq!(dropped, 0);
    }

    #[test]
    fn test_sanitize_unterminated_bracket() {
        let allowed = BTreeSet::new();
        let (clean, dropped) = sanitize_citations("dangling [s1", &allowed);
        assert_eq!(clean, "dangling [s1");
        assert_eq!(dropped, 0);
    }

    #[test]
    fn test_citation_token_shape() {
        assert!(is_citation_token("s1"));
        assert!(is_citation_token("s42"));
        assert!(!is_citation_token("s"));
        assert!(!is_citation_token("s1a"));
        assert!(!is_citation_token("x1"));
        assert!(!is_citation_token(""));
    }
}
