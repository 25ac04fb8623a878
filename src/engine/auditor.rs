//! The auditor: decides whether a vector's evidence is enough.
//!
//! Checks run in a fixed order — coverage, freshness, sufficiency — and the
//! result is always one of the three enumerated verdicts. The model grades
//! sufficiency through a constrained JSON reply parsed at the boundary; an
//! unusable reply degrades to accepting the evidence rather than spinning
//! the refinement loop on a formatting problem. Every refined query is
//! guaranteed to differ from the query it refines.

use std::sync::Arc;

use chrono::Datelike;
use serde::Deserialize;

use crate::config::AuditConfig;
use crate::llm::{parse_json_reply, LanguageModel};
use crate::retrieval::{Retriever, ScoredChunk};
use crate::types::{
    AuditVerdict, ConflictNote, ResearchVector, Result, SessionId, SourceId,
};

const AUDIT_SYSTEM: &str = r#"You grade whether gathered evidence answers a research question.

Reply with ONLY a JSON object:

{
    "sufficient": true,
    "reason": "one sentence",
    "refined_query": null,
    "conflicts": [
        {"source_a": "s1", "source_b": "s4", "detail": "what they disagree on"}
    ],
    "outline_conflict": null
}

Rules:
- sufficient=true only if the evidence plausibly answers the question.
- If insufficient, set refined_query to a MORE SPECIFIC search query (add a qualifier, a year, an exact name); it must differ from the attempted query.
- List conflicts only when two cited sources state incompatible facts.
- Set outline_conflict to a short sentence when the evidence contradicts an assumption of the research plan (renamed subject, deprecated product), else null."#;

#[derive(Debug, Deserialize)]
struct GradeReply {
    sufficient: bool,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    refined_query: Option<String>,
    #[serde(default)]
    conflicts: Vec<GradeConflict>,
    #[serde(default)]
    outline_conflict: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GradeConflict {
    source_a: String,
    source_b: String,
    detail: String,
}

/// A verdict plus anything the audit surfaced beyond the vector itself.
#[derive(Debug, Clone)]
pub struct AuditOutcome {
    /// The enumerated verdict.
    pub verdict: AuditVerdict,
    /// Evidence contradicting a planning assumption, if the grader saw one.
    pub outline_conflict: Option<String>,
}

/// Grades vectors against the session's gathered evidence.
pub struct Auditor {
    llm: Arc<dyn LanguageModel>,
    retriever: Arc<Retriever>,
    config: AuditConfig,
}

impl Auditor {
    /// Wire an auditor.
    pub fn new(llm: Arc<dyn LanguageModel>, retriever: Arc<Retriever>, config: AuditConfig) -> Self {
        Self {
            llm,
            retriever,
            config,
        }
    }

    /// Audit one vector. Coverage and freshness are deterministic; only the
    /// sufficiency grade consults the model.
    pub async fn audit(
        &self,
        session_id: SessionId,
        vector: &ResearchVector,
    ) -> Result<AuditOutcome> {
        let evidence = self.retriever.retrieve(session_id, &vector.topic).await?;

        // Coverage
        if evidence.is_empty() {
            tracing::info!(vector = %vector.id, "Audit: no coverage");
            return Ok(AuditOutcome {
                verdict: AuditVerdict::Insufficient {
                    reason: "No evidence in the ledger addresses this topic".to_string(),
                    refined_query: refine_for_specificity(vector),
                },
                outline_conflict: None,
            });
        }

        // Freshness, only for time-sensitive topics. Chunks without a
        // publication hint count as fresh; only positive staleness evidence
        // rejects.
        if vector.time_sensitive {
            let cutoff = chrono::Utc::now().year() - self.config.freshness_window_years;
            let stale_ids: Vec<SourceId> = evidence
                .iter()
                .filter(|c| c.chunk.published_hint.is_some_and(|y| y < cutoff))
                .map(|c| c.chunk.source_id.clone())
                .collect();
            if !stale_ids.is_empty() && stale_ids.len() == evidence.len() {
                tracing::info!(vector = %vector.id, stale = stale_ids.len(), "Audit: all evidence stale");
                return Ok(AuditOutcome {
                    verdict: AuditVerdict::Outdated {
                        stale_source_ids: stale_ids,
                        refined_query: refine_for_recency(vector),
                    },
                    outline_conflict: None,
                });
            }
        }

        // Sufficiency
        let prompt = grade_prompt(vector, &evidence);
        let reply = self.llm.complete(AUDIT_SYSTEM, &prompt).await?;
        let grade = match parse_json_reply::<GradeReply>(&reply) {
            Ok(grade) => grade,
            Err(e) => {
                // Coverage passed; don't spend refinements on a formatting
                // failure of the grader
                tracing::warn!(vector = %vector.id, error = %e, "Unusable grade reply; accepting evidence");
                return Ok(AuditOutcome {
                    verdict: AuditVerdict::Ready { conflicts: vec![] },
                    outline_conflict: None,
                });
            }
        };

        let known: std::collections::HashSet<&str> =
            evidence.iter().map(|c| c.chunk.source_id.0.as_str()).collect();
        let conflicts: Vec<ConflictNote> = grade
            .conflicts
            .into_iter()
            .filter(|c| known.contains(c.source_a.as_str()) && known.contains(c.source_b.as_str()))
            .map(|c| ConflictNote {
                source_a: SourceId(c.source_a),
                source_b: SourceId(c.source_b),
                detail: c.detail,
            })
            .collect();

        let verdict = if grade.sufficient {
            AuditVerdict::Ready { conflicts }
        } else {
            let refined = grade
                .refined_query
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty() && q != vector.current_query())
                .unwrap_or_else(|| refine_for_specificity(vector));
            AuditVerdict::Insufficient {
                reason: if grade.reason.is_empty() {
                    "Evidence graded insufficient".to_string()
                } else {
                    grade.reason
                },
                refined_query: refined,
            }
        };

        Ok(AuditOutcome {
            verdict,
            outline_conflict: grade
                .outline_conflict
                .filter(|c| !c.trim().is_empty()),
        })
    }
}

fn grade_prompt(vector: &ResearchVector, evidence: &[ScoredChunk]) -> String {
    let mut sources = String::new();
    for scored in evidence {
        let excerpt: String = scored.chunk.content.chars().take(500).collect();
        sources.push_str(&format!(
            "[{}] ({})\n{}\n\n",
            scored.chunk.source_id, scored.chunk.url, excerpt
        ));
    }
    format!(
        "Research question: {}\nAttempted query: {}\n\nEvidence:\n{}",
        vector.topic,
        vector.current_query(),
        sources
    )
}

/// Heuristic refinement when the model offers none: append the first topic
/// qualifier the query lacks. Never returns the input query unchanged.
fn refine_for_specificity(vector: &ResearchVector) -> String {
    let base = vector.current_query();
    let base_lower = base.to_lowercase();
    let qualifier = vector
        .topic
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .find(|w| w.len() > 2 && !base_lower.contains(w.as_str()));

    match qualifier {
        Some(q) => format!("{} {}", base, q),
        None => format!("{} details", base),
    }
}

/// Recency-biased refinement for stale evidence.
fn refine_for_recency(vector: &ResearchVector) -> String {
    let base = vector.current_query();
    let year = chrono::Utc::now().year().to_string();
    if base.contains(&year) {
        format!("{} latest", base)
    } else {
        format!("{} {}", base, year)
    }
}
