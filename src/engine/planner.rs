//! The planner: question decomposition and mid-run revision.
//!
//! `plan` runs a small terminology pre-search, then asks the model for a
//! strict-JSON outline decomposed into atomic research vectors. `replan`
//! revises the outline when gathered evidence contradicts a planning
//! assumption, preserving everything already verified. Model replies are
//! parsed at the boundary — a malformed reply is retried once with the
//! parse error attached, then degraded to a single-vector plan built from
//! the raw query. The outline is never empty.

use std::sync::Arc;

use serde::Deserialize;

use crate::collab::SearchProvider;
use crate::config::PlannerConfig;
use crate::llm::{parse_json_reply, LanguageModel};
use crate::types::{
    AppError, ResearchSession, ResearchVector, Result, VectorId, VectorStatus,
};

const PLAN_SYSTEM: &str = r#"You are a research planner. Decompose the user's question into a report outline and a set of atomic research vectors.

Reply with ONLY a JSON object of this shape:

{
    "outline": ["Section title", ...],
    "vectors": [
        {
            "topic": "one independently verifiable sub-question",
            "section": "the outline section it belongs to",
            "queries": ["broad query", "more specific query"],
            "time_sensitive": false
        }
    ]
}

Rules:
- 2 to 6 sections, at least one vector per section.
- Each vector carries 1-3 search queries ordered from broad to specific.
- Set time_sensitive true for topics where stale sources mislead (prices, versions, rankings, current events).
- Use terminology from the search context when it corrects the question's wording."#;

const REPLAN_SYSTEM: &str = r#"You are revising a research outline mid-run because new evidence contradicts a planning assumption.

Reply with ONLY a JSON object of the same shape as a plan:

{
    "outline": ["Section title", ...],
    "vectors": [
        {"topic": "...", "section": "...", "queries": ["..."], "time_sensitive": false}
    ]
}

Rules:
- Keep every section listed as verified exactly as titled; do not emit new vectors for them.
- You may add, remove, or retitle the remaining sections.
- Emit vectors only for sections that still need evidence."#;

#[derive(Debug, Deserialize)]
struct PlanReply {
    #[serde(default)]
    outline: Vec<String>,
    #[serde(default)]
    vectors: Vec<PlanVector>,
}

#[derive(Debug, Deserialize)]
struct PlanVector {
    topic: String,
    #[serde(default)]
    section: String,
    #[serde(default)]
    queries: Vec<String>,
    #[serde(default)]
    time_sensitive: bool,
}

/// A produced or revised plan, ready to apply to a session.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    /// Ordered section titles.
    pub outline: Vec<String>,
    /// Vectors to (re)install; on replan this excludes preserved ones.
    pub vectors: Vec<ResearchVector>,
    /// True when the plan was produced without pre-search context or from
    /// the degraded fallback.
    pub degraded: bool,
}

/// Produces and revises research plans.
pub struct Planner {
    llm: Arc<dyn LanguageModel>,
    search: Arc<dyn SearchProvider>,
    config: PlannerConfig,
}

impl Planner {
    /// Wire a planner.
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        search: Arc<dyn SearchProvider>,
        config: PlannerConfig,
    ) -> Self {
        Self {
            llm,
            search,
            config,
        }
    }

    /// Decompose a user query into an outline and research vectors.
    pub async fn plan(&self, user_query: &str) -> Result<PlanOutcome> {
        // Lightweight pre-search, purely to normalize terminology
        let context = match self
            .search
            .search(user_query, self.config.presearch_results)
            .await
        {
            Ok(hits) if !hits.is_empty() => hits
                .iter()
                .map(|h| format!("- {}: {}", h.title, h.snippet))
                .collect::<Vec<_>>()
                .join("\n"),
            Ok(_) => {
                tracing::warn!("Pre-search returned no results; planning from query text alone");
                String::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Pre-search failed; planning from query text alone");
                String::new()
            }
        };
        let degraded = context.is_empty();

        let prompt = if degraded {
            format!("Research question: {}", user_query)
        } else {
            format!(
                "Research question: {}\n\nSearch context (terminology only, not evidence):\n{}",
                user_query, context
            )
        };

        let reply = match self.complete_plan(PLAN_SYSTEM, &prompt).await? {
            Some(reply) => reply,
            None => {
                tracing::warn!("Planner reply unusable twice; using fallback plan");
                return Ok(self.fallback_plan(user_query));
            }
        };

        let outcome = self.materialize(reply, 0, degraded);
        if outcome.outline.is_empty() || outcome.vectors.is_empty() {
            tracing::warn!("Planner produced an empty plan; using fallback plan");
            return Ok(self.fallback_plan(user_query));
        }
        Ok(outcome)
    }

    /// Revise the outline after evidence contradicted a planning assumption.
    ///
    /// Verified vectors and their sections are preserved untouched; the
    /// returned outcome's `vectors` are only the new ones to install next to
    /// them. A twice-unusable model reply yields a no-op revision.
    pub async fn replan(
        &self,
        session: &ResearchSession,
        evidence_summary: &str,
    ) -> Result<PlanOutcome> {
        let verified: Vec<&ResearchVector> = session
            .vectors
            .values()
            .filter(|v| v.status == VectorStatus::Verified)
            .collect();
        let verified_sections: Vec<String> = {
            let mut seen = Vec::new();
            for v in &verified {
                if !seen.contains(&v.section) {
                    seen.push(v.section.clone());
                }
            }
            seen
        };

        let prompt = format!(
            "Original question: {}\n\nCurrent outline:\n{}\n\nVerified sections (keep exactly, no new vectors):\n{}\n\nEvidence contradicting the plan:\n{}",
            session.user_query,
            session
                .outline
                .iter()
                .map(|s| format!("- {}", s))
                .collect::<Vec<_>>()
                .join("\n"),
            if verified_sections.is_empty() {
                "(none)".to_string()
            } else {
                verified_sections
                    .iter()
                    .map(|s| format!("- {}", s))
                    .collect::<Vec<_>>()
                    .join("\n")
            },
            evidence_summary
        );

        let Some(reply) = self.complete_plan(REPLAN_SYSTEM, &prompt).await? else {
            tracing::warn!("Replan reply unusable twice; keeping current outline");
            return Ok(PlanOutcome {
                outline: session.outline.clone(),
                vectors: Vec::new(),
                degraded: true,
            });
        };

        let next_id = next_vector_number(session);
        let mut outcome = self.materialize(reply, next_id, false);

        // Preserved sections stay in the outline even if the model dropped
        // them, in their original order
        let model_outline = std::mem::take(&mut outcome.outline);
        let mut outline = Vec::new();
        for section in &session.outline {
            if verified_sections.contains(section) {
                outline.push(section.clone());
            }
        }
        for section in model_outline {
            if !outline.contains(&section) {
                outline.push(section);
            }
        }
        if outline.is_empty() {
            outline = session.outline.clone();
        }
        outcome.outline = outline;

        // Never emit replacement vectors for verified sections
        outcome
            .vectors
            .retain(|v| !verified_sections.contains(&v.section));

        Ok(outcome)
    }

    /// Ask for a plan, retrying once with parse feedback. `Ok(None)` means
    /// the reply was unusable twice; transport errors propagate as fatal.
    async fn complete_plan(&self, system: &str, prompt: &str) -> Result<Option<PlanReply>> {
        let reply = self.llm.complete(system, prompt).await?;
        match parse_json_reply::<PlanReply>(&reply) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(first_err) => {
                let retry_prompt = format!(
                    "{}\n\nYour previous reply could not be used ({}). Reply with only the JSON object.",
                    prompt, first_err
                );
                let retry = self.llm.complete(system, &retry_prompt).await?;
                match parse_json_reply::<PlanReply>(&retry) {
                    Ok(parsed) => Ok(Some(parsed)),
                    Err(_) => Ok(None),
                }
            }
        }
    }

    fn materialize(&self, reply: PlanReply, id_offset: usize, degraded: bool) -> PlanOutcome {
        let outline: Vec<String> = reply
            .outline
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let vectors = reply
            .vectors
            .into_iter()
            .filter(|v| !v.topic.trim().is_empty())
            .take(self.config.max_vectors)
            .enumerate()
            .map(|(i, v)| {
                let section = if outline.contains(&v.section) {
                    v.section
                } else {
                    // Orphan vectors land in the first section
                    outline.first().cloned().unwrap_or_default()
                };
                let mut queries: Vec<String> = v
                    .queries
                    .into_iter()
                    .map(|q| q.trim().to_string())
                    .filter(|q| !q.is_empty())
                    .collect();
                queries.truncate(3);
                if queries.is_empty() {
                    queries.push(v.topic.clone());
                }
                ResearchVector {
                    id: VectorId(format!("v{}", id_offset + i + 1)),
                    topic: v.topic,
                    section,
                    search_queries: queries,
                    status: VectorStatus::Pending,
                    refinement_count: 0,
                    time_sensitive: v.time_sensitive,
                    conflicts: Vec::new(),
                }
            })
            .collect();

        PlanOutcome {
            outline,
            vectors,
            degraded,
        }
    }

    /// Minimal plan used when the model cannot produce a usable one; keeps
    /// the session moving rather than failing planning outright.
    fn fallback_plan(&self, user_query: &str) -> PlanOutcome {
        let section = "Findings".to_string();
        PlanOutcome {
            outline: vec![section.clone()],
            vectors: vec![ResearchVector {
                id: VectorId("v1".to_string()),
                topic: user_query.to_string(),
                section,
                search_queries: vec![user_query.to_string()],
                status: VectorStatus::Pending,
                refinement_count: 0,
                time_sensitive: false,
                conflicts: Vec::new(),
            }],
            degraded: true,
        }
    }
}

/// Highest numeric vector id in the session, for continuing the sequence.
fn next_vector_number(session: &ResearchSession) -> usize {
    session
        .vectors
        .keys()
        .filter_map(|id| id.0.strip_prefix('v'))
        .filter_map(|n| n.parse::<usize>().ok())
        .max()
        .unwrap_or(0)
}

/// Validation error helper shared by engine callers.
pub(crate) fn ensure_query_not_empty(user_query: &str) -> Result<()> {
    if user_query.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "Research question must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedLlm {
        replies: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().map(String::from).collect()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| AppError::Llm("script exhausted".to_string()))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    struct NoSearch;

    #[async_trait]
    impl SearchProvider for NoSearch {
        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<crate::types::SearchHit>> {
            Ok(Vec::new())
        }
    }

    fn planner(replies: Vec<&str>) -> Planner {
        Planner::new(
            Arc::new(ScriptedLlm::new(replies)),
            Arc::new(NoSearch),
            PlannerConfig::default(),
        )
    }

    const GOOD_PLAN: &str = r#"{
        "outline": ["Background", "Pricing"],
        "vectors": [
            {"topic": "What is Model X", "section": "Background", "queries": ["Model X overview"]},
            {"topic": "Model X price", "section": "Pricing", "queries": ["Model X price"], "time_sensitive": true}
        ]
    }"#;

    #[tokio::test]
    async fn test_plan_materializes_vectors() {
        let outcome = planner(vec![GOOD_PLAN]).plan("Tell me about Model X").await.unwrap();

        assert_eq!(outcome.outline, vec!["Background", "Pricing"]);
        assert_eq!(outcome.vectors.len(), 2);
        assert_eq!(outcome.vectors[0].id, VectorId("v1".to_string()));
        assert_eq!(outcome.vectors[1].id, VectorId("v2".to_string()));
        assert!(outcome.vectors[1].time_sensitive);
        // Pre-search was empty, so the plan is degraded but present
        assert!(outcome.degraded);
    }

    #[tokio::test]
    async fn test_plan_retries_then_falls_back() {
        let outcome = planner(vec!["not json", "still not json"])
            .plan("anything at all")
            .await
            .unwrap();

        assert_eq!(outcome.outline.len(), 1);
        assert_eq!(outcome.vectors.len(), 1);
        assert_eq!(outcome.vectors[0].topic, "anything at all");
        assert!(outcome.degraded);
    }

    #[tokio::test]
    async fn test_plan_recovers_on_retry() {
        let outcome = planner(vec!["garbage", GOOD_PLAN])
            .plan("Tell me about Model X")
            .await
            .unwrap();
        assert_eq!(outcome.vectors.len(), 2);
    }

    #[tokio::test]
    async fn test_orphan_vector_lands_in_first_section() {
        let reply = r#"{
            "outline": ["Only Section"],
            "vectors": [{"topic": "stray", "section": "Nonexistent", "queries": ["q"]}]
        }"#;
        let outcome = planner(vec![reply]).plan("q").await.unwrap();
        assert_eq!(outcome.vectors[0].section, "Only Section");
    }

    #[tokio::test]
    async fn test_replan_preserves_verified_sections() {
        let mut session = ResearchSession::new("Library Y v2 API");
        session.outline = vec!["Basics".to_string(), "Library Y v2 API".to_string()];
        session.vectors.insert(
            VectorId("v1".to_string()),
            ResearchVector {
                id: VectorId("v1".to_string()),
                topic: "Y basics".to_string(),
                section: "Basics".to_string(),
                search_queries: vec!["Y basics".to_string()],
                status: VectorStatus::Verified,
                refinement_count: 0,
                time_sensitive: false,
                conflicts: Vec::new(),
            },
        );
        session.vectors.insert(
            VectorId("v2".to_string()),
            ResearchVector {
                id: VectorId("v2".to_string()),
                topic: "Y v2 API".to_string(),
                section: "Library Y v2 API".to_string(),
                search_queries: vec!["Y v2 API".to_string()],
                status: VectorStatus::Pending,
                refinement_count: 1,
                time_sensitive: false,
                conflicts: Vec::new(),
            },
        );

        let reply = r#"{
            "outline": ["Z (formerly Library Y) API"],
            "vectors": [{"topic": "Z API surface", "section": "Z (formerly Library Y) API", "queries": ["Z API"]}]
        }"#;
        let outcome = planner(vec![reply])
            .replan(&session, "Library Y v2 was renamed to Z")
            .await
            .unwrap();

        // Verified section survives, renamed section appended
        assert_eq!(
            outcome.outline,
            vec!["Basics".to_string(), "Z (formerly Library Y) API".to_string()]
        );
        // New vector ids continue the sequence
        assert_eq!(outcome.vectors.len(), 1);
        assert_eq!(outcome.vectors[0].id, VectorId("v3".to_string()));
    }

    #[tokio::test]
    async fn test_replan_unusable_reply_is_noop() {
        let mut session = ResearchSession::new("q");
        session.outline = vec!["A".to_string()];

        let outcome = planner(vec!["nope", "still nope"])
            .replan(&session, "contradiction")
            .await
            .unwrap();
        assert_eq!(outcome.outline, vec!["A".to_string()]);
        assert!(outcome.vectors.is_empty());
    }
}
