//! The orchestration state machine.
//!
//! Sequences planner -> executor -> auditor -> writer for a session.
//! Per-vector work fans out through a `JoinSet` bounded by a semaphore;
//! execute and audit stay strictly sequential within one vector. Replanning
//! only happens between rounds, after the join set has drained, so no
//! acquisition is ever in flight against a vector the replan removes. A
//! hard cycle counter enforces the `|vectors| * (max_refinements + 1)`
//! termination bound independently of verdict behavior.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::collab::{DaedraFetcher, DaedraSearch, PageFetcher, SearchProvider};
use crate::config::EngineConfig;
use crate::engine::auditor::{AuditOutcome, Auditor};
use crate::engine::executor::Executor;
use crate::engine::planner::{ensure_query_not_empty, PlanOutcome, Planner};
use crate::engine::session::SessionStore;
use crate::engine::writer::Writer;
use crate::ingest::StructuralParser;
use crate::ledger::EvidenceLedger;
use crate::llm::{LanguageModel, OpenAiCompatClient};
use crate::retrieval::{EvidenceIndex, MemoryIndex, Retriever};
use crate::types::{
    AppError, AuditVerdict, ReportState, ResearchVector, Result, SessionId, SessionPhase,
    SessionStatus, VectorId, VectorStatus,
};

/// External collaborators the engine is wired with.
pub struct Collaborators {
    /// Language-model endpoint.
    pub llm: Arc<dyn LanguageModel>,
    /// Web search provider.
    pub search: Arc<dyn SearchProvider>,
    /// Page fetcher.
    pub fetcher: Arc<dyn PageFetcher>,
    /// Document-structure parser.
    pub parser: Arc<dyn crate::ingest::DocumentParser>,
    /// Evidence index backing retrieval fusion.
    pub index: Arc<dyn EvidenceIndex>,
}

/// The research orchestration engine.
///
/// Owns the session store, the evidence ledger, and the pipeline
/// components; everything is keyed by session id and safe to share behind
/// an `Arc`.
pub struct ResearchEngine {
    config: EngineConfig,
    planner: Planner,
    executor: Arc<Executor>,
    auditor: Arc<Auditor>,
    writer: Writer,
    ledger: Arc<EvidenceLedger>,
    sessions: SessionStore,
}

enum TaskOutput {
    Done {
        vector_id: VectorId,
        audit: AuditOutcome,
    },
    Skipped {
        vector_id: VectorId,
    },
    Fatal(AppError),
}

impl ResearchEngine {
    /// Wire an engine from config and explicit collaborators.
    pub fn new(config: EngineConfig, collab: Collaborators) -> Self {
        let ledger = Arc::new(EvidenceLedger::new());
        let retriever = Arc::new(Retriever::new(
            Arc::clone(&collab.index),
            Arc::clone(&ledger),
            &config.retrieval,
        ));

        let planner = Planner::new(
            Arc::clone(&collab.llm),
            Arc::clone(&collab.search),
            config.planner.clone(),
        );
        let executor = Arc::new(Executor::new(
            Arc::clone(&collab.search),
            Arc::clone(&collab.fetcher),
            Arc::clone(&collab.parser),
            Arc::clone(&ledger),
            Arc::clone(&collab.index),
            config.acquisition.clone(),
        ));
        let auditor = Arc::new(Auditor::new(
            Arc::clone(&collab.llm),
            Arc::clone(&retriever),
            config.audit.clone(),
        ));
        let writer = Writer::new(collab.llm, retriever, Arc::clone(&ledger));

        Self {
            config,
            planner,
            executor,
            auditor,
            writer,
            ledger,
            sessions: SessionStore::new(),
        }
    }

    /// Wire an engine with the default collaborators: an OpenAI-compatible
    /// model client, daedra search and fetch, the structural parser, and
    /// the in-memory evidence index.
    pub fn with_defaults(config: EngineConfig) -> Self {
        let collab = Collaborators {
            llm: Arc::new(OpenAiCompatClient::from_config(&config.llm)),
            search: Arc::new(DaedraSearch::new()),
            fetcher: Arc::new(DaedraFetcher::new()),
            parser: Arc::new(StructuralParser::from_config(&config.parser)),
            index: Arc::new(MemoryIndex::new()),
        };
        Self::new(config, collab)
    }

    /// The evidence ledger backing this engine.
    pub fn ledger(&self) -> &Arc<EvidenceLedger> {
        &self.ledger
    }

    // ============= Exposed API =============

    /// Start a session in the background and return its id immediately.
    /// Poll with [`get_session_status`](Self::get_session_status) and
    /// [`get_report`](Self::get_report).
    pub fn start_session(self: &Arc<Self>, user_query: &str) -> Result<SessionId> {
        ensure_query_not_empty(user_query)?;
        let session_id = self.sessions.create(user_query);
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.run_session(session_id).await {
                tracing::error!(session = %session_id, error = %e, "Session failed");
            }
        });
        Ok(session_id)
    }

    /// Run a session to completion. Used by embedders and the CLI; the
    /// spawned path of [`start_session`](Self::start_session) ends up here
    /// too.
    pub async fn run_session(&self, session_id: SessionId) -> Result<()> {
        match self.run_inner(session_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self
                    .sessions
                    .set_phase(session_id, SessionPhase::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Create a session without running it. Callers drive it with
    /// [`run_session`](Self::run_session).
    pub fn create_session(&self, user_query: &str) -> Result<SessionId> {
        ensure_query_not_empty(user_query)?;
        Ok(self.sessions.create(user_query))
    }

    /// Outline, vector statuses, and refinement counts for a session.
    pub fn get_session_status(&self, session_id: SessionId) -> Result<SessionStatus> {
        self.sessions.status(session_id)
    }

    /// The finished report, or `NotReady`.
    pub fn get_report(&self, session_id: SessionId) -> Result<ReportState> {
        self.sessions.report(session_id)
    }

    /// Stop issuing new acquisition work for a session. In-flight fetches
    /// complete or time out naturally.
    pub fn cancel_session(&self, session_id: SessionId) -> Result<()> {
        self.sessions.cancel(session_id)
    }

    // ============= Control loop =============

    async fn run_inner(&self, session_id: SessionId) -> Result<()> {
        let cancel = self.sessions.cancel_token(session_id)?;
        let max_refinements = self.config.orchestrator.max_refinements;

        // Plan
        self.sessions.set_phase(session_id, SessionPhase::Planning)?;
        let user_query = self.sessions.snapshot(session_id)?.user_query;
        let plan = self.planner.plan(&user_query).await?;
        tracing::info!(
            session = %session_id,
            sections = plan.outline.len(),
            vectors = plan.vectors.len(),
            degraded = plan.degraded,
            "Plan ready"
        );
        self.sessions.with_session_mut(session_id, |s| {
            s.outline = plan.outline.clone();
            s.vectors = plan
                .vectors
                .iter()
                .cloned()
                .map(|v| (v.id.clone(), v))
                .collect();
        })?;

        // Acquire until every vector is terminal
        self.sessions.set_phase(session_id, SessionPhase::Acquiring)?;
        let mut audits_done = 0usize;
        let mut replans_done = 0usize;

        loop {
            if cancel.is_cancelled() {
                self.sessions.set_phase(session_id, SessionPhase::Cancelled)?;
                tracing::info!(session = %session_id, "Session cancelled");
                return Ok(());
            }

            let snapshot = self.sessions.snapshot(session_id)?;
            let eligible: Vec<ResearchVector> = snapshot
                .vectors
                .values()
                .filter(|v| v.status == VectorStatus::Pending)
                .cloned()
                .collect();
            if eligible.is_empty() {
                break;
            }

            // Hard backstop for the termination bound; refinement counting
            // makes this unreachable in practice
            let bound = snapshot.vectors.len() * (max_refinements as usize + 1);
            if audits_done >= bound {
                tracing::warn!(
                    session = %session_id,
                    audits_done,
                    bound,
                    "Audit-cycle bound hit; exhausting remaining vectors"
                );
                self.sessions.with_session_mut(session_id, |s| {
                    for v in s.vectors.values_mut() {
                        if !v.status.is_terminal() {
                            v.status = VectorStatus::Exhausted;
                        }
                    }
                })?;
                break;
            }

            let outline_conflicts = self.run_round(session_id, eligible, &mut audits_done).await?;

            // Replan barrier: the round's join set has fully drained here
            if let Some(summary) = outline_conflicts.first() {
                if replans_done < self.config.orchestrator.max_replans && !cancel.is_cancelled() {
                    replans_done += 1;
                    let snapshot = self.sessions.snapshot(session_id)?;
                    match self.planner.replan(&snapshot, summary).await {
                        Ok(outcome) => self.apply_replan(session_id, outcome)?,
                        Err(e) => {
                            tracing::warn!(session = %session_id, error = %e, "Replan failed; keeping outline")
                        }
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            self.sessions.set_phase(session_id, SessionPhase::Cancelled)?;
            return Ok(());
        }

        // Write
        self.sessions.set_phase(session_id, SessionPhase::Writing)?;
        let snapshot = self.sessions.snapshot(session_id)?;
        let report = self.writer.write(&snapshot).await?;
        self.sessions.set_report(session_id, report)?;
        tracing::info!(session = %session_id, "Session complete");
        Ok(())
    }

    /// Fan one round of eligible vectors out through a bounded join set and
    /// apply every audit as it lands. Returns outline conflicts the
    /// auditors surfaced.
    async fn run_round(
        &self,
        session_id: SessionId,
        eligible: Vec<ResearchVector>,
        audits_done: &mut usize,
    ) -> Result<Vec<String>> {
        let cancel = self.sessions.cancel_token(session_id)?;
        self.sessions.with_session_mut(session_id, |s| {
            for vector in &eligible {
                if let Some(v) = s.vectors.get_mut(&vector.id) {
                    v.status = VectorStatus::Ingesting;
                }
            }
        })?;

        let semaphore = Arc::new(Semaphore::new(self.config.orchestrator.worker_count.max(1)));
        let mut join: JoinSet<TaskOutput> = JoinSet::new();

        for vector in eligible {
            let semaphore = Arc::clone(&semaphore);
            let executor = Arc::clone(&self.executor);
            let auditor = Arc::clone(&self.auditor);
            let cancel = cancel.clone();

            join.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return TaskOutput::Skipped {
                            vector_id: vector.id,
                        }
                    }
                };
                // Cancellation stops new work here; anything already past
                // this point runs to completion
                if cancel.is_cancelled() {
                    return TaskOutput::Skipped {
                        vector_id: vector.id,
                    };
                }

                let report = match executor.execute(session_id, &vector).await {
                    Ok(report) => report,
                    Err(e) => return TaskOutput::Fatal(e),
                };
                tracing::debug!(
                    vector = %vector.id,
                    ingested = report.ingested_chunks(),
                    "Execute finished; auditing"
                );

                // Audit strictly after execute: it must see this pass's
                // ledger writes
                match auditor.audit(session_id, &vector).await {
                    Ok(audit) => TaskOutput::Done {
                        vector_id: vector.id,
                        audit,
                    },
                    Err(e) => TaskOutput::Fatal(e),
                }
            });
        }

        let mut outline_conflicts = Vec::new();
        let mut fatal: Option<AppError> = None;

        while let Some(joined) = join.join_next().await {
            match joined {
                Err(e) => {
                    fatal.get_or_insert(AppError::Internal(format!("Worker task failed: {}", e)));
                }
                Ok(TaskOutput::Fatal(e)) => {
                    fatal.get_or_insert(e);
                }
                Ok(TaskOutput::Skipped { vector_id }) => {
                    self.sessions.with_session_mut(session_id, |s| {
                        if let Some(v) = s.vectors.get_mut(&vector_id) {
                            if v.status == VectorStatus::Ingesting {
                                v.status = VectorStatus::Pending;
                            }
                        }
                    })?;
                }
                Ok(TaskOutput::Done { vector_id, audit }) => {
                    *audits_done += 1;
                    if let Some(conflict) = &audit.outline_conflict {
                        outline_conflicts.push(conflict.clone());
                    }
                    self.apply_audit(session_id, &vector_id, audit)?;
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(outline_conflicts),
        }
    }

    /// Advance one vector's state machine from an audit outcome.
    fn apply_audit(
        &self,
        session_id: SessionId,
        vector_id: &VectorId,
        audit: AuditOutcome,
    ) -> Result<()> {
        let max_refinements = self.config.orchestrator.max_refinements;
        self.sessions.with_session_mut(session_id, |s| {
            let Some(vector) = s.vectors.get_mut(vector_id) else {
                return;
            };
            match audit.verdict {
                AuditVerdict::Ready { conflicts } => {
                    vector.status = VectorStatus::Verified;
                    vector.conflicts = conflicts;
                    tracing::info!(vector = %vector_id, "Vector verified");
                }
                AuditVerdict::Insufficient { reason, refined_query } => {
                    refine_or_exhaust(vector, refined_query, max_refinements);
                    tracing::info!(
                        vector = %vector_id,
                        status = %vector.status,
                        reason = %reason,
                        "Vector insufficient"
                    );
                }
                AuditVerdict::Outdated {
                    stale_source_ids,
                    refined_query,
                } => {
                    refine_or_exhaust(vector, refined_query, max_refinements);
                    tracing::info!(
                        vector = %vector_id,
                        status = %vector.status,
                        stale = stale_source_ids.len(),
                        "Vector evidence outdated"
                    );
                }
            }
        })
    }

    /// Replace outline and non-verified vectors per a replan outcome.
    fn apply_replan(&self, session_id: SessionId, outcome: PlanOutcome) -> Result<()> {
        self.sessions.with_session_mut(session_id, |s| {
            tracing::info!(
                session = %session_id,
                sections = outcome.outline.len(),
                new_vectors = outcome.vectors.len(),
                "Applying revised outline"
            );
            s.outline = outcome.outline.clone();
            // Drop vectors whose section the revision removed, except
            // verified ones: those are preserved by contract
            s.vectors.retain(|_, v| {
                v.status == VectorStatus::Verified || outcome.outline.contains(&v.section)
            });
            for vector in outcome.vectors.iter().cloned() {
                s.vectors.insert(vector.id.clone(), vector);
            }
        })
    }
}

/// Refine once more or exhaust when the bound is spent.
fn refine_or_exhaust(vector: &mut ResearchVector, refined_query: String, max_refinements: u8) {
    if vector.refinement_count >= max_refinements {
        vector.status = VectorStatus::Exhausted;
        return;
    }
    let refined = if refined_query.trim().is_empty() || refined_query == vector.current_query() {
        // Never retry the identical query
        format!("{} details", vector.current_query())
    } else {
        refined_query
    };
    vector.search_queries.push(refined);
    vector.refinement_count += 1;
    vector.status = VectorStatus::Pending;
}
