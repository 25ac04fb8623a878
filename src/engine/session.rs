//! Session bookkeeping.
//!
//! An explicit, handle-passed store — no ambient global registry. The store
//! owns each session's state, its run phase, and its cancellation token;
//! orchestration mutates sessions only through it, and a session becomes
//! immutable once its report is set.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::types::{
    AppError, ReportState, ResearchSession, Result, SessionId, SessionPhase, SessionStatus,
    VectorStatusEntry,
};

struct SessionEntry {
    session: ResearchSession,
    phase: SessionPhase,
    cancel: CancellationToken,
}

/// Shared handle to all in-flight and finished sessions.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<SessionId, SessionEntry>>>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session for a user query and return its id.
    pub fn create(&self, user_query: &str) -> SessionId {
        let session = ResearchSession::new(user_query);
        let session_id = session.session_id;
        self.inner.write().insert(
            session_id,
            SessionEntry {
                session,
                phase: SessionPhase::Planning,
                cancel: CancellationToken::new(),
            },
        );
        tracing::info!(session = %session_id, "Session created");
        session_id
    }

    /// Status snapshot: outline, vector statuses, refinement counts.
    pub fn status(&self, session_id: SessionId) -> Result<SessionStatus> {
        let inner = self.inner.read();
        let entry = get(&inner, session_id)?;
        Ok(SessionStatus {
            session_id,
            phase: entry.phase.clone(),
            outline: entry.session.outline.clone(),
            vectors: entry
                .session
                .vectors
                .values()
                .map(|v| VectorStatusEntry {
                    id: v.id.clone(),
                    topic: v.topic.clone(),
                    section: v.section.clone(),
                    status: v.status,
                    refinement_count: v.refinement_count,
                })
                .collect(),
        })
    }

    /// The finished report, or `NotReady` while the session is running.
    pub fn report(&self, session_id: SessionId) -> Result<ReportState> {
        let inner = self.inner.read();
        let entry = get(&inner, session_id)?;
        match (&entry.phase, &entry.session.final_report) {
            (SessionPhase::Complete, Some(report)) => Ok(ReportState::Ready {
                report: report.clone(),
            }),
            _ => Ok(ReportState::NotReady),
        }
    }

    /// Request cancellation: no new acquisition work will be issued;
    /// in-flight fetches finish naturally.
    pub fn cancel(&self, session_id: SessionId) -> Result<()> {
        let inner = self.inner.read();
        let entry = get(&inner, session_id)?;
        entry.cancel.cancel();
        tracing::info!(session = %session_id, "Session cancellation requested");
        Ok(())
    }

    pub(crate) fn cancel_token(&self, session_id: SessionId) -> Result<CancellationToken> {
        let inner = self.inner.read();
        Ok(get(&inner, session_id)?.cancel.clone())
    }

    pub(crate) fn snapshot(&self, session_id: SessionId) -> Result<ResearchSession> {
        let inner = self.inner.read();
        Ok(get(&inner, session_id)?.session.clone())
    }

    pub(crate) fn set_phase(&self, session_id: SessionId, phase: SessionPhase) -> Result<()> {
        let mut inner = self.inner.write();
        get_mut(&mut inner, session_id)?.phase = phase;
        Ok(())
    }

    /// Mutate a running session. Refused once the report is set.
    pub(crate) fn with_session_mut<R>(
        &self,
        session_id: SessionId,
        f: impl FnOnce(&mut ResearchSession) -> R,
    ) -> Result<R> {
        let mut inner = self.inner.write();
        let entry = get_mut(&mut inner, session_id)?;
        if entry.session.final_report.is_some() {
            return Err(AppError::Internal(format!(
                "Session {} is immutable: report already set",
                session_id
            )));
        }
        Ok(f(&mut entry.session))
    }

    /// Set the final report and seal the session.
    pub(crate) fn set_report(&self, session_id: SessionId, report: String) -> Result<()> {
        let mut inner = self.inner.write();
        let entry = get_mut(&mut inner, session_id)?;
        if entry.session.final_report.is_some() {
            return Err(AppError::Internal(format!(
                "Session {} already has a report",
                session_id
            )));
        }
        entry.session.final_report = Some(report);
        entry.phase = SessionPhase::Complete;
        Ok(())
    }
}

fn get(
    inner: &HashMap<SessionId, SessionEntry>,
    session_id: SessionId,
) -> Result<&SessionEntry> {
    inner
        .get(&session_id)
        .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))
}

fn get_mut(
    inner: &mut HashMap<SessionId, SessionEntry>,
    session_id: SessionId,
) -> Result<&mut SessionEntry> {
    inner
        .get_mut(&session_id)
        .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_status() {
        let store = SessionStore::new();
        let id = store.create("what is rust");

        let status = store.status(id).unwrap();
        assert_eq!(status.phase, SessionPhase::Planning);
        assert!(status.outline.is_empty());
        assert!(status.vectors.is_empty());
    }

    #[test]
    fn test_unknown_session_errors() {
        let store = SessionStore::new();
        let missing = SessionId::new();
        assert!(matches!(
            store.status(missing),
            Err(AppError::SessionNotFound(_))
        ));
        assert!(store.report(missing).is_err());
        assert!(store.cancel(missing).is_err());
    }

    #[test]
    fn test_report_not_ready_until_complete() {
        let store = SessionStore::new();
        let id = store.create("q");
        assert_eq!(store.report(id).unwrap(), ReportState::NotReady);

        store.set_report(id, "# done".to_string()).unwrap();
        assert_eq!(
            store.report(id).unwrap(),
            ReportState::Ready {
                report: "# done".to_string()
            }
        );
    }

    #[test]
    fn test_session_immutable_after_report() {
        let store = SessionStore::new();
        let id = store.create("q");
        store.set_report(id, "report".to_string()).unwrap();

        assert!(store.with_session_mut(id, |_| ()).is_err());
        assert!(store.set_report(id, "again".to_string()).is_err());
    }

    #[test]
    fn test_cancel_flips_token() {
        let store = SessionStore::new();
        let id = store.create("q");
        let token = store.cancel_token(id).unwrap();
        assert!(!token.is_cancelled());

        store.cancel(id).unwrap();
        assert!(token.is_cancelled());
    }
}
