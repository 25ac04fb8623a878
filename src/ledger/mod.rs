//! The evidence ledger: append-only, session-scoped ground truth.
//!
//! Every chunk the writer is allowed to cite lives here. The ledger is the
//! single writer of provenance metadata: it mints `source_id`s, stamps
//! nothing retroactively, and deduplicates re-ingested content by
//! `(url, sha256(content))`. Chunks are never mutated or removed within a
//! session; concurrent acquisition loops may append freely.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::types::{
    AppError, EvidenceChunk, ParsedChunk, Result, SessionId, SourceId, VectorId,
};

/// Outcome of one append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Id of the stored (or previously stored) chunk.
    pub source_id: SourceId,
    /// True when the content was already present and no new chunk was minted.
    pub deduplicated: bool,
}

#[derive(Default)]
struct SessionLedger {
    chunks: BTreeMap<SourceId, EvidenceChunk>,
    // (url, content-hash) -> existing source id
    seen: HashMap<(String, [u8; 32]), SourceId>,
    next_id: u32,
}

impl SessionLedger {
    fn mint_id(&mut self) -> SourceId {
        self.next_id += 1;
        SourceId(format!("s{}", self.next_id))
    }
}

/// Session-scoped evidence store. Cheap to share behind an `Arc`.
#[derive(Default)]
pub struct EvidenceLedger {
    sessions: RwLock<HashMap<SessionId, SessionLedger>>,
}

impl EvidenceLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parsed chunk for a session, deduplicating by
    /// `(url, sha256(text))`. Rejects chunks with missing provenance.
    pub fn append(
        &self,
        session_id: SessionId,
        url: &str,
        vector_id: Option<VectorId>,
        chunk: ParsedChunk,
        retrieved_at: DateTime<Utc>,
    ) -> Result<AppendOutcome> {
        if url.trim().is_empty() {
            return Err(AppError::Ledger(
                "Rejected chunk without a source URL".to_string(),
            ));
        }
        if chunk.text.trim().is_empty() {
            return Err(AppError::Ledger(format!(
                "Rejected empty chunk from {}",
                url
            )));
        }

        let digest: [u8; 32] = Sha256::digest(chunk.text.as_bytes()).into();
        let key = (url.to_string(), digest);

        let mut sessions = self.sessions.write();
        let ledger = sessions.entry(session_id).or_default();

        if let Some(existing) = ledger.seen.get(&key) {
            tracing::debug!(session = %session_id, url, source = %existing, "Deduplicated re-ingested chunk");
            return Ok(AppendOutcome {
                source_id: existing.clone(),
                deduplicated: true,
            });
        }

        let source_id = ledger.mint_id();
        ledger.seen.insert(key, source_id.clone());
        ledger.chunks.insert(
            source_id.clone(),
            EvidenceChunk {
                source_id: source_id.clone(),
                url: url.to_string(),
                content: chunk.text,
                retrieved_at,
                vector_id,
                structure: chunk.structure,
                published_hint: chunk.published_hint,
            },
        );

        Ok(AppendOutcome {
            source_id,
            deduplicated: false,
        })
    }

    /// Look up a chunk by source id.
    pub fn get(&self, session_id: SessionId, source_id: &SourceId) -> Option<EvidenceChunk> {
        self.sessions
            .read()
            .get(&session_id)
            .and_then(|l| l.chunks.get(source_id))
            .cloned()
    }

    /// Whether a citation token resolves to a chunk with non-empty content.
    pub fn resolves(&self, session_id: SessionId, source_id: &SourceId) -> bool {
        self.sessions
            .read()
            .get(&session_id)
            .and_then(|l| l.chunks.get(source_id))
            .is_some_and(|c| !c.content.trim().is_empty())
    }

    /// All chunks for a session, in source-id order.
    pub fn all(&self, session_id: SessionId) -> Vec<EvidenceChunk> {
        self.sessions
            .read()
            .get(&session_id)
            .map(|l| l.chunks.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Chunks gathered for a specific vector.
    pub fn for_vector(&self, session_id: SessionId, vector_id: &VectorId) -> Vec<EvidenceChunk> {
        self.sessions
            .read()
            .get(&session_id)
            .map(|l| {
                l.chunks
                    .values()
                    .filter(|c| c.vector_id.as_ref() == Some(vector_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of chunks recorded for a session.
    pub fn len(&self, session_id: SessionId) -> usize {
        self.sessions
            .read()
            .get(&session_id)
            .map(|l| l.chunks.len())
            .unwrap_or(0)
    }

    /// Whether a session has recorded no evidence.
    pub fn is_empty(&self, session_id: SessionId) -> bool {
        self.len(session_id) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StructureMetadata;

    fn chunk(text: &str) -> ParsedChunk {
        ParsedChunk {
            text: text.to_string(),
            structure: StructureMetadata::default(),
            published_hint: None,
        }
    }

    fn vid(s: &str) -> VectorId {
        VectorId(s.to_string())
    }

    #[test]
    fn test_append_mints_sequential_ids() {
        let ledger = EvidenceLedger::new();
        let session = SessionId::new();

        let a = ledger
            .append(session, "https://a.example", Some(vid("v1")), chunk("alpha"), Utc::now())
            .unwrap();
        let b = ledger
            .append(session, "https://a.example", Some(vid("v1")), chunk("beta"), Utc::now())
            .unwrap();

        assert_eq!(a.source_id, SourceId("s1".to_string()));
        assert_eq!(b.source_id, SourceId("s2".to_string()));
        assert_eq!(ledger.len(session), 2);
    }

    #[test]
    fn test_identical_content_same_url_is_deduplicated() {
        let ledger = EvidenceLedger::new();
        let session = SessionId::new();

        let first = ledger
            .append(session, "https://a.example", Some(vid("v1")), chunk("same"), Utc::now())
            .unwrap();
        let second = ledger
            .append(session, "https://a.example", Some(vid("v2")), chunk("same"), Utc::now())
            .unwrap();

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.source_id, second.source_id);
        assert_eq!(ledger.len(session), 1);
    }

    #[test]
    fn test_same_content_different_url_is_distinct() {
        let ledger = EvidenceLedger::new();
        let session = SessionId::new();

        let a = ledger
            .append(session, "https://a.example", None, chunk("same"), Utc::now())
            .unwrap();
        let b = ledger
            .append(session, "https://b.example", None, chunk("same"), Utc::now())
            .unwrap();

        assert_ne!(a.source_id, b.source_id);
    }

    #[test]
    fn test_rejects_missing_provenance() {
        let ledger = EvidenceLedger::new();
        let session = SessionId::new();

        assert!(ledger
            .append(session, "", None, chunk("text"), Utc::now())
            .is_err());
        assert!(ledger
            .append(session, "https://a.example", None, chunk("   "), Utc::now())
            .is_err());
        assert!(ledger.is_empty(session));
    }

    #[test]
    fn test_sessions_are_isolated() {
        let ledger = EvidenceLedger::new();
        let one = SessionId::new();
        let two = SessionId::new();

        ledger
            .append(one, "https://a.example", None, chunk("alpha"), Utc::now())
            .unwrap();

        assert_eq!(ledger.len(one), 1);
        assert_eq!(ledger.len(two), 0);
        assert!(ledger.all(two).is_empty());
        // Same id namespace, different session: must not resolve
        assert!(!ledger.resolves(two, &SourceId("s1".to_string())));
    }

    #[test]
    fn test_for_vector_filters_by_tag() {
        let ledger = EvidenceLedger::new();
        let session = SessionId::new();

        ledger
            .append(session, "https://a.example", Some(vid("v1")), chunk("alpha"), Utc::now())
            .unwrap();
        ledger
            .append(session, "https://b.example", Some(vid("v2")), chunk("beta"), Utc::now())
            .unwrap();
        ledger
            .append(session, "https://c.example", None, chunk("gamma"), Utc::now())
            .unwrap();

        let v1 = ledger.for_vector(session, &vid("v1"));
        assert_eq!(v1.len(), 1);
        assert_eq!(v1[0].content, "alpha");
    }

    #[test]
    fn test_concurrent_append_loses_no_writes() {
        use std::sync::Arc;

        let ledger = Arc::new(EvidenceLedger::new());
        let session = SessionId::new();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        ledger
                            .append(
                                session,
                                &format!("https://{}.example", i),
                                None,
                                ParsedChunk {
                                    text: format!("worker {} chunk {}", i, j),
                                    structure: StructureMetadata::default(),
                                    published_hint: None,
                                },
                                Utc::now(),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(ledger.len(session), 200);
    }
}
