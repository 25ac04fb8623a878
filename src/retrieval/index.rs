//! Evidence index: the dual-indexed store behind retrieval fusion.
//!
//! [`EvidenceIndex`] is the abstract contract (dense, lexical, and graph
//! lookups, all session-scoped). [`MemoryIndex`] is the built-in
//! implementation: a BM25 inverted index, a cosine-similarity dense index
//! fed by a pluggable [`Embedder`], and an entity co-occurrence graph built
//! at ingest time. Cross-session leakage is a correctness bug; every lookup
//! is keyed by session id.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::types::{EvidenceChunk, Result, SessionId, SourceId};

/// An explicitly relational lookup: attribute/relation of a named entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityQuery {
    /// The named entity to anchor on.
    pub entity: String,
    /// Optional relation qualifier (e.g. "acquired", "price").
    pub relation: Option<String>,
}

impl EntityQuery {
    /// Infer an entity query from a question, if it names an entity.
    ///
    /// Picks the longest capitalized phrase; questions without one get no
    /// graph leg.
    pub fn infer(question: &str) -> Option<Self> {
        extract_entities(question)
            .into_iter()
            .max_by_key(|e| e.len())
            .map(|entity| Self {
                entity,
                relation: None,
            })
    }
}

/// Session-scoped retrieval over ingested evidence.
#[async_trait]
pub trait EvidenceIndex: Send + Sync {
    /// Make a ledger chunk retrievable. Called by the executor right after
    /// the ledger append; indexing the same chunk twice is harmless.
    async fn index(&self, session_id: SessionId, chunk: &EvidenceChunk) -> Result<()>;

    /// Dense similarity search.
    async fn dense(
        &self,
        session_id: SessionId,
        query: &str,
        k: usize,
    ) -> Result<Vec<(SourceId, f32)>>;

    /// Lexical/keyword search.
    async fn lexical(
        &self,
        session_id: SessionId,
        query: &str,
        k: usize,
    ) -> Result<Vec<(SourceId, f32)>>;

    /// Graph lookup over extracted entities.
    async fn graph(
        &self,
        session_id: SessionId,
        query: &EntityQuery,
    ) -> Result<Vec<(SourceId, f32)>>;
}

/// Embeds text into dense vectors for the in-memory index.
///
/// Kept pluggable so deployments can wire any embedding backend; the index
/// degrades to lexical+graph retrieval when no embedder is configured.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

// ============= BM25 =============

/// Lexical index using BM25 scoring (k1=1.2, b=0.75).
#[derive(Debug, Default)]
struct Bm25Index {
    documents: HashMap<SourceId, Vec<String>>,
    inverted: HashMap<String, BTreeSet<SourceId>>,
    doc_freq: HashMap<String, usize>,
    total_len: usize,
}

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

impl Bm25Index {
    fn add(&mut self, id: &SourceId, content: &str) {
        if self.documents.contains_key(id) {
            return;
        }
        let tokens = tokenize(content);

        let unique: HashSet<&String> = tokens.iter().collect();
        for term in unique {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
            self.inverted
                .entry(term.clone())
                .or_default()
                .insert(id.clone());
        }

        self.total_len += tokens.len();
        self.documents.insert(id.clone(), tokens);
    }

    fn idf(&self, term: &str) -> f32 {
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f32;
        let n = self.documents.len() as f32;
        if df == 0.0 || n == 0.0 {
            return 0.0;
        }
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score(&self, id: &SourceId, query_terms: &[String]) -> f32 {
        let Some(tokens) = self.documents.get(id) else {
            return 0.0;
        };
        let avg_len = self.total_len as f32 / self.documents.len().max(1) as f32;
        let doc_len = tokens.len() as f32;

        let mut term_freq: HashMap<&str, usize> = HashMap::new();
        for token in tokens {
            *term_freq.entry(token.as_str()).or_insert(0) += 1;
        }

        let mut score = 0.0;
        for term in query_terms {
            let tf = term_freq.get(term.as_str()).copied().unwrap_or(0) as f32;
            let numerator = tf * (BM25_K1 + 1.0);
            let denominator = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / avg_len);
            score += self.idf(term) * numerator / denominator;
        }
        score
    }

    fn search(&self, query: &str, k: usize) -> Vec<(SourceId, f32)> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        // Candidates share at least one term; BTreeSet keeps order stable
        let mut candidates: BTreeSet<SourceId> = BTreeSet::new();
        for term in &query_terms {
            if let Some(docs) = self.inverted.get(term) {
                candidates.extend(docs.iter().cloned());
            }
        }

        let mut results: Vec<(SourceId, f32)> = candidates
            .into_iter()
            .map(|id| {
                let score = self.score(&id, &query_terms);
                (id, score)
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();

        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        results.truncate(k);
        results
    }
}

// ============= In-memory index =============

#[derive(Default)]
struct SessionIndex {
    bm25: Bm25Index,
    embeddings: HashMap<SourceId, Vec<f32>>,
    // entity (lowercased) -> chunks mentioning it
    entities: HashMap<String, BTreeSet<SourceId>>,
}

/// Built-in [`EvidenceIndex`] implementation.
pub struct MemoryIndex {
    embedder: Option<Arc<dyn Embedder>>,
    sessions: RwLock<HashMap<SessionId, SessionIndex>>,
}

impl MemoryIndex {
    /// Index without dense retrieval (lexical + graph only).
    pub fn new() -> Self {
        Self {
            embedder: None,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Index with a dense leg backed by the given embedder.
    pub fn with_embedder(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder: Some(embedder),
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EvidenceIndex for MemoryIndex {
    async fn index(&self, session_id: SessionId, chunk: &EvidenceChunk) -> Result<()> {
        // Embed outside the lock; network-backed embedders may suspend
        let embedding = match &self.embedder {
            Some(embedder) => Some(embedder.embed(&chunk.content).await?),
            None => None,
        };

        let mut sessions = self.sessions.write();
        let index = sessions.entry(session_id).or_default();

        index.bm25.add(&chunk.source_id, &chunk.content);
        if let Some(embedding) = embedding {
            index.embeddings.insert(chunk.source_id.clone(), embedding);
        }
        for entity in extract_entities(&chunk.content) {
            index
                .entities
                .entry(entity)
                .or_default()
                .insert(chunk.source_id.clone());
        }
        Ok(())
    }

    async fn dense(
        &self,
        session_id: SessionId,
        query: &str,
        k: usize,
    ) -> Result<Vec<(SourceId, f32)>> {
        let Some(embedder) = &self.embedder else {
            return Ok(Vec::new());
        };
        let query_vec = embedder.embed(query).await?;

        let sessions = self.sessions.read();
        let Some(index) = sessions.get(&session_id) else {
            return Ok(Vec::new());
        };

        let mut results: Vec<(SourceId, f32)> = index
            .embeddings
            .iter()
            .map(|(id, vec)| (id.clone(), cosine(&query_vec, vec)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        results.truncate(k);
        Ok(results)
    }

    async fn lexical(
        &self,
        session_id: SessionId,
        query: &str,
        k: usize,
    ) -> Result<Vec<(SourceId, f32)>> {
        let sessions = self.sessions.read();
        Ok(sessions
            .get(&session_id)
            .map(|index| index.bm25.search(query, k))
            .unwrap_or_default())
    }

    async fn graph(
        &self,
        session_id: SessionId,
        query: &EntityQuery,
    ) -> Result<Vec<(SourceId, f32)>> {
        let sessions = self.sessions.read();
        let Some(index) = sessions.get(&session_id) else {
            return Ok(Vec::new());
        };

        let Some(anchored) = index.entities.get(&query.entity.to_lowercase()) else {
            return Ok(Vec::new());
        };

        let results: Vec<(SourceId, f32)> = match &query.relation {
            None => anchored.iter().map(|id| (id.clone(), 1.0)).collect(),
            Some(relation) => {
                let relation_terms = tokenize(relation);
                anchored
                    .iter()
                    .filter(|id| {
                        index.bm25.documents.get(*id).is_some_and(|tokens| {
                            relation_terms.iter().all(|t| tokens.contains(t))
                        })
                    })
                    .map(|id| (id.clone(), 1.0))
                    .collect()
            }
        };
        Ok(results)
    }
}

// ============= Helpers =============

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty() && s.len() > 1)
        .map(String::from)
        .collect()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

const ENTITY_STOPWORDS: &[&str] = &[
    "the", "a", "an", "in", "on", "at", "of", "and", "or", "but", "what", "which", "who", "how",
    "when", "where", "why", "is", "are", "was", "were", "it", "this", "that", "these", "those",
];

/// Capitalized phrases in the text, lowercased. Consecutive capitalized
/// words merge into one entity ("Acme Corp" -> "acme corp").
pub(crate) fn extract_entities(text: &str) -> Vec<String> {
    let mut entities = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for raw in text.split_whitespace() {
        let word: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        let is_capitalized = word
            .chars()
            .next()
            .is_some_and(|c| c.is_uppercase())
            && word.len() > 1;
        let lowered = word.to_lowercase();

        if is_capitalized && !ENTITY_STOPWORDS.contains(&lowered.as_str()) {
            current.push(lowered);
        } else if !current.is_empty() {
            entities.push(current.join(" "));
            current.clear();
        }
    }
    if !current.is_empty() {
        entities.push(current.join(" "));
    }

    entities.sort();
    entities.dedup();
    entities
}
