//! Reciprocal-rank fusion of per-method result lists.

use std::collections::HashMap;

use crate::types::SourceId;

/// A retrieval method contributing a ranked list to fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetrievalMethod {
    /// Dense vector similarity.
    Dense,
    /// Lexical/keyword (BM25).
    Lexical,
    /// Entity-graph traversal.
    Graph,
}

impl std::fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Dense => "dense",
            Self::Lexical => "lexical",
            Self::Graph => "graph",
        };
        write!(f, "{}", name)
    }
}

/// One method's ranked results, best first. Raw scores are kept for
/// diagnostics only; fusion uses ranks.
#[derive(Debug, Clone)]
pub struct RankedList {
    /// The contributing method.
    pub method: RetrievalMethod,
    /// `(source_id, raw_score)` pairs, best first.
    pub entries: Vec<(SourceId, f32)>,
}

/// A fused result.
#[derive(Debug, Clone)]
pub struct FusedHit {
    /// The chunk's citation id.
    pub source_id: SourceId,
    /// Summed reciprocal-rank score.
    pub score: f32,
    /// Methods that surfaced this chunk.
    pub methods: Vec<RetrievalMethod>,
}

/// Reciprocal-rank fusion.
///
/// Each chunk's fused score is `Σ 1/(k + rank)` over the contributing
/// methods, with 1-based ranks. Within a single list a chunk counts once, at
/// its best rank. Output order is deterministic: score descending, then
/// `source_id` ascending.
#[derive(Debug, Clone)]
pub struct RrfFusion {
    k: f32,
}

impl Default for RrfFusion {
    fn default() -> Self {
        Self { k: 60.0 }
    }
}

impl RrfFusion {
    /// Fusion with the conventional constant k=60.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fusion with a custom constant.
    pub fn with_k(k: f32) -> Self {
        Self { k }
    }

    /// Fuse per-method ranked lists into one deduplicated ranking.
    pub fn fuse(&self, lists: &[RankedList]) -> Vec<FusedHit> {
        let mut fused: HashMap<SourceId, FusedHit> = HashMap::new();

        for list in lists {
            // Best rank per chunk within this list
            let mut best_rank: HashMap<&SourceId, usize> = HashMap::new();
            for (rank, (source_id, _)) in list.entries.iter().enumerate() {
                best_rank.entry(source_id).or_insert(rank);
            }

            for (source_id, rank) in best_rank {
                let contribution = 1.0 / (self.k + rank as f32 + 1.0);
                let hit = fused.entry(source_id.clone()).or_insert_with(|| FusedHit {
                    source_id: source_id.clone(),
                    score: 0.0,
                    methods: Vec::new(),
                });
                hit.score += contribution;
                if !hit.methods.contains(&list.method) {
                    hit.methods.push(list.method);
                }
            }
        }

        let mut results: Vec<FusedHit> = fused.into_values().collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        results
    }
}
