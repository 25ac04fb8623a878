//! Web search collaborator.

use async_trait::async_trait;

use crate::types::{AppError, Result, SearchHit};

/// Keyword/metasearch lookup returning ranked snippets and URLs.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Issue a query; results come back best-first with `rank` set.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

/// Web search powered by daedra (DuckDuckGo backend).
pub struct DaedraSearch;

impl DaedraSearch {
    /// Create the default search provider.
    pub fn new() -> Self {
        Self
    }
}

impl Default for DaedraSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for DaedraSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let args = daedra::SearchArgs {
            query: query.to_string(),
            options: Some(daedra::SearchOptions {
                num_results: limit,
                ..Default::default()
            }),
        };

        let response = daedra::tools::search::perform_search(&args)
            .await
            .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;

        Ok(response
            .data
            .iter()
            .enumerate()
            .map(|(rank, r)| SearchHit {
                title: r.title.clone(),
                url: r.url.clone(),
                snippet: r.description.clone(),
                rank,
            })
            .collect())
    }
}
