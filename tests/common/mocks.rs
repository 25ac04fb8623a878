//! Scripted collaborators for integration tests.
//!
//! The mock language model dispatches on the system prompt so planner,
//! auditor, and writer calls can be scripted independently regardless of
//! scheduling order.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use vera::types::{AppError, FetchedPage, Result, SearchHit};
use vera::{LanguageModel, PageFetcher, SearchProvider};

// ============= Language model =============

type LlmHandler = Box<dyn Fn(&str, &str) -> Result<String> + Send + Sync>;

/// A language model driven by a handler closure `(system, prompt) -> reply`.
pub struct MockLlm {
    handler: LlmHandler,
}

impl MockLlm {
    pub fn new(handler: impl Fn(&str, &str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
        }
    }
}

#[async_trait]
impl LanguageModel for MockLlm {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        (self.handler)(system, prompt)
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// Which engine role a system prompt belongs to.
pub fn is_plan_call(system: &str) -> bool {
    system.starts_with("You are a research planner")
}

pub fn is_replan_call(system: &str) -> bool {
    system.starts_with("You are revising a research outline")
}

pub fn is_audit_call(system: &str) -> bool {
    system.starts_with("You grade whether gathered evidence")
}

pub fn is_write_call(system: &str) -> bool {
    system.starts_with("You write one section")
}

/// A minimal sufficient-grade reply.
pub fn grade_sufficient() -> String {
    r#"{"sufficient": true, "reason": "covered", "refined_query": null, "conflicts": [], "outline_conflict": null}"#
        .to_string()
}

/// An insufficient-grade reply with a refined query.
pub fn grade_insufficient(refined: &str) -> String {
    format!(
        r#"{{"sufficient": false, "reason": "not covered", "refined_query": "{}", "conflicts": [], "outline_conflict": null}}"#,
        refined
    )
}

// ============= Search =============

/// Search provider returning scripted hits per exact query, recording every
/// query it is asked.
pub struct MockSearch {
    results: Mutex<HashMap<String, Vec<SearchHit>>>,
    pub queries: Mutex<Vec<String>>,
}

impl MockSearch {
    pub fn empty() -> Self {
        Self {
            results: Mutex::new(HashMap::new()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_results(entries: Vec<(&str, Vec<SearchHit>)>) -> Self {
        let mut map = HashMap::new();
        for (query, hits) in entries {
            map.insert(query.to_string(), hits);
        }
        Self {
            results: Mutex::new(map),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Register hits for a query after construction.
    pub fn insert(&self, query: &str, hits: Vec<SearchHit>) {
        self.results.lock().unwrap().insert(query.to_string(), hits);
    }

    pub fn recorded_queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchProvider for MockSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.queries.lock().unwrap().push(query.to_string());
        let mut hits = self
            .results
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_default();
        hits.truncate(limit);
        Ok(hits)
    }
}

/// A search hit whose snippet echoes the query terms, so it passes the
/// snippet-relevance floor for that topic.
pub fn hit(url: &str, topic: &str) -> SearchHit {
    SearchHit {
        title: topic.to_string(),
        url: url.to_string(),
        snippet: format!("all about {}", topic),
        rank: 0,
    }
}

// ============= Fetch =============

/// Page fetcher serving scripted content per URL; unknown URLs fail.
pub struct MockFetcher {
    pages: HashMap<String, String>,
}

impl MockFetcher {
    pub fn with_pages(entries: Vec<(&str, &str)>) -> Self {
        Self {
            pages: entries
                .into_iter()
                .map(|(url, content)| (url.to_string(), content.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        match self.pages.get(url) {
            Some(content) => Ok(FetchedPage {
                url: url.to_string(),
                content: content.clone(),
                content_type: "text/markdown".to_string(),
            }),
            None => Err(AppError::Fetch(format!("no route to {}", url))),
        }
    }
}
