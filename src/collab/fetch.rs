//! Page-fetching collaborator.

use async_trait::async_trait;

use crate::types::{AppError, FetchedPage, Result};

/// Retrieves rendered page content for a URL.
///
/// A failure here is an acquisition-level event: the executor records it
/// against the URL and moves on, it never aborts a batch.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch one URL and return its normalized content.
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

/// Page fetching powered by daedra (renders to markdown).
pub struct DaedraFetcher;

impl DaedraFetcher {
    /// Create the default page fetcher.
    pub fn new() -> Self {
        Self
    }
}

impl Default for DaedraFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageFetcher for DaedraFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let args = daedra::VisitPageArgs {
            url: url.to_string(),
            include_images: false,
            selector: None,
        };

        let page = daedra::tools::fetch::fetch_page(&args)
            .await
            .map_err(|e| AppError::Fetch(format!("Failed to fetch {}: {}", url, e)))?;

        Ok(FetchedPage {
            url: page.url,
            content: page.content,
            content_type: "text/markdown".to_string(),
        })
    }
}
