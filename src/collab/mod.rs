//! External collaborator contracts.
//!
//! The engine core depends on abstract traits for web search and page
//! fetching; the default implementations here are backed by the `daedra`
//! crate (DuckDuckGo metasearch + page fetch to markdown). Deployments can
//! substitute their own providers by implementing the traits.

pub mod fetch;
pub mod search;

pub use fetch::{DaedraFetcher, PageFetcher};
pub use search::{DaedraSearch, SearchProvider};
