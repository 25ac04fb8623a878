//! Document-structure parsing.
//!
//! Converts fetched page content into normalized text chunks carrying
//! positional metadata (heading path, span kind) and a publication-year
//! hint for the auditor's freshness check.

pub mod parser;

pub use parser::{DocumentParser, StructuralParser};
