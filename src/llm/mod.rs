//! Language-model client abstraction.
//!
//! The engine treats the model as a black box: prompt in, completion out.
//! Planner, auditor, and writer all go through [`LanguageModel`]; anything
//! structured is parsed from the reply at this boundary into constrained
//! types — free text never drives control flow.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::types::{AppError, Result};

pub mod openai;

pub use openai::OpenAiCompatClient;

/// Black-box inference endpoint used by the planner, auditor, and writer.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for a system + user prompt pair.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;

    /// Model identifier, for logging.
    fn model_name(&self) -> &str;
}

/// Strip a Markdown code fence from a model reply, if present.
///
/// Models asked for strict JSON still frequently wrap it in ```json fences.
pub fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag on the opening fence line
    let inner = match inner.find('\n') {
        Some(idx) => &inner[idx + 1..],
        None => inner,
    };
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Parse a model reply into a typed structure.
///
/// Tolerates code fences and leading/trailing prose around the outermost
/// JSON object. Failures are reported with the offending reply attached so
/// callers can retry with feedback.
pub fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T> {
    let candidate = strip_code_fences(reply);

    if let Ok(value) = serde_json::from_str::<T>(candidate) {
        return Ok(value);
    }

    // Fall back to the outermost braced span
    if let (Some(start), Some(end)) = (candidate.find('{'), candidate.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<T>(&candidate[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(AppError::Llm(format!(
        "Model reply was not the requested JSON shape: {}",
        truncate(candidate, 200)
    )))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
