//! Parsing of schema-constrained model output.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;

use crate::error::EvalError;

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)^\s*```[A-Za-z]*\s*\n?(.*?)\s*```\s*$").ok())
        .as_ref()
}

/// Strip a surrounding Markdown code fence, if present.
pub fn strip_code_fence(reply: &str) -> &str {
    let inner = fence_regex()
        .and_then(|re| re.captures(reply))
        .and_then(|c| c.get(1));
    match inner {
        Some(inner) => inner.as_str(),
        None => reply.trim(),
    }
}

/// Deserialize a JSON reply, tolerating a code fence around it.
pub fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T, EvalError> {
    let body = strip_code_fence(reply);
    if body.is_empty() {
        return Err(EvalError::Parse("empty reply".to_string()));
    }
    serde_json::from_str(body).map_err(|e| EvalError::Parse(format!("{}: {}", e, preview(body))))
}

fn preview(s: &str) -> String {
    const MAX: usize = 120;
    if s.chars().count() <= MAX {
        s.to_string()
    } else {
        let cut: String = s.chars().take(MAX).collect();
        format!("{}...", cut)
    }
}
