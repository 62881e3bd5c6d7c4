//! Query decomposition into focused search subtasks.

use crate::llm::LanguageModel;
use crate::prompts::decomposition_prompt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const MAX_SUBTASKS: usize = 5;

static LIST_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+(.+?)\s*$").expect("valid list item regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decomposition {
    /// 1 to 5 search-ready subtasks, in the order they will be searched.
    pub subtasks: Vec<String>,
    /// `true` when the model was unavailable or unhelpful and `subtasks` is just the query.
    pub fallback: bool,
}

impl Decomposition {
    pub fn single(query: &str) -> Self {
        Self {
            subtasks: vec![query.trim().to_string()],
            fallback: true,
        }
    }
}

pub struct QueryDecomposer {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl QueryDecomposer {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    /// Ask the model for subtasks. Never fails: any problem yields the
    /// single-subtask fallback.
    pub async fn decompose(&self, query: &str) -> Decomposition {
        let prompt = decomposition_prompt(query);
        let reply = match tokio::time::timeout(self.timeout, self.model.complete(&prompt)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                info!(target: "delve.decompose", error = %err, "decomposition call failed; using the query as is");
                return Decomposition::single(query);
            }
            Err(_) => {
                info!(
                    target: "delve.decompose",
                    timeout_secs = self.timeout.as_secs(),
                    "decomposition timed out; using the query as is"
                );
                return Decomposition::single(query);
            }
        };

        let subtasks = parse_subtasks(&reply);
        if subtasks.is_empty() {
            debug!(target: "delve.decompose", reply = %reply, "no usable subtasks in reply");
            return Decomposition::single(query);
        }
        debug!(target: "delve.decompose", count = subtasks.len(), "query decomposed");
        Decomposition {
            subtasks,
            fallback: false,
        }
    }
}

/// Extract subtasks from a model reply: a JSON array of strings (bare, in a
/// code fence, or inside prose), else a numbered or bulleted list. Items are
/// trimmed, de-duplicated case-insensitively and capped at five.
pub fn parse_subtasks(reply: &str) -> Vec<String> {
    let candidates = parse_json_array(reply).unwrap_or_else(|| parse_list(reply));
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .map(|item| item.trim().trim_matches('"').trim().to_string())
        .filter(|item| !item.is_empty())
        .filter(|item| seen.insert(item.to_lowercase()))
        .take(MAX_SUBTASKS)
        .collect()
}

fn parse_json_array(reply: &str) -> Option<Vec<String>> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    if end <= start {
        return None;
    }
    let values: Vec<serde_json::Value> = serde_json::from_str(&reply[start..=end]).ok()?;
    Some(
        values
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Object(map) => map
                    .get("query")
                    .and_then(|q| q.as_str())
                    .map(str::to_string),
                _ => None,
            })
            .collect(),
    )
}

fn parse_list(reply: &str) -> Vec<String> {
    reply
        .lines()
        .filter_map(|line| LIST_ITEM.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}
