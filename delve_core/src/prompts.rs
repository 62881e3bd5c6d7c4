//! Prompt builders for decomposition and synthesis.

use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// A two-message chat prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPrompt {
    pub system: String,
    pub user: String,
}

impl ChatPrompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// One numbered source handed to the synthesis step.
#[derive(Debug, Clone, Copy)]
pub struct SourceContext<'a> {
    pub title: &'a str,
    pub url: &'a str,
    pub text: &'a str,
}

const DECOMPOSE_SYSTEM: &str = "You are a research planner. You split a research question into \
focused web search queries. Reply with a JSON array of strings and nothing else.";

const SYNTHESIZE_SYSTEM: &str = "You are a careful research analyst. Answer the question using \
only the numbered sources provided. Cite sources inline as [n]. If the sources disagree, say so. \
If they do not cover part of the question, state what is missing instead of guessing. \
Write in Markdown.";

pub fn decomposition_prompt(query: &str) -> ChatPrompt {
    let user = format!(
        "Break the following question into 2 to 5 self-contained web search queries. \
Each query should cover a different aspect needed to answer it well.\n\n\
Question: {}\n\n\
Return ONLY a JSON array, for example: [\"first query\", \"second query\"]",
        query.trim()
    );
    ChatPrompt::new(DECOMPOSE_SYSTEM, user)
}

/// Build the synthesis prompt. With `snippets_only` the model is told that no
/// page could be read and the sources are search snippets.
pub fn synthesis_prompt(
    query: &str,
    subtasks: &[String],
    sources: &[SourceContext<'_>],
    snippets_only: bool,
) -> ChatPrompt {
    let mut user = String::new();
    let _ = writeln!(user, "Question: {}", query.trim());

    if subtasks.len() > 1 {
        let _ = writeln!(user, "\nResearch plan:");
        for (i, task) in subtasks.iter().enumerate() {
            let _ = writeln!(user, "{}. {}", i + 1, task);
        }
    }

    if snippets_only {
        let _ = writeln!(
            user,
            "\nNo page could be read in full. The sources below are search result snippets; \
keep claims modest."
        );
    }

    if sources.is_empty() {
        let _ = writeln!(
            user,
            "\nNo sources were found. Say so briefly and answer only what can be stated with confidence."
        );
    } else {
        let _ = writeln!(user, "\nSources:");
        for (i, source) in sources.iter().enumerate() {
            let title = if source.title.is_empty() {
                source.url
            } else {
                source.title
            };
            let _ = writeln!(user, "\n[{}] {} ({})\n{}", i + 1, title, source.url, source.text.trim());
        }
    }

    ChatPrompt::new(SYNTHESIZE_SYSTEM, user)
}
