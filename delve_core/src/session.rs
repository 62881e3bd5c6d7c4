use crate::error::ResearchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Decomposing,
    Searching,
    Scraping,
    Synthesizing,
    Complete,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Decomposing => "decomposing",
            SessionStatus::Searching => "searching",
            SessionStatus::Scraping => "scraping",
            SessionStatus::Synthesizing => "synthesizing",
            SessionStatus::Complete => "complete",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Complete | SessionStatus::Cancelled | SessionStatus::Failed
        )
    }

    /// Stages advance one step at a time; any live state may end in
    /// `Cancelled` or `Failed`.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Cancelled) | (_, Failed) => true,
            (Pending, Decomposing)
            | (Decomposing, Searching)
            | (Searching, Scraping)
            | (Scraping, Synthesizing)
            | (Synthesizing, Complete) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one research run. Only the orchestrator mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchSession {
    pub id: Uuid,
    pub original_query: String,
    pub subtasks: Vec<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl ResearchSession {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_query: query.into(),
            subtasks: Vec::new(),
            status: SessionStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn transition(&mut self, next: SessionStatus) -> Result<(), ResearchError> {
        if !self.status.can_transition_to(next) {
            return Err(ResearchError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}
