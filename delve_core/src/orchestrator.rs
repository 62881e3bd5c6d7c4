//! Sequences one research run: decompose, search, scrape, synthesize.
//!
//! Each run owns its session, event sequence and buffers. Cancellation is
//! cooperative through a [`CancellationToken`]; dropping the event receiver
//! counts as cancellation too.

use crate::config::ResearchConfig;
use crate::decompose::QueryDecomposer;
use crate::error::{LlmError, ResearchError};
use crate::events::{EventEmitter, EventKind, ResearchEvent};
use crate::extract::{ContentExtractor, ScrapedContent};
use crate::llm::{LanguageModel, OpenAiChatModel};
use crate::persistence::{PersistedResearchData, PersistenceAdapter, SourceUrl};
use crate::prompts::{synthesis_prompt, SourceContext};
use crate::search::{aggregate_sources, SearchEngine, SearchResult};
use crate::session::{ResearchSession, SessionStatus};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const STOPPED_MARKER: &str = "[Research stopped by user]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub query: String,
    /// Results requested per subtask search.
    pub max_sources: usize,
    /// Pages fetched for extraction.
    pub max_scrape: usize,
    pub region: Option<String>,
    /// Key for the persisted trail; the session id when absent.
    pub message_id: Option<String>,
}

impl ResearchRequest {
    pub fn new(query: impl Into<String>, config: &ResearchConfig) -> Self {
        Self {
            query: query.into(),
            max_sources: config.max_search_results,
            max_scrape: config.max_scrape_pages,
            region: None,
            message_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResearchOutcome {
    pub status: SessionStatus,
    pub session: ResearchSession,
    pub message_id: String,
    pub answer: String,
    /// The saved trail; `None` on failure or when saving did not succeed.
    pub persisted: Option<PersistedResearchData>,
    pub error: Option<String>,
}

/// Everything gathered so far, kept for the trail.
#[derive(Default)]
struct Gathered {
    thoughts: Vec<String>,
    results: Vec<SearchResult>,
    scraped: Vec<ScrapedContent>,
    answer: String,
    search_ms: u64,
    scrape_ms: u64,
    analysis_ms: u64,
}

pub struct ResearchOrchestrator {
    decomposer: QueryDecomposer,
    search: SearchEngine,
    extractor: ContentExtractor,
    model: Arc<dyn LanguageModel>,
    store: Arc<dyn PersistenceAdapter>,
    default_region: String,
    synthesis_timeout: Duration,
}

impl ResearchOrchestrator {
    pub fn new(
        search: SearchEngine,
        extractor: ContentExtractor,
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn PersistenceAdapter>,
        config: &ResearchConfig,
    ) -> Self {
        Self {
            decomposer: QueryDecomposer::new(Arc::clone(&model), config.decompose_timeout()),
            search,
            extractor,
            model,
            store,
            default_region: config.search_region.clone(),
            synthesis_timeout: config.synthesis_timeout(),
        }
    }

    /// Longest wait for the answer stream to open and between its chunks.
    pub fn with_synthesis_timeout(mut self, timeout: Duration) -> Self {
        self.synthesis_timeout = timeout;
        self
    }

    /// Wire up the HTTP-backed providers, fetcher and language model.
    pub fn from_config(
        config: &ResearchConfig,
        store: Arc<dyn PersistenceAdapter>,
    ) -> Result<Self, ResearchError> {
        let search = SearchEngine::from_config(config)
            .map_err(|e| ResearchError::InternalError(format!("search engine: {}", e)))?;
        let extractor = ContentExtractor::from_config(config)
            .map_err(|e| ResearchError::InternalError(format!("content extractor: {}", e)))?;
        let model = OpenAiChatModel::new(&config.llm)
            .map_err(|e| ResearchError::InternalError(format!("language model: {}", e)))?
            .with_request_timeout(config.synthesis_timeout());
        Ok(Self::new(search, extractor, Arc::new(model), store, config))
    }

    pub fn store(&self) -> &Arc<dyn PersistenceAdapter> {
        &self.store
    }

    /// Run on a new task. Events arrive on the returned receiver; dropping it
    /// cancels the run.
    pub fn spawn(
        self: &Arc<Self>,
        request: ResearchRequest,
        cancel: CancellationToken,
    ) -> (
        mpsc::UnboundedReceiver<ResearchEvent>,
        JoinHandle<Result<ResearchOutcome, ResearchError>>,
    ) {
        let (events, rx) = EventEmitter::channel();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run(request, cancel, events).await });
        (rx, handle)
    }

    /// Drive one session to a terminal state. Only an empty query is an
    /// error; synthesis failures end in a `Failed` outcome.
    pub async fn run(
        &self,
        request: ResearchRequest,
        cancel: CancellationToken,
        mut events: EventEmitter,
    ) -> Result<ResearchOutcome, ResearchError> {
        let query = request.query.trim().to_string();
        if query.is_empty() {
            return Err(ResearchError::InvalidInput("query must not be empty".into()));
        }
        let region = request
            .region
            .clone()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| self.default_region.clone());

        let mut session = ResearchSession::new(query.clone());
        let message_id = request
            .message_id
            .clone()
            .unwrap_or_else(|| session.id.to_string());
        let mut gathered = Gathered::default();
        info!(
            target: "delve.orchestrator",
            session_id = %session.id,
            %query,
            max_sources = request.max_sources,
            max_scrape = request.max_scrape,
            "research started"
        );

        // Decompose
        session.transition(SessionStatus::Decomposing)?;
        emit(&mut events, &cancel, EventKind::ResearchStart {
            query: query.clone(),
            timestamp: session.created_at,
        });
        emit(&mut events, &cancel, EventKind::Status {
            message: "Breaking the question into research angles".into(),
        });
        let decomposition = tokio::select! {
            _ = cancel.cancelled() => None,
            d = self.decomposer.decompose(&query) => Some(d),
        };
        let Some(decomposition) = decomposition else {
            return self.finish_cancelled(session, message_id, events, gathered).await;
        };
        session.subtasks = decomposition.subtasks.clone();
        if !decomposition.fallback {
            for subtask in &decomposition.subtasks {
                gathered.thoughts.push(subtask.clone());
                emit(&mut events, &cancel, EventKind::Thought {
                    content: subtask.clone(),
                });
            }
        }
        if cancel.is_cancelled() {
            return self.finish_cancelled(session, message_id, events, gathered).await;
        }

        // Search
        session.transition(SessionStatus::Searching)?;
        emit(&mut events, &cancel, EventKind::PlanCreated {
            subtasks: session.subtasks.clone(),
        });
        emit(&mut events, &cancel, EventKind::Status {
            message: format!("Searching the web for {} queries", session.subtasks.len()),
        });
        let started = Instant::now();
        let batches = tokio::select! {
            _ = cancel.cancelled() => None,
            b = self
                .search
                .search_many(&session.subtasks, request.max_sources, &region) => Some(b),
        };
        gathered.search_ms = started.elapsed().as_millis() as u64;
        let Some(batches) = batches else {
            return self.finish_cancelled(session, message_id, events, gathered).await;
        };
        for batch in batches {
            gathered.results.extend(batch);
            emit(&mut events, &cancel, EventKind::SourcesUpdate {
                count: gathered.results.len(),
                sources: aggregate_sources(&gathered.results),
            });
        }
        emit(&mut events, &cancel, EventKind::SourcesComplete {
            total: gathered.results.len(),
            urls: gathered.results.iter().map(|r| r.url.clone()).collect(),
        });
        debug!(
            target: "delve.orchestrator",
            session_id = %session.id,
            results = gathered.results.len(),
            search_ms = gathered.search_ms,
            "search stage finished"
        );
        if cancel.is_cancelled() {
            return self.finish_cancelled(session, message_id, events, gathered).await;
        }

        // Scrape
        session.transition(SessionStatus::Scraping)?;
        let urls: Vec<String> = gathered
            .results
            .iter()
            .take(request.max_scrape)
            .map(|r| r.url.clone())
            .collect();
        emit(&mut events, &cancel, EventKind::Status {
            message: format!("Reading {} pages", urls.len()),
        });
        let started = Instant::now();
        let results = &gathered.results;
        let scraped = self
            .extractor
            .extract_many(&urls, &cancel, |page| {
                let title = page
                    .title
                    .clone()
                    .or_else(|| {
                        results
                            .iter()
                            .find(|r| r.url == page.url)
                            .map(|r| r.title.clone())
                    })
                    .unwrap_or_else(|| page.url.clone());
                emit(&mut events, &cancel, EventKind::SourceRead {
                    title,
                    url: page.url.clone(),
                });
            })
            .await;
        gathered.scrape_ms = started.elapsed().as_millis() as u64;
        gathered.scraped = scraped;
        debug!(
            target: "delve.orchestrator",
            session_id = %session.id,
            attempted = gathered.scraped.len(),
            succeeded = gathered.scraped.iter().filter(|s| s.is_success()).count(),
            scrape_ms = gathered.scrape_ms,
            "scrape stage finished"
        );
        if cancel.is_cancelled() {
            return self.finish_cancelled(session, message_id, events, gathered).await;
        }

        // Synthesize
        session.transition(SessionStatus::Synthesizing)?;
        emit(&mut events, &cancel, EventKind::Status {
            message: "Writing the answer".into(),
        });
        let started = Instant::now();
        let prompt = {
            let pages: Vec<SourceContext<'_>> = gathered
                .scraped
                .iter()
                .filter(|s| s.is_success())
                .map(|s| SourceContext {
                    title: s
                        .title
                        .as_deref()
                        .or_else(|| {
                            gathered
                                .results
                                .iter()
                                .find(|r| r.url == s.url)
                                .map(|r| r.title.as_str())
                        })
                        .unwrap_or(""),
                    url: &s.url,
                    text: &s.content,
                })
                .collect();
            let snippets_only = pages.is_empty();
            let sources: Vec<SourceContext<'_>> = if snippets_only {
                gathered
                    .results
                    .iter()
                    .filter(|r| !r.snippet.is_empty())
                    .map(|r| SourceContext {
                        title: &r.title,
                        url: &r.url,
                        text: &r.snippet,
                    })
                    .collect()
            } else {
                pages
            };
            if snippets_only {
                info!(
                    target: "delve.orchestrator",
                    session_id = %session.id,
                    snippets = sources.len(),
                    "no page was readable; synthesizing from snippets"
                );
            }
            synthesis_prompt(&query, &session.subtasks, &sources, snippets_only)
        };

        let limit = self.synthesis_timeout;
        let stream = tokio::select! {
            _ = cancel.cancelled() => None,
            s = tokio::time::timeout(limit, self.model.complete_stream(&prompt)) => {
                Some(s.unwrap_or_else(|_| Err(stalled(limit))))
            }
        };
        let mut stream = match stream {
            None => {
                gathered.analysis_ms = started.elapsed().as_millis() as u64;
                return self.finish_cancelled(session, message_id, events, gathered).await;
            }
            Some(Err(err)) => {
                return self.fail(session, message_id, events, gathered, err);
            }
            Some(Ok(stream)) => stream,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = tokio::time::timeout(limit, stream.next()) => next,
            };
            match next {
                Ok(Some(Ok(chunk))) => {
                    gathered.answer.push_str(&chunk);
                    emit(&mut events, &cancel, EventKind::ContentChunk { chunk });
                }
                Ok(Some(Err(err))) => {
                    return self.fail(session, message_id, events, gathered, err);
                }
                Ok(None) => break,
                Err(_) => {
                    return self.fail(session, message_id, events, gathered, stalled(limit));
                }
            }
        }
        gathered.analysis_ms = started.elapsed().as_millis() as u64;
        if cancel.is_cancelled() {
            return self.finish_cancelled(session, message_id, events, gathered).await;
        }

        session.transition(SessionStatus::Complete)?;
        let persisted = self.persist(&session, &message_id, &gathered).await;
        emit(&mut events, &cancel, EventKind::ResearchComplete {});
        info!(
            target: "delve.orchestrator",
            session_id = %session.id,
            answer_chars = gathered.answer.chars().count(),
            search_ms = gathered.search_ms,
            scrape_ms = gathered.scrape_ms,
            analysis_ms = gathered.analysis_ms,
            events = events.last_sequence(),
            "research complete"
        );
        Ok(ResearchOutcome {
            status: session.status,
            session,
            message_id,
            answer: gathered.answer,
            persisted,
            error: None,
        })
    }

    async fn finish_cancelled(
        &self,
        mut session: ResearchSession,
        message_id: String,
        mut events: EventEmitter,
        mut gathered: Gathered,
    ) -> Result<ResearchOutcome, ResearchError> {
        session.transition(SessionStatus::Cancelled)?;
        if !gathered.answer.is_empty() {
            let tail = format!("\n\n{}", STOPPED_MARKER);
            gathered.answer.push_str(&tail);
            if !events.is_closed() {
                events.emit(EventKind::ContentChunk { chunk: tail });
            }
        }
        let persisted = self.persist(&session, &message_id, &gathered).await;
        info!(
            target: "delve.orchestrator",
            session_id = %session.id,
            sources = gathered.results.len(),
            pages = gathered.scraped.len(),
            "research cancelled"
        );
        Ok(ResearchOutcome {
            status: session.status,
            session,
            message_id,
            answer: gathered.answer,
            persisted,
            error: None,
        })
    }

    fn fail(
        &self,
        mut session: ResearchSession,
        message_id: String,
        mut events: EventEmitter,
        gathered: Gathered,
        err: LlmError,
    ) -> Result<ResearchOutcome, ResearchError> {
        session.transition(SessionStatus::Failed)?;
        let error = ResearchError::Synthesis(err);
        warn!(
            target: "delve.orchestrator",
            session_id = %session.id,
            code = error.code_str(),
            error = %error,
            "research failed"
        );
        let message = error.to_string();
        events.emit(EventKind::Error {
            message: message.clone(),
        });
        Ok(ResearchOutcome {
            status: session.status,
            session,
            message_id,
            answer: gathered.answer,
            persisted: None,
            error: Some(message),
        })
    }

    async fn persist(
        &self,
        session: &ResearchSession,
        message_id: &str,
        gathered: &Gathered,
    ) -> Option<PersistedResearchData> {
        let data = PersistedResearchData {
            thoughts: gathered.thoughts.clone(),
            sources: aggregate_sources(&gathered.results),
            source_urls: gathered.results.iter().map(SourceUrl::from).collect(),
            query_decomposition: session.subtasks.clone(),
            search_duration_ms: gathered.search_ms,
            scrape_duration_ms: gathered.scrape_ms,
            analysis_duration_ms: gathered.analysis_ms,
        };
        match self.store.save(message_id, &data).await {
            Ok(()) => Some(data),
            Err(err) => {
                warn!(
                    target: "delve.orchestrator",
                    session_id = %session.id,
                    %message_id,
                    error = %err,
                    "failed to persist research trail"
                );
                None
            }
        }
    }
}

fn stalled(limit: Duration) -> LlmError {
    LlmError::Timeout(format!("no answer data within {:?}", limit))
}

/// Emit, treating a vanished receiver as a cancellation request.
fn emit(events: &mut EventEmitter, cancel: &CancellationToken, kind: EventKind) {
    if !events.emit(kind) && !cancel.is_cancelled() {
        debug!(target: "delve.orchestrator", "event receiver dropped; cancelling");
        cancel.cancel();
    }
}
