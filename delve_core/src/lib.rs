// src/lib.rs
//! Delve core: multi-provider web research with streamed synthesis.
//!
//! A [`ResearchOrchestrator`] takes a question through four stages:
//! decomposition into subtasks, web search with provider failover, bounded
//! concurrent page extraction, and streamed synthesis by a language model.
//! Progress is reported as a gapless, numbered [`ResearchEvent`] stream and the
//! research trail is handed to a [`PersistenceAdapter`].

pub mod config;
pub mod cpu_pool;
pub mod decompose;
pub mod error;
pub mod events;
pub mod extract;
pub mod llm;
pub mod orchestrator;
pub mod persistence;
pub mod prompts;
pub mod search;
pub mod session;
pub mod utils;

pub use config::{EnginePreference, LlmSettings, ResearchConfig};
pub use decompose::{Decomposition, QueryDecomposer};
pub use error::{
    ConfigError, FetchError, LlmError, PersistenceError, ResearchError, SearchError,
};
pub use events::{EventEmitter, EventKind, ResearchEvent};
pub use extract::{ContentExtractor, ExtractionMethod, PageFetcher, ScrapedContent};
pub use llm::{LanguageModel, OpenAiChatModel, TextStream};
pub use orchestrator::{ResearchOrchestrator, ResearchOutcome, ResearchRequest, STOPPED_MARKER};
pub use persistence::{
    FileResearchStore, MemoryResearchStore, PersistedResearchData, PersistenceAdapter, SourceUrl,
};
pub use prompts::ChatPrompt;
pub use search::{aggregate_sources, SearchEngine, SearchProvider, SearchResult, SourceCount};
pub use session::{ResearchSession, SessionStatus};

// Cancellation handle for `ResearchOrchestrator::run`.
pub use tokio_util::sync::CancellationToken;
