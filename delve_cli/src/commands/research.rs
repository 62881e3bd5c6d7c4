use crate::cli::{Cli, OutputFormat};
use crate::commands::{load_config, spinner, CommandError, Result};
use crate::output::{effective_format, format_output, OutputData};
use delve_core::{
    CancellationToken, EnginePreference, EventKind, FileResearchStore, MemoryResearchStore,
    PersistenceAdapter, ResearchError, ResearchEvent, ResearchOrchestrator, ResearchOutcome,
    ResearchRequest, SessionStatus,
};
use indicatif::ProgressBar;
use owo_colors::OwoColorize;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::debug;

pub struct ResearchArgs {
    pub query: String,
    pub max_sources: Option<usize>,
    pub max_scrape: Option<usize>,
    pub region: Option<String>,
    pub engine: Option<EnginePreference>,
    pub message_id: Option<String>,
    pub no_save: bool,
    pub events: bool,
}

pub async fn run(cli: &Cli, args: ResearchArgs) -> Result<()> {
    let query = args.query.trim().to_string();
    if query.is_empty() {
        return Err(CommandError::InvalidInput("research query is empty".into()));
    }

    let mut config = load_config(cli)?;
    if let Some(engine) = args.engine {
        config.default_search_engine = engine;
    }

    let store: Arc<dyn PersistenceAdapter> = if args.no_save {
        Arc::new(MemoryResearchStore::new())
    } else {
        Arc::new(FileResearchStore::new(config.research_dir()))
    };
    let orchestrator = Arc::new(ResearchOrchestrator::from_config(&config, store)?);

    let mut request = ResearchRequest::new(query.clone(), &config);
    if let Some(n) = args.max_sources.filter(|n| *n > 0) {
        request.max_sources = n;
    }
    if let Some(n) = args.max_scrape.filter(|n| *n > 0) {
        request.max_scrape = n;
    }
    request.region = args.region;
    request.message_id = args.message_id;
    debug!(
        max_sources = request.max_sources,
        max_scrape = request.max_scrape,
        engine = ?config.default_search_engine,
        model = %config.llm.model,
        "starting research"
    );

    let cancel = CancellationToken::new();
    let (mut rx, handle) = orchestrator.spawn(request, cancel.clone());

    let format = effective_format(cli);
    let mut view = ProgressView::new(&format, args.events);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => view.show(&event)?,
                None => break,
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                view.interrupted();
                cancel.cancel();
            }
        }
    }
    view.finish();

    let outcome = handle
        .await
        .map_err(|e| ResearchError::InternalError(format!("research task: {}", e)))??;

    if !args.events {
        format_output(&summary(&query, &outcome, !args.no_save), &format)?;
    }

    match outcome.status {
        SessionStatus::Failed => Err(CommandError::SessionFailed(
            outcome.error.unwrap_or_else(|| "unknown error".into()),
        )),
        _ => Ok(()),
    }
}

/// `on_disk` is false when the trail only went to the in-memory store.
fn summary(query: &str, outcome: &ResearchOutcome, on_disk: bool) -> OutputData {
    let (sources, source_urls) = outcome
        .persisted
        .as_ref()
        .map(|p| (p.sources.clone(), p.source_urls.clone()))
        .unwrap_or_default();
    OutputData::Research {
        query: query.to_string(),
        status: outcome.status.to_string(),
        message_id: outcome.message_id.clone(),
        saved: on_disk && outcome.persisted.is_some(),
        subtasks: outcome.session.subtasks.clone(),
        answer: outcome.answer.clone(),
        sources,
        source_urls,
        error: outcome.error.clone(),
    }
}

enum Mode {
    /// Raw SSE frames on stdout.
    Frames,
    /// Colored progress and the answer streamed inline.
    Live,
    /// Plain progress lines on stderr; the answer is printed at the end.
    Plain,
    /// Spinner only; structured output at the end.
    Quiet,
}

struct ProgressView {
    mode: Mode,
    spinner: Option<ProgressBar>,
    streaming: bool,
}

impl ProgressView {
    fn new(format: &OutputFormat, frames: bool) -> Self {
        let mode = match (frames, format) {
            (true, _) => Mode::Frames,
            (false, OutputFormat::Pretty) => Mode::Live,
            (false, OutputFormat::Text) => Mode::Plain,
            (false, _) => Mode::Quiet,
        };
        let spinner = match mode {
            Mode::Live | Mode::Quiet => Some(spinner("Starting research...")),
            _ => None,
        };
        Self {
            mode,
            spinner,
            streaming: false,
        }
    }

    fn show(&mut self, event: &ResearchEvent) -> Result<()> {
        match self.mode {
            Mode::Frames => {
                let mut out = io::stdout().lock();
                out.write_all(event.to_sse().as_bytes())?;
                out.flush()?;
            }
            Mode::Plain => {
                if let Some(line) = describe(&event.kind) {
                    eprintln!("{}", line);
                }
            }
            Mode::Quiet => {
                if let (Some(line), Some(spinner)) = (describe(&event.kind), &self.spinner) {
                    spinner.set_message(line);
                }
            }
            Mode::Live => self.show_live(event)?,
        }
        Ok(())
    }

    fn show_live(&mut self, event: &ResearchEvent) -> Result<()> {
        match &event.kind {
            EventKind::ContentChunk { chunk } => {
                if !self.streaming {
                    self.streaming = true;
                    if let Some(spinner) = self.spinner.take() {
                        spinner.finish_and_clear();
                    }
                    println!();
                }
                let mut out = io::stdout().lock();
                out.write_all(chunk.as_bytes())?;
                out.flush()?;
            }
            EventKind::PlanCreated { subtasks } => self.print_above(|| {
                println!("{}", "Plan".bold().cyan());
                for subtask in subtasks {
                    println!("  • {}", subtask);
                }
            }),
            EventKind::Thought { content } => {
                self.print_above(|| println!("  {} {}", "›".dimmed(), content.dimmed()))
            }
            EventKind::Error { message } => {
                if let Some(spinner) = self.spinner.take() {
                    spinner.finish_and_clear();
                }
                eprintln!();
                eprintln!("{} {}", "✗".red(), message.red());
            }
            kind => {
                if let (Some(line), Some(spinner)) = (describe(kind), &self.spinner) {
                    spinner.set_message(line);
                }
            }
        }
        Ok(())
    }

    fn print_above<F: FnOnce()>(&self, print: F) {
        match &self.spinner {
            Some(spinner) => spinner.suspend(print),
            None => print(),
        }
    }

    fn interrupted(&self) {
        match self.mode {
            Mode::Frames => {}
            Mode::Plain => eprintln!("Stopping research..."),
            _ => match &self.spinner {
                Some(spinner) => spinner.set_message("Stopping research...".yellow().to_string()),
                None => eprintln!("\n{}", "Stopping research...".yellow()),
            },
        }
    }

    fn finish(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
        if self.streaming {
            println!();
        }
    }
}

/// One-line progress description; `None` for answer text.
fn describe(kind: &EventKind) -> Option<String> {
    match kind {
        EventKind::ResearchStart { query, .. } => Some(format!("Researching '{}'", query)),
        EventKind::Thought { content } => Some(format!("Thinking: {}", content)),
        EventKind::Status { message } => Some(message.clone()),
        EventKind::PlanCreated { subtasks } => {
            Some(format!("Planned {} subtask(s)", subtasks.len()))
        }
        EventKind::SourcesUpdate { count, sources } => Some(format!(
            "Found {} source(s) across {} domain(s)",
            count,
            sources.len()
        )),
        EventKind::SourcesComplete { total, .. } => Some(format!("Search done: {} source(s)", total)),
        EventKind::SourceRead { title, .. } => Some(format!("Read: {}", title)),
        EventKind::ContentChunk { .. } => None,
        EventKind::ResearchComplete {} => Some("Research complete".to_string()),
        EventKind::Error { message } => Some(format!("Error: {}", message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::{PersistedResearchData, ResearchSession};

    fn outcome(persisted: Option<PersistedResearchData>) -> ResearchOutcome {
        let session = ResearchSession::new("tides");
        ResearchOutcome {
            status: session.status,
            session,
            message_id: "m1".into(),
            answer: "High and low.".into(),
            persisted,
            error: None,
        }
    }

    fn saved_flag(data: &OutputData) -> bool {
        match data {
            OutputData::Research { saved, .. } => *saved,
            _ => panic!("expected research summary"),
        }
    }

    #[test]
    fn summary_reports_saved_only_for_persisted_disk_trails() {
        let stored = outcome(Some(PersistedResearchData::default()));
        assert!(saved_flag(&summary("tides", &stored, true)));
        // --no-save keeps the trail in memory only.
        assert!(!saved_flag(&summary("tides", &stored, false)));
        // The store rejected the write.
        assert!(!saved_flag(&summary("tides", &outcome(None), true)));
    }

    #[test]
    fn progress_lines_skip_answer_text() {
        assert!(describe(&EventKind::ContentChunk {
            chunk: "text".into()
        })
        .is_none());
        assert_eq!(
            describe(&EventKind::SourcesComplete {
                total: 7,
                urls: vec![]
            })
            .as_deref(),
            Some("Search done: 7 source(s)")
        );
    }
}
