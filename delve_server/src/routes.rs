//! HTTP surface: start a research session as an SSE stream, read saved
//! trails back, health check.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use delve_core::{
    CancellationToken, PersistenceAdapter, PersistenceError, ResearchConfig, ResearchEvent,
    ResearchOrchestrator, ResearchRequest,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

pub struct AppState {
    pub orchestrator: Arc<ResearchOrchestrator>,
    pub config: ResearchConfig,
}

pub type SharedState = Arc<AppState>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchBody {
    pub query: String,
    pub max_sources: Option<usize>,
    pub max_scrape: Option<usize>,
    pub region: Option<String>,
    pub message_id: Option<String>,
}

impl ResearchBody {
    fn into_request(self, config: &ResearchConfig) -> Result<ResearchRequest, ApiError> {
        let query = self.query.trim();
        if query.is_empty() {
            return Err(ApiError::BadRequest("query must not be empty".into()));
        }
        let mut request = ResearchRequest::new(query, config);
        if let Some(n) = self.max_sources.filter(|n| *n > 0) {
            request.max_sources = n;
        }
        if let Some(n) = self.max_scrape.filter(|n| *n > 0) {
            request.max_scrape = n;
        }
        request.region = self.region.filter(|r| !r.trim().is_empty());
        request.message_id = self.message_id.filter(|m| !m.trim().is_empty());
        Ok(request)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("no research trail for '{0}'")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = json!({ "error": { "code": code, "message": self.to_string() } });
        (status, Json(body)).into_response()
    }
}

impl From<PersistenceError> for ApiError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::InvalidMessageId(id) => {
                ApiError::BadRequest(format!("invalid message id '{}'", id))
            }
            other => ApiError::Storage(other.to_string()),
        }
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/research", post(start_research))
        .route("/research/{message_id}", get(research_trail))
        .route("/health", get(health_handler))
        .with_state(state)
}

fn sse_event(event: &ResearchEvent) -> Event {
    Event::default()
        .id(event.sequence.to_string())
        .event(event.event_type())
        .data(event.data_json().to_string())
}

/// Stream one session. The client going away cancels the run.
async fn start_research(
    State(state): State<SharedState>,
    Json(body): Json<ResearchBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let request = body.into_request(&state.config)?;
    info!(target: "delve.server", query = %request.query, "research requested");

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let (rx, handle) = state.orchestrator.spawn(request, cancel);

    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(outcome)) => info!(
                target: "delve.server",
                message_id = %outcome.message_id,
                status = %outcome.status,
                "research finished"
            ),
            Ok(Err(err)) => warn!(target: "delve.server", error = %err, "research rejected"),
            Err(err) => warn!(target: "delve.server", error = %err, "research task panicked"),
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(move |event| {
        let _live = &guard;
        Ok::<_, Infallible>(sse_event(&event))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn research_trail(
    State(state): State<SharedState>,
    Path(message_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.orchestrator.store().load(&message_id).await? {
        Some(trail) => Ok(Json(trail)),
        None => Err(ApiError::NotFound(message_id)),
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use delve_core::error::{FetchError, LlmError, SearchError};
    use delve_core::extract::{ContentExtractor, FetchedPage, PageFetcher};
    use delve_core::llm::{LanguageModel, TextStream};
    use delve_core::prompts::ChatPrompt;
    use delve_core::search::{SearchEngine, SearchProvider, SearchResult};
    use delve_core::{EnginePreference, MemoryResearchStore};
    use tower::ServiceExt;

    struct StubSearch;

    #[async_trait]
    impl SearchProvider for StubSearch {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn search(
            &self,
            query: &str,
            _max_results: usize,
            _region: &str,
        ) -> Result<Vec<SearchResult>, SearchError> {
            let slug = query.replace(' ', "-");
            Ok(vec![
                SearchResult::new("First", format!("https://one.example.com/{slug}"))
                    .with_snippet("first snippet"),
                SearchResult::new("Second", format!("https://two.example.com/{slug}"))
                    .with_snippet("second snippet"),
            ])
        }
    }

    struct StubFetcher;

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
            Ok(FetchedPage {
                url: url.to_string(),
                status: 200,
                content_type: Some("text/html".into()),
                body: "<html><head><title>Stub page</title></head><body><article><p>\
                       The stub article explains the topic at length, with enough words \
                       to pass any readable-content threshold the extractor applies.</p>\
                       </article></body></html>"
                    .into(),
            })
        }
    }

    struct StubModel;

    #[async_trait]
    impl LanguageModel for StubModel {
        fn model_name(&self) -> &str {
            "stub"
        }

        async fn complete(&self, _prompt: &ChatPrompt) -> Result<String, LlmError> {
            Ok(r#"["alpha topic", "beta topic"]"#.to_string())
        }

        async fn complete_stream(&self, _prompt: &ChatPrompt) -> Result<TextStream, LlmError> {
            let chunks: Vec<Result<String, LlmError>> =
                vec![Ok("Answer ".into()), Ok("text [1].".into())];
            Ok(futures::stream::iter(chunks).boxed())
        }
    }

    fn app() -> Router {
        let config = ResearchConfig::default();
        let engine = SearchEngine::new(
            Arc::new(StubSearch),
            Arc::new(StubSearch),
            EnginePreference::Primary,
        );
        let extractor = ContentExtractor::new(Arc::new(StubFetcher), 3000, 2);
        let orchestrator = ResearchOrchestrator::new(
            engine,
            extractor,
            Arc::new(StubModel),
            Arc::new(MemoryResearchStore::new()),
            &config,
        );
        router(Arc::new(AppState {
            orchestrator: Arc::new(orchestrator),
            config,
        }))
    }

    fn post_research(body: serde_json::Value) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri("/research")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), 1_000_000)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let req = axum::http::Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let resp = app()
            .oneshot(post_research(json!({ "query": "   " })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["error"]["code"], "invalid_input");
    }

    #[tokio::test]
    async fn research_streams_numbered_events_and_saves_trail() {
        let app = app();
        let resp = app
            .clone()
            .oneshot(post_research(
                json!({ "query": "how do tides work", "messageId": "msg-42", "maxScrape": 2 }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/event-stream"));

        let text = body_text(resp).await;
        assert!(text.contains("id: 1\n"));
        assert!(text.contains("event: research_start"));
        assert!(text.contains("event: plan_created"));
        assert!(text.contains("event: content_chunk"));
        assert!(text.contains("event: research_complete"));
        assert!(!text.contains("event: error"));

        let req = axum::http::Request::builder()
            .uri("/research/msg-42")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let trail: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(trail["query_decomposition"][0], "alpha topic");
        assert!(!trail["sourceUrls"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_trail_is_not_found() {
        let req = axum::http::Request::builder()
            .uri("/research/nothing-here")
            .body(Body::empty())
            .unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
