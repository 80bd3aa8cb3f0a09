//! HTTP and WebSocket transport for Quarry.
//!
//! Thin layer over [`ResearchPipeline`]: accepts queries, spawns jobs, serves
//! persisted reports and relays live progress per report.

mod error;
mod routes;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::routing::{get, post};
use quarry_core::ResearchPipeline;
use quarry_shared::{QuarryError, Result, ServerConfig};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use error::ApiError;
pub use routes::{ResearchRequest, ResearchResponse};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ResearchPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<ResearchPipeline>) -> Self {
        Self { pipeline }
    }
}

/// Build the application router.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/research", post(routes::create_research))
        .route("/api/reports/{report_id}", get(routes::get_report))
        .route("/api/jobs", get(routes::list_jobs))
        .route("/ws/research/{report_id}", get(ws::research_ws))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers([CONTENT_TYPE, ACCEPT])
}

/// Bind and serve until Ctrl-C.
pub async fn serve(config: &ServerConfig, state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| QuarryError::config(format!("invalid server address: {e}")))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| QuarryError::Network(format!("failed to bind {addr}: {e}")))?;

    info!(%addr, providers = ?state.pipeline.provider_names(), "quarry server listening");

    axum::serve(listener, router(state, &config.allowed_origins))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| QuarryError::Network(format!("server error: {e}")))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use quarry_core::{Dispatcher, InMemoryStore, ProgressHub, Synthesizer};
    use quarry_providers::ResearchProvider;
    use quarry_render::TypstRenderer;
    use quarry_shared::{
        Claim, ContextDocument, DispatchConfig, ProgressEvent, ProviderResult, ReportId,
        ReportRecord, Stage,
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct FixedProvider;

    #[async_trait]
    impl ResearchProvider for FixedProvider {
        fn name(&self) -> &str {
            "Fixed"
        }

        async fn research(&self, query: &str, _context: &[ContextDocument]) -> Result<ProviderResult> {
            Ok(ProviderResult {
                summary: format!("about {query}"),
                claims: vec![Claim::new("Water is wet", 0.9)],
                raw_response: String::new(),
            })
        }
    }

    fn app() -> (Router, AppState) {
        let dispatcher = Dispatcher::new(
            vec![Arc::new(FixedProvider) as Arc<dyn ResearchProvider>],
            DispatchConfig {
                provider_timeout: Duration::from_secs(1),
            },
        )
        .unwrap();
        let pipeline = ResearchPipeline::new(
            dispatcher,
            Synthesizer::fallback_only(),
            Arc::new(TypstRenderer::new()),
            Arc::new(InMemoryStore::new()),
            ProgressHub::new(),
        );
        let state = AppState::new(Arc::new(pipeline));
        (router(state.clone(), &["http://localhost:5173".to_string()]), state)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let resp = ServiceExt::<Request<Body>>::oneshot(app, request).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 1_000_000).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _) = app();
        let (status, json) = send(app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn research_returns_ids_and_completes_in_background() {
        let (app, state) = app();
        let (status, json) = send(app.clone(), post_json("/api/research", json!({"query": "Is water wet?"}))).await;
        assert_eq!(status, StatusCode::OK);
        let response: ResearchResponse = serde_json::from_value(json).unwrap();

        let mut record: Option<ReportRecord> = None;
        for _ in 0..50 {
            let (status, json) = send(app.clone(), get(&format!("/api/reports/{}", response.report_id))).await;
            assert_eq!(status, StatusCode::OK);
            let current: ReportRecord = serde_json::from_value(json).unwrap();
            if current.stage.is_terminal() {
                record = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let record = record.unwrap();
        assert_eq!(record.stage, Stage::Done);
        assert_eq!(record.job_id, response.job_id);
        assert_eq!(record.citations.len(), 1);
        assert!(record.document.contains("Water is wet"));
        assert_eq!(state.pipeline.hub().active_jobs(), 0);
    }

    #[tokio::test]
    async fn empty_query_is_bad_request() {
        let (app, _) = app();
        let (status, json) = send(app, post_json("/api/research", json!({"query": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().starts_with("Invalid request"));
    }

    #[tokio::test]
    async fn unknown_report_is_not_found() {
        let (app, _) = app();
        let (status, _) = send(app, get(&format!("/api/reports/{}", ReportId::new()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_report_id_is_rejected() {
        let (app, _) = app();
        let (status, _) = send(app, get("/api/reports/not-a-uuid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn jobs_are_listed_newest_first() {
        let (app, state) = app();
        let first = state.pipeline.submit("first", vec![]).await.unwrap();
        let second = state.pipeline.submit("second", vec![]).await.unwrap();

        let (status, json) = send(app, get("/api/jobs?limit=5")).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|j| j["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, [second.job.id.to_string(), first.job.id.to_string()]);
        assert_eq!(json[0]["stage"], "pending");
    }

    #[tokio::test]
    async fn cors_allows_configured_origin() {
        let (app, _) = app();
        let request = Request::builder()
            .uri("/health")
            .header("origin", "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = ServiceExt::<Request<Body>>::oneshot(app, request).await.unwrap();
        assert_eq!(
            resp.headers().get("access-control-allow-origin").unwrap(),
            "http://localhost:5173"
        );
    }

    #[test]
    fn ack_echoes_text_payload() {
        let frame: Value = serde_json::from_str(&ws::ack_frame("hello")).unwrap();
        assert_eq!(frame, json!({"type": "ack", "data": "hello"}));
    }

    #[tokio::test]
    async fn finished_jobs_replay_their_terminal_event() {
        let (_, state) = app();
        let submitted = state.pipeline.submit("q", vec![]).await.unwrap();
        let report_id = submitted.report_id;

        let store = state.pipeline.store();
        let pending = store.get_report(report_id).await.unwrap().unwrap();
        assert!(ws::terminal_event(&pending).is_none());

        state.pipeline.run(submitted).await.unwrap();
        let done = store.get_report(report_id).await.unwrap().unwrap();
        match ws::terminal_event(&done) {
            Some(ProgressEvent::Report { citations, .. }) => assert_eq!(citations, 1),
            other => panic!("expected report event, got {other:?}"),
        }
    }
}
