use crate::{
    config::Config,
    semantic::{GroupingError, GroupingResult, GroupingService, ServiceStatus},
    tabs::TabDescriptor,
};
use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    service: Arc<GroupingService>,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutting down");
}

pub fn router(service: Arc<GroupingService>) -> Router {
    let shared_state = Arc::new(SharedState { service });

    Router::new()
        .route("/api/tabs/group", post(group_tabs))
        .route("/api/status", get(status))
        .route("/api/initialize", post(initialize))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn start_app(config: Config, listen: String) -> anyhow::Result<()> {
    let service = Arc::new(GroupingService::from_config(config)?);

    // load the model eagerly so the first request does not pay for it
    if service.is_enabled() {
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = service.initialize().await {
                log::error!("eager initialization failed: {e}");
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    log::info!("listening on {listen}");

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

pub fn start_daemon(config: Config, listen: Option<String>) -> anyhow::Result<()> {
    let listen = listen.unwrap_or_else(|| config.daemon.listen.clone());

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(start_app(config, listen))
}

#[derive(Debug)]
struct HttpError(GroupingError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        match &self.0 {
            GroupingError::InvalidThreshold(_) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": self.0.to_string()})),
            ),
            GroupingError::Initialization(envelope) => {
                log::error!("{self:?}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({"error": self.0.to_string(), "envelope": envelope})),
                )
            }
            GroupingError::Disabled | GroupingError::Timeout(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": self.0.to_string()})),
            ),
        }
        .into_response()
    }
}

impl From<GroupingError> for HttpError {
    fn from(err: GroupingError) -> Self {
        Self(err)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupTabsRequest {
    pub tabs: Vec<TabDescriptor>,

    /// Similarity threshold, the configured default when omitted
    pub threshold: Option<f32>,

    /// Skip embeddings and group by domain only
    #[serde(default)]
    pub domain_only: bool,
}

async fn group_tabs(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<GroupTabsRequest>,
) -> Result<Json<GroupingResult>, HttpError> {
    log::debug!(
        "grouping {} tabs (threshold: {:?}, domain_only: {})",
        payload.tabs.len(),
        payload.threshold,
        payload.domain_only
    );

    let result = state
        .service
        .group_tabs(payload.tabs, payload.threshold, payload.domain_only)
        .await?;

    Ok(Json(result))
}

async fn status(State(state): State<Arc<SharedState>>) -> Json<ServiceStatus> {
    Json(state.service.status())
}

async fn initialize(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<ServiceStatus>, HttpError> {
    state.service.initialize().await?;
    Ok(Json(state.service.status()))
}
