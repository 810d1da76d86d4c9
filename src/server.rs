//! HTTP API over the identification pipeline.
//!
//! Each configured vertical gets an identify endpoint and a collection
//! resource. Handlers are thin: they adapt HTTP to the same capture driver
//! and collection store the CLI uses.
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | `GET` | `/health` | Liveness and version |
//! | `GET` | `/verticals` | Configured verticals |
//! | `POST` | `/verticals/{name}/identify` | Multipart `file` upload, returns a tiered result |
//! | `GET` | `/verticals/{name}/collection` | Saved entries (`?sort=newest\|oldest\|confidence&q=`) |
//! | `POST` | `/verticals/{name}/collection` | Save an identification |
//! | `DELETE` | `/verticals/{name}/collection/{id}` | Remove an entry |
//!
//! Errors use the body `{"error": {"code", "message"}}`.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use fieldlens_core::capture::CaptureError;
use fieldlens_core::collection::{ListQuery, SortOrder};
use fieldlens_core::error::ErrorKind;
use fieldlens_core::media::PreviewRegistry;
use fieldlens_core::models::{IdentificationResult, MediaFile};
use fieldlens_core::store::CollectionBackend;
use fieldlens_core::tier::{ConfidenceScale, PresentedResult};

use crate::analysis::{Classifier, HttpClassifier};
use crate::collection::CollectionStore;
use crate::collection_cmd::{present_entries, PresentedEntry};
use crate::config::{Config, VerticalConfig};
use crate::identify::guess_mime;
use crate::pipeline::{CaptureDriver, SubmitOutcome};
use crate::sqlite_store::SqliteBackend;
use crate::verticals::VerticalSummary;

/// Room for multipart framing on top of the largest accepted file.
const BODY_SLACK: usize = 1024 * 1024;

struct Vertical {
    config: Arc<VerticalConfig>,
    store: CollectionStore,
}

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    verticals: Arc<BTreeMap<String, Vertical>>,
    classifier: Arc<dyn Classifier>,
    previews: Arc<PreviewRegistry>,
}

impl AppState {
    pub fn new(
        config: &Config,
        classifier: Arc<dyn Classifier>,
        backend: Arc<dyn CollectionBackend>,
    ) -> Self {
        let verticals = config
            .verticals
            .iter()
            .map(|(name, v)| {
                let vertical = Vertical {
                    config: Arc::new(v.clone()),
                    store: CollectionStore::for_vertical(v, backend.clone()),
                };
                (name.clone(), vertical)
            })
            .collect();
        Self {
            verticals: Arc::new(verticals),
            classifier,
            previews: Arc::new(PreviewRegistry::new()),
        }
    }

    /// Live previews across all in-flight requests.
    pub fn previews(&self) -> &Arc<PreviewRegistry> {
        &self.previews
    }

    fn vertical(&self, name: &str) -> Result<&Vertical, AppError> {
        self.verticals
            .get(name)
            .ok_or_else(|| not_found(format!("unknown vertical '{}'", name)))
    }

    fn body_limit(&self) -> usize {
        let largest = self
            .verticals
            .values()
            .map(|v| v.config.max_bytes)
            .max()
            .unwrap_or(0);
        usize::try_from(largest)
            .unwrap_or(usize::MAX)
            .saturating_mul(2)
            .saturating_add(BODY_SLACK)
    }
}

/// Build the router. Exposed so tests can serve it on an ephemeral port.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let limit = state.body_limit();

    Router::new()
        .route("/health", get(handle_health))
        .route("/verticals", get(handle_verticals))
        .route(
            "/verticals/{name}/identify",
            post(handle_identify).layer(DefaultBodyLimit::max(limit)),
        )
        .route(
            "/verticals/{name}/collection",
            get(handle_list).post(handle_save),
        )
        .route("/verticals/{name}/collection/{id}", delete(handle_remove))
        .layer(cors)
        .with_state(state)
}

/// `lens serve`: bind `[server].bind` and serve until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let backend: Arc<dyn CollectionBackend> = Arc::new(SqliteBackend::open(config).await?);
    let classifier: Arc<dyn Classifier> = Arc::new(HttpClassifier::new(&config.analysis)?);
    let app = router(AppState::new(config, classifier, backend));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        bind = %config.server.bind,
        verticals = config.verticals.len(),
        "server listening"
    );
    println!("fieldlens listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
}

impl From<ErrorKind> for AppError {
    fn from(kind: ErrorKind) -> Self {
        let status = match &kind {
            ErrorKind::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorKind::Empty => StatusCode::BAD_REQUEST,
            ErrorKind::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::NetworkError(_)
            | ErrorKind::ServerError { .. }
            | ErrorKind::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
        };
        AppError {
            status,
            code: kind.code().to_string(),
            message: kind.message(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /verticals ============

async fn handle_verticals(State(state): State<AppState>) -> Json<Vec<VerticalSummary>> {
    Json(
        state
            .verticals
            .values()
            .map(|v| VerticalSummary::from(v.config.as_ref()))
            .collect(),
    )
}

// ============ POST /verticals/{name}/identify ============

async fn handle_identify(
    State(state): State<AppState>,
    Path(name): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<PresentedResult>, AppError> {
    let vertical = state.vertical(&name)?;

    let mut file = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| AppError {
        status: e.status(),
        code: "bad_multipart".to_string(),
        message: e.body_text(),
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let mime = field
            .content_type()
            .map(str::to_string)
            .filter(|m| m != "application/octet-stream")
            .or_else(|| {
                file_name
                    .as_deref()
                    .and_then(|n| guess_mime(std::path::Path::new(n)))
                    .map(str::to_string)
            })
            .unwrap_or_default();
        let bytes = field.bytes().await.map_err(|e| AppError {
            status: e.status(),
            code: "bad_multipart".to_string(),
            message: e.body_text(),
        })?;
        file = Some(MediaFile::new(file_name, mime, bytes.to_vec()));
        break;
    }
    let file = file.ok_or_else(|| bad_request("multipart field 'file' is required"))?;

    // One capture session per request; dropping it releases the preview
    // if the client goes away mid-submission.
    let driver = CaptureDriver::new(
        vertical.config.clone(),
        state.classifier.clone(),
        state.previews.clone(),
    )
    .map_err(internal)?;

    driver.select(&file).map_err(|e| match e {
        CaptureError::Rejected(kind) => AppError::from(kind),
        CaptureError::Transition(t) => internal(t.into()),
    })?;

    match driver.submit().await.map_err(|t| internal(t.into()))? {
        SubmitOutcome::Identified(presented) => Ok(Json(presented)),
        SubmitOutcome::Failed(kind) => Err(kind.into()),
        SubmitOutcome::Cancelled => Err(internal(anyhow::anyhow!("submission was cancelled"))),
    }
}

// ============ /verticals/{name}/collection ============

#[derive(Debug, Deserialize)]
struct ListParams {
    sort: Option<String>,
    q: Option<String>,
}

async fn handle_list(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<PresentedEntry>>, AppError> {
    let vertical = state.vertical(&name)?;
    let sort = match params.sort.as_deref() {
        Some(s) => s.parse::<SortOrder>().map_err(bad_request)?,
        None => SortOrder::default(),
    };
    let query = ListQuery {
        sort,
        filter: params.q,
    };
    let entries = vertical.store.list(&query).await.map_err(internal)?;
    Ok(Json(present_entries(&vertical.config, entries)))
}

#[derive(Serialize)]
struct SaveResponse {
    saved: bool,
    id: String,
}

async fn handle_save(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(result): Json<IdentificationResult>,
) -> Result<(StatusCode, Json<SaveResponse>), AppError> {
    let vertical = state.vertical(&name)?;
    if result.vertical != name {
        return Err(bad_request(format!(
            "result belongs to vertical '{}', not '{}'",
            result.vertical, name
        )));
    }
    if result.id.trim().is_empty() {
        return Err(bad_request("result id must not be empty"));
    }
    if !ConfidenceScale::Percent.contains(result.confidence_score) {
        return Err(bad_request(format!(
            "confidence_score {} is outside 0-100",
            result.confidence_score
        )));
    }
    let id = result.id.clone();
    let outcome = vertical.store.save(result).await.map_err(internal)?;
    let status = if outcome.is_new() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(SaveResponse {
            saved: outcome.is_new(),
            id,
        }),
    ))
}

#[derive(Serialize)]
struct RemoveResponse {
    removed: bool,
}

async fn handle_remove(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
) -> Result<Json<RemoveResponse>, AppError> {
    let vertical = state.vertical(&name)?;
    let removed = vertical.store.remove(&id).await.map_err(internal)?;
    Ok(Json(RemoveResponse { removed }))
}
