use crate::config::AppConfig;
use crate::error::{MapError, MapResult};
use crate::export;
use crate::html;
use crate::types::MapRequest;
use crate::workflow::{self, Resolution};
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub struct AppState {
    pub config: AppConfig,
}

#[derive(Deserialize)]
pub struct AreasQuery {
    level: Option<String>,
}

#[derive(Serialize)]
pub struct LevelEntry {
    name: String,
    field: String,
}

#[derive(Serialize)]
pub struct AreasResponse {
    level: String,
    field: String,
    areas: Vec<String>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    available_fields: Option<Vec<String>>,
}

/// Failure of one request, rendered as a JSON body.
pub enum ApiError {
    Map(MapError),
    Internal(String),
}

impl From<MapError> for ApiError {
    fn from(err: MapError) -> Self {
        ApiError::Map(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Map(err) => {
                let status = match &err {
                    MapError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    MapError::UnknownLevel(_) | MapError::UnknownArea { .. } => {
                        StatusCode::NOT_FOUND
                    }
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let available_fields = match &err {
                    MapError::MissingField { available, .. } => Some(available.clone()),
                    _ => None,
                };
                let body = ErrorBody {
                    error: err.to_string(),
                    available_fields,
                };
                (status, body)
            }
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: message,
                    available_fields: None,
                },
            ),
        };

        if status.is_server_error() {
            error!("{}", body.error);
        } else {
            warn!("{}", body.error);
        }
        (status, Json(body)).into_response()
    }
}

pub fn router(config: AppConfig) -> Router {
    let state = Arc::new(AppState { config });

    Router::new()
        .route("/", get(index_handler))
        .route("/api/levels", get(levels_handler))
        .route("/api/areas", get(areas_handler))
        .route("/api/map", get(preview_handler))
        .route("/api/map/download", get(download_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(config: AppConfig) -> Result<()> {
    let ip: IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid server host: {}", config.server.host))?;
    let addr = SocketAddr::new(ip, config.server.port);

    info!("Starting server on http://{}", addr);

    let app = router(config);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Runs dataset reads and rendering off the async workers.
async fn run_blocking<T, F>(task: F) -> Result<T, ApiError>
where
    F: FnOnce() -> MapResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ApiError::Internal(format!("worker failed: {}", e)))?
        .map_err(ApiError::from)
}

async fn index_handler() -> Html<&'static str> {
    Html(html::INDEX_HTML)
}

async fn levels_handler(State(state): State<Arc<AppState>>) -> Json<Vec<LevelEntry>> {
    let levels = state
        .config
        .levels
        .iter()
        .map(|level| LevelEntry {
            name: level.name.clone(),
            field: level.field.clone(),
        })
        .collect();
    Json(levels)
}

async fn areas_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AreasQuery>,
) -> Result<Json<AreasResponse>, ApiError> {
    let response = run_blocking(move || {
        let (level, areas) = workflow::list_areas(&state.config, params.level.as_deref())?;
        Ok(AreasResponse {
            level: level.name.clone(),
            field: level.field.clone(),
            areas,
        })
    })
    .await?;
    Ok(Json(response))
}

async fn preview_handler(
    State(state): State<Arc<AppState>>,
    Query(request): Query<MapRequest>,
) -> Result<Response, ApiError> {
    map_response(state, request, Resolution::Preview, "inline").await
}

async fn download_handler(
    State(state): State<Arc<AppState>>,
    Query(request): Query<MapRequest>,
) -> Result<Response, ApiError> {
    map_response(state, request, Resolution::Export, "attachment").await
}

async fn map_response(
    state: Arc<AppState>,
    request: MapRequest,
    resolution: Resolution,
    disposition: &str,
) -> Result<Response, ApiError> {
    let map = run_blocking(move || workflow::generate(&state.config, &request, resolution)).await?;
    let headers = [
        (header::CONTENT_TYPE, "image/png".to_string()),
        (
            header::CONTENT_DISPOSITION,
            export::content_disposition(disposition, &map.filename),
        ),
        (header::CACHE_CONTROL, "no-store".to_string()),
    ];
    Ok((headers, map.png).into_response())
}
