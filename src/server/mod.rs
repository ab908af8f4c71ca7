//! HTTP surface over the fetch engine.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::State,
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::error::MixerError;
use crate::fetch::{FetchRequest, Fetcher};
use crate::types::{check_valid_dcids, Direction, EntityInfo};

/// Failures starting or running the listener.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured host is not an IP address.
    #[error("invalid listen address '{host}': {source}")]
    Address {
        /// Configured host.
        host: String,
        /// Parse failure.
        source: std::net::AddrParseError,
    },
    /// Binding or serving failed.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

type AppState = Arc<ServerState>;

struct ServerState {
    fetcher: Fetcher,
}

/// Binds the configured address and serves until Ctrl-C.
pub async fn serve(fetcher: Fetcher, config: &ServerConfig) -> Result<(), ServerError> {
    let host: IpAddr = config.host.parse().map_err(|source| ServerError::Address {
        host: config.host.clone(),
        source,
    })?;
    let addr = SocketAddr::from((host, config.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        partitions = ?fetcher.reader().partition_names(),
        allow_origins = ?config.allow_origins,
        "mixer listening"
    );
    axum::serve(listener, router(fetcher, &config.allow_origins))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Routes of the service.
pub fn router(fetcher: Fetcher, allow_origins: &[String]) -> Router {
    let state = Arc::new(ServerState { fetcher });
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/property/values", post(property_values_handler))
        .route("/v1/bulk/property/values", post(bulk_property_values_handler))
        .route("/v1/triples", post(triples_handler))
        .route("/v1/bulk/triples", post(bulk_triples_handler))
        .layer(build_cors_layer(allow_origins))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE]);
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            let trimmed = origin.trim().trim_end_matches('/');
            let value = HeaderValue::from_str(trimmed).ok().filter(|_| !trimmed.is_empty());
            if value.is_none() {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
            }
            value
        })
        .collect();
    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(allowed))
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(err) => tracing::error!(?err, "failed to listen for shutdown signal"),
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    partitions: Vec<String>,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        partitions: state.fetcher.reader().partition_names(),
    })
}

#[derive(Debug, Deserialize)]
struct PropertyValuesRequest {
    node: String,
    property: String,
    direction: String,
    #[serde(default)]
    limit: usize,
    #[serde(default)]
    next_token: String,
}

#[derive(Debug, Deserialize)]
struct BulkPropertyValuesRequest {
    nodes: Vec<String>,
    property: String,
    direction: String,
    #[serde(default)]
    limit: usize,
    #[serde(default)]
    next_token: String,
}

#[derive(Debug, Deserialize)]
struct TriplesRequest {
    node: String,
    direction: String,
    #[serde(default)]
    next_token: String,
}

#[derive(Debug, Deserialize)]
struct BulkTriplesRequest {
    nodes: Vec<String>,
    direction: String,
    #[serde(default)]
    next_token: String,
}

#[derive(Debug, Serialize)]
struct PropertyValuesResponse {
    values: Vec<EntityInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct NodeValues {
    node: String,
    values: Vec<EntityInfo>,
}

#[derive(Debug, Serialize)]
struct BulkPropertyValuesResponse {
    data: Vec<NodeValues>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct TriplesResponse {
    triples: BTreeMap<String, Vec<EntityInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<String>,
}

fn require_property(property: &str) -> Result<(), MixerError> {
    if property.is_empty() {
        return Err(MixerError::InvalidArgument(
            "missing required argument: property".into(),
        ));
    }
    Ok(())
}

async fn property_values_handler(
    State(state): State<AppState>,
    Json(payload): Json<PropertyValuesRequest>,
) -> Result<Json<PropertyValuesResponse>, AppError> {
    require_property(&payload.property)?;
    let direction: Direction = payload.direction.parse()?;
    check_valid_dcids(&[payload.node.as_str()])?;
    let request = FetchRequest::new([payload.node.as_str()], [payload.property.as_str()], direction)
        .with_limit(payload.limit)
        .with_token(payload.next_token);
    let result = state.fetcher.fetch(&request).await?;
    Ok(Json(PropertyValuesResponse {
        values: result.values(&payload.node, &payload.property),
        next_token: result.next_token,
    }))
}

async fn bulk_property_values_handler(
    State(state): State<AppState>,
    Json(payload): Json<BulkPropertyValuesRequest>,
) -> Result<Json<BulkPropertyValuesResponse>, AppError> {
    require_property(&payload.property)?;
    let direction: Direction = payload.direction.parse()?;
    check_valid_dcids(&payload.nodes)?;
    let request = FetchRequest::new(
        payload.nodes.iter().cloned(),
        [payload.property.as_str()],
        direction,
    )
    .with_limit(payload.limit)
    .with_token(payload.next_token);
    let result = state.fetcher.fetch(&request).await?;
    let data = payload
        .nodes
        .iter()
        .map(|node| NodeValues {
            node: node.clone(),
            values: result.values(node, &payload.property),
        })
        .collect();
    Ok(Json(BulkPropertyValuesResponse {
        data,
        next_token: result.next_token,
    }))
}

fn token_arg(token: &str) -> Option<&str> {
    (!token.is_empty()).then_some(token)
}

async fn triples_handler(
    State(state): State<AppState>,
    Json(payload): Json<TriplesRequest>,
) -> Result<Json<TriplesResponse>, AppError> {
    let direction: Direction = payload.direction.parse()?;
    check_valid_dcids(&[payload.node.as_str()])?;
    let mut triples = state
        .fetcher
        .fetch_triples(
            std::slice::from_ref(&payload.node),
            direction,
            token_arg(&payload.next_token),
        )
        .await?;
    let node = triples.nodes.pop().unwrap_or_default();
    Ok(Json(TriplesResponse {
        triples: node.triples,
        next_token: triples.next_token,
    }))
}

async fn bulk_triples_handler(
    State(state): State<AppState>,
    Json(payload): Json<BulkTriplesRequest>,
) -> Result<Json<crate::fetch::Triples>, AppError> {
    let direction: Direction = payload.direction.parse()?;
    check_valid_dcids(&payload.nodes)?;
    let triples = state
        .fetcher
        .fetch_triples(&payload.nodes, direction, token_arg(&payload.next_token))
        .await?;
    Ok(Json(triples))
}

#[derive(Debug)]
struct AppError(MixerError);

impl From<MixerError> for AppError {
    fn from(err: MixerError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            MixerError::InvalidArgument(_) | MixerError::InvalidToken(_) => {
                StatusCode::BAD_REQUEST
            }
            MixerError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            MixerError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            MixerError::Partition { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = Json(ErrorPayload {
            code: self.0.code(),
            message: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    code: &'static str,
    message: String,
}
