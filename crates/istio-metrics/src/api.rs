//! HTTP API exposing a [`MetricsProvider`] as the traffic-metrics API
//!
//! Routes live under [`API_PREFIX`]:
//! - `GET /` lists the supported resource kinds
//! - `GET /namespaces/:namespace` returns namespace metrics
//! - `GET /namespaces/:namespace/:resource` aggregates a kind over a namespace
//! - `GET /namespaces/:namespace/:resource/:name` returns metrics for one resource
//! - `GET /namespaces/:namespace/:resource/:name/edges` returns edge metrics
//!
//! `/metrics` serves the provider's own Prometheus metrics.

use crate::context::RequestContext;
use crate::error::MetricsError;
use crate::models::{
    ApiResourceList, EdgeDirection, Interval, Query, ResourceDetails, ResourceKind,
    TrafficMetricsList,
};
use crate::provider::MetricsProvider;
use crate::registry;
use axum::{
    extract::{Path, Query as UrlQuery, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Path prefix of the traffic-metrics API group
pub const API_PREFIX: &str = "/apis/metrics.smi-spec.io/v1alpha1";

/// Window used when the request does not give one
pub const DEFAULT_WINDOW_SECS: u64 = 30;

/// Provider shared across request handlers
pub type SharedProvider = Arc<dyn MetricsProvider>;

/// Shared application state
#[derive(Clone)]
pub struct ApiState {
    pub provider: SharedProvider,
    /// Deadline applied to each request's context
    pub request_timeout: Option<Duration>,
}

impl ApiState {
    pub fn new(provider: SharedProvider) -> Self {
        Self {
            provider,
            request_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    fn context(&self) -> RequestContext {
        let ctx = RequestContext::background();
        match self.request_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }
}

/// Query-string parameters accepted by the metrics routes
#[derive(Debug, Default, Deserialize)]
pub struct MetricsParams {
    /// Interval start (RFC 3339)
    pub start: Option<DateTime<Utc>>,
    /// Interval end (RFC 3339), defaults to now
    pub end: Option<DateTime<Utc>>,
    /// Window in seconds, used when `start` is absent
    pub window: Option<u64>,
    /// Evaluation step in seconds
    pub step: Option<u64>,
    /// Edge direction, defaults to `from`
    pub direction: Option<EdgeDirection>,
    pub partner_kind: Option<String>,
    pub partner_namespace: Option<String>,
    /// Partner label selector, `key=value` pairs separated by commas
    pub selector: Option<String>,
}

impl MetricsParams {
    /// Resolve the requested interval relative to `now`
    pub fn interval(&self, now: DateTime<Utc>) -> Result<Interval, MetricsError> {
        let end = self.end.unwrap_or(now);
        let step = self.step.map(Duration::from_secs);

        match self.start {
            Some(start) => Interval::new(start, end, step),
            None => {
                let window = Duration::from_secs(self.window.unwrap_or(DEFAULT_WINDOW_SECS));
                let mut interval = Interval::ending_at(end, window)?;
                interval.step = step;
                Ok(interval)
            }
        }
    }

    pub fn details(&self) -> Result<ResourceDetails, MetricsError> {
        let selector = match self.selector.as_deref() {
            Some(selector) => parse_selector(selector)?,
            None => BTreeMap::new(),
        };

        Ok(ResourceDetails {
            direction: self.direction.unwrap_or_default(),
            partner_kind: self.partner_kind.clone(),
            partner_namespace: self.partner_namespace.clone(),
            selector,
        })
    }
}

/// Parse `app=cart,version=v2` into label pairs
fn parse_selector(selector: &str) -> Result<BTreeMap<String, String>, MetricsError> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(MetricsError::InvalidQuery(format!(
                "selector entry {:?} is not of the form key=value",
                pair
            ))),
        })
        .collect()
}

/// Error body returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Errors produced by the HTTP layer
#[derive(Debug)]
pub enum ApiError {
    /// The URL named a resource kind that is not served
    UnknownResource(String),
    Metrics(MetricsError),
}

impl From<MetricsError> for ApiError {
    fn from(err: MetricsError) -> Self {
        ApiError::Metrics(err)
    }
}

fn status_for(err: &MetricsError) -> StatusCode {
    match err {
        MetricsError::InvalidQuery(_) | MetricsError::InvalidInterval(_) => {
            StatusCode::BAD_REQUEST
        }
        MetricsError::EmptyResult { .. } => StatusCode::NOT_FOUND,
        MetricsError::Cancelled | MetricsError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        MetricsError::InvalidBackendAddress { .. }
        | MetricsError::UnsupportedBackendScheme { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        MetricsError::BackendUnavailable(_)
        | MetricsError::QueryRejected { .. }
        | MetricsError::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::UnknownResource(resource) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: format!("resource {:?} is not served by this API", resource),
                    code: "unknown_resource".to_string(),
                },
            ),
            ApiError::Metrics(err) => (
                status_for(&err),
                ErrorResponse {
                    error: err.to_string(),
                    code: err.code().to_string(),
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}

fn kind_for(resource: &str) -> Result<ResourceKind, ApiError> {
    registry::lookup_plural(resource)
        .map(|k| k.resource_kind())
        .ok_or_else(|| ApiError::UnknownResource(resource.to_string()))
}

async fn discovery(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<ApiResourceList>, ApiError> {
    let list = state.provider.supported_resources(&state.context()).await?;
    Ok(Json(list))
}

async fn namespace_metrics(
    State(state): State<Arc<ApiState>>,
    Path(namespace): Path<String>,
    UrlQuery(params): UrlQuery<MetricsParams>,
) -> Result<Json<TrafficMetricsList>, ApiError> {
    let query = Query::named(ResourceKind::Namespace, namespace.clone(), namespace);
    let interval = params.interval(Utc::now())?;

    let list = state
        .provider
        .resource_metrics(&state.context(), &query, &interval)
        .await?;
    Ok(Json(list))
}

async fn aggregate_metrics(
    State(state): State<Arc<ApiState>>,
    Path((namespace, resource)): Path<(String, String)>,
    UrlQuery(params): UrlQuery<MetricsParams>,
) -> Result<Json<TrafficMetricsList>, ApiError> {
    let query = Query::new(kind_for(&resource)?, namespace);
    let interval = params.interval(Utc::now())?;

    let list = state
        .provider
        .resource_metrics(&state.context(), &query, &interval)
        .await?;
    Ok(Json(list))
}

async fn resource_metrics(
    State(state): State<Arc<ApiState>>,
    Path((namespace, resource, name)): Path<(String, String, String)>,
    UrlQuery(params): UrlQuery<MetricsParams>,
) -> Result<Json<TrafficMetricsList>, ApiError> {
    let query = Query::named(kind_for(&resource)?, namespace, name);
    let interval = params.interval(Utc::now())?;

    let list = state
        .provider
        .resource_metrics(&state.context(), &query, &interval)
        .await?;
    Ok(Json(list))
}

async fn edge_metrics(
    State(state): State<Arc<ApiState>>,
    Path((namespace, resource, name)): Path<(String, String, String)>,
    UrlQuery(params): UrlQuery<MetricsParams>,
) -> Result<Json<TrafficMetricsList>, ApiError> {
    let query = Query::named(kind_for(&resource)?, namespace, name);
    let interval = params.interval(Utc::now())?;
    let details = params.details()?;

    let list = state
        .provider
        .edge_metrics(&state.context(), &query, &interval, &details)
        .await?;
    Ok(Json(list))
}

/// Prometheus metrics endpoint
async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %err, "Failed to encode Prometheus metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router for a provider
pub fn create_router(provider: SharedProvider) -> Router {
    create_router_with_state(ApiState::new(provider))
}

pub fn create_router_with_state(state: ApiState) -> Router {
    Router::new()
        .route(API_PREFIX, get(discovery))
        .route(
            &format!("{}/namespaces/:namespace", API_PREFIX),
            get(namespace_metrics),
        )
        .route(
            &format!("{}/namespaces/:namespace/:resource", API_PREFIX),
            get(aggregate_metrics),
        )
        .route(
            &format!("{}/namespaces/:namespace/:resource/:name", API_PREFIX),
            get(resource_metrics),
        )
        .route(
            &format!("{}/namespaces/:namespace/:resource/:name/edges", API_PREFIX),
            get(edge_metrics),
        )
        .route("/metrics", get(prometheus_metrics))
        .with_state(Arc::new(state))
}

/// Serve the API until the listener fails
pub async fn serve(port: u16, state: ApiState) -> anyhow::Result<()> {
    let app = create_router_with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting metrics API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
