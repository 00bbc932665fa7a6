use crate::service::ServiceError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use vitals_common::types::{Metric, MetricType};
use vitals_common::validate::ValidationError;

/// Handler failure, rendered as a plain-text body with the matching status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("not exists")]
    NotFound,

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(v) => ApiError::BadRequest(v.to_string()),
            ServiceError::NotFound { .. } => ApiError::NotFound,
            ServiceError::Storage(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

fn parse_kind(kind: &str) -> Result<MetricType, ApiError> {
    kind.parse().map_err(ApiError::BadRequest)
}

pub async fn index(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    Ok(Html(state.pages.render_page().await?))
}

pub async fn update_json(State(state): State<AppState>, body: Bytes) -> Result<Json<Metric>, ApiError> {
    let metric: Metric = parse_json(&body)?;
    Ok(Json(state.updater.update(metric).await?))
}

pub async fn update_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<String, ApiError> {
    let metric = match parse_kind(&kind)? {
        MetricType::Gauge => {
            let v: f64 = value
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("gauge value {value:?} is not a number")))?;
            Metric::gauge(name, v)
        }
        _ => {
            let d: i64 = value
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("counter delta {value:?} is not an integer")))?;
            Metric::counter(name, d)
        }
    };
    Ok(state.updater.update(metric).await?.value_string())
}

pub async fn update_batch(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, ApiError> {
    let batch: Vec<Metric> = parse_json(&body)?;
    state.batch.batch_update(batch).await?;
    Ok(StatusCode::OK)
}

pub async fn value_json(State(state): State<AppState>, body: Bytes) -> Result<Json<Metric>, ApiError> {
    let key: Metric = parse_json(&body)?;
    Ok(Json(state.reader.read(key).await?))
}

pub async fn value_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let key = Metric::key(name, parse_kind(&kind)?);
    Ok(state.reader.read(key).await?.value_string())
}

pub async fn ping(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.health.ping().await?;
    Ok(StatusCode::OK)
}
