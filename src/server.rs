//! HTTP surface: health, language listing, translation and metrics.

use crate::error::{AcquisitionError, InstallError, ServiceError, TranslateError};
use crate::service::TranslationService;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TranslationService>,
}

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TranslateResponse {
    #[serde(rename = "translatedText")]
    pub translated_text: String,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check).fallback(not_found))
        .route("/languages", get(list_languages).fallback(not_found))
        .route("/translate", post(translate).fallback(not_found))
        .route("/metrics", get(metrics).fallback(not_found))
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "engine": "argos-translate"}))
}

async fn list_languages(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({"languages": state.service.languages()}))
}

async fn metrics(State(state): State<AppState>) -> Response {
    Json(state.service.metrics()).into_response()
}

// The body is parsed by hand so clients that omit the Content-Type header
// still get through.
async fn translate(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<TranslateResponse>, ServiceError> {
    let request: TranslateRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            info!("Rejected translate request: {}", e);
            return Err(ServiceError::Validation("Invalid JSON".to_string()));
        }
    };

    let translated_text = state
        .service
        .translate(
            request.q.as_deref(),
            request.source.as_deref(),
            request.target.as_deref(),
        )
        .await?;

    Ok(Json(TranslateResponse { translated_text }))
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::NOT_FOUND, Json(json!({"error": "Not found"})))
}

pub fn status_for(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
        ServiceError::Acquisition(err) => match err {
            AcquisitionError::NoPathAvailable { .. } => StatusCode::NOT_FOUND,
            AcquisitionError::IndexUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AcquisitionError::Install(InstallError::DownloadFailed(_))
            | AcquisitionError::Install(InstallError::IntegrityCheckFailed(_)) => {
                StatusCode::BAD_GATEWAY
            }
            AcquisitionError::Install(InstallError::DiskWriteFailed(_))
            | AcquisitionError::Install(InstallError::Interrupted(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AcquisitionError::Cancelled => StatusCode::GATEWAY_TIMEOUT,
        },
        ServiceError::Translate(
            TranslateError::ModelLoadFailed(_)
            | TranslateError::InferenceFailed(_)
            | TranslateError::Interrupted(_),
        ) => StatusCode::INTERNAL_SERVER_ERROR,
        ServiceError::Translate(TranslateError::Cancelled) => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!("Request failed ({}): {}", self.kind(), self);
        }

        // "Invalid JSON" keeps the bare shape older clients match on.
        let body = match &self {
            ServiceError::Validation(message) if message == "Invalid JSON" => {
                json!({"error": message})
            }
            _ => json!({"error": self.to_string(), "kind": self.kind()}),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(ServiceError, StatusCode)> = vec![
            (
                ServiceError::Validation("No text provided".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                AcquisitionError::NoPathAvailable {
                    from: "xx".into(),
                    to: "yy".into(),
                }
                .into(),
                StatusCode::NOT_FOUND,
            ),
            (
                AcquisitionError::IndexUnavailable(IndexError("down".to_string())).into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                AcquisitionError::Install(InstallError::DownloadFailed("503".to_string())).into(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                AcquisitionError::Install(InstallError::IntegrityCheckFailed("hash".to_string()))
                    .into(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                AcquisitionError::Install(InstallError::DiskWriteFailed("full".to_string())).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (AcquisitionError::Cancelled.into(), StatusCode::GATEWAY_TIMEOUT),
            (
                TranslateError::ModelLoadFailed("corrupt".to_string()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                TranslateError::InferenceFailed("crash".to_string()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (TranslateError::Cancelled.into(), StatusCode::GATEWAY_TIMEOUT),
        ];

        for (err, expected) in cases {
            assert_eq!(status_for(&err), expected, "{}", err);
        }
    }

    #[test]
    fn test_translate_request_fields_are_optional() {
        let request: TranslateRequest = serde_json::from_str(r#"{"q":"hi"}"#).unwrap();

        assert_eq!(request.q.as_deref(), Some("hi"));
        assert!(request.source.is_none());
        assert!(request.target.is_none());
    }
}
