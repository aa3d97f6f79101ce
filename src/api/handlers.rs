//! HTTP handlers for webhook ingestion and the read endpoints.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::{error, warn};
use utoipa::{IntoParams, OpenApi};

use crate::app::AppState;
use crate::domain::{
    AppError, DatabaseError, ErrorDetail, ErrorResponse, ExternalServiceError, HealthResponse,
    HealthStatus, LedgerEntry, WebhookAck,
};
use crate::infra::ingest;
use crate::infra::webhook::SignatureError;

const SIGNATURE_HEADER: &str = "x-alchemy-signature";

/// Address-activity webhook receiver.
///
/// Signature verification runs over the raw bytes as received. A payload that
/// authenticates but fails to parse is logged and acknowledged with 200, so
/// the provider does not retry a body we will never accept.
pub async fn alchemy_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Authentication("missing signature header".to_string()))?;

    let network = match ingest::probe_network(&body) {
        Ok(network) => network,
        Err(e) => {
            warn!(error = %e, "Unparseable webhook body, acknowledging without processing");
            return Ok(Json(WebhookAck::ok()));
        }
    };

    if let Err(e) = state.validator.verify(&network, &body, signature) {
        return match e {
            SignatureError::MissingKey | SignatureError::InvalidSignature => {
                Err(AppError::Authentication(e.to_string()))
            }
            SignatureError::Parse(msg) => {
                warn!(error = %msg, "Signature verification setup failed, acknowledging");
                Ok(Json(WebhookAck::ok()))
            }
        };
    }

    let event = match ingest::classify(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(network = %network, error = %e, "Authenticated webhook failed to parse, acknowledging");
            return Ok(Json(WebhookAck::ok()));
        }
    };

    state.service.process_webhook_event(event).await?;
    Ok(Json(WebhookAck::ok()))
}

/// Stacks chainhook receiver.
///
/// Authenticated by a shared secret in the `Authorization` header when one is
/// configured; chainhook deliveries carry no HMAC.
pub async fn chainhook_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    if let Some(expected) = &state.chainhook_secret {
        let provided = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_start_matches("Bearer ").trim());
        if !provided.is_some_and(|p| secrets_match(expected, p)) {
            return Err(AppError::Authentication(
                "invalid chainhook authorization".to_string(),
            ));
        }
    }

    let payload: ingest::ChainhookPayload = serde_json::from_slice(&body)
        .map_err(|e| AppError::Deserialization(format!("parse error: {}", e)))?;

    state
        .service
        .process_webhook_event(ingest::WebhookEvent::ChainhookBlocks(payload))
        .await?;
    Ok(Json(WebhookAck::ok()))
}

/// Shared-secret comparison over SHA-256 digests, so byte-wise equality
/// cannot leak a secret prefix through timing.
fn secrets_match(expected: &str, provided: &str) -> bool {
    use sha2::{Digest, Sha256};
    Sha256::digest(expected.as_bytes()) == Sha256::digest(provided.as_bytes())
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct TransactionsQuery {
    /// Maximum number of rows to return (1-100, default 20).
    pub limit: Option<i64>,
}

/// Recent ledger rows, newest first.
#[utoipa::path(
    get,
    path = "/transactions",
    params(TransactionsQuery),
    responses(
        (status = 200, description = "Recent transactions", body = [LedgerEntry]),
        (status = 500, description = "Internal error", body = ErrorResponse)
    ),
    tag = "transactions"
)]
pub async fn list_transactions_handler(
    State(state): State<AppState>,
    Query(query): Query<TransactionsQuery>,
) -> Result<Json<Vec<LedgerEntry>>, AppError> {
    let limit = query.limit.unwrap_or(20);
    let entries = state.service.recent_transactions(limit).await?;
    Ok(Json(entries))
}

/// Aggregate health check.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 503, description = "Service unhealthy", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let health = state.service.health_check().await;
    let status = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(health)).into_response()
}

/// Liveness probe: the process is up.
#[utoipa::path(
    get,
    path = "/health/live",
    responses((status = 200, description = "Process is live")),
    tag = "health"
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: storage is reachable.
#[utoipa::path(
    get,
    path = "/health/ready",
    responses(
        (status = 200, description = "Ready to serve"),
        (status = 503, description = "Storage unreachable")
    ),
    tag = "health"
)]
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    match state.service.health_check().await.database {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        liveness_handler,
        readiness_handler,
        list_transactions_handler
    ),
    components(schemas(
        HealthResponse,
        HealthStatus,
        LedgerEntry,
        crate::domain::Chain,
        crate::domain::TransactionKind,
        crate::domain::TransactionStatus,
        ErrorResponse,
        ErrorDetail,
        WebhookAck
    )),
    tags(
        (name = "health", description = "Health and readiness probes"),
        (name = "transactions", description = "Transaction ledger reads")
    ),
    info(
        title = "Payment Reconciler API",
        version = "0.1.0",
        description = "Reconciles on-chain payment activity with invoices and payment links"
    )
)]
pub struct ApiDoc;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            AppError::Authentication(_) => (StatusCode::UNAUTHORIZED, "authentication_error"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::Deserialization(_) => (StatusCode::BAD_REQUEST, "deserialization_error"),
            AppError::NotSupported(_) => (StatusCode::BAD_REQUEST, "not_supported"),
            AppError::Database(DatabaseError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Database(DatabaseError::Connection(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "database_unavailable")
            }
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::ExternalService(ExternalServiceError::Timeout(_)) => {
                (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout")
            }
            AppError::ExternalService(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            AppError::Config(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        if status.is_server_error() {
            error!(error = %self, status = %status, "Request failed");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("hunter2", "hunter2"));
        assert!(!secrets_match("hunter2", "hunter3"));
        assert!(!secrets_match("hunter2", "hunter2 "));
        assert!(!secrets_match("hunter2", ""));
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = vec![
            (
                AppError::Authentication("bad sig".to_string()),
                StatusCode::UNAUTHORIZED,
            ),
            (
                AppError::Deserialization("bad json".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::Database(DatabaseError::NotFound("x".to_string())),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::Database(DatabaseError::Connection("down".to_string())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                AppError::ExternalService(ExternalServiceError::Timeout("rpc".to_string())),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                AppError::Internal("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
