//! Route table and middleware stack.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::handlers::{
    alchemy_webhook_handler, chainhook_webhook_handler, health_handler, list_transactions_handler,
    liveness_handler, readiness_handler, ApiDoc,
};
use crate::app::AppState;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/alchemy", post(alchemy_webhook_handler))
        .route("/webhooks/chainhook", post(chainhook_webhook_handler))
        .route("/transactions", get(list_transactions_handler))
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
