//! Shared application state for the HTTP layer.

use std::sync::Arc;

use crate::app::service::ReconcilerService;
use crate::infra::webhook::SignatureValidator;

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ReconcilerService>,
    pub validator: Arc<SignatureValidator>,
    /// Shared secret expected in the `Authorization` header of chainhook
    /// deliveries. `None` disables the check.
    pub chainhook_secret: Option<String>,
}

impl AppState {
    pub fn new(
        service: Arc<ReconcilerService>,
        validator: Arc<SignatureValidator>,
        chainhook_secret: Option<String>,
    ) -> Self {
        Self {
            service,
            validator,
            chainhook_secret,
        }
    }
}
