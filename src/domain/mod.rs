//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    AppError, ConfigError, DatabaseError, ExternalServiceError, ValidationError,
};
pub use traits::{DocumentStore, NotificationSink, TransactionLedger, UserDirectory};
pub use types::{
    Chain, Document, DocumentStatus, DocumentType, ErrorDetail, ErrorResponse, HealthResponse,
    HealthStatus, LedgerEntry, LedgerUpsert, Notification, TransactionKind, TransactionStatus,
    TransferEvent, UpsertOutcome, User, WebhookAck,
};
