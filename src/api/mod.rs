//! HTTP surface: handlers, router and OpenAPI documentation.

pub mod handlers;
pub mod router;

pub use router::create_router;
