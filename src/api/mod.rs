//! HTTP surface of the maintenance core.

pub mod handlers;
pub mod routes;

pub use handlers::ApiError;
pub use routes::create_router;
