//! HTTP API module.
//!
//! Local status and read-only debugging endpoints.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
